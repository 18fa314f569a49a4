mod support;

mod client;
mod rpc;
