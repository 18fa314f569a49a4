#![forbid(unsafe_code)]
//! Async client library for the [sweep] fuzzy finder.
//!
//! Sweep is a terminal UI process that displays a filterable list of items
//! and reports selections and key presses back to its controller. This
//! crate spawns sweep as a subprocess, connects to it over a Unix-domain
//! socket, and speaks newline-delimited JSON-RPC 2.0 in both directions.
//!
//! The layers, bottom up:
//!
//! - [`Event`] — single-producer/multi-consumer notification used for the
//!   peer's notification stream and the client's event stream;
//! - [`RpcPeer`] — full-duplex JSON-RPC peer with method dispatch,
//!   request/response correlation by id, and cooperative termination;
//! - [`Sweep`] — typed facade exposing the sweeper's operations: item
//!   upload with identity preservation, query and prompt control, key
//!   bindings, multi-window state, deferred field/view resolution, and
//!   quick-select sub-views;
//! - the view model ([`View`], [`Icon`], [`Flex`], [`Container`], [`Text`],
//!   [`Image`]) — declarative UI trees serialized to the sweeper's
//!   rendering protocol.
//!
//! ```rust,no_run
//! use sweep_client::{Candidate, Sweep, SweepEvent, SweepOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client: Sweep<Candidate> = Sweep::spawn(SweepOptions::new().prompt("pick")).await?;
//! let items = ["alpha", "beta", "gamma"]
//!     .into_iter()
//!     .map(|name| Candidate::new().target_push(name));
//! client.items_extend(items, None).await?;
//! let mut events = client.events();
//! while let Some(event) = events.next().await {
//!     if let SweepEvent::Select { items, .. } = event {
//!         println!("{items:?}");
//!         break;
//!     }
//! }
//! client.terminate().await;
//! # Ok(()) }
//! ```
//!
//! Items that implement [`SweepItem`] with a Candidate shape are tagged
//! with their store index before upload, so selection events hand back the
//! very values that were submitted; plain strings and raw JSON values pass
//! through the sweeper opaquely.
//!
//! [sweep]: https://github.com/aslpavel/sweep

mod candidate;
mod client;
mod error;
mod event;
mod process;
mod rpc;
mod view;

pub use candidate::{Candidate, CandidateWrapped, Field, ItemJson, SweepItem};
pub use client::{
    sweep, Bind, BindHandler, FieldResolver, NoMatch, QuickSelect, RenderSuppressGuard, Size,
    Sweep, SweepEvent, SweepEvents, SweepOptions, SweepSize, SweepWindow, SweepWindowKind,
    ViewResolver, WindowId, ITEM_INDEX_KEY, QUICK_SELECT_INDEX_KEY,
};
pub use error::SweepError;
pub use event::Event;
pub use rpc::{
    BoxFuture, RpcError, RpcId, RpcMessage, RpcParams, RpcPeer, RpcRequest, RpcResult,
    CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS, CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND,
    CODE_PARSE_ERROR,
};
pub use view::{
    Align, Container, Direction, Edges, Flex, FlexChild, Icon, IconFrame, Image, Justify, Text,
    View, ViewRef,
};

#[cfg(test)]
mod tests;
