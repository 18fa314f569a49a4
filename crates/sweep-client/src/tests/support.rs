use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::rpc::RpcPeer;

/// Write an executable shell script standing in for the sweep binary.
pub(super) fn write_fake_sweep(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("sweep");
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Two peers served over a connected socket pair.
pub(super) fn serve_peer_pair() -> (RpcPeer, RpcPeer) {
    let (a_stream, b_stream) = UnixStream::pair().expect("socket pair");
    let a = RpcPeer::new();
    let b = RpcPeer::new();
    for (peer, stream) in [(a.clone(), a_stream), (b.clone(), b_stream)] {
        let (reader, writer) = stream.into_split();
        tokio::spawn(async move {
            let _ = peer.serve(reader, writer).await;
        });
    }
    (a, b)
}

/// Scripted stand-in for the sweeper process: one peer is served for the
/// client under test, the other end stays raw so tests can assert exact
/// wire order and reply line by line.
pub(super) struct FakeSweeper {
    pub lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    pub writer: OwnedWriteHalf,
}

impl FakeSweeper {
    pub fn new() -> (RpcPeer, FakeSweeper) {
        let (client_stream, sweeper_stream) = UnixStream::pair().expect("socket pair");
        let peer = RpcPeer::new();
        let (reader, writer) = client_stream.into_split();
        let serve_peer = peer.clone();
        tokio::spawn(async move {
            let _ = serve_peer.serve(reader, writer).await;
        });
        let (reader, writer) = sweeper_stream.into_split();
        (
            peer,
            FakeSweeper {
                lines: BufReader::new(reader).lines(),
                writer,
            },
        )
    }

    /// Read the next frame the client put on the wire.
    pub async fn recv(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read frame")
            .expect("client closed the socket");
        serde_json::from_str(&line).expect("frame is not JSON")
    }

    pub async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write frame");
        self.writer.flush().await.expect("flush frame");
    }

    /// Reply to a request frame with a result.
    pub async fn reply(&mut self, request: &Value, result: Value) {
        let mut obj = Map::new();
        obj.insert("result".to_string(), result);
        obj.insert(
            "id".to_string(),
            request.get("id").cloned().expect("request has no id"),
        );
        self.send(Value::Object(obj)).await;
    }

    /// Send a notification to the client.
    pub async fn notify(&mut self, method: &str, params: Value) {
        let mut obj = Map::new();
        obj.insert("method".to_string(), Value::from(method));
        obj.insert("params".to_string(), params);
        self.send(Value::Object(obj)).await;
    }

    /// Read a request and acknowledge it in one step, asserting the method.
    pub async fn expect_call(&mut self, method: &str, result: Value) -> Value {
        let request = self.recv().await;
        assert_eq!(
            request.get("method").and_then(Value::as_str),
            Some(method),
            "unexpected frame: {request}"
        );
        self.reply(&request, result).await;
        request
    }
}

/// Brief yield so served peers and the event pump can make progress.
pub(super) async fn tick() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}
