//! Full-duplex JSON-RPC peer over a framed byte stream.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::error::SweepError;
use crate::event::Event;

use super::{RpcError, RpcId, RpcMessage, RpcParams, RpcRequest, RpcResult};

/// Boxed future returned by method handlers and async callbacks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type HandlerFn = Arc<dyn Fn(RpcParams) -> BoxFuture<Result<Value, RpcError>> + Send + Sync>;
type PendingSlot = oneshot::Sender<Result<Value, RpcError>>;

/// Full-duplex JSON-RPC peer.
///
/// The peer owns a FIFO write queue drained by a writer loop and correlates
/// responses to outstanding [`RpcPeer::call`]s by id. Inbound requests are
/// dispatched to registered handlers, each in its own task; inbound
/// notifications (requests with a null id) are fanned out through the
/// notification [`Event`]. Cloning the peer clones a handle to the same
/// shared state.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    handlers: Mutex<HashMap<String, HandlerFn>>,
    pending: Mutex<HashMap<RpcId, PendingSlot>>,
    next_id: AtomicI64,
    write_tx: mpsc::UnboundedSender<RpcMessage>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<RpcMessage>>>,
    events: Event<RpcRequest>,
    terminated: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl RpcPeer {
    pub fn new() -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(PeerInner {
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                write_tx,
                write_rx: Mutex::new(Some(write_rx)),
                events: Event::new(),
                terminated: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Notifications received from the other peer (requests with a null id).
    pub fn events(&self) -> &Event<RpcRequest> {
        &self.inner.events
    }

    /// Stream of notifications received after this call; ends on
    /// termination.
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<RpcRequest> {
        self.inner.events.subscribe()
    }

    /// Register a handler for the given method name.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<(), SweepError>
    where
        F: Fn(RpcParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        if self.is_terminated() {
            return Err(SweepError::Terminated);
        }
        let handler: HandlerFn = Arc::new(move |params| Box::pin(handler(params)));
        self.inner
            .handlers
            .lock()
            .expect("handler lock poisoned")
            .insert(method.into(), handler);
        Ok(())
    }

    /// Call a remote method and await its response.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: impl Into<RpcParams>,
    ) -> Result<Value, SweepError> {
        let rx = self.call_slot(method, params)?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(SweepError::Rpc(error)),
            Err(_) => Err(SweepError::Terminated),
        }
    }

    /// Submit a request without keeping a completion slot.
    ///
    /// Any response the other peer produces for the allocated id is dropped
    /// silently. Used where a response cannot be awaited, e.g. in `Drop`
    /// implementations.
    pub fn call_forget(
        &self,
        method: impl Into<String>,
        params: impl Into<RpcParams>,
    ) -> Result<(), SweepError> {
        if self.is_terminated() {
            return Err(SweepError::Terminated);
        }
        let id = RpcId::Int(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.submit(RpcMessage::Request(RpcRequest {
            method: method.into(),
            params: params.into(),
            id: Some(id),
        }))
    }

    /// Send a notification (request with a null id); no response will ever
    /// arrive.
    pub fn notify(
        &self,
        method: impl Into<String>,
        params: impl Into<RpcParams>,
    ) -> Result<(), SweepError> {
        if self.is_terminated() {
            return Err(SweepError::Terminated);
        }
        self.submit(RpcMessage::Request(RpcRequest {
            method: method.into(),
            params: params.into(),
            id: None,
        }))
    }

    fn call_slot(
        &self,
        method: impl Into<String>,
        params: impl Into<RpcParams>,
    ) -> Result<oneshot::Receiver<Result<Value, RpcError>>, SweepError> {
        if self.is_terminated() {
            return Err(SweepError::Terminated);
        }
        let id = RpcId::Int(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id.clone(), tx);
        let submitted = self.submit(RpcMessage::Request(RpcRequest {
            method: method.into(),
            params: params.into(),
            id: Some(id.clone()),
        }));
        if submitted.is_err() {
            self.inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(SweepError::Terminated);
        }
        Ok(rx)
    }

    fn submit(&self, message: RpcMessage) -> Result<(), SweepError> {
        self.inner
            .write_tx
            .send(message)
            .map_err(|_| SweepError::Terminated)
    }

    /// Serve the peer over the provided byte streams until the stream
    /// closes or the peer is terminated. May be called at most once.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), SweepError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let write_rx = self
            .inner
            .write_rx
            .lock()
            .expect("write queue lock poisoned")
            .take()
            .ok_or(SweepError::AlreadyServing)?;
        // Subscribe before the liveness check so a concurrent terminate is
        // either observed here or wakes the loops.
        let read_shutdown = self.inner.shutdown.subscribe();
        let write_shutdown = self.inner.shutdown.subscribe();
        if self.is_terminated() {
            return Err(SweepError::Terminated);
        }

        let mut writer_task = tokio::spawn(write_loop(write_rx, writer, write_shutdown));
        let result = tokio::select! {
            result = self.read_loop(reader, read_shutdown) => Some(result),
            _ = &mut writer_task => None,
        };
        self.terminate();
        match result {
            // The reader finished first; let the writer drain and exit.
            Some(result) => {
                let _ = writer_task.await;
                result
            }
            None => Ok(()),
        }
    }

    /// Terminate the peer: resolve every pending call, cancel the
    /// notification stream, and stop the serve loops. Idempotent.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            std::mem::take(&mut *pending)
        };
        // Dropping the slots wakes every caller with a termination error.
        drop(pending);
        self.inner.events.cancel();
        let _ = self.inner.shutdown.send(true);
    }

    async fn read_loop<R>(
        &self,
        reader: R,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SweepError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let message = match RpcMessage::decode(&line) {
                Ok(message) => message,
                Err(response) => {
                    debug!("undecodable frame: {line}");
                    let _ = self.submit(RpcMessage::Error(response));
                    continue;
                }
            };
            if !self.handle_message(message) {
                break;
            }
        }
        Ok(())
    }

    /// Handle one inbound message; returns `false` on a protocol failure
    /// that must stop the reader.
    fn handle_message(&self, message: RpcMessage) -> bool {
        match message {
            RpcMessage::Request(request) => {
                if request.id.is_none() {
                    self.inner.events.fire(request.clone());
                }
                let handler = self
                    .inner
                    .handlers
                    .lock()
                    .expect("handler lock poisoned")
                    .get(&request.method)
                    .cloned();
                match handler {
                    Some(handler) => {
                        let peer = self.clone();
                        tokio::spawn(async move { peer.run_handler(request, handler).await });
                    }
                    None if request.id.is_some() => {
                        let error = RpcError::method_not_found(
                            Some(request.method.clone()),
                            request.id.clone(),
                        );
                        let _ = self.submit(RpcMessage::Error(error));
                    }
                    None => {}
                }
                true
            }
            RpcMessage::Result(result) => {
                let slot = result
                    .id
                    .as_ref()
                    .and_then(|id| self.take_pending(id));
                match slot {
                    Some(tx) => {
                        let _ = tx.send(Ok(result.result));
                    }
                    None => debug!("dropping response with no pending call: {:?}", result.id),
                }
                true
            }
            RpcMessage::Error(err) => match &err.id {
                None => {
                    // An unattributed error is a protocol failure.
                    error!("received error without id: {err}");
                    false
                }
                Some(id) => {
                    if let Some(tx) = self.take_pending(id) {
                        let _ = tx.send(Err(err));
                    }
                    true
                }
            },
        }
    }

    fn take_pending(&self, id: &RpcId) -> Option<PendingSlot> {
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id)
    }

    async fn run_handler(&self, request: RpcRequest, handler: HandlerFn) {
        let response = match handler(request.params.clone()).await {
            Ok(value) => RpcMessage::Result(RpcResult {
                result: value,
                id: request.id.clone(),
            }),
            Err(mut error) => {
                error.id = request.id.clone();
                error.data = Some(match error.data.take() {
                    Some(data) => format!("[{}] {data}", request.method),
                    None => format!("[{}]", request.method),
                });
                RpcMessage::Error(error)
            }
        };
        if request.id.is_some() {
            let _ = self.submit(response);
        }
    }
}

impl Default for RpcPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Drain submitted messages to the output stream.
///
/// Messages already queued when the shutdown fires are still written; each
/// batch of ready messages is followed by a single flush.
async fn write_loop<W>(
    mut rx: mpsc::UnboundedReceiver<RpcMessage>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if !write_batch(&mut writer, &mut rx, Some(message)).await {
            return;
        }
    }
    // Final drain of whatever was queued before the shutdown.
    if write_batch(&mut writer, &mut rx, None).await {
        let _ = writer.shutdown().await;
    }
}

async fn write_batch<W>(
    writer: &mut W,
    rx: &mut mpsc::UnboundedReceiver<RpcMessage>,
    first: Option<RpcMessage>,
) -> bool
where
    W: AsyncWrite + Unpin + Send,
{
    let mut batch: Vec<RpcMessage> = first.into_iter().collect();
    while let Ok(more) = rx.try_recv() {
        batch.push(more);
    }
    if batch.is_empty() {
        return true;
    }
    for message in batch {
        let line = match serde_json::to_string(&message.to_value()) {
            Ok(line) => line,
            Err(err) => {
                warn!("failed to serialize outbound message: {err}");
                continue;
            }
        };
        if writer.write_all(line.as_bytes()).await.is_err() {
            return false;
        }
        if writer.write_all(b"\n").await.is_err() {
            return false;
        }
    }
    writer.flush().await.is_ok()
}
