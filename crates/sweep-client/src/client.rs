//! Typed client facade over the RPC peer: windows, items, query, prompt,
//! bindings, resolvers, quick-select, and the sweep event stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::candidate::{Field, ItemJson, SweepItem};
use crate::error::SweepError;
use crate::event::Event;
use crate::process;
use crate::rpc::{BoxFuture, RpcParams, RpcPeer, RpcRequest};
use crate::view::{Icon, View, ViewRef};

/// Reserved extras key carrying the store index of an item.
pub const ITEM_INDEX_KEY: &str = "_sweep_item_index";
/// Reserved extras key used by quick-select sub-views.
pub const QUICK_SELECT_INDEX_KEY: &str = "__sweep_item_index";

/// Identifier of a logical sub-view inside the sweeper.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum WindowId {
    Str(String),
    Int(u64),
}

impl WindowId {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            WindowId::Str(uid) => Value::from(uid.as_str()),
            WindowId::Int(uid) => Value::from(*uid),
        }
    }

    pub(crate) fn from_value(value: &Value) -> Option<WindowId> {
        match value {
            Value::String(uid) => Some(WindowId::Str(uid.clone())),
            Value::Number(uid) => uid.as_u64().map(WindowId::Int),
            _ => None,
        }
    }
}

impl Default for WindowId {
    fn default() -> Self {
        WindowId::Str("default".to_string())
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowId::Str(uid) => write!(f, "{uid}"),
            WindowId::Int(uid) => write!(f, "{uid}"),
        }
    }
}

impl From<&str> for WindowId {
    fn from(uid: &str) -> Self {
        WindowId::Str(uid.to_string())
    }
}

impl From<String> for WindowId {
    fn from(uid: String) -> Self {
        WindowId::Str(uid)
    }
}

impl From<u64> for WindowId {
    fn from(uid: u64) -> Self {
        WindowId::Int(uid)
    }
}

/// What the sweeper returns on enter when nothing matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoMatch {
    Nothing,
    Input,
}

impl NoMatch {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            NoMatch::Nothing => "nothing",
            NoMatch::Input => "input",
        }
    }
}

/// Async callback producing a [`Field`] for an unresolved reference.
pub type FieldResolver = Arc<dyn Fn(i64) -> BoxFuture<Option<Field>> + Send + Sync>;
/// Async callback producing a [`View`] for an unresolved reference.
pub type ViewResolver = Arc<dyn Fn(i64) -> BoxFuture<Option<View>> + Send + Sync>;
/// Callback fired when a bound key chord triggers; a returned item is
/// treated as if the user selected it.
pub type BindHandler<I> = Arc<dyn Fn(Sweep<I>, String) -> BoxFuture<Option<I>> + Send + Sync>;

/// Key chord to tag mapping with an optional local handler.
#[derive(Clone)]
pub struct Bind<I> {
    pub key: String,
    pub tag: String,
    pub desc: String,
    pub handler: Option<BindHandler<I>>,
}

impl<I> Bind<I> {
    pub fn new(key: impl Into<String>, tag: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tag: tag.into(),
            desc: desc.into(),
            handler: None,
        }
    }

    pub fn handler(mut self, handler: BindHandler<I>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl<I> std::fmt::Debug for Bind<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bind")
            .field("key", &self.key)
            .field("tag", &self.tag)
            .field("desc", &self.desc)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Dimensions in whole units (terminal cells or pixels).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Size {
    pub height: u64,
    pub width: u64,
}

impl Size {
    pub(crate) fn from_json(value: &Value) -> Option<Size> {
        match value {
            Value::Array(list) => match list.as_slice() {
                [height, width] => Some(Size {
                    height: height.as_u64()?,
                    width: width.as_u64()?,
                }),
                _ => None,
            },
            Value::Object(obj) => Some(Size {
                height: obj.get("height")?.as_u64()?,
                width: obj.get("width")?.as_u64()?,
            }),
            _ => None,
        }
    }
}

/// Geometry of the sweeper UI reported on resize.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepSize {
    pub cells: Size,
    pub pixels: Size,
    pub pixels_per_cell: Size,
}

impl SweepSize {
    pub(crate) fn from_json(value: &Value) -> Option<SweepSize> {
        let obj = value.as_object()?;
        Some(SweepSize {
            cells: Size::from_json(obj.get("cells")?)?,
            pixels: Size::from_json(obj.get("pixels")?)?,
            pixels_per_cell: Size::from_json(obj.get("pixels_per_cell")?)?,
        })
    }

    /// Convert a size expressed in cells to pixels.
    pub fn cells_in_pixels(&self, cells: Size) -> Size {
        Size {
            height: self.pixels_per_cell.height * cells.height,
            width: self.pixels_per_cell.width * cells.width,
        }
    }
}

/// Window lifecycle change reported by the sweeper.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SweepWindowKind {
    Opened,
    Closed,
    Switched,
}

/// Window event payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepWindow {
    pub kind: SweepWindowKind,
    pub uid_from: Option<WindowId>,
    pub uid_to: WindowId,
}

/// Event produced by the sweeper and surfaced on the client stream.
#[derive(Clone, Debug)]
pub enum SweepEvent<I> {
    /// The user selected one or more items.
    Select { uid: WindowId, items: Vec<I> },
    /// A bound key chord without a local handler fired.
    Bind {
        uid: WindowId,
        tag: String,
        key: Option<String>,
    },
    /// The UI geometry changed.
    Resize(SweepSize),
    /// A window was opened, closed, or switched to.
    Window(SweepWindow),
}

/// Configuration of a [`Sweep`] client.
///
/// Every option maps one-to-one to a sweeper command line flag; the client
/// appends `--rpc` and the chosen `--io-socket` mode on spawn.
#[derive(Clone)]
pub struct SweepOptions {
    /// Sweeper command, program first.
    pub sweep: Vec<String>,
    pub prompt: String,
    pub preview: Option<String>,
    pub query: Option<String>,
    pub nth: Option<String>,
    pub delimiter: Option<String>,
    pub theme: Option<String>,
    pub scorer: Option<String>,
    pub tty: Option<String>,
    pub log: Option<String>,
    pub title: Option<String>,
    pub keep_order: bool,
    pub no_match: Option<NoMatch>,
    pub layout: Option<String>,
    /// Use an on-disk rendezvous socket instead of an inherited socket pair.
    pub tmp_socket: bool,
    pub window_uid: Option<WindowId>,
    pub field_resolver: Option<FieldResolver>,
    pub view_resolver: Option<ViewResolver>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            sweep: vec!["sweep".to_string()],
            prompt: "INPUT".to_string(),
            preview: None,
            query: None,
            nth: None,
            delimiter: None,
            theme: None,
            scorer: None,
            tty: None,
            log: None,
            title: None,
            keep_order: false,
            no_match: None,
            layout: None,
            tmp_socket: false,
            window_uid: None,
            field_resolver: None,
            view_resolver: None,
        }
    }
}

impl SweepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweep(mut self, sweep: Vec<String>) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn nth(mut self, nth: impl Into<String>) -> Self {
        self.nth = Some(nth.into());
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn scorer(mut self, scorer: impl Into<String>) -> Self {
        self.scorer = Some(scorer.into());
        self
    }

    pub fn tty(mut self, tty: impl Into<String>) -> Self {
        self.tty = Some(tty.into());
        self
    }

    pub fn log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn keep_order(mut self, keep_order: bool) -> Self {
        self.keep_order = keep_order;
        self
    }

    pub fn no_match(mut self, no_match: NoMatch) -> Self {
        self.no_match = Some(no_match);
        self
    }

    pub fn layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn tmp_socket(mut self, tmp_socket: bool) -> Self {
        self.tmp_socket = tmp_socket;
        self
    }

    pub fn window_uid(mut self, window_uid: impl Into<WindowId>) -> Self {
        self.window_uid = Some(window_uid.into());
        self
    }

    pub fn field_resolver(mut self, resolver: FieldResolver) -> Self {
        self.field_resolver = Some(resolver);
        self
    }

    pub fn view_resolver(mut self, resolver: ViewResolver) -> Self {
        self.view_resolver = Some(resolver);
        self
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--rpc".to_string()];
        args.extend(["--prompt".to_string(), self.prompt.clone()]);
        let flags = [
            ("--query", &self.query),
            ("--nth", &self.nth),
            ("--delimiter", &self.delimiter),
            ("--theme", &self.theme),
            ("--scorer", &self.scorer),
            ("--tty", &self.tty),
            ("--log", &self.log),
            ("--title", &self.title),
            ("--layout", &self.layout),
            ("--preview", &self.preview),
        ];
        for (flag, value) in flags {
            if let Some(value) = value {
                args.extend([flag.to_string(), value.clone()]);
            }
        }
        if self.keep_order {
            args.push("--keep-order".to_string());
        }
        if let Some(no_match) = self.no_match {
            args.extend(["--no-match".to_string(), no_match.as_str().to_string()]);
        }
        if let Some(window_uid) = &self.window_uid {
            args.extend(["--window-uid".to_string(), window_uid.to_string()]);
        }
        args
    }
}

impl std::fmt::Debug for SweepOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepOptions")
            .field("sweep", &self.sweep)
            .field("prompt", &self.prompt)
            .field("tmp_socket", &self.tmp_socket)
            .field("window_uid", &self.window_uid)
            .field("field_resolver", &self.field_resolver.is_some())
            .field("view_resolver", &self.view_resolver.is_some())
            .finish_non_exhaustive()
    }
}

/// Quick-select sub-view parameters.
#[derive(Clone, Debug, Default)]
pub struct QuickSelect {
    pub prompt: Option<String>,
    pub prompt_icon: Option<Icon>,
    pub keep_order: Option<bool>,
    pub theme: Option<String>,
    pub scorer: Option<String>,
    pub window_uid: Option<WindowId>,
}

impl QuickSelect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn prompt_icon(mut self, icon: Icon) -> Self {
        self.prompt_icon = Some(icon);
        self
    }

    pub fn keep_order(mut self, keep_order: bool) -> Self {
        self.keep_order = Some(keep_order);
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn scorer(mut self, scorer: impl Into<String>) -> Self {
        self.scorer = Some(scorer.into());
        self
    }

    pub fn window_uid(mut self, window_uid: impl Into<WindowId>) -> Self {
        self.window_uid = Some(window_uid.into());
        self
    }
}

struct SweepInner<I> {
    peer: RpcPeer,
    child: Mutex<Option<Child>>,
    events: Event<SweepEvent<I>>,
    size: Mutex<Option<SweepSize>>,
    size_event: Event<SweepSize>,
    current_window: Mutex<WindowId>,
    items: Mutex<HashMap<WindowId, Vec<I>>>,
    binds: Mutex<HashMap<String, BindHandler<I>>>,
    field_resolver: Mutex<Option<FieldResolver>>,
    field_resolved: Mutex<HashSet<i64>>,
    view_resolver: Mutex<Option<ViewResolver>>,
    view_resolved: Mutex<HashSet<i64>>,
    quick_select_seq: AtomicU64,
}

/// Client handle for a running sweep process.
///
/// The handle is cheap to clone; all clones share the same peer, item
/// stores, and event stream. Items submitted through [`Sweep::items_extend`]
/// are returned by identity on selection events as long as they are
/// Candidate-shaped (see [`SweepItem`]); other items pass through the
/// sweeper opaquely.
pub struct Sweep<I> {
    inner: Arc<SweepInner<I>>,
}

impl<I> Clone for Sweep<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I> std::fmt::Debug for Sweep<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweep")
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

/// Stream of [`SweepEvent`]s; ends when the client terminates.
pub struct SweepEvents<I> {
    rx: tokio::sync::mpsc::UnboundedReceiver<SweepEvent<I>>,
}

impl<I> SweepEvents<I> {
    pub async fn next(&mut self) -> Option<SweepEvent<I>> {
        self.rx.recv().await
    }
}

/// Scoped rendering suppression; the release message is sent on drop.
///
/// Acquired through [`Sweep::render_suppress`]. Dropping the guard submits
/// `render_suppress {suppress: false}` unless the peer already terminated;
/// the FIFO write queue orders the release after every update made inside
/// the scope.
#[must_use = "rendering stays suppressed for as long as the guard lives"]
pub struct RenderSuppressGuard {
    peer: RpcPeer,
    uid: WindowId,
}

impl Drop for RenderSuppressGuard {
    fn drop(&mut self) {
        if self.peer.is_terminated() {
            return;
        }
        let mut params = Map::new();
        params.insert("uid".to_string(), self.uid.to_value());
        params.insert("suppress".to_string(), Value::from(false));
        if let Err(err) = self
            .peer
            .call_forget("render_suppress", Value::Object(params))
        {
            debug!("failed to release render suppression: {err}");
        }
    }
}

impl<I> Sweep<I>
where
    I: SweepItem + Clone + Send + Sync + 'static,
{
    /// Spawn the sweeper, connect the control socket, and start serving the
    /// peer. The returned handle owns the child process.
    pub async fn spawn(options: SweepOptions) -> Result<Sweep<I>, SweepError> {
        let args = options.to_args();
        let (program, extra_args) = match options.sweep.split_first() {
            Some((program, extra)) => (program.clone(), extra.to_vec()),
            None => ("sweep".to_string(), Vec::new()),
        };
        let mut all_args = extra_args;
        all_args.extend(args);

        let (child, stream) = if options.tmp_socket {
            process::spawn_tmp_socket(&program, &all_args).await?
        } else {
            process::spawn_pair_socket(&program, &all_args)?
        };

        let peer = RpcPeer::new();
        let (read_half, write_half) = stream.into_split();
        let serve_peer = peer.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_peer.serve(read_half, write_half).await {
                debug!("rpc serve finished with error: {err}");
            }
        });

        Ok(Self::attach_inner(peer, Some(child), options))
    }

    /// Build a client over an already served peer. Used by tests to drive
    /// the client against an in-process sweeper.
    #[doc(hidden)]
    pub fn attach(peer: RpcPeer, options: SweepOptions) -> Sweep<I> {
        Self::attach_inner(peer, None, options)
    }

    fn attach_inner(peer: RpcPeer, child: Option<Child>, options: SweepOptions) -> Sweep<I> {
        let sweep = Sweep {
            inner: Arc::new(SweepInner {
                peer,
                child: Mutex::new(child),
                events: Event::new(),
                size: Mutex::new(None),
                size_event: Event::new(),
                current_window: Mutex::new(options.window_uid.clone().unwrap_or_default()),
                items: Mutex::new(HashMap::new()),
                binds: Mutex::new(HashMap::new()),
                field_resolver: Mutex::new(options.field_resolver.clone()),
                field_resolved: Mutex::new(HashSet::new()),
                view_resolver: Mutex::new(options.view_resolver.clone()),
                view_resolved: Mutex::new(HashSet::new()),
                quick_select_seq: AtomicU64::new(0),
            }),
        };
        sweep.spawn_event_pump();
        sweep
    }

    /// Forward peer notifications into the client event stream.
    ///
    /// The pump holds only a weak reference so dropping the last user
    /// handle ends it (and, through `kill_on_drop`, the child).
    fn spawn_event_pump(&self) {
        let mut notifications = self.inner.peer.notifications();
        let weak: Weak<SweepInner<I>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(request) = notifications.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let sweep = Sweep { inner };
                sweep.dispatch(request).await;
            }
            if let Some(inner) = weak.upgrade() {
                inner.events.cancel();
                inner.size_event.cancel();
            }
        });
    }

    async fn dispatch(&self, request: RpcRequest) {
        let RpcParams::Map(params) = request.params else {
            return;
        };
        match request.method.as_str() {
            "select" => {
                let uid = self.uid_from_params(&params);
                let items = params
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let items = items
                    .into_iter()
                    .filter_map(|item| self.item_get(&uid, item))
                    .collect();
                self.inner.events.fire(SweepEvent::Select { uid, items });
            }
            "bind" => {
                let uid = self.uid_from_params(&params);
                let tag = params
                    .get("tag")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let key = params
                    .get("key")
                    .and_then(Value::as_str)
                    .map(String::from);
                let handler = self
                    .inner
                    .binds
                    .lock()
                    .expect("binds lock poisoned")
                    .get(&tag)
                    .cloned();
                match handler {
                    Some(handler) => {
                        if let Some(item) = handler(self.clone(), tag).await {
                            self.inner.events.fire(SweepEvent::Select {
                                uid,
                                items: vec![item],
                            });
                        }
                    }
                    None => {
                        self.inner.events.fire(SweepEvent::Bind { uid, tag, key });
                    }
                }
            }
            "resize" => {
                let Some(size) = SweepSize::from_json(&Value::Object(params)) else {
                    warn!("invalid resize notification");
                    return;
                };
                *self.inner.size.lock().expect("size lock poisoned") = Some(size);
                self.inner.size_event.fire(size);
                self.inner.events.fire(SweepEvent::Resize(size));
            }
            "window_opened" | "window_closed" | "window_switched" => {
                let Some(uid_to) = params.get("to").and_then(WindowId::from_value) else {
                    warn!("window notification without `to`: {}", request.method);
                    return;
                };
                let uid_from = params.get("from").and_then(WindowId::from_value);
                let kind = match request.method.as_str() {
                    "window_opened" => SweepWindowKind::Opened,
                    "window_closed" => SweepWindowKind::Closed,
                    _ => SweepWindowKind::Switched,
                };
                match kind {
                    SweepWindowKind::Switched => {
                        *self
                            .inner
                            .current_window
                            .lock()
                            .expect("window lock poisoned") = uid_to.clone();
                    }
                    SweepWindowKind::Closed => {
                        if let Some(closed) = &uid_from {
                            self.inner
                                .items
                                .lock()
                                .expect("items lock poisoned")
                                .remove(closed);
                        }
                    }
                    SweepWindowKind::Opened => {}
                }
                self.inner.events.fire(SweepEvent::Window(SweepWindow {
                    kind,
                    uid_from,
                    uid_to,
                }));
            }
            "field_missing" => {
                if let Some(reference) = params.get("ref").and_then(Value::as_i64) {
                    self.resolve_field_missing(reference).await;
                }
            }
            "view_missing" => {
                if let Some(reference) = params.get("ref").and_then(Value::as_i64) {
                    self.resolve_view_missing(reference).await;
                }
            }
            method => debug!("unhandled sweep notification: {method}"),
        }
    }

    fn uid_from_params(&self, params: &Map<String, Value>) -> WindowId {
        params
            .get("uid")
            .and_then(WindowId::from_value)
            .unwrap_or_else(|| self.current_window())
    }

    /// Restore the caller's item from its wire form.
    fn item_get(&self, uid: &WindowId, item: Value) -> Option<I> {
        if let Some(index) = item.get(ITEM_INDEX_KEY).and_then(Value::as_u64) {
            let stores = self.inner.items.lock().expect("items lock poisoned");
            if let Some(stored) = stores
                .get(uid)
                .and_then(|store| store.get(index as usize))
            {
                return Some(stored.clone());
            }
        }
        I::from_verbatim(item)
    }

    /// Currently tracked window id, updated on `window_switched`.
    pub fn current_window(&self) -> WindowId {
        self.inner
            .current_window
            .lock()
            .expect("window lock poisoned")
            .clone()
    }

    fn resolve_uid(&self, uid: Option<WindowId>) -> WindowId {
        uid.unwrap_or_else(|| self.current_window())
    }

    fn uid_params(&self, uid: Option<WindowId>) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("uid".to_string(), self.resolve_uid(uid).to_value());
        params
    }

    async fn call(&self, method: &str, params: Map<String, Value>) -> Result<Value, SweepError> {
        self.inner.peer.call(method, Value::Object(params)).await
    }

    /// Stream of sweep events; every concurrent consumer receives every
    /// event fired after its `events()` call.
    pub fn events(&self) -> SweepEvents<I> {
        SweepEvents {
            rx: self.inner.events.subscribe(),
        }
    }

    /// Terminate the client: stop the peer, close the socket, and await
    /// the sweeper's exit. Idempotent.
    pub async fn terminate(&self) {
        self.inner.peer.terminate();
        let child = self
            .inner
            .child
            .lock()
            .expect("child lock poisoned")
            .take();
        if let Some(mut child) = child {
            if let Err(err) = child.wait().await {
                warn!("failed to await sweep exit: {err}");
            }
        }
    }

    /// UI geometry; waits for the first resize notification when none has
    /// arrived yet.
    pub async fn size(&self) -> Result<SweepSize, SweepError> {
        let next = self.inner.size_event.next();
        if let Some(size) = *self.inner.size.lock().expect("size lock poisoned") {
            return Ok(size);
        }
        next.await.ok_or(SweepError::Terminated)
    }

    /// Append items to the window's store and upload them to the sweeper.
    ///
    /// Uploads are batched under an adaptive time budget: the first batch is
    /// cut after 50ms of preparation, and the budget grows by 1.25x per
    /// batch so large collections converge to few round trips.
    pub async fn items_extend(
        &self,
        items: impl IntoIterator<Item = I>,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        let uid = self.resolve_uid(uid);
        let mut batch: Vec<Value> = Vec::new();
        let mut time_start = Instant::now();
        let mut time_limit = Duration::from_millis(50);
        for item in items {
            batch.push(self.item_store(&uid, item));
            if time_start.elapsed() >= time_limit {
                time_start = Instant::now();
                time_limit = time_limit.mul_f64(1.25);
                self.items_extend_send(&uid, std::mem::take(&mut batch))
                    .await?;
            }
        }
        if !batch.is_empty() {
            self.items_extend_send(&uid, batch).await?;
        }
        Ok(())
    }

    /// Store one item and return its wire form, index-stamped when
    /// Candidate-shaped.
    fn item_store(&self, uid: &WindowId, item: I) -> Value {
        let shape = item.item_json();
        let mut stores = self.inner.items.lock().expect("items lock poisoned");
        let store = stores.entry(uid.clone()).or_default();
        let index = store.len();
        store.push(item);
        match shape {
            ItemJson::Candidate(candidate) => candidate
                .extra_update(ITEM_INDEX_KEY, Value::from(index))
                .to_json(),
            ItemJson::Verbatim(value) => value,
        }
    }

    async fn items_extend_send(&self, uid: &WindowId, batch: Vec<Value>) -> Result<(), SweepError> {
        let mut params = Map::new();
        params.insert("uid".to_string(), uid.to_value());
        params.insert("items".to_string(), Value::Array(batch));
        self.call("items_extend", params).await?;
        Ok(())
    }

    /// Replace the item at `index` in the window's store and on the
    /// sweeper side.
    pub async fn item_update(
        &self,
        index: usize,
        item: I,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        let uid = self.resolve_uid(uid);
        let value = {
            let mut stores = self.inner.items.lock().expect("items lock poisoned");
            let store = stores.entry(uid.clone()).or_default();
            if index >= store.len() {
                return Err(SweepError::IndexOutOfRange {
                    index,
                    len: store.len(),
                });
            }
            let shape = item.item_json();
            store[index] = item;
            match shape {
                ItemJson::Candidate(candidate) => candidate
                    .extra_update(ITEM_INDEX_KEY, Value::from(index))
                    .to_json(),
                ItemJson::Verbatim(value) => value,
            }
        };
        let mut params = self.uid_params(Some(uid));
        params.insert("index".to_string(), Value::from(index));
        params.insert("item".to_string(), value);
        self.call("item_update", params).await?;
        Ok(())
    }

    /// Clear the sweeper-side item list. The client store survives until
    /// the window closes, so earlier selections keep resolving.
    pub async fn items_clear(&self, uid: Option<WindowId>) -> Result<(), SweepError> {
        self.call("items_clear", self.uid_params(uid)).await?;
        Ok(())
    }

    /// Item currently under the cursor, if any.
    pub async fn items_current(&self, uid: Option<WindowId>) -> Result<Option<I>, SweepError> {
        let uid = self.resolve_uid(uid);
        let value = self
            .call("items_current", self.uid_params(Some(uid.clone())))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(self.item_get(&uid, value))
    }

    /// User-marked items in marking order.
    pub async fn items_marked(&self, uid: Option<WindowId>) -> Result<Vec<I>, SweepError> {
        let uid = self.resolve_uid(uid);
        let value = self
            .call("items_marked", self.uid_params(Some(uid.clone())))
            .await?;
        let items = match value {
            Value::Array(items) => items,
            value => {
                return Err(SweepError::UnexpectedResponse {
                    method: "items_marked",
                    value,
                })
            }
        };
        Ok(items
            .into_iter()
            .filter_map(|item| self.item_get(&uid, item))
            .collect())
    }

    /// Move the cursor to an absolute position.
    pub async fn cursor_set(&self, position: usize, uid: Option<WindowId>) -> Result<(), SweepError> {
        let mut params = self.uid_params(uid);
        params.insert("position".to_string(), Value::from(position));
        self.call("cursor_set", params).await?;
        Ok(())
    }

    /// Set the query string used to filter items.
    pub async fn query_set(&self, query: &str, uid: Option<WindowId>) -> Result<(), SweepError> {
        let mut params = self.uid_params(uid);
        params.insert("query".to_string(), Value::from(query));
        self.call("query_set", params).await?;
        Ok(())
    }

    /// Get the query string used to filter items.
    pub async fn query_get(&self, uid: Option<WindowId>) -> Result<String, SweepError> {
        let value = self.call("query_get", self.uid_params(uid)).await?;
        match value {
            Value::String(query) => Ok(query),
            value => Err(SweepError::UnexpectedResponse {
                method: "query_get",
                value,
            }),
        }
    }

    /// Update the prompt label and/or icon; an empty update is a no-op.
    pub async fn prompt_set(
        &self,
        prompt: Option<&str>,
        icon: Option<&Icon>,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        if prompt.is_none() && icon.is_none() {
            return Ok(());
        }
        let mut params = self.uid_params(uid);
        if let Some(prompt) = prompt {
            params.insert("prompt".to_string(), Value::from(prompt));
        }
        if let Some(icon) = icon {
            params.insert("icon".to_string(), icon.to_json());
        }
        self.call("prompt_set", params).await?;
        Ok(())
    }

    /// Show (`Some(true)`), hide (`Some(false)`), or reset (`None`) the
    /// preview pane of the current item.
    pub async fn preview_set(
        &self,
        value: Option<bool>,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        let mut params = self.uid_params(uid);
        params.insert(
            "value".to_string(),
            value.map(Value::from).unwrap_or(Value::Null),
        );
        self.call("preview_set", params).await?;
        Ok(())
    }

    /// Install a footer view, or clear it with `None`.
    pub async fn footer_set(
        &self,
        footer: Option<&View>,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        let mut params = self.uid_params(uid);
        if let Some(footer) = footer {
            params.insert("footer".to_string(), footer.to_json());
        }
        self.call("footer_set", params).await?;
        Ok(())
    }

    /// Assign a key binding.
    ///
    /// `tag` uniquely identifies the binding; an empty tag removes it. When
    /// a handler is supplied the chord is handled locally, otherwise a
    /// [`SweepEvent::Bind`] surfaces on the event stream.
    pub async fn bind(
        &self,
        key: &str,
        tag: &str,
        desc: &str,
        handler: Option<BindHandler<I>>,
        uid: Option<WindowId>,
    ) -> Result<(), SweepError> {
        {
            let mut binds = self.inner.binds.lock().expect("binds lock poisoned");
            match handler {
                Some(handler) if !tag.is_empty() => {
                    binds.insert(tag.to_string(), handler);
                }
                _ => {
                    binds.remove(tag);
                }
            }
        }
        let mut params = self.uid_params(uid);
        params.insert("key".to_string(), Value::from(key));
        params.insert("tag".to_string(), Value::from(tag));
        params.insert("desc".to_string(), Value::from(desc));
        self.call("bind", params).await?;
        Ok(())
    }

    /// Assign a key binding described by a [`Bind`].
    pub async fn bind_struct(&self, bind: Bind<I>, uid: Option<WindowId>) -> Result<(), SweepError> {
        self.bind(&bind.key, &bind.tag, &bind.desc, bind.handler, uid)
            .await
    }

    /// Upload a field and associate it with the returned reference.
    pub async fn field_register(
        &self,
        field: &Field,
        reference: Option<i64>,
    ) -> Result<i64, SweepError> {
        let mut params = Map::new();
        params.insert("field".to_string(), field.to_json());
        if let Some(reference) = reference {
            params.insert("ref".to_string(), Value::from(reference));
        }
        let value = self.call("field_register", params).await?;
        let reference = value
            .as_i64()
            .ok_or(SweepError::UnexpectedResponse {
                method: "field_register",
                value,
            })?;
        self.inner
            .field_resolved
            .lock()
            .expect("resolved lock poisoned")
            .insert(reference);
        Ok(reference)
    }

    /// Register many fields keyed by their references.
    pub async fn field_register_many(
        &self,
        fields: impl IntoIterator<Item = (i64, Field)>,
    ) -> Result<(), SweepError> {
        for (reference, field) in fields {
            self.field_register(&field, Some(reference)).await?;
        }
        Ok(())
    }

    /// Upload a view addressable through [`ViewRef`].
    pub async fn view_register(
        &self,
        view: &View,
        reference: Option<ViewRef>,
    ) -> Result<i64, SweepError> {
        let mut params = Map::new();
        params.insert("view".to_string(), view.to_json());
        if let Some(ViewRef(reference)) = reference {
            params.insert("ref".to_string(), Value::from(reference));
        }
        let value = self.call("view_register", params).await?;
        let reference = value
            .as_i64()
            .ok_or(SweepError::UnexpectedResponse {
                method: "view_register",
                value,
            })?;
        self.inner
            .view_resolved
            .lock()
            .expect("resolved lock poisoned")
            .insert(reference);
        Ok(reference)
    }

    /// Swap the field resolver, returning the previous one.
    pub fn field_resolver_set(&self, resolver: Option<FieldResolver>) -> Option<FieldResolver> {
        std::mem::replace(
            &mut self
                .inner
                .field_resolver
                .lock()
                .expect("resolver lock poisoned"),
            resolver,
        )
    }

    /// Swap the view resolver, returning the previous one.
    pub fn view_resolver_set(&self, resolver: Option<ViewResolver>) -> Option<ViewResolver> {
        std::mem::replace(
            &mut self
                .inner
                .view_resolver
                .lock()
                .expect("resolver lock poisoned"),
            resolver,
        )
    }

    async fn resolve_field_missing(&self, reference: i64) {
        let resolver = {
            if self
                .inner
                .field_resolved
                .lock()
                .expect("resolved lock poisoned")
                .contains(&reference)
            {
                return;
            }
            let Some(resolver) = self
                .inner
                .field_resolver
                .lock()
                .expect("resolver lock poisoned")
                .clone()
            else {
                return;
            };
            // Mark before resolving: a resolver runs at most once per ref.
            self.inner
                .field_resolved
                .lock()
                .expect("resolved lock poisoned")
                .insert(reference);
            resolver
        };
        if let Some(field) = resolver(reference).await {
            if let Err(err) = self.field_register(&field, Some(reference)).await {
                warn!("failed to register resolved field {reference}: {err}");
            }
        }
    }

    async fn resolve_view_missing(&self, reference: i64) {
        let resolver = {
            if self
                .inner
                .view_resolved
                .lock()
                .expect("resolved lock poisoned")
                .contains(&reference)
            {
                return;
            }
            let Some(resolver) = self
                .inner
                .view_resolver
                .lock()
                .expect("resolver lock poisoned")
                .clone()
            else {
                return;
            };
            self.inner
                .view_resolved
                .lock()
                .expect("resolved lock poisoned")
                .insert(reference);
            resolver
        };
        if let Some(view) = resolver(reference).await {
            if let Err(err) = self.view_register(&view, Some(ViewRef(reference))).await {
                warn!("failed to register resolved view {reference}: {err}");
            }
        }
    }

    /// Open or transition to a named window; returns `true` when the
    /// window was newly created.
    ///
    /// The current-window tracker updates when the sweeper confirms with a
    /// `window_switched` notification, not on the response.
    pub async fn window_switch(&self, uid: WindowId, close: bool) -> Result<bool, SweepError> {
        let mut params = Map::new();
        params.insert("uid".to_string(), uid.to_value());
        params.insert("close".to_string(), Value::from(close));
        let value = self.call("window_switch", params).await?;
        value.as_bool().ok_or(SweepError::UnexpectedResponse {
            method: "window_switch",
            value,
        })
    }

    /// Return to the previous window in the sweeper's window stack.
    pub async fn window_pop(&self) -> Result<(), SweepError> {
        self.call("window_pop", Map::new()).await?;
        Ok(())
    }

    /// Show an ephemeral sub-selector and return the selected items.
    ///
    /// A fresh window uid is allocated from a monotonic counter unless the
    /// request names one.
    pub async fn quick_select<H: SweepItem>(
        &self,
        items: impl IntoIterator<Item = H>,
        request: QuickSelect,
    ) -> Result<Vec<H>, SweepError> {
        let mut haystack: Vec<Value> = Vec::new();
        let mut haystack_index: HashMap<usize, H> = HashMap::new();
        for item in items {
            match item.item_json() {
                ItemJson::Candidate(candidate) => {
                    let index = haystack_index.len();
                    haystack.push(
                        candidate
                            .extra_update(QUICK_SELECT_INDEX_KEY, Value::from(index))
                            .to_json(),
                    );
                    haystack_index.insert(index, item);
                }
                ItemJson::Verbatim(value) => haystack.push(value),
            }
        }

        let uid = request.window_uid.clone().unwrap_or_else(|| {
            let seq = self.inner.quick_select_seq.fetch_add(1, Ordering::SeqCst);
            WindowId::Str(format!("quick-select-{seq}"))
        });
        let mut params = Map::new();
        params.insert("items".to_string(), Value::Array(haystack));
        params.insert("uid".to_string(), uid.to_value());
        if let Some(prompt) = &request.prompt {
            params.insert("prompt".to_string(), Value::from(prompt.as_str()));
        }
        if let Some(icon) = &request.prompt_icon {
            params.insert("prompt_icon".to_string(), icon.to_json());
        }
        if let Some(keep_order) = request.keep_order {
            params.insert("keep_order".to_string(), Value::from(keep_order));
        }
        if let Some(theme) = &request.theme {
            params.insert("theme".to_string(), Value::from(theme.as_str()));
        }
        if let Some(scorer) = &request.scorer {
            params.insert("scorer".to_string(), Value::from(scorer.as_str()));
        }

        let value = self.call("quick_select", params).await?;
        let selected = match value {
            Value::Array(selected) => selected,
            value => {
                return Err(SweepError::UnexpectedResponse {
                    method: "quick_select",
                    value,
                })
            }
        };
        let mut result = Vec::new();
        for item in selected {
            let index = item.get(QUICK_SELECT_INDEX_KEY).and_then(Value::as_u64);
            match index {
                Some(index) => {
                    if let Some(found) = haystack_index.remove(&(index as usize)) {
                        result.push(found);
                    }
                }
                None => {
                    if let Some(found) = H::from_verbatim(item) {
                        result.push(found);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Suppress rendering for the lifetime of the returned guard.
    ///
    /// Used to batch many UI updates without flicker; the release is sent
    /// on every exit path, including panics and early returns.
    pub async fn render_suppress(
        &self,
        uid: Option<WindowId>,
    ) -> Result<RenderSuppressGuard, SweepError> {
        let uid = self.resolve_uid(uid);
        let mut params = Map::new();
        params.insert("uid".to_string(), uid.to_value());
        params.insert("suppress".to_string(), Value::from(true));
        self.call("render_suppress", params).await?;
        Ok(RenderSuppressGuard {
            peer: self.inner.peer.clone(),
            uid,
        })
    }
}

/// One-shot selection: spawn the sweeper, upload `items`, and return the
/// first selection.
///
/// Returns an empty vector when the sweeper exits without selecting. The
/// client is terminated before returning.
pub async fn sweep<I>(
    items: impl IntoIterator<Item = I>,
    prompt_icon: Option<Icon>,
    options: SweepOptions,
) -> Result<Vec<I>, SweepError>
where
    I: SweepItem + Clone + Send + Sync + 'static,
{
    let client: Sweep<I> = Sweep::spawn(options).await?;
    let mut events = client.events();
    if let Some(icon) = prompt_icon {
        client.prompt_set(None, Some(&icon), None).await?;
    }
    client.items_extend(items, None).await?;
    let selected = loop {
        match events.next().await {
            Some(SweepEvent::Select { items, .. }) => break items,
            Some(_) => continue,
            None => break Vec::new(),
        }
    };
    client.terminate().await;
    Ok(selected)
}
