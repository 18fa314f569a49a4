//! Declarative view model serialized to the sweep rendering protocol.
//!
//! Views form a tree on the wire; shared sub-views are expressed as a
//! [`ViewRef`] to a previously registered view, never by structural
//! sharing. Serialization is deterministic and omits default values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::SweepError;

/// Characters allowed in an SVG path used by [`Icon`].
const ICON_PATH_CHARS: &str = "+-e0123456789.,MmZzLlHhVvCcSsQqTtAa";

fn is_icon_path(path: &str) -> bool {
    path.chars()
        .all(|c| c.is_whitespace() || ICON_PATH_CHARS.contains(c))
}

/// Main axis of a [`Flex`] layout.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Direction {
    #[default]
    Row,
    Col,
}

impl Direction {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Direction::Row => "horizontal",
            Direction::Col => "vertical",
        }
    }
}

/// Main-axis distribution of [`Flex`] children.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Justify {
    #[default]
    Start,
    Center,
    End,
    SpaceBetween,
    SpaceAround,
    SpaceEvenly,
}

impl Justify {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Justify::Start => "start",
            Justify::Center => "center",
            Justify::End => "end",
            Justify::SpaceBetween => "space-between",
            Justify::SpaceAround => "space-around",
            Justify::SpaceEvenly => "space-evenly",
        }
    }
}

/// Cross-axis alignment of a child view.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Align {
    #[default]
    Start,
    Center,
    End,
    Expand,
    Shrink,
}

impl Align {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Align::Start => "start",
            Align::Center => "center",
            Align::End => "end",
            Align::Expand => "expand",
            Align::Shrink => "shrink",
        }
    }
}

/// Four geometric quantities in CSS top/right/bottom/left order.
///
/// Conversions apply the usual 1/2/3-value expansions: one value for all
/// sides, two for vertical/horizontal, three for top/horizontal/bottom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edges(pub [f64; 4]);

impl Edges {
    pub fn to_json(self) -> Value {
        Value::Array(self.0.iter().copied().map(Value::from).collect())
    }

    pub fn from_json(value: &Value) -> Option<Edges> {
        let list = value.as_array()?;
        if list.len() != 4 {
            return None;
        }
        let mut edges = [0.0; 4];
        for (slot, value) in edges.iter_mut().zip(list) {
            *slot = value.as_f64()?;
        }
        Some(Edges(edges))
    }
}

impl From<f64> for Edges {
    fn from(all: f64) -> Self {
        Edges([all, all, all, all])
    }
}

impl From<(f64, f64)> for Edges {
    fn from((vertical, horizontal): (f64, f64)) -> Self {
        Edges([vertical, horizontal, vertical, horizontal])
    }
}

impl From<(f64, f64, f64)> for Edges {
    fn from((top, horizontal, bottom): (f64, f64, f64)) -> Self {
        Edges([top, horizontal, bottom, horizontal])
    }
}

impl From<(f64, f64, f64, f64)> for Edges {
    fn from((top, right, bottom, left): (f64, f64, f64, f64)) -> Self {
        Edges([top, right, bottom, left])
    }
}

impl From<[f64; 4]> for Edges {
    fn from(edges: [f64; 4]) -> Self {
        Edges(edges)
    }
}

/// Decorative frame drawn around an [`Icon`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IconFrame {
    margin: Option<Edges>,
    border_width: Option<Edges>,
    border_radius: Option<Edges>,
    border_color: Option<String>,
    padding: Option<Edges>,
    fill_color: Option<String>,
}

impl IconFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn margin(mut self, margin: impl Into<Edges>) -> Self {
        self.margin = Some(margin.into());
        self
    }

    pub fn border_width(mut self, width: impl Into<Edges>) -> Self {
        self.border_width = Some(width.into());
        self
    }

    pub fn border_radius(mut self, radius: impl Into<Edges>) -> Self {
        self.border_radius = Some(radius.into());
        self
    }

    pub fn border_color(mut self, color: impl Into<String>) -> Self {
        self.border_color = Some(color.into());
        self
    }

    pub fn padding(mut self, padding: impl Into<Edges>) -> Self {
        self.padding = Some(padding.into());
        self
    }

    pub fn fill_color(mut self, color: impl Into<String>) -> Self {
        self.fill_color = Some(color.into());
        self
    }

    pub fn from_json(value: &Value) -> Option<IconFrame> {
        let obj = value.as_object()?;
        Some(IconFrame {
            margin: obj.get("margin").and_then(Edges::from_json),
            border_width: obj.get("border_width").and_then(Edges::from_json),
            border_radius: obj.get("border_radius").and_then(Edges::from_json),
            border_color: obj
                .get("border_color")
                .and_then(Value::as_str)
                .map(String::from),
            padding: obj.get("padding").and_then(Edges::from_json),
            fill_color: obj
                .get("fill_color")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(margin) = self.margin {
            obj.insert("margin".to_string(), margin.to_json());
        }
        if let Some(width) = self.border_width {
            obj.insert("border_width".to_string(), width.to_json());
        }
        if let Some(radius) = self.border_radius {
            obj.insert("border_radius".to_string(), radius.to_json());
        }
        if let Some(color) = &self.border_color {
            obj.insert("border_color".to_string(), Value::from(color.as_str()));
        }
        if let Some(padding) = self.padding {
            obj.insert("padding".to_string(), padding.to_json());
        }
        if let Some(color) = &self.fill_color {
            obj.insert("fill_color".to_string(), Value::from(color.as_str()));
        }
        Value::Object(obj)
    }
}

/// Scalable SVG glyph with an optional decorative frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Icon {
    path: String,
    view_box: Option<[f64; 4]>,
    fill_rule: Option<String>,
    size: Option<(usize, usize)>,
    fallback: Option<String>,
    frame: Option<IconFrame>,
}

impl Icon {
    /// Create an icon from an SVG path string.
    ///
    /// The path is restricted to path commands, numbers, and separators.
    pub fn new(path: impl Into<String>) -> Result<Self, SweepError> {
        let path = path.into();
        if !is_icon_path(&path) {
            return Err(SweepError::InvalidIcon(format!(
                "path contains characters outside the SVG path alphabet: {path}"
            )));
        }
        Ok(Self {
            path,
            view_box: None,
            fill_rule: None,
            size: None,
            fallback: None,
            frame: None,
        })
    }

    pub fn view_box(mut self, view_box: [f64; 4]) -> Self {
        self.view_box = Some(view_box);
        self
    }

    pub fn fill_rule(mut self, fill_rule: impl Into<String>) -> Self {
        self.fill_rule = Some(fill_rule.into());
        self
    }

    /// Cell size (height, width) used for terminal layout.
    pub fn size(mut self, height: usize, width: usize) -> Self {
        self.size = Some((height, width));
        self
    }

    /// Text shown when the terminal cannot render the glyph.
    pub fn fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn frame(mut self, frame: IconFrame) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Parse an icon from JSON: either a raw path string or an object with
    /// `path` plus optional attributes.
    pub fn from_json(value: &Value) -> Option<Icon> {
        match value {
            Value::String(path) if is_icon_path(path) => Icon::new(path.clone()).ok(),
            Value::Object(obj) => {
                let path = obj.get("path")?.as_str()?;
                if !is_icon_path(path) {
                    return None;
                }
                let view_box = obj.get("view_box").and_then(|b| {
                    let list = b.as_array()?;
                    if list.len() != 4 {
                        return None;
                    }
                    let mut out = [0.0; 4];
                    for (slot, value) in out.iter_mut().zip(list) {
                        *slot = value.as_f64()?;
                    }
                    Some(out)
                });
                let size = obj.get("size").and_then(|s| {
                    let list = s.as_array()?;
                    match list.as_slice() {
                        [h, w] => Some((h.as_u64()? as usize, w.as_u64()? as usize)),
                        _ => None,
                    }
                });
                Some(Icon {
                    path: path.to_string(),
                    view_box,
                    fill_rule: obj
                        .get("fill_rule")
                        .and_then(Value::as_str)
                        .map(String::from),
                    size,
                    fallback: obj
                        .get("fallback")
                        .and_then(Value::as_str)
                        .map(String::from),
                    frame: obj.get("frame").and_then(IconFrame::from_json),
                })
            }
            _ => None,
        }
    }

    /// Read an icon from a file path, or parse the string itself when no
    /// such file exists: first as JSON, then as a raw SVG path.
    pub fn from_str_or_file(str_or_file: &str) -> Result<Icon, SweepError> {
        let content;
        let source = if std::path::Path::new(str_or_file).exists() {
            content = std::fs::read_to_string(str_or_file)?;
            content.as_str()
        } else {
            str_or_file
        };
        source.parse()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("glyph"));
        obj.insert("path".to_string(), Value::from(self.path.as_str()));
        if let Some(view_box) = self.view_box {
            obj.insert(
                "view_box".to_string(),
                Value::Array(view_box.iter().copied().map(Value::from).collect()),
            );
        }
        if let Some(fill_rule) = &self.fill_rule {
            obj.insert("fill_rule".to_string(), Value::from(fill_rule.as_str()));
        }
        if let Some((height, width)) = self.size {
            obj.insert(
                "size".to_string(),
                Value::Array(vec![Value::from(height), Value::from(width)]),
            );
        }
        if let Some(fallback) = &self.fallback {
            obj.insert("fallback".to_string(), Value::from(fallback.as_str()));
        }
        if let Some(frame) = &self.frame {
            obj.insert("frame".to_string(), frame.to_json());
        }
        Value::Object(obj)
    }
}

impl std::str::FromStr for Icon {
    type Err = SweepError;

    /// Interpret the input as JSON first; fall back to treating the whole
    /// string as a raw path when that fails.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match serde_json::from_str::<Value>(s) {
            Ok(value) => Icon::from_json(&value)
                .ok_or_else(|| SweepError::InvalidIcon(format!("not an icon: {s}"))),
            Err(_) => Icon::new(s),
        }
    }
}

/// Handle to a view previously registered with the sweeper.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ViewRef(pub i64);

impl ViewRef {
    pub fn to_json(self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("ref"));
        obj.insert("ref".to_string(), Value::from(self.0));
        Value::Object(obj)
    }
}

/// Child of a [`Flex`] layout with optional weight, face, and alignment.
#[derive(Clone, Debug, PartialEq)]
pub struct FlexChild {
    view: View,
    flex: Option<f64>,
    face: Option<String>,
    align: Align,
}

impl FlexChild {
    pub fn new(view: impl Into<View>) -> Self {
        Self {
            view: view.into(),
            flex: None,
            face: None,
            align: Align::Start,
        }
    }

    pub fn flex(mut self, flex: f64) -> Self {
        self.flex = Some(flex);
        self
    }

    pub fn face(mut self, face: impl Into<String>) -> Self {
        self.face = Some(face.into());
        self
    }

    pub fn align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(flex) = self.flex {
            obj.insert("flex".to_string(), Value::from(flex));
        }
        if self.align != Align::Start {
            obj.insert("align".to_string(), Value::from(self.align.as_str()));
        }
        if let Some(face) = &self.face {
            obj.insert("face".to_string(), Value::from(face.as_str()));
        }
        obj.insert("view".to_string(), self.view.to_json());
        Value::Object(obj)
    }
}


/// Flexbox-style layout of child views.
#[derive(Clone, Debug, PartialEq)]
pub struct Flex {
    direction: Direction,
    justify: Justify,
    children: Vec<FlexChild>,
}

impl Flex {
    pub fn row() -> Self {
        Self {
            direction: Direction::Row,
            justify: Justify::Start,
            children: Vec::new(),
        }
    }

    pub fn col() -> Self {
        Self {
            direction: Direction::Col,
            justify: Justify::Start,
            children: Vec::new(),
        }
    }

    pub fn justify(mut self, justify: Justify) -> Self {
        self.justify = justify;
        self
    }

    pub fn push(mut self, view: impl Into<View>) -> Self {
        self.children.push(FlexChild::new(view));
        self
    }

    /// Push a child with explicit flex weight, face, or alignment.
    pub fn push_child(mut self, child: FlexChild) -> Self {
        self.children.push(child);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("flex"));
        obj.insert(
            "direction".to_string(),
            Value::from(self.direction.as_str()),
        );
        obj.insert("justify".to_string(), Value::from(self.justify.as_str()));
        obj.insert(
            "children".to_string(),
            Value::Array(self.children.iter().map(FlexChild::to_json).collect()),
        );
        Value::Object(obj)
    }
}

/// Single-child box with face, alignment, fixed size, and margins.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    child: View,
    face: Option<String>,
    vertical: Align,
    horizontal: Align,
    size: (usize, usize),
    margins: (i64, i64, i64, i64),
}

impl Container {
    pub fn new(child: impl Into<View>) -> Self {
        Self {
            child: child.into(),
            face: None,
            vertical: Align::Start,
            horizontal: Align::Start,
            size: (0, 0),
            margins: (0, 0, 0, 0),
        }
    }

    pub fn face(mut self, face: impl Into<String>) -> Self {
        self.face = Some(face.into());
        self
    }

    pub fn vertical(mut self, align: Align) -> Self {
        self.vertical = align;
        self
    }

    pub fn horizontal(mut self, align: Align) -> Self {
        self.horizontal = align;
        self
    }

    /// Fixed size as (height, width); zero leaves the dimension unset.
    pub fn size(mut self, height: usize, width: usize) -> Self {
        self.size = (height, width);
        self
    }

    /// Margins as (left, right, top, bottom).
    pub fn margins(mut self, left: i64, right: i64, top: i64, bottom: i64) -> Self {
        self.margins = (left, right, top, bottom);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("container"));
        obj.insert("child".to_string(), self.child.to_json());
        if let Some(face) = &self.face {
            obj.insert("face".to_string(), Value::from(face.as_str()));
        }
        if self.vertical != Align::Start {
            obj.insert("vertical".to_string(), Value::from(self.vertical.as_str()));
        }
        if self.horizontal != Align::Start {
            obj.insert(
                "horizontal".to_string(),
                Value::from(self.horizontal.as_str()),
            );
        }
        if self.size != (0, 0) {
            obj.insert(
                "size".to_string(),
                Value::Array(vec![Value::from(self.size.0), Value::from(self.size.1)]),
            );
        }
        if self.margins != (0, 0, 0, 0) {
            let (l, r, t, b) = self.margins;
            obj.insert(
                "margins".to_string(),
                Value::Array(vec![
                    Value::from(l),
                    Value::from(r),
                    Value::from(t),
                    Value::from(b),
                ]),
            );
        }
        Value::Object(obj)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum TextChunks {
    Leaf(String),
    List(Vec<Text>),
}

/// Styled text node: either a leaf string or a list of child chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct Text {
    chunks: TextChunks,
    glyph: Option<Icon>,
    face: Option<String>,
}

impl Text {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            chunks: TextChunks::Leaf(text.into()),
            glyph: None,
            face: None,
        }
    }

    pub fn glyph(mut self, glyph: Icon) -> Self {
        self.glyph = Some(glyph);
        self
    }

    pub fn face(mut self, face: impl Into<String>) -> Self {
        self.face = Some(face.into());
        self
    }

    /// Append a chunk. A leaf node is promoted to a list and its glyph
    /// migrates into the first child.
    pub fn push(mut self, chunk: Text) -> Self {
        match &mut self.chunks {
            TextChunks::List(chunks) => chunks.push(chunk),
            TextChunks::Leaf(leaf) => {
                let first = Text {
                    chunks: TextChunks::Leaf(std::mem::take(leaf)),
                    glyph: self.glyph.take(),
                    face: None,
                };
                self.chunks = TextChunks::List(vec![first, chunk]);
            }
        }
        self
    }

    /// Nodes without glyph and face collapse to a bare string or array.
    fn chunks_to_json(&self) -> Value {
        let chunks = match &self.chunks {
            TextChunks::Leaf(text) => Value::from(text.as_str()),
            TextChunks::List(list) => Value::Array(list.iter().map(Text::chunks_to_json).collect()),
        };
        if self.glyph.is_none() && self.face.is_none() {
            return chunks;
        }
        let mut obj = Map::new();
        obj.insert("text".to_string(), chunks);
        if let Some(glyph) = &self.glyph {
            obj.insert("glyph".to_string(), glyph.to_json());
        }
        if let Some(face) = &self.face {
            obj.insert("face".to_string(), Value::from(face.as_str()));
        }
        Value::Object(obj)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("text"));
        obj.insert("text".to_string(), self.chunks_to_json());
        Value::Object(obj)
    }
}

impl From<&str> for Text {
    fn from(text: &str) -> Self {
        Text::new(text)
    }
}

impl From<String> for Text {
    fn from(text: String) -> Self {
        Text::new(text)
    }
}

/// Raster image delivered to the sweeper as base64 data.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    size: (usize, usize),
    channels: u8,
    data: Vec<u8>,
}

impl Image {
    /// Create an image from contiguous row-major pixel data.
    ///
    /// `channels` must be 1 (gray), 3 (RGB) or 4 (RGBA), and `data` must
    /// hold exactly `height * width * channels` bytes.
    pub fn new(
        data: Vec<u8>,
        height: usize,
        width: usize,
        channels: u8,
    ) -> Result<Self, SweepError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(SweepError::InvalidImage(format!(
                "invalid channel count: {channels}"
            )));
        }
        let expected = height * width * channels as usize;
        if data.len() != expected {
            return Err(SweepError::InvalidImage(format!(
                "expected {expected} bytes for {height}x{width}x{channels}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            size: (height, width),
            channels,
            data,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from("image"));
        obj.insert(
            "size".to_string(),
            Value::Array(vec![Value::from(self.size.0), Value::from(self.size.1)]),
        );
        obj.insert("channels".to_string(), Value::from(self.channels));
        obj.insert("data".to_string(), Value::from(BASE64.encode(&self.data)));
        Value::Object(obj)
    }
}

/// Declarative UI subtree delivered to the sweeper.
#[derive(Clone, Debug, PartialEq)]
pub enum View {
    Ref(ViewRef),
    Glyph(Icon),
    TraceLayout { msg: String, view: Box<View> },
    Tag { tag: String, view: Box<View> },
    Flex(Flex),
    Container(Box<Container>),
    Text(Text),
    Image(Image),
}

impl View {
    pub fn to_json(&self) -> Value {
        match self {
            View::Ref(view_ref) => view_ref.to_json(),
            View::Glyph(icon) => icon.to_json(),
            View::TraceLayout { msg, view } => {
                let mut obj = Map::new();
                obj.insert("type".to_string(), Value::from("trace-layout"));
                obj.insert("msg".to_string(), Value::from(msg.as_str()));
                obj.insert("view".to_string(), view.to_json());
                Value::Object(obj)
            }
            View::Tag { tag, view } => {
                let mut obj = Map::new();
                obj.insert("type".to_string(), Value::from("tag"));
                obj.insert("tag".to_string(), Value::from(tag.as_str()));
                obj.insert("view".to_string(), view.to_json());
                Value::Object(obj)
            }
            View::Flex(flex) => flex.to_json(),
            View::Container(container) => container.to_json(),
            View::Text(text) => text.to_json(),
            View::Image(image) => image.to_json(),
        }
    }

    /// Print a debug message with constraints and calculated layout.
    pub fn trace_layout(self, msg: impl Into<String>) -> View {
        View::TraceLayout {
            msg: msg.into(),
            view: Box::new(self),
        }
    }

    /// Wrap the view into a tag.
    pub fn tag(self, tag: impl Into<String>) -> View {
        View::Tag {
            tag: tag.into(),
            view: Box::new(self),
        }
    }
}

impl From<ViewRef> for View {
    fn from(view_ref: ViewRef) -> Self {
        View::Ref(view_ref)
    }
}

impl From<Icon> for View {
    fn from(icon: Icon) -> Self {
        View::Glyph(icon)
    }
}

impl From<Flex> for View {
    fn from(flex: Flex) -> Self {
        View::Flex(flex)
    }
}

impl From<Container> for View {
    fn from(container: Container) -> Self {
        View::Container(Box::new(container))
    }
}

impl From<Text> for View {
    fn from(text: Text) -> Self {
        View::Text(text)
    }
}

impl From<Image> for View {
    fn from(image: Image) -> Self {
        View::Image(image)
    }
}
