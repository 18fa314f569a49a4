//! Item model: the structured rows sent to the sweeper and the trait that
//! maps caller-owned items onto their wire representation.

use serde_json::{Map, Value};

use crate::view::{Icon, View};

/// Styled atom of a [`Candidate`]: text with an optional glyph, embedded
/// view, face, and deferred reference.
///
/// Inactive fields are display-only and excluded from matching.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub text: String,
    pub glyph: Option<Icon>,
    pub view: Option<View>,
    pub active: bool,
    pub face: Option<String>,
    pub reference: Option<i64>,
}

impl Default for Field {
    fn default() -> Self {
        Self {
            text: String::new(),
            glyph: None,
            view: None,
            active: true,
            face: None,
            reference: None,
        }
    }
}

impl Field {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn glyph(mut self, glyph: Icon) -> Self {
        self.glyph = Some(glyph);
        self
    }

    pub fn view(mut self, view: impl Into<View>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn face(mut self, face: impl Into<String>) -> Self {
        self.face = Some(face.into());
        self
    }

    /// Reference to a field registered with the sweeper, resolved lazily.
    pub fn reference(mut self, reference: i64) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if !self.text.is_empty() {
            obj.insert("text".to_string(), Value::from(self.text.as_str()));
        }
        if !self.active {
            obj.insert("active".to_string(), Value::from(false));
        }
        if let Some(glyph) = &self.glyph {
            obj.insert("glyph".to_string(), glyph.to_json());
        }
        if let Some(view) = &self.view {
            obj.insert("view".to_string(), view.to_json());
        }
        if let Some(face) = &self.face {
            obj.insert("face".to_string(), Value::from(face.as_str()));
        }
        if let Some(reference) = self.reference {
            obj.insert("ref".to_string(), Value::from(reference));
        }
        Value::Object(obj)
    }

    pub fn from_json(value: &Value) -> Option<Field> {
        let obj = value.as_object()?;
        Some(Field {
            text: obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            active: obj.get("active").and_then(Value::as_bool).unwrap_or(true),
            glyph: obj.get("glyph").and_then(Icon::from_json),
            view: None,
            face: obj.get("face").and_then(Value::as_str).map(String::from),
            reference: obj.get("ref").and_then(Value::as_i64),
        })
    }
}

impl From<&str> for Field {
    fn from(text: &str) -> Self {
        Field::new(text)
    }
}

impl From<String> for Field {
    fn from(text: String) -> Self {
        Field::new(text)
    }
}

/// Structured description of one sweeper row.
///
/// `target` fields form the matchable left side, `right` fields the
/// non-matchable right side, and `preview` fields the pane shown when the
/// row is highlighted. Extras are arbitrary caller data carried through the
/// sweeper untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    pub target: Vec<Field>,
    pub right: Vec<Field>,
    pub right_offset: i64,
    pub right_face: Option<String>,
    pub preview: Vec<Field>,
    pub preview_flex: f64,
    pub hotkey: Option<String>,
    pub extra: Map<String, Value>,
}

impl Candidate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the target (matchable left side).
    pub fn target_push(mut self, field: impl Into<Field>) -> Self {
        self.target.push(field.into());
        self
    }

    /// Add a field to the right (non-matchable right side).
    pub fn right_push(mut self, field: impl Into<Field>) -> Self {
        self.right.push(field.into());
        self
    }

    /// Offset of the right side text.
    pub fn right_offset(mut self, offset: i64) -> Self {
        self.right_offset = offset;
        self
    }

    /// Face used to fill the right side text.
    pub fn right_face(mut self, face: impl Into<String>) -> Self {
        self.right_face = Some(face.into());
        self
    }

    /// Add a field to the preview shown while the item is highlighted.
    pub fn preview_push(mut self, field: impl Into<Field>) -> Self {
        self.preview.push(field.into());
        self
    }

    /// Flex weight of the preview pane.
    pub fn preview_flex(mut self, flex: f64) -> Self {
        self.preview_flex = flex;
        self
    }

    pub fn hotkey(mut self, hotkey: impl Into<String>) -> Self {
        self.hotkey = Some(hotkey.into());
        self
    }

    /// Add an entry to the extras bag.
    pub fn extra_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Pair this candidate with caller data for lookup on the caller side.
    pub fn wrap<V>(self, value: V) -> CandidateWrapped<V> {
        CandidateWrapped {
            value,
            candidate: self,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        if !self.target.is_empty() {
            obj.insert(
                "target".to_string(),
                Value::Array(self.target.iter().map(Field::to_json).collect()),
            );
        }
        if !self.right.is_empty() {
            obj.insert(
                "right".to_string(),
                Value::Array(self.right.iter().map(Field::to_json).collect()),
            );
        }
        if self.right_offset != 0 {
            obj.insert("right_offset".to_string(), Value::from(self.right_offset));
        }
        if let Some(face) = &self.right_face {
            obj.insert("right_face".to_string(), Value::from(face.as_str()));
        }
        if !self.preview.is_empty() {
            obj.insert(
                "preview".to_string(),
                Value::Array(self.preview.iter().map(Field::to_json).collect()),
            );
        }
        if self.preview_flex != 0.0 {
            obj.insert("preview_flex".to_string(), Value::from(self.preview_flex));
        }
        if let Some(hotkey) = &self.hotkey {
            obj.insert("hotkey".to_string(), Value::from(hotkey.as_str()));
        }
        Value::Object(obj)
    }
}

/// Candidate tagged with caller data.
///
/// The wire form is the candidate alone; the tag stays on the caller side
/// and is recovered through item identity when the sweeper reports a
/// selection.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateWrapped<V> {
    pub value: V,
    pub candidate: Candidate,
}

/// Wire representation of one item.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemJson {
    /// Candidate-shaped: eligible for index stamping and identity recovery.
    Candidate(Candidate),
    /// Sent verbatim and returned verbatim by the sweeper.
    Verbatim(Value),
}

/// Capability query deciding how an item travels to the sweeper.
///
/// Items that produce [`ItemJson::Candidate`] get an index stamped into
/// their extras and are recovered by identity from the client store when
/// the sweeper reports them back. Verbatim items pass through opaquely and
/// are recovered with [`SweepItem::from_verbatim`].
pub trait SweepItem: Sized {
    fn item_json(&self) -> ItemJson;

    /// Recover an item that was sent verbatim; `None` when the wire value
    /// does not describe this type.
    fn from_verbatim(value: Value) -> Option<Self> {
        let _ = value;
        None
    }
}

impl SweepItem for Candidate {
    fn item_json(&self) -> ItemJson {
        ItemJson::Candidate(self.clone())
    }
}

impl<V: Clone> SweepItem for CandidateWrapped<V> {
    fn item_json(&self) -> ItemJson {
        ItemJson::Candidate(self.candidate.clone())
    }
}

impl SweepItem for String {
    fn item_json(&self) -> ItemJson {
        ItemJson::Verbatim(Value::from(self.as_str()))
    }

    fn from_verbatim(value: Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(text),
            _ => None,
        }
    }
}

impl SweepItem for Value {
    fn item_json(&self) -> ItemJson {
        ItemJson::Verbatim(self.clone())
    }

    fn from_verbatim(value: Value) -> Option<Self> {
        Some(value)
    }
}
