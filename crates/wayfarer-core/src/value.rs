//! Script value model.
//!
//! Values are exchanged with the [`ScriptHost`](crate::ScriptHost) by value.
//! Plain tables nest by ownership; the only shared identity in the graph is a
//! registry object, referenced through [`ScriptValue::Object`]. Functions
//! travel as opaque [`Bytecode`] blobs and are restored by recompilation.

use bytes::Bytes;

use crate::object::ObjectRef;

// ─────────────────────────────────────────────────────────────────────────────
// ScriptValue
// ─────────────────────────────────────────────────────────────────────────────

/// A value held in a script object field or table slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScriptValue {
    /// Absent value. Never stored in a [`Table`].
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Number (scripts only know doubles).
    Number(f64),
    /// Byte string. Usually UTF-8 but not required to be.
    String(Bytes),
    /// Function, as the host's opaque bytecode.
    Function(Bytecode),
    /// Plain nested table.
    Table(Table),
    /// Reference to the player or a registry object.
    Object(ObjectRef),
    /// Typed sub-object that lives outside the registry (e.g. a zone point).
    Record(Record),
}

impl ScriptValue {
    /// Build a string value from UTF-8 text.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        Self::String(Bytes::from(text.into()))
    }

    /// Whether this is [`ScriptValue::Nil`].
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Numeric payload, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload as UTF-8 text, if it is a valid UTF-8 string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Object reference payload, if any.
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Self::Object(object) => Some(*object),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Table(_) => "table",
            Self::Object(_) => "object",
            Self::Record(_) => "record",
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<ObjectRef> for ScriptValue {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<Table> for ScriptValue {
    fn from(value: Table) -> Self {
        Self::Table(value)
    }
}

impl From<Record> for ScriptValue {
    fn from(value: Record) -> Self {
        Self::Record(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bytecode
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque compiled function blob produced and consumed by the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Bytecode(Bytes);

impl Bytecode {
    /// Wrap raw bytecode.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Blob length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered key/value table.
///
/// Iteration order is insertion order, which is the stable field order the
/// save format relies on. Assigning [`ScriptValue::Nil`] removes a key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    entries: Vec<(ScriptValue, ScriptValue)>,
}

impl Table {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &ScriptValue) -> Option<&ScriptValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Value stored under a string key.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&ScriptValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(name))
            .map(|(_, v)| v)
    }

    /// Set `key` to `value`, keeping the original position of an existing key.
    /// A nil value removes the key.
    pub fn set(&mut self, key: ScriptValue, value: ScriptValue) {
        let existing = self.entries.iter().position(|(k, _)| *k == key);
        match (existing, value.is_nil()) {
            (Some(pos), true) => {
                let _ = self.entries.remove(pos);
            }
            (Some(pos), false) => self.entries[pos].1 = value,
            (None, true) => {}
            (None, false) => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`Table::set`] for string keys.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<ScriptValue>) -> Self {
        self.set(ScriptValue::string(name), value.into());
        self
    }

    /// Iterate entries in stable order.
    pub fn iter(&self) -> impl Iterator<Item = &(ScriptValue, ScriptValue)> {
        self.entries.iter()
    }
}

impl FromIterator<(ScriptValue, ScriptValue)> for Table {
    fn from_iter<I: IntoIterator<Item = (ScriptValue, ScriptValue)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, value) in iter {
            table.set(key, value);
        }
        table
    }
}

impl IntoIterator for Table {
    type Item = (ScriptValue, ScriptValue);
    type IntoIter = std::vec::IntoIter<(ScriptValue, ScriptValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// Typed sub-object stored by value inside a field (class name plus fields).
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Script class the host instantiates on restore.
    pub class_name: String,
    /// The record's own fields.
    pub fields: Table,
}

impl Record {
    /// Create a record.
    #[must_use]
    pub fn new(class_name: impl Into<String>, fields: Table) -> Self {
        Self {
            class_name: class_name.into(),
            fields,
        }
    }
}
