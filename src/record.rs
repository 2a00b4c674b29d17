//! Records: the unit of data that flows between commands.

use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;

/// Key used for plain lines of text.
pub const TEXT: &str = "text";
/// Key attached to error records to name the statement that produced them.
pub const LOCATION: &str = "location";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Path(PathBuf),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::Path(value)
    }
}

/// An ordered set of key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    entries: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record holding one line of text under [`TEXT`].
    pub fn text(line: impl Into<String>) -> Self {
        Self::of(TEXT, Value::Text(line.into()))
    }

    pub fn of(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Inserts `key` as the first entry unless the record already has it.
    pub fn tag(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.entries.contains_key(key) {
            self.entries.shift_insert(0, key.to_string(), value.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values joined by `separator`, in key order.
    pub fn render(&self, separator: &str) -> String {
        self.values()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}
