#![forbid(unsafe_code)]

//! Dynamic values and the [`StateValue`] bound for observed properties.
//!
//! Storage scopes hold heterogeneous entries, so they use the dynamic
//! [`Value`] type. Structured content starts life as a [`RawObject`] (plain
//! map or list data) and becomes observable once it is wrapped into the
//! runtime's object arena, after which the value holds an
//! [`ObjectHandle`](crate::object::ObjectHandle).
//!
//! Typed properties (`ObservedProperty<i64>`, `ObservedProperty<String>`, ...)
//! use any type implementing [`StateValue`].

use std::collections::BTreeMap;
use std::fmt;

use crate::object::{ObjectError, ObjectHandle};
use crate::runtime::Runtime;

/// A dynamically typed state value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value. Storage scopes refuse to store it.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A wrapped, observable object.
    Object(ObjectHandle),
    /// Structured content that has not been wrapped yet.
    Raw(RawObject),
}

impl Value {
    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value refers to a wrapped object.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Whether this value is structured content, wrapped or not.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Raw(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ObjectHandle> for Value {
    fn from(v: ObjectHandle) -> Self {
        Self::Object(v)
    }
}

impl From<RawObject> for Value {
    fn from(v: RawObject) -> Self {
        Self::Raw(v)
    }
}

/// Key addressing a field of an object: a name for maps, an index for lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Name(String),
    Index(usize),
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(v: &str) -> Self {
        Self::Name(v.to_string())
    }
}

impl From<String> for FieldKey {
    fn from(v: String) -> Self {
        Self::Name(v)
    }
}

impl From<usize> for FieldKey {
    fn from(v: usize) -> Self {
        Self::Index(v)
    }
}

/// Unwrapped structured content: a keyed record or an ordered list.
#[derive(Debug, Clone, PartialEq)]
pub enum RawObject {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl RawObject {
    /// An empty keyed record.
    #[must_use]
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// An empty list.
    #[must_use]
    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    /// Builder: set a named field. Has no effect on lists.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Map(fields) = &mut self {
            fields.insert(name.into(), value.into());
        }
        self
    }

    /// Builder: append an item. Has no effect on maps.
    #[must_use]
    pub fn with_item(mut self, value: impl Into<Value>) -> Self {
        if let Self::List(items) = &mut self {
            items.push(value.into());
        }
        self
    }

    /// Number of fields or items.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Map(fields) => fields.len(),
            Self::List(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a field. Mismatched key kinds read as absent.
    #[must_use]
    pub fn get(&self, key: &FieldKey) -> Option<&Value> {
        match (self, key) {
            (Self::Map(fields), FieldKey::Name(name)) => fields.get(name),
            (Self::List(items), FieldKey::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    /// Write a field and report whether the content changed.
    ///
    /// Writing the index one past the end of a list appends.
    pub(crate) fn write(&mut self, key: &FieldKey, value: Value) -> Result<bool, ObjectError> {
        match (self, key) {
            (Self::Map(fields), FieldKey::Name(name)) => {
                if fields.get(name) == Some(&value) {
                    return Ok(false);
                }
                fields.insert(name.clone(), value);
                Ok(true)
            }
            (Self::List(items), FieldKey::Index(index)) => {
                let len = items.len();
                match items.get_mut(*index) {
                    Some(slot) if *slot == value => Ok(false),
                    Some(slot) => {
                        *slot = value;
                        Ok(true)
                    }
                    None if *index == len => {
                        items.push(value);
                        Ok(true)
                    }
                    None => Err(ObjectError::IndexOutOfBounds { index: *index, len }),
                }
            }
            (_, key) => Err(ObjectError::FieldType { key: key.clone() }),
        }
    }
}

/// Bound for values held by observed properties.
///
/// The hooks let the property layer keep object ownership in sync: values
/// that refer to a wrapped object report its handle, and values carrying
/// unwrapped structured content wrap it on assignment.
pub trait StateValue: Clone + PartialEq + fmt::Debug + 'static {
    /// The wrapped object this value refers to, if any.
    fn object_handle(&self) -> Option<ObjectHandle> {
        None
    }

    /// Convert unwrapped structured content into its observed form.
    #[must_use]
    fn observe(self, _runtime: &Runtime) -> Self {
        self
    }
}

macro_rules! impl_simple_state_value {
    ($($ty:ty),* $(,)?) => {
        $(impl StateValue for $ty {})*
    };
}

impl_simple_state_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    isize,
    f32,
    f64,
    String,
);

impl<T: StateValue> StateValue for Option<T> {
    fn object_handle(&self) -> Option<ObjectHandle> {
        self.as_ref().and_then(StateValue::object_handle)
    }

    fn observe(self, runtime: &Runtime) -> Self {
        self.map(|v| v.observe(runtime))
    }
}

impl<T: StateValue> StateValue for Vec<T> {}

impl StateValue for ObjectHandle {
    fn object_handle(&self) -> Option<ObjectHandle> {
        Some(*self)
    }
}

impl StateValue for Value {
    fn object_handle(&self) -> Option<ObjectHandle> {
        self.as_object()
    }

    fn observe(self, runtime: &Runtime) -> Self {
        match self {
            Self::Raw(raw) => Self::Object(runtime.wrap_raw(raw, None)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_write_reports_change() {
        let mut raw = RawObject::map().with_field("a", 1);
        assert!(!raw.write(&FieldKey::from("a"), Value::Int(1)).unwrap());
        assert!(raw.write(&FieldKey::from("a"), Value::Int(2)).unwrap());
        assert!(raw.write(&FieldKey::from("b"), Value::Bool(true)).unwrap());
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn list_write_appends_at_end() {
        let mut raw = RawObject::list().with_item("x");
        assert!(raw.write(&FieldKey::Index(1), Value::from("y")).unwrap());
        assert_eq!(raw.get(&FieldKey::Index(1)), Some(&Value::from("y")));
        assert_eq!(
            raw.write(&FieldKey::Index(5), Value::Null),
            Err(ObjectError::IndexOutOfBounds { index: 5, len: 2 })
        );
    }

    #[test]
    fn mismatched_key_kind_is_rejected() {
        let mut raw = RawObject::map();
        assert_eq!(
            raw.write(&FieldKey::Index(0), Value::Null),
            Err(ObjectError::FieldType {
                key: FieldKey::Index(0)
            })
        );
        assert_eq!(raw.get(&FieldKey::Index(0)), None);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(3).as_int(), Some(3));
        assert_eq!(Value::from(3).as_float(), Some(3.0));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert!(Value::default().is_null());
        assert!(Value::from(RawObject::list()).is_structured());
        assert!(!Value::from(RawObject::list()).is_wrapped());
    }

    #[test]
    fn field_key_display() {
        assert_eq!(FieldKey::from("name").to_string(), "name");
        assert_eq!(FieldKey::from(4_usize).to_string(), "4");
    }
}
