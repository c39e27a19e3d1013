//! Stored Value Types
//!
//! Every entry in the store holds a [`Value`], a closed set of kinds.
//! Callers that need a concrete kind go through the checked accessors,
//! which fail with [`StorageError::WrongType`] instead of guessing.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

use super::dict::StorageError;

/// The kind of a stored value, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Str,
    List,
}

impl ValueKind {
    /// The protocol name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Str => "string",
            ValueKind::List => "list",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Binary-safe string
    Str(Bytes),
    /// Ordered list with cheap push/pop at both ends
    List(VecDeque<Bytes>),
}

impl Value {
    /// Creates a string value.
    pub fn string(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
        }
    }

    fn wrong_type(&self, expected: ValueKind) -> StorageError {
        StorageError::WrongType {
            expected,
            found: self.kind(),
        }
    }

    /// Returns the string payload, or `WrongType`.
    pub fn as_bytes(&self) -> Result<&Bytes, StorageError> {
        match self {
            Value::Str(data) => Ok(data),
            other => Err(other.wrong_type(ValueKind::Str)),
        }
    }

    /// Returns the list payload, or `WrongType`.
    pub fn as_list(&self) -> Result<&VecDeque<Bytes>, StorageError> {
        match self {
            Value::List(list) => Ok(list),
            other => Err(other.wrong_type(ValueKind::List)),
        }
    }

    /// Returns the list payload mutably, or `WrongType`.
    pub fn as_list_mut(&mut self) -> Result<&mut VecDeque<Bytes>, StorageError> {
        match self {
            Value::List(list) => Ok(list),
            other => Err(other.wrong_type(ValueKind::List)),
        }
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Str(data)
    }
}

impl From<&'static str> for Value {
    fn from(data: &'static str) -> Self {
        Value::Str(Bytes::from_static(data.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::from("x").kind().name(), "string");
        assert_eq!(Value::List(VecDeque::new()).kind().to_string(), "list");
        assert_eq!(Value::from(Bytes::new()).kind(), ValueKind::Str);
    }

    #[test]
    fn test_checked_access() {
        let value = Value::string(Bytes::from("hello"));
        assert_eq!(value.as_bytes().unwrap(), &Bytes::from("hello"));
        assert_eq!(
            value.as_list().unwrap_err(),
            StorageError::WrongType {
                expected: ValueKind::List,
                found: ValueKind::Str,
            }
        );
    }

    #[test]
    fn test_list_mutation() {
        let mut value = Value::List(VecDeque::new());
        value.as_list_mut().unwrap().push_back(Bytes::from("a"));
        assert_eq!(value.as_list().unwrap().len(), 1);
        assert!(value.as_bytes().is_err());
    }

    #[test]
    fn test_wrong_type_message() {
        let err = Value::List(VecDeque::new()).as_bytes().unwrap_err();
        assert!(err.to_string().starts_with("WRONGTYPE"));
        assert_eq!(
            err,
            StorageError::WrongType {
                expected: ValueKind::Str,
                found: ValueKind::List,
            }
        );
    }
}
