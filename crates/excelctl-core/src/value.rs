//! The late-bound value model.
//!
//! `Value` is what crosses the channel boundary in both directions: property
//! reads, property writes, call arguments, and call returns. It mirrors the
//! VARIANT types Excel actually produces without exposing any COM type to the
//! layers above the bridge.

use chrono::NaiveDateTime;

use crate::channel::ObjId;

/// A dynamically typed value exchanged with the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `VT_EMPTY` / `VT_NULL` — no value.
    Empty,
    /// An omitted optional parameter (`VT_ERROR` with `DISP_E_PARAMNOTFOUND`).
    Missing,
    Bool(bool),
    Int(i32),
    Number(f64),
    Text(String),
    /// `VT_DATE`, converted from the OLE automation epoch.
    DateTime(NaiveDateTime),
    /// A rectangular 2-D array (`VT_ARRAY | VT_VARIANT`), row-major.
    Array(Vec<Vec<Value>>),
    /// A live reference into the channel's object registry.
    Object(ObjId),
}

impl Value {
    /// Runtime type name, as reported in macro outcomes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "Empty",
            Value::Missing => "Missing",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Number(_) => "Double",
            Value::Text(_) => "String",
            Value::DateTime(_) => "Date",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty | Value::Missing)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i32),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Empty => write!(f, "<empty>"),
            Value::Missing => write!(f, "<missing>"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(n) => write!(f, "{n}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Array(rows) => {
                write!(f, "[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "[")?;
                    for (j, cell) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{cell}")?;
                    }
                    write!(f, "]")?;
                }
                write!(f, "]")
            }
            Value::Object(id) => write!(f, "<object #{id}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Empty.type_name(), "Empty");
        assert_eq!(Value::Bool(true).type_name(), "Boolean");
        assert_eq!(Value::Int(1).type_name(), "Integer");
        assert_eq!(Value::Number(1.5).type_name(), "Double");
        assert_eq!(Value::Text("x".into()).type_name(), "String");
        assert_eq!(Value::Array(vec![]).type_name(), "Array");
    }

    #[test]
    fn test_display_array() {
        let v = Value::Array(vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Text("a".into()), Value::Bool(false)],
        ]);
        assert_eq!(v.to_string(), "[[1,2],[a,False]]");
    }

    #[test]
    fn test_as_bool_accepts_host_integers() {
        // Excel reports VARIANT_BOOL as -1/0 through some paths.
        assert_eq!(Value::Int(-1).as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
    }
}
