//! Host-side values exchanged with the engine

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::lock;
use crate::proxy::ForeignFunction;

/// A value on the host side of the boundary.
///
/// Sequences and mappings own their elements. Conversion from the engine
/// recurses without cycle detection, so self-referential engine structures
/// must not be converted.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
    Callable(Callable),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Callable(Callable::Host(_)) => "host function",
            Value::Callable(Callable::Foreign(_)) => "foreign function",
        }
    }

    /// Converts into a JSON value. Callables have no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Sequence(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_>>()?,
            ),
            Value::Mapping(mapping) => {
                let mut object = serde_json::Map::with_capacity(mapping.len());
                for (key, value) in mapping.iter() {
                    let Value::String(key) = key else {
                        return Err(Error::UnsupportedKeyType(key.kind().into()));
                    };
                    object.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(object)
            }
            Value::Callable(_) => return Err(Error::unsupported_type(self.kind())),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Mapping(a), Value::Mapping(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Mapping(mapping) => {
                f.write_str("{")?;
                for (i, (key, value)) in mapping.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Callable(_) => f.write_str("<function>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<Mapping> for Value {
    fn from(mapping: Mapping) -> Self {
        Value::Mapping(mapping)
    }
}

impl From<HostFunction> for Value {
    fn from(function: HostFunction) -> Self {
        Value::Callable(Callable::Host(function))
    }
}

impl From<ForeignFunction> for Value {
    fn from(function: ForeignFunction) -> Self {
        Value::Callable(Callable::Foreign(function))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(object) => Value::Mapping(
                object
                    .into_iter()
                    .map(|(key, value)| (Value::String(key), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Key/value collection with unique keys.
///
/// Entries keep insertion order for iteration, but equality ignores order.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    entries: Vec<(Value, Value)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts an entry, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Looks up a string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn get_value(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, value)| other.get_value(key) == Some(value))
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (key, value) in iter {
            mapping.insert(key, value);
        }
        mapping
    }
}

impl IntoIterator for Mapping {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A function the engine can call into.
///
/// Cloning shares the underlying closure.
#[derive(Clone)]
pub struct HostFunction {
    inner: Rc<dyn Fn(&[Value]) -> Result<Value>>,
}

impl HostFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    /// Invokes the closure under the host lock.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let _guard = lock::acquire();
        (self.inner)(args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({:p})", Rc::as_ptr(&self.inner))
    }
}

/// Either side's function, callable from the host.
#[derive(Clone, Debug)]
pub enum Callable {
    Host(HostFunction),
    Foreign(ForeignFunction),
}

impl Callable {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Callable::Host(function) => function.call(args),
            Callable::Foreign(function) => function.call(args),
        }
    }

    /// Identity comparison.
    pub fn same(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Host(a), Callable::Host(b)) => a.ptr_eq(b),
            (Callable::Foreign(a), Callable::Foreign(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<HostFunction> for Callable {
    fn from(function: HostFunction) -> Self {
        Callable::Host(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_insert_replaces_equal_key() {
        let mut mapping = Mapping::new();
        assert_eq!(mapping.insert("a", 1), None);
        assert_eq!(mapping.insert("a", 2), Some(Value::Number(1.0)));
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("a"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn mapping_equality_ignores_order() {
        let left: Mapping = [("a", 1), ("b", 2)].into_iter().collect();
        let right: Mapping = [("b", 2), ("a", 1)].into_iter().collect();
        assert_eq!(left, right);

        let shorter: Mapping = [("a", 1)].into_iter().collect();
        assert_ne!(left, shorter);
    }

    #[test]
    fn mapping_accepts_non_string_keys() {
        let mut mapping = Mapping::new();
        mapping.insert(1, "one");
        assert_eq!(mapping.get_value(&Value::Number(1.0)), Some(&Value::from("one")));
        assert_eq!(mapping.get("1"), None);
    }

    #[test]
    fn json_conversion() {
        let value = Value::from(json!({"a": 1, "b": "two", "c": [3, null, true]}));
        let mapping = value.as_mapping().unwrap();
        assert_eq!(mapping.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(mapping.get("b"), Some(&Value::from("two")));
        assert_eq!(
            mapping.get("c"),
            Some(&Value::Sequence(vec![
                Value::Number(3.0),
                Value::None,
                Value::Bool(true)
            ]))
        );
        assert_eq!(
            value.to_json().unwrap(),
            json!({"a": 1.0, "b": "two", "c": [3.0, null, true]})
        );
    }

    #[test]
    fn callables_have_no_json_form() {
        let f = Value::from(HostFunction::new(|_| Ok(Value::None)));
        assert!(matches!(f.to_json(), Err(Error::UnsupportedType(_))));
    }

    #[test]
    fn non_string_keys_have_no_json_form() {
        let mapping: Mapping = [(1, 2)].into_iter().collect();
        assert!(matches!(
            Value::from(mapping).to_json(),
            Err(Error::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn host_function_identity() {
        let f = HostFunction::new(|args| Ok(args.first().cloned().unwrap_or_default()));
        let g = f.clone();
        let h = HostFunction::new(|_| Ok(Value::None));
        assert_eq!(Value::from(f.clone()), Value::from(g));
        assert_ne!(Value::from(f.clone()), Value::from(h));
        assert_eq!(f.call(&[Value::from("x")]).unwrap(), Value::from("x"));
    }

    #[test]
    fn display() {
        let value = Value::Sequence(vec![Value::None, 1.5.into(), "s".into()]);
        assert_eq!(value.to_string(), r#"[null, 1.5, "s"]"#);
        assert_eq!(Value::Number(42.0).to_string(), "42");
    }
}
