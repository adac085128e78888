//! Typed value tree used throughout evaluation. Distinct from `hcl::Expression`
//! (the *unevaluated* syntax tree produced by the parser): a `Value` is what
//! an expression reduces to once locals, includes, dependency outputs and
//! built-in functions have all been resolved.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A built-in or user-referenced function, not callable as data but
    /// tracked so `get_terragrunt_dir()`-shaped references can be told apart
    /// from plain variables during error reporting.
    Function(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Function(_) => true,
        }
    }

    /// Recursively merges `other` on top of `self`: maps merge key by key
    /// with `other` winning on conflicts (the rule used for `inputs` merge
    /// across an `include` chain); any other pairing (scalar vs scalar, list
    /// vs list, or a type mismatch) takes `other` wholesale, since
    /// deep-merging lists would be ambiguous.
    pub fn deep_merge(self, other: Value) -> Value {
        match (self, other) {
            (Value::Map(mut base), Value::Map(overlay)) => {
                for (k, v) in overlay {
                    let merged = match base.remove(&k) {
                        Some(existing) => existing.deep_merge(v),
                        None => v,
                    };
                    base.insert(k, merged);
                }
                Value::Map(base)
            }
            (_, other) => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(l) => write!(f, "[{}]", l.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
            Value::Function(name) => write!(f, "<function {name}>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::json!(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(l) => serde_json::Value::Array(l.into_iter().map(serde_json::Value::from).collect()),
            Value::Map(m) => {
                serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect())
            }
            Value::Function(name) => serde_json::Value::String(format!("<function {name}>")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_recurses_into_nested_maps() {
        let mut base = BTreeMap::new();
        base.insert("a".to_string(), Value::Number(1.0));
        let mut nested = BTreeMap::new();
        nested.insert("x".to_string(), Value::String("base".into()));
        base.insert("nested".to_string(), Value::Map(nested));

        let mut overlay = BTreeMap::new();
        let mut nested_overlay = BTreeMap::new();
        nested_overlay.insert("y".to_string(), Value::String("child".into()));
        overlay.insert("nested".to_string(), Value::Map(nested_overlay));

        let merged = Value::Map(base).deep_merge(Value::Map(overlay));
        let map = merged.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Value::Number(1.0)));
        let nested = map.get("nested").unwrap().as_map().unwrap();
        assert_eq!(nested.get("x"), Some(&Value::String("base".into())));
        assert_eq!(nested.get("y"), Some(&Value::String("child".into())));
    }

    #[test]
    fn deep_merge_child_scalar_wins() {
        let merged = Value::Number(1.0).deep_merge(Value::Number(2.0));
        assert_eq!(merged, Value::Number(2.0));
    }
}
