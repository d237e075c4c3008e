//! Graph mutation units: triples and batches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicate every imported node carries to tag its scope.
pub const SCOPES_PREDICATE: &str = "scopes";
/// Predicate holding a node's type name.
pub const TYPE_PREDICATE: &str = "type_name";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    /// Untyped literal; used for raw cells that failed conversion.
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Object {
    /// Edge to another node.
    Id(String),
    /// Scalar attribute.
    Value(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NQuad {
    pub subject: String,
    pub predicate: String,
    pub object: Object,
}

impl NQuad {
    pub fn edge(subject: &str, predicate: &str, object_id: &str) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: Object::Id(object_id.to_string()),
        }
    }

    pub fn value(subject: &str, predicate: &str, value: Value) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: Object::Value(value),
        }
    }

    pub fn string(subject: &str, predicate: &str, value: &str) -> Self {
        Self::value(subject, predicate, Value::Str(value.to_string()))
    }

    /// Object as a plain string when it is a string-like literal.
    pub fn object_str(&self) -> Option<&str> {
        match &self.object {
            Object::Value(Value::Str(s)) | Object::Value(Value::Default(s)) => Some(s),
            _ => None,
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        match &self.object {
            Object::Id(id) => Some(id),
            Object::Value(_) => None,
        }
    }
}

/// `(uid, "scopes", scope)` tagging a node with the scope it was imported in.
pub fn scope_quad(scope: &str, uid: &str) -> NQuad {
    let scope = std::path::Path::new(scope)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(scope);
    NQuad::string(uid, SCOPES_PREDICATE, scope)
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// RDF N-Quad line (without trailing newline).
impl fmt::Display for NQuad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> ", self.subject, self.predicate)?;
        match &self.object {
            Object::Id(id) => write!(f, "<{id}>")?,
            Object::Value(Value::Str(s)) => write!(f, "\"{}\"^^<xs:string>", escape_literal(s))?,
            Object::Value(Value::Default(s)) => write!(f, "\"{}\"", escape_literal(s))?,
            Object::Value(Value::Int(i)) => write!(f, "\"{i}\"^^<xs:int>")?,
            Object::Value(Value::Float(v)) => write!(f, "\"{v}\"^^<xs:float>")?,
        }
        f.write_str(" .")
    }
}

/// A batch of triples applied atomically by the graph store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub set: Vec<NQuad>,
    pub commit_now: bool,
    /// Failed submissions so far; drives retry backoff.
    #[serde(default)]
    pub attempts: u32,
}

impl Mutation {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            set: Vec::with_capacity(capacity),
            commit_now: true,
            attempts: 0,
        }
    }

    pub fn from_quads(set: Vec<NQuad>) -> Self {
        Self {
            set,
            commit_now: true,
            attempts: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}
