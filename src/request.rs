//! Request model seen by the enforcement layer
//!
//! These are the parsed shapes of queries, mutations and schema alters.
//! Enforcement rewrites or rejects them before they reach the execution
//! engine; the engine never sees a reference the caller may not read.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parser;

/// Root functions that select nodes without reading a predicate
const UNGATED_FUNCS: &[&str] = &["uid", "type", "val"];

/// A function call such as `has(name)` or `eq(city, "SF")`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Func {
    pub name: String,
    pub args: Vec<String>,
}

impl Func {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Func { name: name.into(), args }
    }

    /// The predicate this function reads, if it reads one. The first
    /// argument may itself be wrapped: `count(p)` reads `p`, while `val(v)`
    /// and `count(uid)` read nothing. Other wrappers are kept verbatim.
    pub fn predicate(&self) -> Option<&str> {
        if UNGATED_FUNCS.iter().any(|f| f.eq_ignore_ascii_case(&self.name)) {
            return None;
        }
        let arg = self.args.first()?;
        match arg.strip_suffix(')').and_then(|rest| rest.split_once('(')) {
            Some((wrapper, _)) if wrapper.trim().eq_ignore_ascii_case("val") => None,
            Some((wrapper, inner)) if wrapper.trim().eq_ignore_ascii_case("count") => match inner.trim() {
                "uid" => None,
                p => Some(p),
            },
            _ => Some(arg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    Func(Func),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Every predicate referenced anywhere in the expression
    pub fn predicates(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Func(f) => out.extend(f.predicate()),
            Filter::And(items) | Filter::Or(items) => items.iter().for_each(|f| f.collect(out)),
            Filter::Not(inner) => inner.collect(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub predicate: String,
    pub desc: bool,
}

/// A projected predicate, optionally with nested selections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Field {
    pub alias: Option<String>,
    pub predicate: String,
    /// Aggregate or wrapper function, e.g. `count` in `count(name)`
    pub func: Option<String>,
    pub filter: Option<Filter>,
    pub order: Vec<Order>,
    pub children: Vec<Field>,
}

impl Field {
    pub fn new(predicate: impl Into<String>) -> Self {
        Field { predicate: predicate.into(), ..Default::default() }
    }

    pub fn with_children(mut self, children: Vec<Field>) -> Self {
        self.children = children;
        self
    }

    /// `uid` is node identity, not a predicate
    pub fn is_uid(&self) -> bool {
        self.predicate == "uid"
    }

    /// The predicate this field reads; `uid`, `count(uid)` and `val(var)` read none
    pub fn reads(&self) -> Option<&str> {
        if self.is_uid() || self.func.as_deref() == Some("val") {
            return None;
        }
        Some(&self.predicate)
    }
}

/// One named top-level selection: `me(func: has(name)) { ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBlock {
    pub name: String,
    pub root: Func,
    pub filter: Option<Filter>,
    pub order: Vec<Order>,
    pub group_by: Vec<String>,
    /// Pagination and other pass-through arguments (`first`, `offset`, ...)
    pub args: Vec<(String, String)>,
    pub fields: Vec<Field>,
}

impl QueryBlock {
    pub fn new(name: impl Into<String>, root: Func) -> Self {
        QueryBlock {
            name: name.into(),
            root,
            filter: None,
            order: Vec::new(),
            group_by: Vec::new(),
            args: Vec::new(),
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Query {
    pub blocks: Vec<QueryBlock>,
}

impl Query {
    pub fn parse(text: &str) -> Result<Query> {
        match parser::parse_request(text)? {
            Request::Query(q) => Ok(q),
            Request::Schema(_) => Err(crate::error::AclError::InvalidRequest(
                "expected a graph query, found a schema query".into(),
            )),
        }
    }

    pub fn block(&self, name: &str) -> Option<&QueryBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

/// Schema introspection: `schema {}` or `schema(pred: [a, b]) {}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaQuery {
    pub predicates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Query(Query),
    Schema(SchemaQuery),
}

impl Request {
    pub fn parse(text: &str) -> Result<Request> {
        parser::parse_request(text)
    }
}

/// `<subject> <predicate> object .`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NQuad {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl NQuad {
    pub fn is_wildcard(&self) -> bool {
        self.predicate == "*"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mutation {
    pub set: Vec<NQuad>,
    pub delete: Vec<NQuad>,
}

impl Mutation {
    pub fn parse(set_nquads: &str, del_nquads: &str) -> Result<Mutation> {
        Ok(Mutation {
            set: parser::parse_nquads(set_nquads)?,
            delete: parser::parse_nquads(del_nquads)?,
        })
    }

    pub fn set(set_nquads: &str) -> Result<Mutation> {
        Self::parse(set_nquads, "")
    }

    pub fn delete(del_nquads: &str) -> Result<Mutation> {
        Self::parse("", del_nquads)
    }

    /// Every set and delete triple
    pub fn triples(&self) -> impl Iterator<Item = &NQuad> {
        self.set.iter().chain(self.delete.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

/// `pred: definition .`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    pub predicate: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alter {
    Schema(Vec<SchemaUpdate>),
    DropAttr(String),
    DropAll,
}

impl Alter {
    pub fn schema(text: &str) -> Result<Alter> {
        Ok(Alter::Schema(parser::parse_schema(text)?))
    }

    pub fn drop_attr(predicate: impl Into<String>) -> Alter {
        Alter::DropAttr(predicate.into())
    }
}
