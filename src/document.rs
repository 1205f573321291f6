//! The in-memory document tree shared by encode and decode (`spec.md` §3.2),
//! and the path-addressing scheme used to reach into it.
//!
//! Per the REDESIGN FLAG "Document addressing without string concatenation",
//! a path is an explicit `Vec<PathSeg>` built up during recursion, never a
//! spliced string — `PathSeg::Name`/`PathSeg::Index` mirror the `name` and
//! `[i]` productions of the `PATH` grammar in `spec.md` §4.2.

use std::collections::BTreeMap;
use std::fmt;

/// One segment of a resolved document path: a map key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Name(String),
    Index(usize),
}

/// A dot/bracket path into a [`Document`], e.g. `header.items[3].value`.
pub type Path = Vec<PathSeg>;

/// Renders a path the way error messages and scope lookups want it shown.
pub fn path_to_string(path: &[PathSeg]) -> String {
    let mut s = String::new();
    for seg in path {
        match seg {
            PathSeg::Name(name) => {
                if !s.is_empty() {
                    s.push('.');
                }
                s.push_str(name);
            }
            PathSeg::Index(i) => {
                s.push('[');
                s.push_str(&i.to_string());
                s.push(']');
            }
        }
    }
    s
}

/// A recursive document value: integer, float, text, ordered list, or named
/// map. The same shape decode produces and encode accepts (the round-trip
/// contract from `spec.md` §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Document>),
    Map(BTreeMap<String, Document>),
}

impl Document {
    pub fn map() -> Self {
        Document::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Document>> {
        match self {
            Document::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Document>> {
        match self {
            Document::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Document]> {
        match self {
            Document::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Document::Int(i) => Some(*i),
            Document::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Document::Int(i) => Some(*i as f64),
            Document::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is "auto" — the sentinel used by calculated
    /// fields on encode to mean "compute me" (`spec.md` §6.2).
    pub fn is_auto_sentinel(&self) -> bool {
        matches!(self, Document::String(s) if s == "auto")
    }

    /// Inserts `value` at `name` if this is a map; no-op otherwise.
    pub fn insert(&mut self, name: impl Into<String>, value: Document) {
        if let Document::Map(m) = self {
            m.insert(name.into(), value);
        }
    }

    /// Resolves a path against this document. Returns `None` if any
    /// segment fails to resolve (missing key, out-of-range index, or a
    /// scalar where a map/list was expected).
    pub fn get(&self, path: &[PathSeg]) -> Option<&Document> {
        let mut cur = self;
        for seg in path {
            cur = match (cur, seg) {
                (Document::Map(m), PathSeg::Name(name)) => m.get(name)?,
                (Document::List(l), PathSeg::Index(i)) => l.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Looks up a single top-level field by name; used by the scope
    /// resolver and calculated-field function parameters, which only ever
    /// reference sibling field names, not deep paths.
    pub fn get_field(&self, name: &str) -> Option<&Document> {
        self.as_map()?.get(name)
    }

    /// Renders this value the way a union discriminator is compared against
    /// its `union_variants` keys (`spec.md` §4.7): integers and floats
    /// render as decimal text, strings pass through unchanged.
    pub fn discriminator_key(&self) -> Option<String> {
        match self {
            Document::Int(i) => Some(i.to_string()),
            Document::Float(f) => Some(f.to_string()),
            Document::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Parses a bare `PATH` string (`name`, `name.name`, `name[3].name`) into
/// its segments, without any operator grammar around it. Used for
/// `discriminator_field`, which names a location in a document rather than
/// a computed expression.
pub fn parse_path(src: &str) -> Result<Path, ()> {
    let mut path = Vec::new();
    let mut chars = src.chars().peekable();
    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' || c == '[' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            return Err(());
        }
        path.push(PathSeg::Name(name));
        match chars.peek() {
            None => break,
            Some('.') => {
                chars.next();
            }
            Some('[') => {
                chars.next();
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ']' {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                if chars.next() != Some(']') {
                    return Err(());
                }
                let idx: usize = digits.parse().map_err(|_| ())?;
                path.push(PathSeg::Index(idx));
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            _ => return Err(()),
        }
    }
    Ok(path)
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Document::Int(i) => write!(f, "{i}"),
            Document::Float(x) => write!(f, "{x}"),
            Document::String(s) => write!(f, "{s:?}"),
            Document::List(_) => write!(f, "<list>"),
            Document::Map(_) => write!(f, "<map>"),
        }
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Document::Map(BTreeMap::new()),
            serde_json::Value::Bool(b) => Document::Int(if b { 1 } else { 0 }),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Document::Int(i)
                } else {
                    Document::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Document::String(s),
            serde_json::Value::Array(arr) => {
                Document::List(arr.into_iter().map(Document::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Document::Map(obj.into_iter().map(|(k, v)| (k, Document::from(v))).collect())
            }
        }
    }
}

impl From<&Document> for serde_json::Value {
    fn from(doc: &Document) -> Self {
        match doc {
            Document::Int(i) => serde_json::Value::from(*i),
            Document::Float(x) => serde_json::json!(x),
            Document::String(s) => serde_json::Value::String(s.clone()),
            Document::List(l) => serde_json::Value::Array(l.iter().map(serde_json::Value::from).collect()),
            Document::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), serde_json::Value::from(v))).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: Vec<(&str, Document)>) -> Document {
        Document::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn get_nested_path() {
        let doc = map(vec![(
            "header",
            map(vec![(
                "items",
                Document::List(vec![map(vec![("value", Document::Int(42))])]),
            )]),
        )]);

        let path = vec![
            PathSeg::Name("header".into()),
            PathSeg::Name("items".into()),
            PathSeg::Index(0),
            PathSeg::Name("value".into()),
        ];

        assert_eq!(doc.get(&path), Some(&Document::Int(42)));
    }

    #[test]
    fn get_missing_path_is_none() {
        let doc = map(vec![("a", Document::Int(1))]);
        let path = vec![PathSeg::Name("b".into())];
        assert_eq!(doc.get(&path), None);
    }

    #[test]
    fn path_to_string_renders_dots_and_brackets() {
        let path = vec![
            PathSeg::Name("header".into()),
            PathSeg::Name("items".into()),
            PathSeg::Index(3),
            PathSeg::Name("value".into()),
        ];
        assert_eq!(path_to_string(&path), "header.items[3].value");
    }

    #[test]
    fn auto_sentinel_detection() {
        assert!(Document::String("auto".into()).is_auto_sentinel());
        assert!(!Document::String("manual".into()).is_auto_sentinel());
        assert!(!Document::Int(0).is_auto_sentinel());
    }

    #[test]
    fn parse_path_handles_names_and_indices() {
        assert_eq!(
            parse_path("header.items[3].value").unwrap(),
            vec![
                PathSeg::Name("header".into()),
                PathSeg::Name("items".into()),
                PathSeg::Index(3),
                PathSeg::Name("value".into()),
            ]
        );
        assert_eq!(parse_path("type").unwrap(), vec![PathSeg::Name("type".into())]);
        assert!(parse_path("").is_err());
    }

    #[test]
    fn json_roundtrip_shape() {
        let json = serde_json::json!({"a": 1, "b": [1.5, "x"]});
        let doc = Document::from(json.clone());
        let back = serde_json::Value::from(&doc);
        assert_eq!(json, back);
    }
}
