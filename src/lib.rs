//! A schema-driven binary codec: given a declarative schema describing a
//! binary layout and a structured in-memory document, [`codec::Codec`]
//! produces byte-exact binary encoding and its symmetric decoding.
//!
//! ```
//! use fieldcraft::{Codec, Document, SchemaDoc};
//!
//! let schema_doc: SchemaDoc = serde_json::from_value(serde_json::json!({
//!     "endianness": "little",
//!     "fields": [
//!         {"name": "magic", "type": "uint32"},
//!         {"name": "name", "type": "string", "size": 8},
//!     ]
//! })).unwrap();
//! let codec = Codec::from_schema_doc(&schema_doc).unwrap();
//!
//! let document = Document::from(serde_json::json!({"magic": 1, "name": "probe"}));
//! let bytes = codec.encode(&document).unwrap();
//! let decoded = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded.get_field("magic"), Some(&fieldcraft::Document::Int(1)));
//! ```

pub mod codec;
pub mod deserializer;
pub mod document;
pub mod errors;
pub mod expr;
pub mod functions;
pub mod reader;
pub mod schema;
pub mod scope;
pub mod serializer;
pub mod writer;

pub use codec::Codec;
pub use document::{Document, Path, PathSeg};
pub use errors::CodecError;
pub use expr::Expr;
pub use functions::FunctionRegistry;
pub use schema::{Endianness, FieldDef, Schema, SchemaDoc};
