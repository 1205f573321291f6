//! The facade (`spec.md` §6): `encode` and `decode`, the only two
//! operations external callers need.
//!
//! Grounded on `original_source/binary_format_handler.py`'s
//! `BinaryFormatHandler`, which plays the same single-entry-point role over
//! its own serializer/deserializer pair, and on the teacher's own `lib.rs`
//! doc-example style of exposing one obvious type at the crate root.

use std::fs;
use std::path::Path as FsPath;

use crate::document::Document;
use crate::errors::{CodecError, FunctionError, SchemaError};
use crate::functions::{FunctionRegistry, Params};
use crate::schema::{Schema, SchemaDoc};
use crate::{deserializer, serializer};

/// A compiled schema paired with its function registry, ready to encode
/// and decode documents.
pub struct Codec {
    schema: Schema,
    registry: FunctionRegistry,
}

impl Codec {
    /// Builds a codec from an already-compiled schema, with the built-in
    /// function registry (`crc32`, `crc16`, `length`, `file_size`,
    /// `count`).
    pub fn new(schema: Schema) -> Self {
        Codec { schema, registry: FunctionRegistry::builtin() }
    }

    /// Compiles a raw schema document and builds a codec from it.
    pub fn from_schema_doc(doc: &SchemaDoc) -> Result<Self, SchemaError> {
        Ok(Codec::new(Schema::compile(doc)?))
    }

    /// Parses and compiles a JSON-shaped schema in one step.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        Ok(Codec::new(Schema::from_json_str(text)?))
    }

    /// Reads a JSON-shaped schema from a filesystem path and compiles it —
    /// the third schema-input form `spec.md` §4.9 names alongside an
    /// in-memory mapping and a serialized mapping.
    pub fn from_schema_path(path: impl AsRef<FsPath>) -> Result<Self, CodecError> {
        let text = fs::read_to_string(path).map_err(|e| CodecError::Io(e.to_string()))?;
        Ok(Codec::new(Schema::from_json_str(&text)?))
    }

    /// Registers an additional calculated-field function beyond the five
    /// built-ins (`spec.md` §4.6's extensibility hook).
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        handler: fn(&[u8], &Document, usize, &Params) -> Result<i64, FunctionError>,
    ) {
        self.registry.register(name, handler);
    }

    /// Encodes `document` into byte-exact output per the schema.
    pub fn encode(&self, document: &Document) -> Result<Vec<u8>, CodecError> {
        serializer::encode(&self.schema, document, &self.registry)
    }

    /// Decodes `bytes` back into a document per the schema.
    pub fn decode(&self, bytes: &[u8]) -> Result<Document, CodecError> {
        deserializer::decode(&self.schema, bytes, &self.registry)
    }

    /// Reads a file from disk and decodes it.
    pub fn decode_path(&self, path: impl AsRef<FsPath>) -> Result<Document, CodecError> {
        let bytes = fs::read(path).map_err(|e| CodecError::Io(e.to_string()))?;
        self.decode(&bytes)
    }
}
