//! Schema model: the raw JSON-shaped schema (`spec.md` §6.1, deserialized
//! with `serde`) and the typed, validated descriptor tree it compiles into
//! (`spec.md` §3.1).
//!
//! Per the REDESIGN FLAG "Tagged variants instead of attribute-less dynamic
//! records", [`FieldKind`] is a tagged sum — each variant carries only the
//! attributes that apply to it — rather than one struct with every
//! attribute optional. Validation happens once, here, at [`Schema::compile`]
//! time (`bitcraft`'s `compiled.rs` validates its own field shapes the same
//! way, via `TryFrom<&Field>`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::SchemaError;
use crate::expr::Expr;

/// Byte order applied to every multi-byte primitive (`spec.md` §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum EndiannessDef {
    Little,
    Big,
}

impl From<EndiannessDef> for Endianness {
    fn from(value: EndiannessDef) -> Self {
        match value {
            EndiannessDef::Little => Endianness::Little,
            EndiannessDef::Big => Endianness::Big,
        }
    }
}

fn default_endianness() -> EndiannessDef {
    EndiannessDef::Little
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// The root of a raw, JSON-shaped schema document (`spec.md` §6.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaDoc {
    #[serde(default = "default_endianness")]
    endianness: EndiannessDef,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub fields: Vec<FieldDef>,
}

/// One field descriptor as it appears in the JSON-shaped schema, before
/// compilation (`spec.md` §6.1's key list).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub length_field: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub element_fields: Option<Vec<FieldDef>>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub function_scope: Option<String>,
    #[serde(default)]
    pub function_scope_start: Option<String>,
    #[serde(default)]
    pub function_scope_end: Option<String>,
    #[serde(default)]
    pub function_parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub discriminator_field: Option<String>,
    #[serde(default)]
    pub union_variants: Option<BTreeMap<String, Vec<FieldDef>>>,
}

/// Fixed-width primitive types (`spec.md` §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt24,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Char,
}

impl PrimitiveType {
    fn parse(name: &str) -> Option<Self> {
        use PrimitiveType::*;
        Some(match name {
            "int8" => Int8,
            "int16" => Int16,
            "int24" => Int24,
            "int32" => Int32,
            "int64" => Int64,
            "uint8" => UInt8,
            "uint16" => UInt16,
            "uint24" => UInt24,
            "uint32" => UInt32,
            "uint64" => UInt64,
            "float32" => Float32,
            "float64" => Float64,
            "char" => Char,
            _ => return None,
        })
    }

    pub fn width(&self) -> usize {
        use PrimitiveType::*;
        match self {
            Int8 | UInt8 | Char => 1,
            Int16 | UInt16 => 2,
            Int24 | UInt24 => 3,
            Int32 | UInt32 | Float32 => 4,
            Int64 | UInt64 | Float64 => 8,
        }
    }

    /// Whether this type can back a calculated field: a function's result
    /// is always an integer written over the placeholder bytes, so the
    /// placeholder itself must be an integer type.
    pub fn is_integer(&self) -> bool {
        !matches!(self, PrimitiveType::Float32 | PrimitiveType::Float64)
    }
}

/// Text encoding for a `string` field (`spec.md` §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Ascii,
}

impl TextEncoding {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "ascii" => Some(TextEncoding::Ascii),
            _ => None,
        }
    }
}

/// A compiled, validated field descriptor (`spec.md` §3.1).
#[derive(Debug)]
pub struct FieldDesc {
    pub name: String,
    pub condition: Option<Expr>,
    pub kind: FieldKind,
}

/// The tagged sum of everything a field can be. Each variant carries only
/// the parameters relevant to it (REDESIGN FLAG, `spec.md` §9).
#[derive(Debug)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    Calculated(CalculatedSpec),
    StringField(StringSpec),
    Array(ArrayDesc),
    Struct(Vec<FieldDesc>),
    Union(UnionDesc),
}

#[derive(Debug)]
pub struct StringSpec {
    pub size: Option<usize>,
    pub encoding: TextEncoding,
}

#[derive(Debug)]
pub enum ArrayCount {
    Fixed(usize),
    Computed(Expr),
    Open,
}

#[derive(Debug)]
pub struct ArrayDesc {
    pub element: Box<FieldDesc>,
    pub count: ArrayCount,
}

#[derive(Debug)]
pub struct CalculatedSpec {
    pub value_type: PrimitiveType,
    pub function: String,
    pub scope_kind: String,
    pub scope_start: Option<String>,
    pub scope_end: Option<String>,
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct UnionDesc {
    pub discriminator: crate::document::Path,
    pub variants: BTreeMap<String, Vec<FieldDesc>>,
}

/// A compiled schema, ready to drive [`crate::codec::Codec`].
#[derive(Debug)]
pub struct Schema {
    pub endianness: Endianness,
    pub fields: Vec<FieldDesc>,
}

impl Schema {
    /// Compiles a raw [`SchemaDoc`] into a validated [`Schema`].
    pub fn compile(doc: &SchemaDoc) -> Result<Schema, SchemaError> {
        let fields = compile_fields(&doc.fields)?;
        Ok(Schema {
            endianness: doc.endianness.into(),
            fields,
        })
    }

    /// Convenience: parse JSON text into a [`SchemaDoc`] and compile it in
    /// one step.
    pub fn from_json_str(text: &str) -> Result<Schema, SchemaError> {
        let doc: SchemaDoc = serde_json::from_str(text).map_err(|_| SchemaError::Contradiction {
            field: "<root>".into(),
            reason: "schema document is not valid JSON",
        })?;
        Schema::compile(&doc)
    }
}

fn compile_fields(defs: &[FieldDef]) -> Result<Vec<FieldDesc>, SchemaError> {
    let mut seen = std::collections::HashSet::new();
    for def in defs {
        if def.name == "#" {
            return Err(SchemaError::Contradiction {
                field: def.name.clone(),
                reason: "'#' is reserved for an array's virtual element and cannot name a sibling field",
            });
        }
        if !seen.insert(def.name.as_str()) {
            return Err(SchemaError::Contradiction {
                field: def.name.clone(),
                reason: "sibling field names must be unique",
            });
        }
    }

    let mut out = Vec::with_capacity(defs.len());
    for (i, def) in defs.iter().enumerate() {
        let desc = compile_field(def)?;
        if let FieldKind::Array(ArrayDesc { count: ArrayCount::Open, .. }) = &desc.kind {
            if i + 1 != defs.len() {
                return Err(SchemaError::Contradiction {
                    field: desc.name.clone(),
                    reason: "open-ended array must be the last field in its struct",
                });
            }
        }
        out.push(desc);
    }
    Ok(out)
}

fn compile_field(def: &FieldDef) -> Result<FieldDesc, SchemaError> {
    let condition = match &def.condition {
        Some(src) => Some(Expr::parse(src).map_err(|_| SchemaError::Contradiction {
            field: def.name.clone(),
            reason: "malformed condition expression",
        })?),
        None => None,
    };

    let kind = compile_kind(def)?;

    Ok(FieldDesc {
        name: def.name.clone(),
        condition,
        kind,
    })
}

fn compile_kind(def: &FieldDef) -> Result<FieldKind, SchemaError> {
    if def.ty == "union" {
        return compile_union(def);
    }
    if def.ty == "struct" {
        let children = def.fields.as_ref().ok_or_else(|| SchemaError::MissingAttribute {
            field: def.name.clone(),
            attribute: "fields",
        })?;
        return Ok(FieldKind::Struct(compile_fields(children)?));
    }
    if def.ty == "array" {
        return compile_array(def);
    }
    if def.ty == "string" {
        let encoding = TextEncoding::parse(&def.encoding).ok_or_else(|| SchemaError::Contradiction {
            field: def.name.clone(),
            reason: "unsupported string encoding",
        })?;
        let size = match def.size {
            Some(n) if n >= 0 => Some(n as usize),
            Some(_) => {
                return Err(SchemaError::Contradiction {
                    field: def.name.clone(),
                    reason: "string size must not be negative",
                })
            }
            None => None,
        };
        return Ok(FieldKind::StringField(StringSpec { size, encoding }));
    }

    let prim = PrimitiveType::parse(&def.ty).ok_or_else(|| SchemaError::UnknownType(def.ty.clone()))?;

    if let Some(function) = &def.function {
        if !prim.is_integer() {
            return Err(SchemaError::Contradiction {
                field: def.name.clone(),
                reason: "calculated fields must use an integer primitive type",
            });
        }

        let params = def.function_parameters.clone().unwrap_or_default();

        let scope_kind = param_str(&params, "function_scope")
            .or(def.function_scope.as_deref())
            .unwrap_or("all_previous")
            .to_string();
        let scope_start = param_str(&params, "function_scope_start")
            .or(def.function_scope_start.as_deref())
            .map(str::to_string);
        let scope_end = param_str(&params, "function_scope_end")
            .or(def.function_scope_end.as_deref())
            .map(str::to_string);

        return Ok(FieldKind::Calculated(CalculatedSpec {
            value_type: prim,
            function: function.clone(),
            scope_kind,
            scope_start,
            scope_end,
            params,
        }));
    }

    Ok(FieldKind::Primitive(prim))
}

fn param_str<'a>(params: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

fn compile_array(def: &FieldDef) -> Result<FieldKind, SchemaError> {
    let element_type = def.element_type.as_ref().ok_or_else(|| SchemaError::MissingAttribute {
        field: def.name.clone(),
        attribute: "element_type",
    })?;

    let mut element_def = FieldDef {
        name: "#".to_string(),
        ty: element_type.clone(),
        ..Default::default()
    };
    if let Some(children) = &def.element_fields {
        element_def.fields = Some(children.clone());
    }
    let element = Box::new(compile_field(&element_def)?);
    if matches!(element.kind, FieldKind::Calculated(_)) {
        return Err(SchemaError::Contradiction {
            field: def.name.clone(),
            reason: "array elements cannot be calculated fields",
        });
    }

    let count = match (def.size, &def.length_field) {
        (Some(_), Some(_)) => {
            return Err(SchemaError::Contradiction {
                field: def.name.clone(),
                reason: "array must not set both size and length_field",
            })
        }
        (Some(n), None) if n >= 0 => ArrayCount::Fixed(n as usize),
        (Some(_), None) => ArrayCount::Open,
        (None, Some(expr_src)) => {
            let expr = Expr::parse(expr_src).map_err(|_| SchemaError::Contradiction {
                field: def.name.clone(),
                reason: "malformed length_field expression",
            })?;
            ArrayCount::Computed(expr)
        }
        (None, None) => {
            return Err(SchemaError::MissingAttribute {
                field: def.name.clone(),
                attribute: "size or length_field",
            })
        }
    };

    Ok(FieldKind::Array(ArrayDesc { element, count }))
}

fn compile_union(def: &FieldDef) -> Result<FieldKind, SchemaError> {
    let discriminator_src = def.discriminator_field.as_ref().ok_or_else(|| SchemaError::MissingAttribute {
        field: def.name.clone(),
        attribute: "discriminator_field",
    })?;
    let discriminator = crate::document::parse_path(discriminator_src).map_err(|_| SchemaError::InvalidUnion {
        field: def.name.clone(),
        reason: "malformed discriminator_field path",
    })?;

    let variants_def = def.union_variants.as_ref().ok_or_else(|| SchemaError::InvalidUnion {
        field: def.name.clone(),
        reason: "union must declare union_variants",
    })?;
    if variants_def.is_empty() {
        return Err(SchemaError::InvalidUnion {
            field: def.name.clone(),
            reason: "union_variants must not be empty",
        });
    }

    let mut variants = BTreeMap::new();
    let mut tag_width: Option<usize> = None;
    for (key, fields) in variants_def {
        let compiled = compile_fields(fields)?;
        let first = compiled.first().ok_or_else(|| SchemaError::InvalidUnion {
            field: def.name.clone(),
            reason: "each union variant must have at least one field",
        })?;
        let width = match &first.kind {
            FieldKind::Primitive(p) => p.width(),
            FieldKind::Calculated(c) => c.value_type.width(),
            _ => {
                return Err(SchemaError::InvalidUnion {
                    field: def.name.clone(),
                    reason: "each union variant must start with a primitive discriminator tag",
                })
            }
        };
        if let Some(existing) = tag_width {
            if existing != width {
                return Err(SchemaError::InvalidUnion {
                    field: def.name.clone(),
                    reason: "all union variants must start with a same-width discriminator tag",
                });
            }
        } else {
            tag_width = Some(width);
        }
        variants.insert(key.clone(), compiled);
    }

    Ok(FieldKind::Union(UnionDesc { discriminator, variants }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: serde_json::Value) -> SchemaDoc {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn compiles_simple_header() {
        let schema_doc = doc(serde_json::json!({
            "endianness": "little",
            "fields": [
                {"name": "magic", "type": "uint32"},
                {"name": "name", "type": "string", "size": 32},
                {"name": "n", "type": "uint32"},
                {"name": "data", "type": "array", "length_field": "n", "element_type": "float32"}
            ]
        }));
        let schema = Schema::compile(&schema_doc).unwrap();
        assert_eq!(schema.fields.len(), 4);
        assert!(matches!(schema.endianness, Endianness::Little));
    }

    #[test]
    fn rejects_unknown_type() {
        let schema_doc = doc(serde_json::json!({
            "fields": [{"name": "a", "type": "nope"}]
        }));
        assert_eq!(
            Schema::compile(&schema_doc).unwrap_err(),
            SchemaError::UnknownType("nope".into())
        );
    }

    #[test]
    fn rejects_array_with_both_size_and_length_field() {
        let schema_doc = doc(serde_json::json!({
            "fields": [{
                "name": "a", "type": "array", "size": 2, "length_field": "n", "element_type": "uint8"
            }]
        }));
        assert!(Schema::compile(&schema_doc).is_err());
    }

    #[test]
    fn rejects_open_array_not_last() {
        let schema_doc = doc(serde_json::json!({
            "fields": [
                {"name": "a", "type": "array", "size": -1, "element_type": "uint8"},
                {"name": "b", "type": "uint8"}
            ]
        }));
        assert!(matches!(
            Schema::compile(&schema_doc).unwrap_err(),
            SchemaError::Contradiction { .. }
        ));
    }

    #[test]
    fn compiles_calculated_field_with_override_scope() {
        let schema_doc = doc(serde_json::json!({
            "fields": [
                {"name": "a", "type": "uint8"},
                {"name": "b", "type": "uint16"},
                {
                    "name": "crc", "type": "uint32", "function": "crc32",
                    "function_scope": "entire_file",
                    "function_parameters": {
                        "function_scope": "field_range",
                        "function_scope_start": "a",
                        "function_scope_end": "b"
                    }
                }
            ]
        }));
        let schema = Schema::compile(&schema_doc).unwrap();
        match &schema.fields[2].kind {
            FieldKind::Calculated(spec) => {
                assert_eq!(spec.scope_kind, "field_range");
                assert_eq!(spec.scope_start.as_deref(), Some("a"));
                assert_eq!(spec.scope_end.as_deref(), Some("b"));
            }
            _ => panic!("expected calculated field"),
        }
    }

    #[test]
    fn rejects_duplicate_sibling_names() {
        let schema_doc = doc(serde_json::json!({
            "fields": [
                {"name": "a", "type": "uint8"},
                {"name": "a", "type": "uint16"}
            ]
        }));
        assert!(matches!(
            Schema::compile(&schema_doc).unwrap_err(),
            SchemaError::Contradiction { .. }
        ));
    }

    #[test]
    fn rejects_sentinel_name_as_a_sibling_field() {
        let schema_doc = doc(serde_json::json!({
            "fields": [{"name": "#", "type": "uint8"}]
        }));
        assert!(matches!(
            Schema::compile(&schema_doc).unwrap_err(),
            SchemaError::Contradiction { .. }
        ));
    }

    #[test]
    fn rejects_union_without_variants() {
        let schema_doc = doc(serde_json::json!({
            "fields": [{
                "name": "msg", "type": "union", "discriminator_field": "type"
            }]
        }));
        assert!(matches!(
            Schema::compile(&schema_doc).unwrap_err(),
            SchemaError::InvalidUnion { .. }
        ));
    }

    #[test]
    fn compiles_union_with_matching_tag_widths() {
        let schema_doc = doc(serde_json::json!({
            "fields": [{
                "name": "msg", "type": "union", "discriminator_field": "type",
                "union_variants": {
                    "1": [{"name": "type", "type": "uint8"}, {"name": "x", "type": "uint16"}],
                    "2": [{"name": "type", "type": "uint8"}, {"name": "s", "type": "string", "size": 4}]
                }
            }]
        }));
        assert!(Schema::compile(&schema_doc).is_ok());
    }
}
