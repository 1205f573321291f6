//! The decoder (`spec.md` §4.8): the mirror image of [`crate::serializer`],
//! building a [`Document`] up field by field instead of tearing one down.
//!
//! Grounded on `original_source/binary_format_handler.py`'s
//! `_deserialize_field`/`_deserialize_fields`, with the union peek/rewind
//! behavior from `spec.md` §4.7 and the open-array EOF-as-terminator
//! exception from §4.8 and §7 layered on top.

use crate::document::{path_to_string, Document, Path, PathSeg};
use crate::errors::{CodecError, DecodeError, UnionError};
use crate::functions::FunctionRegistry;
use crate::reader::Reader;
use crate::schema::{ArrayCount, ArrayDesc, FieldDesc, FieldKind, PrimitiveType, Schema, StringSpec, TextEncoding, UnionDesc};

/// Decodes `data` against `schema`, producing the same document shape
/// `encode` accepts.
pub fn decode(schema: &Schema, data: &[u8], registry: &FunctionRegistry) -> Result<Document, CodecError> {
    let mut reader = Reader::new(data, schema.endianness);
    let mut root = Document::map();
    let mut path: Path = Vec::new();

    for field in &schema.fields {
        decode_field(&mut reader, field, &mut root, &mut path, registry)?;
    }

    Ok(root)
}

/// Decodes one named field into `current` (the document level this field's
/// siblings live in), honoring its `condition` against that same level —
/// matching `encode_field`'s locally-scoped path addressing.
fn decode_field(reader: &mut Reader, field: &FieldDesc, current: &mut Document, path: &mut Path, registry: &FunctionRegistry) -> Result<(), CodecError> {
    if let Some(cond) = &field.condition {
        if !cond.eval_as_bool(current)? {
            return Ok(());
        }
    }

    path.push(PathSeg::Name(field.name.clone()));
    let value = decode_value(reader, field, current, path, registry)?;
    current.insert(field.name.clone(), value);
    path.pop();
    Ok(())
}

/// Decodes a value for `field` at the cursor's current position. `current`
/// is the enclosing document level, consulted only by `Array`'s
/// `length_field` expression — composite kinds build and return their own
/// fresh sub-document instead of reading `current`.
fn decode_value(reader: &mut Reader, field: &FieldDesc, current: &Document, path: &mut Path, registry: &FunctionRegistry) -> Result<Document, CodecError> {
    match &field.kind {
        FieldKind::Primitive(ty) => read_primitive(reader, *ty, path),
        FieldKind::Calculated(spec) => read_primitive(reader, spec.value_type, path),
        FieldKind::StringField(spec) => Ok(Document::String(decode_string(reader, spec, path)?)),
        FieldKind::Array(arr) => decode_array(reader, arr, current, path, registry),
        FieldKind::Struct(children) => {
            let mut child = Document::map();
            for c in children {
                decode_field(reader, c, &mut child, path, registry)?;
            }
            Ok(child)
        }
        FieldKind::Union(union_desc) => decode_union(reader, union_desc, path, registry),
    }
}

fn read_primitive(reader: &mut Reader, ty: PrimitiveType, path: &Path) -> Result<Document, CodecError> {
    use PrimitiveType::*;
    Ok(match ty {
        Int8 => Document::Int(reader.read_i8(path)? as i64),
        UInt8 => Document::Int(reader.read_u8(path)? as i64),
        Int16 => Document::Int(reader.read_i16(path)? as i64),
        UInt16 => Document::Int(reader.read_u16(path)? as i64),
        Int24 => Document::Int(reader.read_i24(path)? as i64),
        UInt24 => Document::Int(reader.read_u24(path)? as i64),
        Int32 => Document::Int(reader.read_i32(path)? as i64),
        UInt32 => Document::Int(reader.read_u32(path)? as i64),
        Int64 => Document::Int(reader.read_i64(path)?),
        UInt64 => Document::Int(reader.read_u64(path)? as i64),
        Float32 => Document::Float(reader.read_f32(path)? as f64),
        Float64 => Document::Float(reader.read_f64(path)?),
        Char => Document::String((reader.read_u8(path)? as char).to_string()),
    })
}

fn decode_string(reader: &mut Reader, spec: &StringSpec, path: &Path) -> Result<String, CodecError> {
    let bytes = match spec.size {
        Some(fixed) => {
            let raw = reader.read_bytes(fixed, path)?;
            trim_trailing_nul(raw)
        }
        None => {
            let len = reader.read_u32(path)? as usize;
            reader.read_bytes(len, path)?
        }
    };
    decode_text(bytes, spec.encoding, path)
}

fn trim_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

fn decode_text(bytes: &[u8], encoding: TextEncoding, path: &Path) -> Result<String, CodecError> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::BadEncoding { field: path_to_string(path) }.into()),
        TextEncoding::Ascii => {
            if !bytes.is_ascii() {
                return Err(DecodeError::BadEncoding { field: path_to_string(path) }.into());
            }
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
    }
}

fn decode_array(reader: &mut Reader, arr: &ArrayDesc, current: &Document, path: &mut Path, registry: &FunctionRegistry) -> Result<Document, CodecError> {
    let mut items = Vec::new();

    match &arr.count {
        ArrayCount::Fixed(n) => {
            for i in 0..*n {
                path.push(PathSeg::Index(i));
                items.push(decode_value(reader, &arr.element, current, path, registry)?);
                path.pop();
            }
        }
        ArrayCount::Computed(expr) => {
            let n = expr.eval_as_len(current)?;
            for i in 0..n {
                path.push(PathSeg::Index(i));
                items.push(decode_value(reader, &arr.element, current, path, registry)?);
                path.pop();
            }
        }
        ArrayCount::Open => {
            let mut i = 0;
            loop {
                if reader.at_end() {
                    tracing::trace!(field = %path_to_string(path), "open array terminated at end of buffer");
                    break;
                }
                path.push(PathSeg::Index(i));
                let v = decode_value(reader, &arr.element, current, path, registry)?;
                path.pop();
                items.push(v);
                i += 1;
            }
        }
    }

    Ok(Document::List(items))
}

fn decode_union(reader: &mut Reader, union_desc: &UnionDesc, path: &mut Path, registry: &FunctionRegistry) -> Result<Document, CodecError> {
    let any_variant = union_desc
        .variants
        .values()
        .next()
        .expect("schema compilation rejects unions with no variants");
    let tag_field = &any_variant[0];
    let tag_type = match &tag_field.kind {
        FieldKind::Primitive(p) => *p,
        FieldKind::Calculated(c) => c.value_type,
        _ => unreachable!("schema compilation requires a primitive discriminator tag"),
    };

    let before = reader.position();
    let tag_value = read_primitive(reader, tag_type, path)?;
    reader.rewind(reader.position() - before);

    let key = tag_value
        .discriminator_key()
        .ok_or_else(|| UnionError::MissingDiscriminator { field: path_to_string(path) })?;
    let variant = union_desc.variants.get(&key).ok_or_else(|| UnionError::UnknownVariant {
        field: path_to_string(path),
        discriminator: key.clone(),
    })?;

    let mut value = Document::map();
    for child in variant {
        decode_field(reader, child, &mut value, path, registry)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDoc;

    fn compile(json: serde_json::Value) -> Schema {
        let doc: SchemaDoc = serde_json::from_value(json).unwrap();
        Schema::compile(&doc).unwrap()
    }

    #[test]
    fn decodes_fixed_width_header() {
        let schema = compile(serde_json::json!({
            "endianness": "little",
            "fields": [
                {"name": "magic", "type": "uint32"},
                {"name": "flag", "type": "uint8"}
            ]
        }));
        let bytes = [0x04, 0x03, 0x02, 0x01, 0x09];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(doc.get_field("magic"), Some(&Document::Int(0x0102_0304)));
        assert_eq!(doc.get_field("flag"), Some(&Document::Int(9)));
    }

    #[test]
    fn decodes_variable_length_string() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "name", "type": "string"}]
        }));
        let bytes = [2, 0, 0, 0, b'h', b'i'];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(doc.get_field("name"), Some(&Document::String("hi".into())));
    }

    #[test]
    fn trims_nul_padding_from_fixed_string() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "name", "type": "string", "size": 4}]
        }));
        let bytes = [b'h', b'i', 0, 0];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(doc.get_field("name"), Some(&Document::String("hi".into())));
    }

    #[test]
    fn open_array_stops_at_buffer_end_without_error() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "data", "type": "array", "size": -1, "element_type": "uint8"}]
        }));
        let bytes = [1, 2, 3];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(
            doc.get_field("data"),
            Some(&Document::List(vec![Document::Int(1), Document::Int(2), Document::Int(3)]))
        );
    }

    #[test]
    fn short_read_mid_field_is_an_error() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "n", "type": "uint32"}]
        }));
        let bytes = [1, 2];
        let err = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap_err();
        assert_eq!(err, CodecError::Decode(DecodeError::UnexpectedEnd { field: "n".into() }));
    }

    #[test]
    fn union_peeks_discriminator_then_decodes_full_variant() {
        let schema = compile(serde_json::json!({
            "fields": [{
                "name": "msg", "type": "union", "discriminator_field": "type",
                "union_variants": {
                    "1": [{"name": "type", "type": "uint8"}, {"name": "x", "type": "uint16"}],
                    "2": [{"name": "type", "type": "uint8"}, {"name": "s", "type": "string", "size": 2}]
                }
            }]
        }));
        let bytes = [1, 1, 2];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        let msg = doc.get_field("msg").unwrap();
        assert_eq!(msg.get_field("type"), Some(&Document::Int(1)));
        assert_eq!(msg.get_field("x"), Some(&Document::Int(513)));
    }

    #[test]
    fn condition_false_omits_field_from_document() {
        let schema = compile(serde_json::json!({
            "fields": [
                {"name": "count", "type": "uint8"},
                {"name": "opt", "type": "uint16", "condition": "count > 0"}
            ]
        }));
        let bytes = [0];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(doc.get_field("count"), Some(&Document::Int(0)));
        assert_eq!(doc.get_field("opt"), None);
    }

    #[test]
    fn length_field_array_reads_count_from_sibling() {
        let schema = compile(serde_json::json!({
            "fields": [
                {"name": "n", "type": "uint8"},
                {"name": "data", "type": "array", "length_field": "n", "element_type": "uint16"}
            ]
        }));
        let bytes = [2, 0x01, 0x00, 0x02, 0x00];
        let doc = decode(&schema, &bytes, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(
            doc.get_field("data"),
            Some(&Document::List(vec![Document::Int(1), Document::Int(2)]))
        );
    }
}
