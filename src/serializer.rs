//! The two-phase encoder (`spec.md` §4.4): phase 1 walks the schema writing
//! real field values and zeroed placeholders for calculated fields while
//! recording their offsets; phase 2 resolves each calculated field's scope
//! against the phase-1 buffer and patches its bytes in place.
//!
//! Grounded on `original_source/binary_format_handler.py`'s
//! `EnhancedTwoPhaseSerializer` (`_serialize_phase1`/`_serialize_phase2`),
//! restructured around the compiled [`FieldDesc`] tree instead of walking
//! raw dicts field-by-field.

use std::collections::BTreeMap;

use crate::document::{path_to_string, Document, Path, PathSeg};
use crate::errors::{CodecError, EncodeError, UnionError};
use crate::functions::FunctionRegistry;
use crate::schema::{ArrayDesc, CalculatedSpec, FieldDesc, FieldKind, PrimitiveType, Schema, StringSpec, TextEncoding};
use crate::scope::Layout;
use crate::writer::Writer;

struct QueuedCalc {
    offset: usize,
    width: usize,
    function: String,
    scope_kind: String,
    scope_start: Option<String>,
    scope_end: Option<String>,
    params: serde_json::Map<String, serde_json::Value>,
}

/// Encodes `document` against `schema`, producing byte-exact output.
pub fn encode(schema: &Schema, document: &Document, registry: &FunctionRegistry) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::new(schema.endianness);
    let mut layout = Layout::default();
    let mut queue: Vec<QueuedCalc> = Vec::new();
    let mut path: Path = Vec::new();

    for field in &schema.fields {
        encode_field(&mut writer, field, document, &mut path, &mut layout, &mut queue)?;
    }

    for q in &queue {
        let value = {
            let slice = layout.resolve(writer.as_slice(), &q.scope_kind, q.scope_start.as_deref(), q.scope_end.as_deref(), q.offset)?;
            registry.call(&q.function, slice, document, q.width, &q.params)?
        };
        writer.patch_at(q.offset, q.width, value);
    }

    Ok(writer.into_bytes())
}

/// Encodes one named field, looked up in `current` (the document level this
/// field's siblings live in). Conditions are evaluated against `current`
/// too — `spec.md` §4.2's path addressing is local to the enclosing struct,
/// not the document root, matching the bare `type` reference in the union
/// example of §4.7.
fn encode_field(
    writer: &mut Writer,
    field: &FieldDesc,
    current: &Document,
    path: &mut Path,
    layout: &mut Layout,
    queue: &mut Vec<QueuedCalc>,
) -> Result<(), CodecError> {
    if let Some(cond) = &field.condition {
        if !cond.eval_as_bool(current)? {
            return Ok(());
        }
    }

    path.push(PathSeg::Name(field.name.clone()));
    let start = writer.position();

    if let FieldKind::Calculated(spec) = &field.kind {
        encode_calculated(writer, spec, &field.name, start, layout, queue);
        path.pop();
        return Ok(());
    }

    let value = current
        .get_field(&field.name)
        .ok_or_else(|| EncodeError::MissingField(path_to_string(path)))?;
    encode_value(writer, &field.kind, value, current, path, layout, queue)?;

    let size = writer.position() - start;
    layout.record(&field.name, start, size);
    path.pop();
    Ok(())
}

fn encode_calculated(writer: &mut Writer, spec: &CalculatedSpec, name: &str, start: usize, layout: &mut Layout, queue: &mut Vec<QueuedCalc>) {
    let width = spec.value_type.width();
    writer.write_zeros(width);
    layout.record(name, start, width);
    queue.push(QueuedCalc {
        offset: start,
        width,
        function: spec.function.clone(),
        scope_kind: spec.scope_kind.clone(),
        scope_start: spec.scope_start.clone(),
        scope_end: spec.scope_end.clone(),
        params: spec.params.clone(),
    });
}

/// Encodes an already-resolved value against a field kind. Used both after
/// `encode_field`'s named lookup and directly for array elements, whose
/// value comes from the element's position in the list rather than a name.
/// `current` is the enclosing document level, consulted only by `Array`'s
/// `length_field` expression — mirrors `decode_value`'s `current` parameter.
fn encode_value(
    writer: &mut Writer,
    kind: &FieldKind,
    value: &Document,
    current: &Document,
    path: &mut Path,
    layout: &mut Layout,
    queue: &mut Vec<QueuedCalc>,
) -> Result<(), CodecError> {
    match kind {
        FieldKind::Primitive(ty) => write_primitive(writer, *ty, value, path),
        FieldKind::Calculated(_) => unreachable!("array elements cannot be calculated fields; rejected at schema compile time"),
        FieldKind::StringField(spec) => encode_string(writer, spec, value, path),
        FieldKind::Array(arr) => encode_array(writer, arr, value, current, path, layout, queue),
        FieldKind::Struct(children) => {
            for child in children {
                encode_field(writer, child, value, path, layout, queue)?;
            }
            Ok(())
        }
        FieldKind::Union(union_desc) => encode_union(writer, union_desc, value, path, layout, queue),
    }
}

fn write_primitive(writer: &mut Writer, ty: PrimitiveType, value: &Document, path: &Path) -> Result<(), CodecError> {
    use PrimitiveType::*;
    match ty {
        Int8 => writer.write_i8(ranged(value, path, i8::MIN as i64, i8::MAX as i64)? as i8),
        UInt8 => writer.write_u8(ranged(value, path, 0, u8::MAX as i64)? as u8),
        Int16 => writer.write_i16(ranged(value, path, i16::MIN as i64, i16::MAX as i64)? as i16),
        UInt16 => writer.write_u16(ranged(value, path, 0, u16::MAX as i64)? as u16),
        Int24 => writer.write_i24(ranged(value, path, -8_388_608, 8_388_607)? as i32),
        UInt24 => writer.write_u24(ranged(value, path, 0, 16_777_215)? as u32),
        Int32 => writer.write_i32(ranged(value, path, i32::MIN as i64, i32::MAX as i64)? as i32),
        UInt32 => writer.write_u32(ranged(value, path, 0, u32::MAX as i64)? as u32),
        Int64 => writer.write_i64(expect_i64(value, path)?),
        UInt64 => writer.write_u64(ranged(value, path, 0, i64::MAX)? as u64),
        Float32 => writer.write_f32(expect_f64(value, path)? as f32),
        Float64 => writer.write_f64(expect_f64(value, path)?),
        Char => writer.write_u8(expect_char_byte(value, path)?),
    }
    Ok(())
}

fn expect_i64(value: &Document, path: &Path) -> Result<i64, CodecError> {
    value
        .as_i64()
        .ok_or_else(|| EncodeError::TypeMismatch { path: path_to_string(path), expected: "integer" }.into())
}

/// Checks that a field's integer value fits the declared primitive width
/// before truncating it to that width (`spec.md` §7's `EncodeError::OutOfRange`,
/// named there for exactly this case: an `int24` or other fixed-width
/// integer overflow).
fn ranged(value: &Document, path: &Path, min: i64, max: i64) -> Result<i64, CodecError> {
    let v = expect_i64(value, path)?;
    if v < min || v > max {
        return Err(EncodeError::OutOfRange {
            path: path_to_string(path),
            reason: format!("value {v} outside allowed range {min}..={max}"),
        }
        .into());
    }
    Ok(v)
}

fn expect_f64(value: &Document, path: &Path) -> Result<f64, CodecError> {
    value
        .as_f64()
        .ok_or_else(|| EncodeError::TypeMismatch { path: path_to_string(path), expected: "number" }.into())
}

fn expect_char_byte(value: &Document, path: &Path) -> Result<u8, CodecError> {
    match value {
        Document::String(s) if s.chars().count() == 1 => Ok(s.as_bytes()[0]),
        Document::Int(i) => Ok(*i as u8),
        _ => Err(EncodeError::TypeMismatch { path: path_to_string(path), expected: "single character" }.into()),
    }
}

fn encode_string(writer: &mut Writer, spec: &StringSpec, value: &Document, path: &Path) -> Result<(), CodecError> {
    let text = value
        .as_str()
        .ok_or_else(|| EncodeError::TypeMismatch { path: path_to_string(path), expected: "string" })?;

    if spec.encoding == TextEncoding::Ascii && !text.is_ascii() {
        return Err(EncodeError::OutOfRange {
            path: path_to_string(path),
            reason: "value is not valid ASCII".to_string(),
        }
        .into());
    }
    let bytes = text.as_bytes();

    match spec.size {
        Some(fixed) => {
            let mut buf = vec![0u8; fixed];
            let n = bytes.len().min(fixed);
            buf[..n].copy_from_slice(&bytes[..n]);
            writer.write_bytes(&buf);
        }
        None => {
            writer.write_u32(bytes.len() as u32);
            writer.write_bytes(bytes);
        }
    }
    Ok(())
}

fn encode_array(
    writer: &mut Writer,
    arr: &ArrayDesc,
    value: &Document,
    current: &Document,
    path: &mut Path,
    layout: &mut Layout,
    queue: &mut Vec<QueuedCalc>,
) -> Result<(), CodecError> {
    let empty: Vec<Document> = Vec::new();
    let list = value.as_list().unwrap_or(&empty);

    match &arr.count {
        crate::schema::ArrayCount::Fixed(n) => {
            for i in 0..*n {
                let elem = list.get(i).cloned().unwrap_or_else(|| zero_document(&arr.element));
                path.push(PathSeg::Index(i));
                encode_value(writer, &arr.element.kind, &elem, current, path, layout, queue)?;
                path.pop();
            }
        }
        crate::schema::ArrayCount::Computed(expr) => {
            // The element count comes from evaluating `length_field` against
            // the enclosing document, mirroring `decode_array`'s
            // `expr.eval_as_len(current)` — the document's actual list length
            // is not consulted for the count, only for which elements exist.
            let n = expr.eval_as_len(current)?;
            for i in 0..n {
                let elem = list.get(i).cloned().unwrap_or_else(|| zero_document(&arr.element));
                path.push(PathSeg::Index(i));
                encode_value(writer, &arr.element.kind, &elem, current, path, layout, queue)?;
                path.pop();
            }
        }
        crate::schema::ArrayCount::Open => {
            for (i, elem) in list.iter().enumerate() {
                path.push(PathSeg::Index(i));
                encode_value(writer, &arr.element.kind, elem, current, path, layout, queue)?;
                path.pop();
            }
        }
    }
    Ok(())
}

fn encode_union(writer: &mut Writer, union_desc: &crate::schema::UnionDesc, value: &Document, path: &mut Path, layout: &mut Layout, queue: &mut Vec<QueuedCalc>) -> Result<(), CodecError> {
    let discriminator_value = value
        .get(&union_desc.discriminator)
        .ok_or_else(|| UnionError::MissingDiscriminator { field: path_to_string(path) })?;
    let key = discriminator_value
        .discriminator_key()
        .ok_or_else(|| UnionError::MissingDiscriminator { field: path_to_string(path) })?;
    let variant = union_desc.variants.get(&key).ok_or_else(|| UnionError::UnknownVariant {
        field: path_to_string(path),
        discriminator: key.clone(),
    })?;
    for child in variant {
        encode_field(writer, child, value, path, layout, queue)?;
    }
    Ok(())
}

fn zero_document(field: &FieldDesc) -> Document {
    match &field.kind {
        FieldKind::Primitive(_) | FieldKind::Calculated(_) => Document::Int(0),
        FieldKind::StringField(_) => Document::String(String::new()),
        FieldKind::Array(_) => Document::List(Vec::new()),
        FieldKind::Struct(children) => {
            let mut m = BTreeMap::new();
            for child in children {
                m.insert(child.name.clone(), zero_document(child));
            }
            Document::Map(m)
        }
        FieldKind::Union(_) => Document::map(),
    }
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
    fn encodes_fixed_width_header() {
        let schema = compile(serde_json::json!({
            "endianness": "little",
            "fields": [
                {"name": "magic", "type": "uint32"},
                {"name": "flag", "type": "uint8"}
            ]
        }));
        let doc = Document::from(serde_json::json!({"magic": 0x0102_0304u32, "flag": 9}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01, 0x09]);
    }

    #[test]
    fn encodes_variable_length_string_with_prefix() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "name", "type": "string"}]
        }));
        let doc = Document::from(serde_json::json!({"name": "hi"}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn pads_fixed_string_with_nul() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "name", "type": "string", "size": 4}]
        }));
        let doc = Document::from(serde_json::json!({"name": "hi"}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![b'h', b'i', 0, 0]);
    }

    #[test]
    fn calculated_crc32_patches_placeholder() {
        let schema = compile(serde_json::json!({
            "fields": [
                {"name": "a", "type": "uint8"},
                {"name": "b", "type": "uint8"},
                {"name": "crc", "type": "uint32", "function": "crc32", "function_scope": "all_previous"}
            ]
        }));
        let doc = Document::from(serde_json::json!({"a": 1, "b": 2, "crc": "auto"}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_ne!(&bytes[2..6], &[0, 0, 0, 0]);
    }

    #[test]
    fn fixed_array_zero_pads_missing_elements() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "data", "type": "array", "size": 3, "element_type": "uint8"}]
        }));
        let doc = Document::from(serde_json::json!({"data": [5, 6]}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![5, 6, 0]);
    }

    #[test]
    fn length_field_array_uses_declared_count_not_list_length() {
        let schema = compile(serde_json::json!({
            "fields": [
                {"name": "n", "type": "uint8"},
                {"name": "data", "type": "array", "length_field": "n", "element_type": "uint8"}
            ]
        }));
        // The declared count (n=4) diverges from the document's actual list
        // length (2 elements): the encoder must honor `n`, zero-padding the
        // missing elements, not silently emit only 2 elements.
        let doc = Document::from(serde_json::json!({"n": 4, "data": [5, 6]}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![4, 5, 6, 0, 0]);
    }

    #[test]
    fn missing_field_errors_with_path() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "a", "type": "uint8"}]
        }));
        let doc = Document::map();
        let err = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap_err();
        assert_eq!(err, CodecError::Encode(EncodeError::MissingField("a".into())));
    }

    #[test]
    fn union_encodes_selected_variant_by_local_discriminator() {
        let schema = compile(serde_json::json!({
            "fields": [{
                "name": "msg", "type": "union", "discriminator_field": "type",
                "union_variants": {
                    "1": [{"name": "type", "type": "uint8"}, {"name": "x", "type": "uint16"}],
                    "2": [{"name": "type", "type": "uint8"}, {"name": "s", "type": "string", "size": 2}]
                }
            }]
        }));
        let doc = Document::from(serde_json::json!({"msg": {"type": 1, "x": 513}}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![1, 1, 2]);
    }

    #[test]
    fn int24_overflow_is_out_of_range() {
        let schema = compile(serde_json::json!({
            "fields": [{"name": "a", "type": "int24"}]
        }));
        let doc = Document::from(serde_json::json!({"a": 9_000_000}));
        let err = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap_err();
        assert!(matches!(err, CodecError::Encode(EncodeError::OutOfRange { .. })));
    }

    #[test]
    fn condition_skips_field_entirely() {
        let schema = compile(serde_json::json!({
            "fields": [
                {"name": "count", "type": "uint8"},
                {"name": "opt", "type": "uint16", "condition": "count > 0"}
            ]
        }));
        let doc = Document::from(serde_json::json!({"count": 0, "opt": 42}));
        let bytes = encode(&schema, &doc, &FunctionRegistry::builtin()).unwrap();
        assert_eq!(bytes, vec![0]);
    }
}
