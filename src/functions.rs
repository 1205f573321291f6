//! The calculated-field function registry (`spec.md` §4.6): `crc32`,
//! `crc16`, `length`, `file_size`, `count`, plus a hook for registering
//! more.
//!
//! Grounded on `original_source/binary_format_handler.py`'s
//! `_calculate_function_value`, which dispatches the same five names (minus
//! its ad hoc `checksum`, dropped per `SPEC_FULL.md` §C) over a resolved
//! scope slice. The CRC implementations follow the bit-by-bit reflected
//! construction `bitcraft`'s own `bits.rs::reverse_bits_n` already uses for
//! bit-order handling, generalized here to a full table-free CRC engine.

use std::collections::HashMap;

use crate::document::Document;
use crate::errors::FunctionError;

/// A calculated field's resolved parameters, as a JSON object (empty map if
/// none were given).
pub type Params = serde_json::Map<String, serde_json::Value>;

fn param_u64(params: &Params, key: &str, default: u64) -> u64 {
    match params.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(default),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim_start_matches("0x");
            u64::from_str_radix(s, 16).unwrap_or(default)
        }
        _ => default,
    }
}

fn param_i64(params: &Params, key: &str, default: i64) -> i64 {
    match params.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(default),
        _ => default,
    }
}

fn param_bool(params: &Params, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn param_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Reverses the low `width` bits of `value`; used for reflected CRC input
/// bytes and output registers.
fn reverse_bits_n(value: u64, width: u32) -> u64 {
    let mut v = value;
    let mut r = 0u64;
    for _ in 0..width {
        r = (r << 1) | (v & 1);
        v >>= 1;
    }
    r
}

fn reverse_byte(b: u8) -> u8 {
    reverse_bits_n(b as u64, 8) as u8
}

/// A bit-by-bit CRC engine parameterized the way `crcmod` (used by
/// `original_source/tests/test_function_parameters_scope.py`) parameterizes
/// its generators: `width`-bit register, `poly` (non-reflected, MSB-first
/// form), `init`, whether input bytes and the output register are
/// bit-reflected, and a final XOR.
fn crc(data: &[u8], width: u32, poly: u64, init: u64, reflect: bool, xor_out: u64) -> u64 {
    let mask: u64 = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    let top_bit = 1u64 << (width - 1);
    let poly = poly & mask;
    let mut reg = init & mask;

    for &byte in data {
        let b = if reflect { reverse_byte(byte) } else { byte };
        reg ^= (b as u64) << (width - 8);
        for _ in 0..8 {
            reg = if reg & top_bit != 0 { (reg << 1) ^ poly } else { reg << 1 };
            reg &= mask;
        }
    }

    if reflect {
        reg = reverse_bits_n(reg, width);
    }
    (reg ^ (xor_out & mask)) & mask
}

fn fn_crc32(slice: &[u8], _doc: &Document, _width: usize, params: &Params) -> Result<i64, FunctionError> {
    let poly = param_u64(params, "polynomial", 0x104C11DB7) & 0xFFFF_FFFF;
    let init = param_u64(params, "initial_value", 0xFFFF_FFFF);
    let reverse = param_bool(params, "reverse", true);
    let xor_out = param_u64(params, "xor_out", 0xFFFF_FFFF);
    Ok(crc(slice, 32, poly, init, reverse, xor_out) as i64)
}

fn fn_crc16(slice: &[u8], _doc: &Document, _width: usize, params: &Params) -> Result<i64, FunctionError> {
    let poly = param_u64(params, "polynomial", 0x18005) & 0xFFFF;
    let init = param_u64(params, "initial_value", 0xFFFF);
    let reverse = param_bool(params, "reverse", true);
    let xor_out = param_u64(params, "xor_out", 0);
    Ok(crc(slice, 16, poly, init, reverse, xor_out) as i64)
}

fn fn_length(slice: &[u8], _doc: &Document, _width: usize, params: &Params) -> Result<i64, FunctionError> {
    let multiplier = param_i64(params, "multiplier", 1);
    let offset = param_i64(params, "offset", 0);
    Ok((slice.len() as i64) * multiplier + offset)
}

fn fn_file_size(slice: &[u8], _doc: &Document, width: usize, _params: &Params) -> Result<i64, FunctionError> {
    Ok(slice.len() as i64 + width as i64)
}

fn fn_count(_slice: &[u8], doc: &Document, _width: usize, params: &Params) -> Result<i64, FunctionError> {
    let key = param_str(params, "key").ok_or_else(|| FunctionError::BadParams("count requires a 'key' parameter".into()))?;
    let n = doc.get_field(key).and_then(Document::as_list).map(<[Document]>::len).unwrap_or(0);
    Ok(n as i64)
}

type Handler = fn(&[u8], &Document, usize, &Params) -> Result<i64, FunctionError>;

/// Dispatches a calculated field's `function` name to its implementation.
/// Built with the five names `spec.md` §4.6 describes; [`register`] adds
/// more without touching the built-ins.
pub struct FunctionRegistry {
    handlers: HashMap<String, Handler>,
}

impl FunctionRegistry {
    /// The registry `spec.md` §4.6 describes out of the box.
    pub fn builtin() -> Self {
        let mut handlers: HashMap<String, Handler> = HashMap::new();
        handlers.insert("crc32".to_string(), fn_crc32);
        handlers.insert("crc16".to_string(), fn_crc16);
        handlers.insert("length".to_string(), fn_length);
        handlers.insert("file_size".to_string(), fn_file_size);
        handlers.insert("count".to_string(), fn_count);
        FunctionRegistry { handlers }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn call(&self, name: &str, slice: &[u8], doc: &Document, field_width: usize, params: &Params) -> Result<i64, FunctionError> {
        let handler = self.handlers.get(name).ok_or_else(|| FunctionError::Unknown(name.to_string()))?;
        handler(slice, doc, field_width, params)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_params() -> Params {
        serde_json::Map::new()
    }

    #[test]
    fn crc32_matches_known_check_value() {
        let value = crc(b"123456789", 32, 0x04C11DB7, 0xFFFF_FFFF, true, 0xFFFF_FFFF);
        assert_eq!(value, 0xCBF4_3926);
    }

    #[test]
    fn crc16_modbus_matches_known_check_value() {
        let value = crc(b"123456789", 16, 0x8005, 0xFFFF, true, 0);
        assert_eq!(value, 0x4B37);
    }

    #[test]
    fn length_applies_multiplier_and_offset() {
        let registry = FunctionRegistry::builtin();
        let mut params = empty_params();
        params.insert("multiplier".into(), serde_json::json!(2));
        params.insert("offset".into(), serde_json::json!(1));
        let doc = Document::map();
        let v = registry.call("length", &[0u8; 5], &doc, 4, &params).unwrap();
        assert_eq!(v, 11);
    }

    #[test]
    fn file_size_adds_own_field_width() {
        let registry = FunctionRegistry::builtin();
        let doc = Document::map();
        let v = registry.call("file_size", &[0u8; 10], &doc, 4, &empty_params()).unwrap();
        assert_eq!(v, 14);
    }

    #[test]
    fn count_reads_list_length_from_document() {
        let registry = FunctionRegistry::builtin();
        let mut doc = Document::map();
        doc.insert("items", Document::List(vec![Document::Int(1), Document::Int(2), Document::Int(3)]));
        let mut params = empty_params();
        params.insert("key".into(), serde_json::json!("items"));
        let v = registry.call("count", &[], &doc, 1, &params).unwrap();
        assert_eq!(v, 3);
    }

    #[test]
    fn count_is_zero_when_key_absent() {
        let registry = FunctionRegistry::builtin();
        let doc = Document::map();
        let mut params = empty_params();
        params.insert("key".into(), serde_json::json!("missing"));
        let v = registry.call("count", &[], &doc, 1, &params).unwrap();
        assert_eq!(v, 0);
    }

    #[test]
    fn unknown_function_errors() {
        let registry = FunctionRegistry::builtin();
        let doc = Document::map();
        assert_eq!(
            registry.call("bogus", &[], &doc, 1, &empty_params()).unwrap_err(),
            FunctionError::Unknown("bogus".into())
        );
    }
}
