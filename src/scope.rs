//! Scope resolution for calculated fields (`spec.md` §4.5): given a scope
//! kind and bounds plus the bookkeeping recorded during phase 1, produce the
//! byte slice a function is computed over.
//!
//! Grounded directly on `original_source/binary_format_handler.py`'s
//! `ScopeResolver.get_scope_data`, which implements the exact same table of
//! scope kinds against the same two pieces of bookkeeping (a byte buffer and
//! field offset/size maps) — translated here from Python's exception-driven
//! control flow into a `Result`-returning lookup.

use std::collections::HashMap;

use crate::errors::ScopeError;

/// Byte-offset and byte-size bookkeeping built up during phase 1 of
/// encoding (`spec.md` §3.3). Keyed by plain field name, flat across the
/// whole schema — nested fields are recorded under their own leaf name,
/// exactly as `spec.md` describes the bookkeeping (no qualified paths).
#[derive(Debug, Default)]
pub struct Layout {
    pub offsets: HashMap<String, usize>,
    pub sizes: HashMap<String, usize>,
}

impl Layout {
    pub fn record(&mut self, name: &str, offset: usize, size: usize) {
        self.offsets.insert(name.to_string(), offset);
        self.sizes.insert(name.to_string(), size);
    }

    fn field_offset(&self, name: &str) -> Result<usize, ScopeError> {
        self.offsets.get(name).copied().ok_or_else(|| ScopeError::UnknownField(name.to_string()))
    }

    fn field_end(&self, name: &str) -> Result<usize, ScopeError> {
        let start = self.field_offset(name)?;
        let size = self.sizes.get(name).copied().ok_or_else(|| ScopeError::UnknownField(name.to_string()))?;
        Ok(start + size)
    }

    /// Resolves a scope against `data` (the phase-1 buffer, with the
    /// calculated field's own placeholder bytes still in place) at
    /// `current_offset` (the position where the calculated field itself
    /// starts — the boundary for `all_previous`).
    pub fn resolve<'d>(
        &self,
        data: &'d [u8],
        scope_kind: &str,
        scope_start: Option<&str>,
        scope_end: Option<&str>,
        current_offset: usize,
    ) -> Result<&'d [u8], ScopeError> {
        match scope_kind {
            "all_previous" | "from_start" => Ok(&data[..current_offset]),
            "entire_file" => Ok(data),
            "field_range" => {
                let start_name = scope_start.ok_or(ScopeError::MissingBound("function_scope_start"))?;
                let end_name = scope_end.ok_or(ScopeError::MissingBound("function_scope_end"))?;
                let start = self.field_offset(start_name)?;
                let end = self.field_end(end_name)?;
                slice(data, start, end)
            }
            "from_field" => {
                let start_name = scope_start.ok_or(ScopeError::MissingBound("function_scope_start"))?;
                let start = self.field_offset(start_name)?;
                slice(data, start, data.len())
            }
            "to_field" => {
                let end_name = scope_end.ok_or(ScopeError::MissingBound("function_scope_end"))?;
                let end = self.field_end(end_name)?;
                slice(data, 0, end)
            }
            "after_field" => {
                let start_name = scope_start.ok_or(ScopeError::MissingBound("function_scope_start"))?;
                let start = self.field_end(start_name)?;
                slice(data, start, data.len())
            }
            "last_n_bytes" => {
                let n_str = scope_start.ok_or(ScopeError::MissingBound("function_scope_start"))?;
                let n: usize = n_str.parse().map_err(|_| ScopeError::BadRange(n_str.to_string()))?;
                let start = current_offset.saturating_sub(n);
                slice(data, start, current_offset)
            }
            "specific_bytes" => {
                let spec = scope_start.ok_or(ScopeError::MissingBound("function_scope_start"))?;
                if let Some((a, b)) = spec.split_once(':') {
                    let start: usize = a.parse().map_err(|_| ScopeError::BadRange(spec.to_string()))?;
                    let end: usize = b.parse().map_err(|_| ScopeError::BadRange(spec.to_string()))?;
                    slice(data, start, end)
                } else {
                    let i: usize = spec.parse().map_err(|_| ScopeError::BadRange(spec.to_string()))?;
                    slice(data, i, i + 1)
                }
            }
            other => Err(ScopeError::UnknownScope(other.to_string())),
        }
    }
}

fn slice(data: &[u8], start: usize, end: usize) -> Result<&[u8], ScopeError> {
    if start > end || end > data.len() {
        return Err(ScopeError::BadRange(format!("{start}..{end} out of bounds for {} bytes", data.len())));
    }
    Ok(&data[start..end])
}
