//! Typed argument decoding.
//!
//! Every [`TypeTag`] maps to an [`ArgumentDecoder`] in a [`CodecTable`].
//! Call sites only ever ask the table to decode a tag, so new encodings
//! (arrays, records, enums, fixed-point numbers) are added by registering a
//! decoder rather than by touching the callers.

use crate::error::{Result, UnpackError};
use crate::protocol::{ArgValue, TypeTag};
use ahash::AHashMap;
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How variable-length STRING and BLOB arguments find their end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringRule {
    /// Consume every byte left in the argument buffer. Only valid as the
    /// last declared tag of a member.
    #[default]
    Remainder,
    /// One length byte, then that many bytes.
    LengthPrefixedU8,
    /// A little-endian u32 length, then that many bytes.
    LengthPrefixedU32,
}

pub trait ArgumentDecoder: Send + Sync {
    /// Decode one value, advancing `buf` past the bytes it used.
    fn decode(&self, buf: &mut &[u8], table: &CodecTable) -> Result<ArgValue>;

    /// True when the decoder swallows the rest of the buffer.
    fn consumes_remainder(&self) -> bool {
        false
    }

    /// Load-time check against the table the decoder is registered in.
    fn check(&self, _table: &CodecTable) -> Result<()> {
        Ok(())
    }
}

fn ensure_remaining(buf: &[u8], needed: usize, tag: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(UnpackError::ArgumentDecode(format!(
            "{} needs {} bytes, {} remaining",
            tag,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Fixed-width little-endian scalar.
pub struct FixedDecoder {
    name: &'static str,
    width: usize,
    read: fn(&mut &[u8]) -> ArgValue,
}

impl FixedDecoder {
    pub fn new(name: &'static str, width: usize, read: fn(&mut &[u8]) -> ArgValue) -> Self {
        Self { name, width, read }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl ArgumentDecoder for FixedDecoder {
    fn decode(&self, buf: &mut &[u8], _table: &CodecTable) -> Result<ArgValue> {
        ensure_remaining(buf, self.width, self.name)?;
        Ok((self.read)(buf))
    }
}

/// STRING (UTF-8 checked) and BLOB (raw bytes) under a [`StringRule`].
pub struct StringDecoder {
    rule: StringRule,
    utf8: bool,
}

impl StringDecoder {
    pub fn string(rule: StringRule) -> Self {
        Self { rule, utf8: true }
    }

    pub fn blob(rule: StringRule) -> Self {
        Self { rule, utf8: false }
    }

    fn label(&self) -> &'static str {
        if self.utf8 { "STRING" } else { "BLOB" }
    }
}

impl ArgumentDecoder for StringDecoder {
    fn decode(&self, buf: &mut &[u8], _table: &CodecTable) -> Result<ArgValue> {
        let len = match self.rule {
            StringRule::Remainder => buf.remaining(),
            StringRule::LengthPrefixedU8 => {
                ensure_remaining(buf, 1, self.label())?;
                buf.get_u8() as usize
            }
            StringRule::LengthPrefixedU32 => {
                ensure_remaining(buf, 4, self.label())?;
                buf.get_u32_le() as usize
            }
        };
        ensure_remaining(buf, len, self.label())?;

        let raw = buf[..len].to_vec();
        buf.advance(len);

        if !self.utf8 {
            return Ok(ArgValue::Bytes(raw));
        }

        String::from_utf8(raw)
            .map(ArgValue::String)
            .map_err(|e| UnpackError::ArgumentDecode(format!("STRING is not valid UTF-8: {}", e)))
    }

    fn consumes_remainder(&self) -> bool {
        self.rule == StringRule::Remainder
    }
}

/// A u32 little-endian element count followed by that many `element` values.
///
/// Every element must consume at least one byte, so the element count can
/// never exceed the bytes left in the buffer.
pub struct ArrayDecoder {
    element: TypeTag,
}

impl ArrayDecoder {
    pub fn new(element: TypeTag) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &TypeTag {
        &self.element
    }
}

impl ArgumentDecoder for ArrayDecoder {
    fn decode(&self, buf: &mut &[u8], table: &CodecTable) -> Result<ArgValue> {
        ensure_remaining(buf, 4, "ARRAY")?;
        let count = buf.get_u32_le() as usize;
        if count > buf.remaining() {
            return Err(UnpackError::ArgumentDecode(format!(
                "ARRAY of {} declares {} elements, only {} bytes remaining",
                self.element,
                count,
                buf.remaining()
            )));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let before = buf.remaining();
            items.push(table.decode(&self.element, buf)?);
            if buf.remaining() == before {
                return Err(UnpackError::ArgumentDecode(format!(
                    "ARRAY element {} consumed no bytes",
                    self.element
                )));
            }
        }
        Ok(ArgValue::Array(items))
    }

    fn check(&self, table: &CodecTable) -> Result<()> {
        if !table.contains(&self.element) {
            return Err(UnpackError::Schema(format!(
                "ARRAY element tag {} has no registered decoder",
                self.element
            )));
        }
        if table.consumes_remainder(&self.element) {
            return Err(UnpackError::Schema(format!(
                "ARRAY element tag {} consumes the remaining bytes",
                self.element
            )));
        }
        Ok(())
    }
}

/// Tag-to-decoder table for one protocol version.
#[derive(Clone)]
pub struct CodecTable {
    decoders: AHashMap<TypeTag, Arc<dyn ArgumentDecoder>>,
    string_rule: StringRule,
}

impl CodecTable {
    pub fn new(string_rule: StringRule) -> Self {
        let mut table = Self {
            decoders: AHashMap::new(),
            string_rule,
        };

        table.register(TypeTag::INT8, FixedDecoder::new("INT8", 1, |b| ArgValue::I8(b.get_i8())));
        table.register(TypeTag::UINT8, FixedDecoder::new("UINT8", 1, |b| ArgValue::U8(b.get_u8())));
        table.register(TypeTag::INT16, FixedDecoder::new("INT16", 2, |b| ArgValue::I16(b.get_i16_le())));
        table.register(TypeTag::UINT16, FixedDecoder::new("UINT16", 2, |b| ArgValue::U16(b.get_u16_le())));
        table.register(TypeTag::INT32, FixedDecoder::new("INT32", 4, |b| ArgValue::I32(b.get_i32_le())));
        table.register(TypeTag::UINT32, FixedDecoder::new("UINT32", 4, |b| ArgValue::U32(b.get_u32_le())));
        table.register(TypeTag::INT64, FixedDecoder::new("INT64", 8, |b| ArgValue::I64(b.get_i64_le())));
        table.register(TypeTag::UINT64, FixedDecoder::new("UINT64", 8, |b| ArgValue::U64(b.get_u64_le())));
        table.register(TypeTag::FLOAT32, FixedDecoder::new("FLOAT32", 4, |b| ArgValue::F32(b.get_f32_le())));
        table.register(TypeTag::FLOAT64, FixedDecoder::new("FLOAT64", 8, |b| ArgValue::F64(b.get_f64_le())));
        table.register(TypeTag::STRING, StringDecoder::string(string_rule));
        table.register(TypeTag::BLOB, StringDecoder::blob(string_rule));

        table
    }

    /// Register (or replace) the decoder for `tag`.
    pub fn register(&mut self, tag: TypeTag, decoder: impl ArgumentDecoder + 'static) {
        self.decoders.insert(tag, Arc::new(decoder));
    }

    pub fn with_decoder(mut self, tag: TypeTag, decoder: impl ArgumentDecoder + 'static) -> Self {
        self.register(tag, decoder);
        self
    }

    pub fn string_rule(&self) -> StringRule {
        self.string_rule
    }

    pub fn contains(&self, tag: &TypeTag) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn consumes_remainder(&self, tag: &TypeTag) -> bool {
        self.decoders
            .get(tag)
            .map(|d| d.consumes_remainder())
            .unwrap_or(false)
    }

    /// Run the registered decoder's own load-time check for `tag`.
    pub fn check(&self, tag: &TypeTag) -> Result<()> {
        match self.decoders.get(tag) {
            Some(decoder) => decoder.check(self),
            None => Err(UnpackError::Schema(format!("no decoder registered for tag {}", tag))),
        }
    }

    pub fn decode(&self, tag: &TypeTag, buf: &mut &[u8]) -> Result<ArgValue> {
        let decoder = self.decoders.get(tag).ok_or_else(|| {
            UnpackError::ArgumentDecode(format!("no decoder registered for tag {}", tag))
        })?;
        decoder.decode(buf, self)
    }

    /// Decode `raw` left to right against `tags`.
    pub fn decode_all(&self, tags: &[TypeTag], raw: &[u8]) -> Result<Vec<ArgValue>> {
        let mut buf = raw;
        let mut values = Vec::with_capacity(tags.len());

        for tag in tags {
            values.push(self.decode(tag, &mut buf)?);
        }

        if buf.has_remaining() {
            tracing::debug!(
                leftover = buf.remaining(),
                total = raw.len(),
                "ignoring trailing argument bytes"
            );
        }

        Ok(values)
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::new(StringRule::default())
    }
}

impl std::fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.decoders.keys().map(|t| t.as_str()).collect();
        tags.sort_unstable();
        f.debug_struct("CodecTable")
            .field("string_rule", &self.string_rule)
            .field("tags", &tags)
            .finish()
    }
}
