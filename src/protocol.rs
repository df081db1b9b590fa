use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub type EntityName = String;
pub type MemberName = String;
pub type WireIndex = usize;

/// Identifier of an argument encoding.
///
/// Tags are open-ended: the built-in set is exposed as constants, and a
/// protocol version may register decoders under any other name. Tags are
/// case-insensitive and stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    pub const INT8: TypeTag = TypeTag(Cow::Borrowed("INT8"));
    pub const UINT8: TypeTag = TypeTag(Cow::Borrowed("UINT8"));
    pub const INT16: TypeTag = TypeTag(Cow::Borrowed("INT16"));
    pub const UINT16: TypeTag = TypeTag(Cow::Borrowed("UINT16"));
    pub const INT32: TypeTag = TypeTag(Cow::Borrowed("INT32"));
    pub const UINT32: TypeTag = TypeTag(Cow::Borrowed("UINT32"));
    pub const INT64: TypeTag = TypeTag(Cow::Borrowed("INT64"));
    pub const UINT64: TypeTag = TypeTag(Cow::Borrowed("UINT64"));
    pub const FLOAT32: TypeTag = TypeTag(Cow::Borrowed("FLOAT32"));
    pub const FLOAT64: TypeTag = TypeTag(Cow::Borrowed("FLOAT64"));
    pub const STRING: TypeTag = TypeTag(Cow::Borrowed("STRING"));
    pub const BLOB: TypeTag = TypeTag(Cow::Borrowed("BLOB"));

    pub fn new(name: impl AsRef<str>) -> Self {
        TypeTag(Cow::Owned(name.as_ref().trim().to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TypeTag {
    fn from(name: String) -> Self {
        TypeTag::new(name)
    }
}

impl From<&str> for TypeTag {
    fn from(name: &str) -> Self {
        TypeTag::new(name)
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.0.into_owned()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded argument or property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<ArgValue>),
}

impl ArgValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ArgValue::I8(v) => Some(v as i64),
            ArgValue::U8(v) => Some(v as i64),
            ArgValue::I16(v) => Some(v as i64),
            ArgValue::U16(v) => Some(v as i64),
            ArgValue::I32(v) => Some(v as i64),
            ArgValue::U32(v) => Some(v as i64),
            ArgValue::I64(v) => Some(v),
            ArgValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ArgValue::U64(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberCategory {
    Property,
    Method,
}

impl fmt::Display for MemberCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberCategory::Property => f.write_str("property"),
            MemberCategory::Method => f.write_str("method"),
        }
    }
}

/// One call located in the decrypted stream by an external walker.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub entity: EntityName,
    pub category: MemberCategory,
    pub index: WireIndex,
    pub args: Bytes,
}

impl CallRecord {
    pub fn method(entity: impl Into<EntityName>, index: WireIndex, args: impl Into<Bytes>) -> Self {
        Self {
            entity: entity.into(),
            category: MemberCategory::Method,
            index,
            args: args.into(),
        }
    }

    pub fn property(entity: impl Into<EntityName>, index: WireIndex, args: impl Into<Bytes>) -> Self {
        Self {
            entity: entity.into(),
            category: MemberCategory::Property,
            index,
            args: args.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_normalization() {
        assert_eq!(TypeTag::new("int32"), TypeTag::INT32);
        assert_eq!(TypeTag::from(" String "), TypeTag::STRING);
        assert_eq!(TypeTag::new("VECTOR3").as_str(), "VECTOR3");
    }

    #[test]
    fn test_type_tag_from_json() {
        let tags: Vec<TypeTag> = serde_json::from_str(r#"["INT32", "uint64", "string"]"#).unwrap();
        assert_eq!(tags, vec![TypeTag::INT32, TypeTag::UINT64, TypeTag::STRING]);
    }

    #[test]
    fn test_arg_value_accessors() {
        assert_eq!(ArgValue::I32(-4).as_i64(), Some(-4));
        assert_eq!(ArgValue::I32(-4).as_u64(), None);
        assert_eq!(ArgValue::U64(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(ArgValue::U64(u64::MAX).as_i64(), None);
        assert_eq!(ArgValue::String("abc".to_string()).as_str(), Some("abc"));
        assert_eq!(ArgValue::F32(1.0).as_i64(), None);
    }
}
