use crate::codec::StringRule;
use crate::error::{Result, UnpackError};
use crate::protocol::{EntityName, MemberName, TypeTag};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type ProtocolVersion = String;

const BUNDLED: &[(&str, &str)] = &[("1.0.0", include_str!("../schemas/1.0.0.json"))];

/// Declared property: one value of one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: MemberName,
    pub size: u64,
    #[serde(rename = "type")]
    pub tag: TypeTag,
}

impl PropertySchema {
    pub fn new(name: impl Into<MemberName>, size: u64, tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            size,
            tag,
        }
    }
}

/// Declared method: an ordered argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSchema {
    pub name: MemberName,
    pub size: u64,
    #[serde(default)]
    pub args: Vec<TypeTag>,
}

impl MethodSchema {
    pub fn new(name: impl Into<MemberName>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, tag: TypeTag) -> Self {
        self.args.push(tag);
        self
    }

    pub fn with_args(mut self, tags: impl IntoIterator<Item = TypeTag>) -> Self {
        self.args.extend(tags);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: EntityName,
    #[serde(default)]
    pub base: Option<EntityName>,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    #[serde(default)]
    pub methods: Vec<MethodSchema>,
}

impl EntitySchema {
    pub fn new(name: impl Into<EntityName>) -> Self {
        Self {
            name: name.into(),
            base: None,
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<EntityName>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_property(mut self, property: PropertySchema) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_method(mut self, method: MethodSchema) -> Self {
        self.methods.push(method);
        self
    }
}

/// Every entity declaration for one protocol version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSchema {
    pub version: ProtocolVersion,
    #[serde(default)]
    pub string_rule: StringRule,
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
}

impl ProtocolSchema {
    pub fn new(version: impl Into<ProtocolVersion>) -> Self {
        Self {
            version: version.into(),
            string_rule: StringRule::default(),
            entities: Vec::new(),
        }
    }

    pub fn with_string_rule(mut self, rule: StringRule) -> Self {
        self.string_rule = rule;
        self
    }

    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn get_entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Schema shipped with the crate for `version`.
    pub fn bundled(version: &str) -> Result<Self> {
        let (_, json) = BUNDLED
            .iter()
            .find(|(v, _)| *v == version)
            .ok_or_else(|| UnpackError::Schema(format!("no bundled schema for version {}", version)))?;
        Self::from_json_str(json)
    }

    pub fn bundled_versions() -> Vec<&'static str> {
        BUNDLED.iter().map(|(v, _)| *v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_login_schema() {
        let schema = ProtocolSchema::bundled("1.0.0").unwrap();
        assert_eq!(schema.version, "1.0.0");
        assert_eq!(schema.string_rule, StringRule::Remainder);

        let login = schema.get_entity("Login").unwrap();
        assert!(login.base.is_none());
        assert_eq!(login.properties, vec![PropertySchema::new("accountDBID_s", 10_000_000_000, TypeTag::STRING)]);
        assert_eq!(login.methods.len(), 2);
        assert_eq!(login.methods[0].args, vec![TypeTag::INT32]);
        assert_eq!(login.methods[1].args, vec![TypeTag::UINT64]);
    }

    #[test]
    fn test_unknown_bundled_version() {
        assert!(matches!(ProtocolSchema::bundled("0.0.1"), Err(UnpackError::Schema(_))));
        assert_eq!(ProtocolSchema::bundled_versions(), vec!["1.0.0"]);
    }

    #[test]
    fn test_schema_from_json_defaults() {
        let schema = ProtocolSchema::from_json_str(
            r#"{
                "version": "2.1",
                "entities": [
                    { "name": "Vehicle", "base": "Entity",
                      "methods": [ { "name": "ping", "size": 0 } ] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(schema.string_rule, StringRule::Remainder);
        let vehicle = schema.get_entity("Vehicle").unwrap();
        assert_eq!(vehicle.base.as_deref(), Some("Entity"));
        assert!(vehicle.properties.is_empty());
        assert!(vehicle.methods[0].args.is_empty());
    }

    #[test]
    fn test_schema_builder() {
        let schema = ProtocolSchema::new("x")
            .with_string_rule(StringRule::LengthPrefixedU32)
            .with_entity(
                EntitySchema::new("Avatar")
                    .with_base("Base")
                    .with_property(PropertySchema::new("hp", 16, TypeTag::UINT16))
                    .with_method(MethodSchema::new("say", 8).with_args([TypeTag::INT32, TypeTag::STRING])),
            );

        let avatar = schema.get_entity("Avatar").unwrap();
        assert_eq!(avatar.methods[0].args, vec![TypeTag::INT32, TypeTag::STRING]);
        assert!(schema.get_entity("Base").is_none());
    }

    #[test]
    fn test_malformed_schema_json() {
        let err = ProtocolSchema::from_json_str(r#"{ "entities": [] }"#).unwrap_err();
        assert!(matches!(err, UnpackError::Json(_)));
    }
}
