use crate::codec::CodecTable;
use crate::definition::{EntityDefinition, EntityState, FireReport};
use crate::error::{Result, UnpackError};
use crate::protocol::{CallRecord, EntityName};
use crate::schema::{EntitySchema, ProtocolSchema, ProtocolVersion};
use ahash::AHashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Accept members of one category that share a size, ordering them by
    /// declaration. Off by default: such ties make wire indices depend on
    /// declaration order alone.
    pub allow_footprint_ties: bool,
}

impl RegistryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_footprint_ties(mut self, allow: bool) -> Self {
        self.allow_footprint_ties = allow;
        self
    }
}

/// All entity definitions of one protocol version, built and validated once.
#[derive(Debug)]
pub struct EntityDefinitionRegistry {
    version: ProtocolVersion,
    codec: Arc<CodecTable>,
    definitions: AHashMap<EntityName, Arc<EntityDefinition>>,
}

struct Loader<'a> {
    declared: AHashMap<&'a str, &'a EntitySchema>,
    built: AHashMap<EntityName, Arc<EntityDefinition>>,
    visiting: Vec<&'a str>,
    codec: Arc<CodecTable>,
    options: RegistryOptions,
}

impl<'a> Loader<'a> {
    fn build(&mut self, schema: &'a EntitySchema) -> Result<Arc<EntityDefinition>> {
        if let Some(definition) = self.built.get(&schema.name) {
            return Ok(Arc::clone(definition));
        }

        if self.visiting.contains(&schema.name.as_str()) {
            let mut chain = self.visiting.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(&schema.name);
            return Err(UnpackError::Schema(format!("inheritance cycle: {}", chain)));
        }

        self.visiting.push(&schema.name);
        let base = match &schema.base {
            Some(base_name) => {
                let base_schema = *self.declared.get(base_name.as_str()).ok_or_else(|| {
                    UnpackError::Schema(format!("{} references unknown base {}", schema.name, base_name))
                })?;
                Some(self.build(base_schema)?)
            }
            None => None,
        };
        self.visiting.pop();

        let definition = EntityDefinition::build(schema, base.as_deref(), Arc::clone(&self.codec));
        definition.validate(self.options.allow_footprint_ties)?;

        let definition = Arc::new(definition);
        self.built.insert(schema.name.clone(), Arc::clone(&definition));
        Ok(definition)
    }
}

impl EntityDefinitionRegistry {
    /// Build every entity of `schema` with the built-in decoders and the
    /// schema's string rule.
    pub fn load(schema: &ProtocolSchema) -> Result<Self> {
        Self::load_with(schema, CodecTable::new(schema.string_rule), RegistryOptions::default())
    }

    /// Like [`load`](Self::load) with a caller-supplied decoder table, which
    /// takes precedence over the schema's string rule.
    pub fn load_with(schema: &ProtocolSchema, codec: CodecTable, options: RegistryOptions) -> Result<Self> {
        let mut declared = AHashMap::with_capacity(schema.entities.len());
        for entity in &schema.entities {
            if declared.insert(entity.name.as_str(), entity).is_some() {
                return Err(UnpackError::Schema(format!(
                    "entity {} declared twice in version {}",
                    entity.name, schema.version
                )));
            }
        }

        let codec = Arc::new(codec);
        let mut loader = Loader {
            declared,
            built: AHashMap::with_capacity(schema.entities.len()),
            visiting: Vec::new(),
            codec: Arc::clone(&codec),
            options,
        };

        for entity in &schema.entities {
            loader.build(entity)?;
        }

        tracing::debug!(
            version = %schema.version,
            entities = loader.built.len(),
            string_rule = ?codec.string_rule(),
            "loaded entity definitions"
        );

        Ok(Self {
            version: schema.version.clone(),
            codec,
            definitions: loader.built,
        })
    }

    pub fn bundled(version: &str) -> Result<Self> {
        Self::load(&ProtocolSchema::bundled(version)?)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn codec(&self) -> &CodecTable {
        &self.codec
    }

    pub fn get(&self, entity: &str) -> Result<&Arc<EntityDefinition>> {
        self.definitions
            .get(entity)
            .ok_or_else(|| UnpackError::UnknownEntity(entity.to_string()))
    }

    pub fn has(&self, entity: &str) -> bool {
        self.definitions.contains_key(entity)
    }

    pub fn definitions(&self) -> &AHashMap<EntityName, Arc<EntityDefinition>> {
        &self.definitions
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Fresh property state for one entity of type `entity`. The registry
    /// itself never holds decoded values.
    pub fn instantiate(&self, entity: &str) -> Result<EntityState> {
        Ok(self.get(entity)?.instantiate())
    }

    /// Route one call record from the stream walker to its definition.
    /// Observers run, but property values are only kept by an
    /// [`EntityState`].
    pub fn dispatch(&self, record: &CallRecord) -> Result<FireReport> {
        self.get(&record.entity)?
            .decode_and_fire(record.category, record.index, &record.args)
    }
}
