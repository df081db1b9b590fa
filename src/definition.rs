//! Data-driven entity definitions.
//!
//! A definition merges its optional base's members with its own, sorts each
//! category by declared size and uses the sorted position as the wire index.
//! The lists are frozen after [`EntityDefinition::build`]; only observer
//! lists change afterwards. Current property values live in an
//! [`EntityState`], one per decoded entity, never on the shared definition.

use crate::codec::CodecTable;
use crate::error::{Result, UnpackError};
use crate::observer::{MemberEvent, ObserverRegistry, SubscriptionHandle};
use crate::protocol::{ArgValue, EntityName, MemberCategory, MemberName, TypeTag, WireIndex};
use crate::schema::EntitySchema;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: MemberName,
    /// Footprint size. Only a sort key, never the index itself.
    pub size: u64,
    pub args: Vec<TypeTag>,
}

pub type PropertyDescriptor = MemberDescriptor;
pub type MethodDescriptor = MemberDescriptor;

/// Outcome of one successful [`EntityDefinition::decode_and_fire`].
#[derive(Debug, Clone, PartialEq)]
pub struct FireReport {
    pub member: MemberName,
    pub values: Vec<ArgValue>,
    pub delivered: usize,
    pub failed: usize,
}

pub struct EntityDefinition {
    name: EntityName,
    base: Option<EntityName>,
    properties: Vec<PropertyDescriptor>,
    methods: Vec<MethodDescriptor>,
    codec: Arc<CodecTable>,
    observers: ObserverRegistry,
}

fn merge_sorted(base: &[MemberDescriptor], own: impl Iterator<Item = MemberDescriptor>) -> Vec<MemberDescriptor> {
    let mut merged = base.to_vec();
    merged.extend(own);
    // stable: equal sizes keep base-first declaration order
    merged.sort_by_key(|d| d.size);
    merged
}

impl EntityDefinition {
    pub fn build(schema: &EntitySchema, base: Option<&EntityDefinition>, codec: Arc<CodecTable>) -> Self {
        let own_properties = schema.properties.iter().map(|p| MemberDescriptor {
            name: p.name.clone(),
            size: p.size,
            args: vec![p.tag.clone()],
        });
        let own_methods = schema.methods.iter().map(|m| MemberDescriptor {
            name: m.name.clone(),
            size: m.size,
            args: m.args.clone(),
        });

        let properties = merge_sorted(base.map(|b| b.properties()).unwrap_or_default(), own_properties);
        let methods = merge_sorted(base.map(|b| b.methods()).unwrap_or_default(), own_methods);

        Self {
            name: schema.name.clone(),
            base: base.map(|b| b.name.clone()),
            properties,
            methods,
            codec,
            observers: ObserverRegistry::new(),
        }
    }

    /// Load-time checks: every tag has a decoder, remainder-consuming tags
    /// come last, and no two members of a category share a size unless
    /// `allow_ties` is set.
    pub fn validate(&self, allow_ties: bool) -> Result<()> {
        for category in [MemberCategory::Property, MemberCategory::Method] {
            let members = self.members(category);

            for member in members {
                for (position, tag) in member.args.iter().enumerate() {
                    if !self.codec.contains(tag) {
                        return Err(UnpackError::Schema(format!(
                            "{}.{} uses tag {} with no registered decoder",
                            self.name, member.name, tag
                        )));
                    }
                    self.codec.check(tag).map_err(|e| {
                        UnpackError::Schema(format!("{}.{}: {}", self.name, member.name, e))
                    })?;
                    if position + 1 < member.args.len() && self.codec.consumes_remainder(tag) {
                        return Err(UnpackError::Schema(format!(
                            "{}.{}: tag {} consumes the remaining bytes but is followed by more arguments",
                            self.name, member.name, tag
                        )));
                    }
                }
            }

            for pair in members.windows(2) {
                if pair[0].size != pair[1].size {
                    continue;
                }
                if !allow_ties {
                    return Err(UnpackError::Schema(format!(
                        "{} {}s {} and {} share size {}; wire index depends on declaration order",
                        self.name, category, pair[0].name, pair[1].name, pair[0].size
                    )));
                }
                tracing::warn!(
                    entity = %self.name,
                    %category,
                    first = %pair[0].name,
                    second = %pair[1].name,
                    size = pair[0].size,
                    "footprint tie resolved by declaration order"
                );
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn members(&self, category: MemberCategory) -> &[MemberDescriptor] {
        match category {
            MemberCategory::Property => &self.properties,
            MemberCategory::Method => &self.methods,
        }
    }

    /// Wire index to property name.
    pub fn attributes_map(&self) -> BTreeMap<WireIndex, &str> {
        self.properties.iter().enumerate().map(|(i, d)| (i, d.name.as_str())).collect()
    }

    /// Wire index to method name.
    pub fn methods_map(&self) -> BTreeMap<WireIndex, &str> {
        self.methods.iter().enumerate().map(|(i, d)| (i, d.name.as_str())).collect()
    }

    pub fn index_of(&self, category: MemberCategory, name: &str) -> Option<WireIndex> {
        self.members(category).iter().position(|d| d.name == name)
    }

    /// Fresh per-entity property state backed by this definition.
    pub fn instantiate(self: &Arc<Self>) -> EntityState {
        EntityState::new(Arc::clone(self))
    }

    /// Subscribe to a member by name. Methods and properties share one
    /// namespace here; a name declared in both is rejected.
    pub fn subscribe<F>(&self, member: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&MemberEvent<'_>) + Send + Sync + 'static,
    {
        let method = self.index_of(MemberCategory::Method, member);
        let property = self.index_of(MemberCategory::Property, member);

        let (category, index) = match (method, property) {
            (Some(index), None) => (MemberCategory::Method, index),
            (None, Some(index)) => (MemberCategory::Property, index),
            (Some(_), Some(_)) => {
                return Err(UnpackError::Schema(format!(
                    "{}.{} is both a method and a property",
                    self.name, member
                )))
            }
            (None, None) => {
                return Err(UnpackError::UnknownMemberName {
                    entity: self.name.clone(),
                    name: member.to_string(),
                })
            }
        };

        self.subscribe_index(category, index, callback)
    }

    pub fn subscribe_index<F>(&self, category: MemberCategory, index: WireIndex, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&MemberEvent<'_>) + Send + Sync + 'static,
    {
        if index >= self.members(category).len() {
            return Err(UnpackError::UnknownMember { category, index });
        }

        let id = self.observers.subscribe(category, index, Arc::new(callback));
        Ok(SubscriptionHandle {
            owner: self.observers.owner(),
            entity: self.name.clone(),
            category,
            index,
            id,
        })
    }

    /// Returns false if the handle was issued by another definition, even a
    /// same-named one from another registry, or was already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        if handle.owner != self.observers.owner() {
            return false;
        }
        self.observers.unsubscribe(handle.category, handle.index, handle.id)
    }

    pub fn observer_count(&self, category: MemberCategory, index: WireIndex) -> usize {
        self.observers.count(category, index)
    }

    /// Decode `raw` against the member at `index` and notify its observers.
    ///
    /// No observer runs unless decoding succeeds. Property values are not
    /// retained; use [`EntityState::decode_and_fire`] for that.
    pub fn decode_and_fire(&self, category: MemberCategory, index: WireIndex, raw: &[u8]) -> Result<FireReport> {
        let (descriptor, values) = self.decode_member(category, index, raw)?;
        Ok(self.fire(category, index, descriptor, values))
    }

    fn decode_member(
        &self,
        category: MemberCategory,
        index: WireIndex,
        raw: &[u8],
    ) -> Result<(&MemberDescriptor, Vec<ArgValue>)> {
        let descriptor = self
            .members(category)
            .get(index)
            .ok_or(UnpackError::UnknownMember { category, index })?;

        let values = self.codec.decode_all(&descriptor.args, raw)?;
        Ok((descriptor, values))
    }

    fn fire(
        &self,
        category: MemberCategory,
        index: WireIndex,
        descriptor: &MemberDescriptor,
        values: Vec<ArgValue>,
    ) -> FireReport {
        let event = MemberEvent {
            entity: &self.name,
            category,
            index,
            member: &descriptor.name,
            values: &values,
        };
        let delivery = self.observers.notify(&event);

        tracing::trace!(
            entity = %self.name,
            member = %descriptor.name,
            %category,
            index,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "fired member"
        );

        FireReport {
            member: descriptor.name.clone(),
            values,
            delivered: delivery.delivered,
            failed: delivery.failed,
        }
    }
}

/// Current property values of one entity, decoded against a shared
/// [`EntityDefinition`].
///
/// Each replay (or each entity within it) gets its own state, so values
/// decoded by one consumer are never visible to another.
pub struct EntityState {
    definition: Arc<EntityDefinition>,
    values: RwLock<Vec<Option<ArgValue>>>,
}

impl EntityState {
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let values = vec![None; definition.properties.len()];
        Self {
            definition,
            values: RwLock::new(values),
        }
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    /// Current value of a property, if one has been decoded.
    pub fn property_value(&self, name: &str) -> Option<ArgValue> {
        let index = self.definition.index_of(MemberCategory::Property, name)?;
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(index).cloned().flatten()
    }

    pub fn property_values(&self) -> BTreeMap<MemberName, Option<ArgValue>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        self.definition
            .properties
            .iter()
            .zip(values.iter())
            .map(|(d, v)| (d.name.clone(), v.clone()))
            .collect()
    }

    /// Forget every decoded value.
    pub fn reset(&self) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.iter_mut().for_each(|v| *v = None);
    }

    /// Like [`EntityDefinition::decode_and_fire`], but a decoded property
    /// is stored here before any observer runs.
    pub fn decode_and_fire(&self, category: MemberCategory, index: WireIndex, raw: &[u8]) -> Result<FireReport> {
        let (descriptor, values) = self.definition.decode_member(category, index, raw)?;

        if category == MemberCategory::Property {
            let mut stored = self.values.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = stored.get_mut(index) {
                *slot = values.first().cloned();
            }
        }

        Ok(self.definition.fire(category, index, descriptor, values))
    }
}

impl std::fmt::Debug for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityState")
            .field("entity", &self.definition.name)
            .field("values", &self.property_values())
            .finish()
    }
}

impl std::fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("properties", &self.attributes_map())
            .field("methods", &self.methods_map())
            .field("observers", &self.observers)
            .finish()
    }
}
