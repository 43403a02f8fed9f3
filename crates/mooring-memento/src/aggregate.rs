//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Memento model and kind taxonomy."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::kind::Kind;
use crate::memento::{AdjunctMemento, CatalogItemMemento, EntityMemento, LocationMemento, Memento};

/// A relationship id with no memento in the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DanglingReference {
    pub from_kind: Kind,
    pub from_id: String,
    pub kind: Kind,
    pub id: String,
}

/// The complete snapshot set consumed by one rebind pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMemento {
    #[serde(default)]
    pub entities: IndexMap<String, EntityMemento>,
    #[serde(default)]
    pub locations: IndexMap<String, LocationMemento>,
    #[serde(default)]
    pub policies: IndexMap<String, AdjunctMemento>,
    #[serde(default)]
    pub enrichers: IndexMap<String, AdjunctMemento>,
    #[serde(default)]
    pub feeds: IndexMap<String, AdjunctMemento>,
    #[serde(default)]
    pub catalog_items: IndexMap<String, CatalogItemMemento>,
    #[serde(default)]
    pub top_level_entities: Vec<String>,
    #[serde(default)]
    pub top_level_locations: Vec<String>,
}

impl GraphMemento {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a memento, returning the previous one for the same id.
    pub fn insert(&mut self, memento: impl Into<Memento>) -> Option<Memento> {
        match memento.into() {
            Memento::Entity(m) => self.entities.insert(m.core.id.clone(), m).map(Memento::Entity),
            Memento::Location(m) => self
                .locations
                .insert(m.core.id.clone(), m)
                .map(Memento::Location),
            Memento::Policy(m) => self.policies.insert(m.core.id.clone(), m).map(Memento::Policy),
            Memento::Enricher(m) => self
                .enrichers
                .insert(m.core.id.clone(), m)
                .map(Memento::Enricher),
            Memento::Feed(m) => self.feeds.insert(m.core.id.clone(), m).map(Memento::Feed),
            Memento::CatalogItem(m) => self
                .catalog_items
                .insert(m.core.id.clone(), m)
                .map(Memento::CatalogItem),
        }
    }

    pub fn remove(&mut self, kind: Kind, id: &str) -> Option<Memento> {
        match kind {
            Kind::Entity => self.entities.shift_remove(id).map(Memento::Entity),
            Kind::Location => self.locations.shift_remove(id).map(Memento::Location),
            Kind::Policy => self.policies.shift_remove(id).map(Memento::Policy),
            Kind::Enricher => self.enrichers.shift_remove(id).map(Memento::Enricher),
            Kind::Feed => self.feeds.shift_remove(id).map(Memento::Feed),
            Kind::CatalogItem => self.catalog_items.shift_remove(id).map(Memento::CatalogItem),
            Kind::Unknown => None,
        }
    }

    /// Owned copy of the memento stored under `(kind, id)`.
    pub fn get(&self, kind: Kind, id: &str) -> Option<Memento> {
        match kind {
            Kind::Entity => self.entities.get(id).cloned().map(Memento::Entity),
            Kind::Location => self.locations.get(id).cloned().map(Memento::Location),
            Kind::Policy => self.policies.get(id).cloned().map(Memento::Policy),
            Kind::Enricher => self.enrichers.get(id).cloned().map(Memento::Enricher),
            Kind::Feed => self.feeds.get(id).cloned().map(Memento::Feed),
            Kind::CatalogItem => self.catalog_items.get(id).cloned().map(Memento::CatalogItem),
            Kind::Unknown => None,
        }
    }

    pub fn contains(&self, kind: Kind, id: &str) -> bool {
        match kind {
            Kind::Entity => self.entities.contains_key(id),
            Kind::Location => self.locations.contains_key(id),
            Kind::Policy => self.policies.contains_key(id),
            Kind::Enricher => self.enrichers.contains_key(id),
            Kind::Feed => self.feeds.contains_key(id),
            Kind::CatalogItem => self.catalog_items.contains_key(id),
            Kind::Unknown => false,
        }
    }

    pub fn ids(&self, kind: Kind) -> Vec<&str> {
        fn keys<V>(map: &IndexMap<String, V>) -> Vec<&str> {
            map.keys().map(String::as_str).collect()
        }
        match kind {
            Kind::Entity => keys(&self.entities),
            Kind::Location => keys(&self.locations),
            Kind::Policy => keys(&self.policies),
            Kind::Enricher => keys(&self.enrichers),
            Kind::Feed => keys(&self.feeds),
            Kind::CatalogItem => keys(&self.catalog_items),
            Kind::Unknown => Vec::new(),
        }
    }

    pub fn count(&self, kind: Kind) -> usize {
        match kind {
            Kind::Entity => self.entities.len(),
            Kind::Location => self.locations.len(),
            Kind::Policy => self.policies.len(),
            Kind::Enricher => self.enrichers.len(),
            Kind::Feed => self.feeds.len(),
            Kind::CatalogItem => self.catalog_items.len(),
            Kind::Unknown => 0,
        }
    }

    pub fn len(&self) -> usize {
        Kind::persisted().iter().map(|kind| self.count(*kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All mementos of `kind`, cloned, in insertion order.
    pub fn mementos(&self, kind: Kind) -> Vec<Memento> {
        self.ids(kind)
            .into_iter()
            .filter_map(|id| self.get(kind, id))
            .collect()
    }

    /// Every relationship id that has no memento, in aggregate order.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        for kind in Kind::persisted() {
            for memento in self.mementos(*kind) {
                for (ref_kind, ref_id) in memento.referenced_ids() {
                    if !self.contains(ref_kind, ref_id) {
                        dangling.push(DanglingReference {
                            from_kind: *kind,
                            from_id: memento.id().to_owned(),
                            kind: ref_kind,
                            id: ref_id.to_owned(),
                        });
                    }
                }
            }
        }
        dangling
    }

    /// Recompute the top-level lists from mementos without a parent.
    pub fn derive_top_level(&mut self) {
        self.top_level_entities = self
            .entities
            .values()
            .filter(|m| m.parent.is_none())
            .map(|m| m.core.id.clone())
            .collect();
        self.top_level_locations = self
            .locations
            .values()
            .filter(|m| m.parent.is_none())
            .map(|m| m.core.id.clone())
            .collect();
    }

    /// Entity ids ordered so every parent precedes its children.
    pub fn entities_parent_first(&self) -> Vec<&str> {
        parent_first(
            self.entities
                .iter()
                .map(|(id, m)| (id.as_str(), m.parent.as_deref())),
        )
    }

    /// Location ids ordered so every parent precedes its children.
    pub fn locations_parent_first(&self) -> Vec<&str> {
        parent_first(
            self.locations
                .iter()
                .map(|(id, m)| (id.as_str(), m.parent.as_deref())),
        )
    }
}

/// Stable sort by ancestor depth. A parent outside the set counts as no parent;
/// a parent cycle is cut once the walk exceeds the set size.
fn parent_first<'a>(nodes: impl Iterator<Item = (&'a str, Option<&'a str>)>) -> Vec<&'a str> {
    let parents: IndexMap<&str, Option<&str>> = nodes.collect();
    let mut depths: HashMap<&str, usize> = HashMap::with_capacity(parents.len());
    for &id in parents.keys() {
        let mut depth = 0usize;
        let mut cursor = parents.get(id).copied().flatten();
        while let Some(parent) = cursor {
            if depth > parents.len() || !parents.contains_key(parent) {
                break;
            }
            depth += 1;
            cursor = parents.get(parent).copied().flatten();
        }
        depths.insert(id, depth);
    }
    let mut ordered: Vec<&str> = parents.keys().copied().collect();
    ordered.sort_by_key(|id| depths.get(id).copied().unwrap_or_default());
    ordered
}
