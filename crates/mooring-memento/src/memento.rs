//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Memento model and kind taxonomy."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::{Classified, Kind};
use crate::MementoError;

/// Fields shared by every memento variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MementoCore {
    /// Stable identifier; the only way mementos refer to each other.
    pub id: String,
    /// Implementation type resolved through the type loader on rebind.
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_item_id: Option<String>,
    /// Opaque configuration; values may embed ids but are not interpreted here.
    #[serde(default)]
    pub config: IndexMap<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl MementoCore {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            display_name: None,
            catalog_item_id: None,
            config: IndexMap::new(),
            tags: BTreeSet::new(),
        }
    }
}

/// Snapshot of a deployable component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMemento {
    #[serde(flatten)]
    pub core: MementoCore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub policies: IndexSet<String>,
    #[serde(default)]
    pub enrichers: IndexSet<String>,
    #[serde(default)]
    pub feeds: IndexSet<String>,
}

impl EntityMemento {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            core: MementoCore::new(id, type_name),
            parent: None,
            children: Vec::new(),
            locations: Vec::new(),
            policies: IndexSet::new(),
            enrichers: IndexSet::new(),
            feeds: IndexSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Attach an adjunct id under the set matching `kind`.
    ///
    /// Non-adjunct kinds are ignored.
    pub fn with_adjunct(mut self, kind: Kind, id: impl Into<String>) -> Self {
        if let Some(set) = self.adjuncts_mut(kind) {
            set.insert(id.into());
        }
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.core.config.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.core.tags.insert(tag.into());
        self
    }

    pub fn adjuncts(&self, kind: Kind) -> Option<&IndexSet<String>> {
        match kind {
            Kind::Policy => Some(&self.policies),
            Kind::Enricher => Some(&self.enrichers),
            Kind::Feed => Some(&self.feeds),
            _ => None,
        }
    }

    fn adjuncts_mut(&mut self, kind: Kind) -> Option<&mut IndexSet<String>> {
        match kind {
            Kind::Policy => Some(&mut self.policies),
            Kind::Enricher => Some(&mut self.enrichers),
            Kind::Feed => Some(&mut self.feeds),
            _ => None,
        }
    }
}

/// Snapshot of an execution location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMemento {
    #[serde(flatten)]
    pub core: MementoCore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl LocationMemento {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            core: MementoCore::new(id, type_name),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.core.config.insert(key.into(), value);
        self
    }
}

/// Snapshot of a policy, enricher, or feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjunctMemento {
    #[serde(flatten)]
    pub core: MementoCore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl AdjunctMemento {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            core: MementoCore::new(id, type_name),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.core.config.insert(key.into(), value);
        self
    }
}

/// Snapshot of a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItemMemento {
    #[serde(flatten)]
    pub core: MementoCore,
    pub symbolic_name: String,
    pub version: String,
    /// Kind of object the item's plan instantiates.
    pub item_type: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl CatalogItemMemento {
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        symbolic_name: impl Into<String>,
        version: impl Into<String>,
        item_type: Kind,
    ) -> Self {
        Self {
            core: MementoCore::new(id, type_name),
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            item_type,
            plan: None,
            libraries: Vec::new(),
            deprecated: false,
        }
    }
}

/// A snapshot of one managed object, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Memento {
    Entity(EntityMemento),
    Location(LocationMemento),
    Policy(AdjunctMemento),
    Enricher(AdjunctMemento),
    Feed(AdjunctMemento),
    CatalogItem(CatalogItemMemento),
}

impl Memento {
    pub fn kind(&self) -> Kind {
        match self {
            Memento::Entity(_) => Kind::Entity,
            Memento::Location(_) => Kind::Location,
            Memento::Policy(_) => Kind::Policy,
            Memento::Enricher(_) => Kind::Enricher,
            Memento::Feed(_) => Kind::Feed,
            Memento::CatalogItem(_) => Kind::CatalogItem,
        }
    }

    pub fn core(&self) -> &MementoCore {
        match self {
            Memento::Entity(m) => &m.core,
            Memento::Location(m) => &m.core,
            Memento::Policy(m) | Memento::Enricher(m) | Memento::Feed(m) => &m.core,
            Memento::CatalogItem(m) => &m.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut MementoCore {
        match self {
            Memento::Entity(m) => &mut m.core,
            Memento::Location(m) => &mut m.core,
            Memento::Policy(m) | Memento::Enricher(m) | Memento::Feed(m) => &mut m.core,
            Memento::CatalogItem(m) => &mut m.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn type_name(&self) -> &str {
        &self.core().type_name
    }

    /// Wrap an adjunct memento under the variant for `kind`.
    pub fn adjunct(kind: Kind, memento: AdjunctMemento) -> Result<Self, MementoError> {
        match kind {
            Kind::Policy => Ok(Memento::Policy(memento)),
            Kind::Enricher => Ok(Memento::Enricher(memento)),
            Kind::Feed => Ok(Memento::Feed(memento)),
            other => Err(MementoError::KindMismatch {
                expected: Kind::Policy,
                found: other,
            }),
        }
    }

    pub fn as_entity(&self) -> Option<&EntityMemento> {
        match self {
            Memento::Entity(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<&LocationMemento> {
        match self {
            Memento::Location(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_adjunct(&self) -> Option<&AdjunctMemento> {
        match self {
            Memento::Policy(m) | Memento::Enricher(m) | Memento::Feed(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_catalog_item(&self) -> Option<&CatalogItemMemento> {
        match self {
            Memento::CatalogItem(m) => Some(m),
            _ => None,
        }
    }

    /// Every id this memento refers to, with the kind it is expected to resolve as.
    /// Catalog provenance counts for every kind except catalog items themselves.
    pub fn referenced_ids(&self) -> Vec<(Kind, &str)> {
        let mut refs = Vec::new();
        match self {
            Memento::Entity(m) => {
                if let Some(parent) = &m.parent {
                    refs.push((Kind::Entity, parent.as_str()));
                }
                refs.extend(m.children.iter().map(|id| (Kind::Entity, id.as_str())));
                refs.extend(m.locations.iter().map(|id| (Kind::Location, id.as_str())));
                refs.extend(m.policies.iter().map(|id| (Kind::Policy, id.as_str())));
                refs.extend(m.enrichers.iter().map(|id| (Kind::Enricher, id.as_str())));
                refs.extend(m.feeds.iter().map(|id| (Kind::Feed, id.as_str())));
            }
            Memento::Location(m) => {
                if let Some(parent) = &m.parent {
                    refs.push((Kind::Location, parent.as_str()));
                }
                refs.extend(m.children.iter().map(|id| (Kind::Location, id.as_str())));
            }
            Memento::Policy(m) | Memento::Enricher(m) | Memento::Feed(m) => {
                if let Some(owner) = &m.owner {
                    refs.push((Kind::Entity, owner.as_str()));
                }
            }
            Memento::CatalogItem(_) => return refs,
        }
        if let Some(item) = &self.core().catalog_item_id {
            refs.push((Kind::CatalogItem, item.as_str()));
        }
        refs
    }
}

impl From<EntityMemento> for Memento {
    fn from(value: EntityMemento) -> Self {
        Memento::Entity(value)
    }
}

impl From<LocationMemento> for Memento {
    fn from(value: LocationMemento) -> Self {
        Memento::Location(value)
    }
}

impl From<CatalogItemMemento> for Memento {
    fn from(value: CatalogItemMemento) -> Self {
        Memento::CatalogItem(value)
    }
}

/// A live object that can snapshot itself into a [`Memento`].
pub trait Persistable: Classified + Send + Sync {
    fn id(&self) -> &str;

    /// Produce the current memento. Must not mutate the object.
    fn snapshot(&self) -> anyhow::Result<Memento>;
}
