//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Reference implementations of every kind, registered by
//! [`TypeRegistry::with_basic_types`](crate::TypeRegistry::with_basic_types).
//!
//! Strong references point down the graph (parent to child, entity to
//! location and adjunct); parent and owner back-references are [`Weak`].

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use anyhow::{bail, ensure};
use indexmap::IndexMap;
use mooring_memento::{
    AdjunctMemento, CatalogItemMemento, Classified, EntityMemento, Kind, LocationMemento, Memento,
    MementoCore, Persistable,
};
use mooring_persistence::ChangeListener;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::{RebindContext, ReconstructContext};
use crate::object::{ManagedObject, ObjectRef, ResolvedRelations};

/// Where an object is in its rebind lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Unseen,
    Reconstructed,
    Rebound,
    Managed,
    Unmanaged,
}

#[derive(Debug, Clone, Default)]
struct Attributes {
    display_name: Option<String>,
    catalog_item_id: Option<String>,
    config: IndexMap<String, Value>,
    tags: BTreeSet<String>,
}

impl Attributes {
    fn restore(core: &MementoCore) -> Self {
        Self {
            display_name: core.display_name.clone(),
            catalog_item_id: core.catalog_item_id.clone(),
            config: core.config.clone(),
            tags: core.tags.clone(),
        }
    }

    fn to_core(&self, id: &str, type_name: &str) -> MementoCore {
        MementoCore {
            id: id.to_owned(),
            type_name: type_name.to_owned(),
            display_name: self.display_name.clone(),
            catalog_item_id: self.catalog_item_id.clone(),
            config: self.config.clone(),
            tags: self.tags.clone(),
        }
    }
}

fn ids(objects: &[ObjectRef]) -> Vec<String> {
    objects.iter().map(|object| object.id().to_owned()).collect()
}

fn upgrade_id(weak: &Option<Weak<dyn ManagedObject>>) -> Option<String> {
    weak.as_ref()
        .and_then(Weak::upgrade)
        .map(|object| object.id().to_owned())
}

fn check_identity(expected_kind: Kind, id: &str, memento: &Memento) -> anyhow::Result<()> {
    ensure!(
        memento.kind() == expected_kind,
        "expected a {expected_kind} memento, got {}",
        memento.kind()
    );
    ensure!(
        memento.id() == id,
        "memento '{}' offered to object '{id}'",
        memento.id()
    );
    Ok(())
}

fn advance(current: &mut LifecycleState, next: LifecycleState) -> anyhow::Result<()> {
    if next == LifecycleState::Managed && *current == LifecycleState::Managed {
        bail!("object is already managed");
    }
    *current = next;
    Ok(())
}

/// Listener slot shared by every basic type.
#[derive(Default)]
struct ListenerSlot(RwLock<Option<Arc<dyn ChangeListener>>>);

impl ListenerSlot {
    fn set(&self, listener: Arc<dyn ChangeListener>) {
        *self.0.write() = Some(listener);
    }

    fn get(&self) -> Option<Arc<dyn ChangeListener>> {
        self.0.read().clone()
    }
}

#[derive(Default)]
struct EntityState {
    lifecycle: LifecycleState,
    attrs: Attributes,
    parent: Option<Weak<dyn ManagedObject>>,
    children: Vec<ObjectRef>,
    locations: Vec<ObjectRef>,
    policies: Vec<ObjectRef>,
    enrichers: Vec<ObjectRef>,
    feeds: Vec<ObjectRef>,
    catalog_item: Option<ObjectRef>,
}

/// Generic deployable component.
pub struct BasicEntity {
    id: String,
    type_name: String,
    state: RwLock<EntityState>,
    listener: ListenerSlot,
}

impl BasicEntity {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            state: RwLock::new(EntityState::default()),
            listener: ListenerSlot::default(),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    pub fn display_name(&self) -> Option<String> {
        self.state.read().attrs.display_name.clone()
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.state.read().attrs.config.get(key).cloned()
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.state.read().attrs.tags.clone()
    }

    pub fn parent(&self) -> Option<ObjectRef> {
        self.state.read().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<ObjectRef> {
        self.state.read().children.clone()
    }

    pub fn child_ids(&self) -> Vec<String> {
        ids(&self.state.read().children)
    }

    pub fn location_ids(&self) -> Vec<String> {
        ids(&self.state.read().locations)
    }

    /// Ids of attached policies, enrichers or feeds.
    pub fn adjunct_ids(&self, kind: Kind) -> Vec<String> {
        let state = self.state.read();
        match kind {
            Kind::Policy => ids(&state.policies),
            Kind::Enricher => ids(&state.enrichers),
            Kind::Feed => ids(&state.feeds),
            _ => Vec::new(),
        }
    }

    pub fn catalog_item(&self) -> Option<ObjectRef> {
        self.state.read().catalog_item.clone()
    }

    /// Update one config key; managed entities report the change.
    pub fn set_config(&self, key: impl Into<String>, value: Value) {
        self.state.write().attrs.config.insert(key.into(), value);
        self.changed();
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let inserted = self.state.write().attrs.tags.insert(tag.into());
        if inserted {
            self.changed();
        }
    }

    /// Take the entity out of management and have its memento removed.
    pub fn unmanage(&self) {
        let was_managed = {
            let mut state = self.state.write();
            let was = state.lifecycle == LifecycleState::Managed;
            state.lifecycle = LifecycleState::Unmanaged;
            was
        };
        if let (true, Some(listener)) = (was_managed, self.listener.get()) {
            listener.on_unmanaged(self);
        }
    }

    fn changed(&self) {
        if self.lifecycle() != LifecycleState::Managed {
            return;
        }
        if let Some(listener) = self.listener.get() {
            listener.on_changed(self);
        }
    }
}

impl Classified for BasicEntity {
    fn implements(&self, kind: Kind) -> bool {
        kind == Kind::Entity
    }
}

impl Persistable for BasicEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> anyhow::Result<Memento> {
        let state = self.state.read();
        Ok(Memento::Entity(EntityMemento {
            core: state.attrs.to_core(&self.id, &self.type_name),
            parent: upgrade_id(&state.parent),
            children: ids(&state.children),
            locations: ids(&state.locations),
            policies: ids(&state.policies).into_iter().collect(),
            enrichers: ids(&state.enrichers).into_iter().collect(),
            feeds: ids(&state.feeds).into_iter().collect(),
        }))
    }
}

impl ManagedObject for BasicEntity {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn reconstruct(&self, ctx: &ReconstructContext<'_>, memento: &Memento) -> anyhow::Result<()> {
        check_identity(Kind::Entity, ctx.id(), memento)?;
        let mut state = self.state.write();
        state.attrs = Attributes::restore(memento.core());
        advance(&mut state.lifecycle, LifecycleState::Reconstructed)
    }

    fn rebind(
        &self,
        _ctx: &RebindContext<'_>,
        memento: &Memento,
        relations: &ResolvedRelations,
    ) -> anyhow::Result<()> {
        check_identity(Kind::Entity, &self.id, memento)?;
        let ResolvedRelations::Entity {
            parent,
            children,
            locations,
            policies,
            enrichers,
            feeds,
            catalog_item,
        } = relations
        else {
            bail!("entity '{}' given {} relations", self.id, relations.kind_label());
        };
        let mut state = self.state.write();
        state.parent = parent.as_ref().map(Arc::downgrade);
        state.children = children.clone();
        state.locations = locations.clone();
        state.policies = policies.clone();
        state.enrichers = enrichers.clone();
        state.feeds = feeds.clone();
        state.catalog_item = catalog_item.clone();
        advance(&mut state.lifecycle, LifecycleState::Rebound)
    }

    fn finalize(&self) -> anyhow::Result<()> {
        advance(&mut self.state.write().lifecycle, LifecycleState::Managed)
    }

    fn bind_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listener.set(listener);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct LocationState {
    lifecycle: LifecycleState,
    attrs: Attributes,
    parent: Option<Weak<dyn ManagedObject>>,
    children: Vec<ObjectRef>,
}

/// Generic execution location.
pub struct BasicLocation {
    id: String,
    type_name: String,
    state: RwLock<LocationState>,
    listener: ListenerSlot,
}

impl BasicLocation {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            state: RwLock::new(LocationState::default()),
            listener: ListenerSlot::default(),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.state.read().attrs.config.get(key).cloned()
    }

    pub fn parent(&self) -> Option<ObjectRef> {
        self.state.read().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn child_ids(&self) -> Vec<String> {
        ids(&self.state.read().children)
    }

    pub fn set_config(&self, key: impl Into<String>, value: Value) {
        self.state.write().attrs.config.insert(key.into(), value);
        if self.lifecycle() == LifecycleState::Managed {
            if let Some(listener) = self.listener.get() {
                listener.on_changed(self);
            }
        }
    }
}

impl Classified for BasicLocation {
    fn implements(&self, kind: Kind) -> bool {
        kind == Kind::Location
    }
}

impl Persistable for BasicLocation {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> anyhow::Result<Memento> {
        let state = self.state.read();
        Ok(Memento::Location(LocationMemento {
            core: state.attrs.to_core(&self.id, &self.type_name),
            parent: upgrade_id(&state.parent),
            children: ids(&state.children),
        }))
    }
}

impl ManagedObject for BasicLocation {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn reconstruct(&self, ctx: &ReconstructContext<'_>, memento: &Memento) -> anyhow::Result<()> {
        check_identity(Kind::Location, ctx.id(), memento)?;
        let mut state = self.state.write();
        state.attrs = Attributes::restore(memento.core());
        advance(&mut state.lifecycle, LifecycleState::Reconstructed)
    }

    fn rebind(
        &self,
        _ctx: &RebindContext<'_>,
        memento: &Memento,
        relations: &ResolvedRelations,
    ) -> anyhow::Result<()> {
        check_identity(Kind::Location, &self.id, memento)?;
        let ResolvedRelations::Location { parent, children, .. } = relations else {
            bail!("location '{}' given {} relations", self.id, relations.kind_label());
        };
        let mut state = self.state.write();
        state.parent = parent.as_ref().map(Arc::downgrade);
        state.children = children.clone();
        advance(&mut state.lifecycle, LifecycleState::Rebound)
    }

    fn finalize(&self) -> anyhow::Result<()> {
        advance(&mut self.state.write().lifecycle, LifecycleState::Managed)
    }

    fn bind_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listener.set(listener);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct AdjunctState {
    lifecycle: LifecycleState,
    attrs: Attributes,
    owner: Option<Weak<dyn ManagedObject>>,
}

/// Policy, enricher or feed, distinguished by its kind.
pub struct BasicAdjunct {
    kind: Kind,
    id: String,
    type_name: String,
    state: RwLock<AdjunctState>,
    listener: ListenerSlot,
}

impl BasicAdjunct {
    pub fn new(kind: Kind, id: impl Into<String>, type_name: impl Into<String>) -> anyhow::Result<Self> {
        ensure!(kind.is_adjunct(), "{kind} is not an adjunct kind");
        Ok(Self {
            kind,
            id: id.into(),
            type_name: type_name.into(),
            state: RwLock::new(AdjunctState::default()),
            listener: ListenerSlot::default(),
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.state.read().attrs.config.get(key).cloned()
    }

    pub fn owner(&self) -> Option<ObjectRef> {
        self.state.read().owner.as_ref().and_then(Weak::upgrade)
    }
}

impl Classified for BasicAdjunct {
    fn implements(&self, kind: Kind) -> bool {
        kind == self.kind
    }
}

impl Persistable for BasicAdjunct {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> anyhow::Result<Memento> {
        let state = self.state.read();
        let memento = AdjunctMemento {
            core: state.attrs.to_core(&self.id, &self.type_name),
            owner: upgrade_id(&state.owner),
        };
        Ok(Memento::adjunct(self.kind, memento)?)
    }
}

impl ManagedObject for BasicAdjunct {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn reconstruct(&self, ctx: &ReconstructContext<'_>, memento: &Memento) -> anyhow::Result<()> {
        check_identity(self.kind, ctx.id(), memento)?;
        let mut state = self.state.write();
        state.attrs = Attributes::restore(memento.core());
        advance(&mut state.lifecycle, LifecycleState::Reconstructed)
    }

    fn rebind(
        &self,
        _ctx: &RebindContext<'_>,
        memento: &Memento,
        relations: &ResolvedRelations,
    ) -> anyhow::Result<()> {
        check_identity(self.kind, &self.id, memento)?;
        let ResolvedRelations::Adjunct { owner, .. } = relations else {
            bail!("{} '{}' given {} relations", self.kind, self.id, relations.kind_label());
        };
        let mut state = self.state.write();
        state.owner = owner.as_ref().map(Arc::downgrade);
        advance(&mut state.lifecycle, LifecycleState::Rebound)
    }

    fn finalize(&self) -> anyhow::Result<()> {
        advance(&mut self.state.write().lifecycle, LifecycleState::Managed)
    }

    fn bind_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listener.set(listener);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CatalogState {
    lifecycle: LifecycleState,
    attrs: Attributes,
    symbolic_name: String,
    version: String,
    item_type: Kind,
    plan: Option<String>,
    libraries: Vec<String>,
    deprecated: bool,
}

/// Catalog entry; carries no relationships.
pub struct BasicCatalogItem {
    id: String,
    type_name: String,
    state: RwLock<CatalogState>,
}

impl BasicCatalogItem {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            state: RwLock::new(CatalogState {
                lifecycle: LifecycleState::Unseen,
                attrs: Attributes::default(),
                symbolic_name: String::new(),
                version: String::new(),
                item_type: Kind::Entity,
                plan: None,
                libraries: Vec::new(),
                deprecated: false,
            }),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    /// `symbolic_name:version`.
    pub fn coordinates(&self) -> String {
        let state = self.state.read();
        format!("{}:{}", state.symbolic_name, state.version)
    }

    pub fn is_deprecated(&self) -> bool {
        self.state.read().deprecated
    }
}

impl Classified for BasicCatalogItem {
    fn implements(&self, kind: Kind) -> bool {
        kind == Kind::CatalogItem
    }
}

impl Persistable for BasicCatalogItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> anyhow::Result<Memento> {
        let state = self.state.read();
        Ok(Memento::CatalogItem(CatalogItemMemento {
            core: state.attrs.to_core(&self.id, &self.type_name),
            symbolic_name: state.symbolic_name.clone(),
            version: state.version.clone(),
            item_type: state.item_type,
            plan: state.plan.clone(),
            libraries: state.libraries.clone(),
            deprecated: state.deprecated,
        }))
    }
}

impl ManagedObject for BasicCatalogItem {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn reconstruct(&self, ctx: &ReconstructContext<'_>, memento: &Memento) -> anyhow::Result<()> {
        check_identity(Kind::CatalogItem, ctx.id(), memento)?;
        let Some(item) = memento.as_catalog_item() else {
            bail!("catalog item '{}' given a {} memento", self.id, memento.kind());
        };
        let mut state = self.state.write();
        state.attrs = Attributes::restore(&item.core);
        state.symbolic_name = item.symbolic_name.clone();
        state.version = item.version.clone();
        state.item_type = item.item_type;
        state.plan = item.plan.clone();
        state.libraries = item.libraries.clone();
        state.deprecated = item.deprecated;
        advance(&mut state.lifecycle, LifecycleState::Reconstructed)
    }

    fn rebind(
        &self,
        _ctx: &RebindContext<'_>,
        memento: &Memento,
        _relations: &ResolvedRelations,
    ) -> anyhow::Result<()> {
        check_identity(Kind::CatalogItem, &self.id, memento)?;
        advance(&mut self.state.write().lifecycle, LifecycleState::Rebound)
    }

    fn finalize(&self) -> anyhow::Result<()> {
        advance(&mut self.state.write().lifecycle, LifecycleState::Managed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TypeRegistry;
    use serde_json::json;

    fn source() -> Memento {
        EntityMemento::new("app-1", "mooring.basic.Application")
            .with_config("replicas", json!(3))
            .with_tag("tier:web")
            .into()
    }

    #[test]
    fn reconstruct_restores_attributes_only() {
        let registry = TypeRegistry::with_basic_types();
        let entity = BasicEntity::new("app-1", "mooring.basic.Application");
        let ctx = ReconstructContext::new(&registry, Kind::Entity, "app-1");
        entity.reconstruct(&ctx, &source()).unwrap();

        assert_eq!(entity.lifecycle(), LifecycleState::Reconstructed);
        assert_eq!(entity.config("replicas"), Some(json!(3)));
        assert!(entity.child_ids().is_empty());
        assert_eq!(entity.snapshot().unwrap(), source());
    }

    #[test]
    fn reconstruct_rejects_foreign_memento() {
        let registry = TypeRegistry::with_basic_types();
        let entity = BasicEntity::new("app-2", "mooring.basic.Application");
        let ctx = ReconstructContext::new(&registry, Kind::Entity, "app-2");
        assert!(entity.reconstruct(&ctx, &source()).is_err());

        let location = BasicLocation::new("app-1", "mooring.basic.Location");
        let ctx = ReconstructContext::new(&registry, Kind::Location, "app-1");
        assert!(location.reconstruct(&ctx, &source()).is_err());
    }

    #[test]
    fn finalize_runs_once() {
        let entity = BasicEntity::new("e", "t");
        entity.finalize().unwrap();
        assert!(entity.finalize().is_err());
    }

    #[test]
    fn adjunct_requires_adjunct_kind() {
        assert!(BasicAdjunct::new(Kind::Location, "x", "t").is_err());
        let feed = BasicAdjunct::new(Kind::Feed, "f", "t").unwrap();
        assert_eq!(mooring_memento::classify(&feed), Kind::Feed);
        assert_eq!(feed.snapshot().unwrap().kind(), Kind::Feed);
    }
}
