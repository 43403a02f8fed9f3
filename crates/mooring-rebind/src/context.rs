//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use mooring_memento::{Kind, Persistable};

use crate::object::{ObjectRef, TypeDescriptor, TypeLoader};
use crate::RebindError;

/// What phase 1 code may see: the type loader and its own identity.
pub struct ReconstructContext<'a> {
    loader: &'a dyn TypeLoader,
    kind: Kind,
    id: &'a str,
}

impl<'a> ReconstructContext<'a> {
    pub(crate) fn new(loader: &'a dyn TypeLoader, kind: Kind, id: &'a str) -> Self {
        Self { loader, kind, id }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn load_type(&self, name: &str) -> Result<TypeDescriptor, RebindError> {
        self.loader.load_type(name)
    }
}

/// Id-keyed arena of every object reconstructed in the current pass.
///
/// Only the orchestrator inserts, and only during phase 1; phases 2 and 3
/// receive a shared borrow.
pub struct RebindContext<'a> {
    loader: &'a dyn TypeLoader,
    objects: HashMap<Kind, IndexMap<String, ObjectRef>>,
}

impl<'a> RebindContext<'a> {
    pub(crate) fn new(loader: &'a dyn TypeLoader) -> Self {
        Self {
            loader,
            objects: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, kind: Kind, object: ObjectRef) {
        self.objects
            .entry(kind)
            .or_default()
            .insert(object.id().to_owned(), object);
    }

    pub fn resolve(&self, kind: Kind, id: &str) -> Option<ObjectRef> {
        self.objects.get(&kind).and_then(|slot| slot.get(id)).cloned()
    }

    pub fn resolve_entity(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::Entity, id)
    }

    pub fn resolve_location(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::Location, id)
    }

    pub fn resolve_policy(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::Policy, id)
    }

    pub fn resolve_enricher(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::Enricher, id)
    }

    pub fn resolve_feed(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::Feed, id)
    }

    pub fn resolve_catalog_item(&self, id: &str) -> Option<ObjectRef> {
        self.resolve(Kind::CatalogItem, id)
    }

    pub fn load_type(&self, name: &str) -> Result<TypeDescriptor, RebindError> {
        self.loader.load_type(name)
    }

    /// Ids of `kind` in insertion order.
    pub fn ids(&self, kind: Kind) -> Vec<&str> {
        self.objects
            .get(&kind)
            .map(|slot| slot.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RebindContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(Kind, usize)> = self
            .objects
            .iter()
            .map(|(kind, slot)| (*kind, slot.len()))
            .collect();
        counts.sort();
        f.debug_struct("RebindContext").field("objects", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TypeRegistry;

    #[test]
    fn resolves_only_inserted_ids_of_matching_kind() {
        let registry = TypeRegistry::with_basic_types();
        let mut ctx = RebindContext::new(&registry);
        let location = registry
            .load_type(crate::object::BASIC_LOCATION)
            .unwrap()
            .instantiate("loc-1")
            .unwrap();
        ctx.insert(Kind::Location, location);

        assert!(ctx.resolve_location("loc-1").is_some());
        assert!(ctx.resolve_entity("loc-1").is_none());
        assert!(ctx.resolve_location("loc-2").is_none());
        assert_eq!(ctx.ids(Kind::Location), vec!["loc-1"]);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn reconstruct_context_exposes_identity_and_types() {
        let registry = TypeRegistry::with_basic_types();
        let ctx = ReconstructContext::new(&registry, Kind::Entity, "app-1");
        assert_eq!(ctx.id(), "app-1");
        assert_eq!(ctx.kind(), Kind::Entity);
        assert!(matches!(
            ctx.load_type("nope"),
            Err(RebindError::TypeNotFound(_))
        ));
    }
}
