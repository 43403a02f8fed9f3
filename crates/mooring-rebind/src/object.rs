//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! The per-object rebind contract and the type registry that maps persisted
//! type names to factories.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mooring_memento::{Kind, Memento, Persistable};
use mooring_persistence::ChangeListener;
use parking_lot::RwLock;
use tracing::debug;

use crate::basic::{BasicAdjunct, BasicCatalogItem, BasicEntity, BasicLocation};
use crate::context::{RebindContext, ReconstructContext};
use crate::RebindError;

/// Shared handle to a live object.
pub type ObjectRef = Arc<dyn ManagedObject>;

/// A live object that can be rebuilt from its memento.
///
/// All hooks take `&self`; implementations hold their state behind locks
/// since the graph is shared between the runtime and persistence.
pub trait ManagedObject: Persistable {
    fn type_name(&self) -> &str;

    /// Phase 1: restore internal state from `memento` only.
    fn reconstruct(&self, ctx: &ReconstructContext<'_>, memento: &Memento) -> anyhow::Result<()>;

    /// Phase 2: restore relationships. Siblings may be read through `ctx`, not mutated.
    fn rebind(
        &self,
        ctx: &RebindContext<'_>,
        memento: &Memento,
        relations: &ResolvedRelations,
    ) -> anyhow::Result<()>;

    /// Phase 3: the whole graph is connected; the object becomes live.
    fn finalize(&self) -> anyhow::Result<()>;

    /// Install the listener that future mutations are reported to.
    fn bind_listener(&self, _listener: Arc<dyn ChangeListener>) {}

    fn as_any(&self) -> &dyn Any;
}

/// Relationships of one memento after resolution through the context.
///
/// Ids that did not resolve are absent unless the exception handler
/// supplied a substitute.
#[derive(Clone)]
pub enum ResolvedRelations {
    Entity {
        parent: Option<ObjectRef>,
        children: Vec<ObjectRef>,
        locations: Vec<ObjectRef>,
        policies: Vec<ObjectRef>,
        enrichers: Vec<ObjectRef>,
        feeds: Vec<ObjectRef>,
        catalog_item: Option<ObjectRef>,
    },
    Location {
        parent: Option<ObjectRef>,
        children: Vec<ObjectRef>,
        catalog_item: Option<ObjectRef>,
    },
    Adjunct {
        owner: Option<ObjectRef>,
        catalog_item: Option<ObjectRef>,
    },
    CatalogItem,
}

impl ResolvedRelations {
    pub fn kind_label(&self) -> &'static str {
        match self {
            ResolvedRelations::Entity { .. } => "entity",
            ResolvedRelations::Location { .. } => "location",
            ResolvedRelations::Adjunct { .. } => "adjunct",
            ResolvedRelations::CatalogItem => "catalog-item",
        }
    }
}

impl fmt::Debug for ResolvedRelations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ids(objects: &[ObjectRef]) -> Vec<&str> {
            objects.iter().map(|object| object.id()).collect()
        }
        match self {
            ResolvedRelations::Entity {
                parent,
                children,
                locations,
                policies,
                enrichers,
                feeds,
                catalog_item,
            } => f
                .debug_struct("Entity")
                .field("parent", &parent.as_ref().map(|p| p.id()))
                .field("children", &ids(children))
                .field("locations", &ids(locations))
                .field("policies", &ids(policies))
                .field("enrichers", &ids(enrichers))
                .field("feeds", &ids(feeds))
                .field("catalog_item", &catalog_item.as_ref().map(|c| c.id()))
                .finish(),
            ResolvedRelations::Location {
                parent,
                children,
                catalog_item,
            } => f
                .debug_struct("Location")
                .field("parent", &parent.as_ref().map(|p| p.id()))
                .field("children", &ids(children))
                .field("catalog_item", &catalog_item.as_ref().map(|c| c.id()))
                .finish(),
            ResolvedRelations::Adjunct {
                owner,
                catalog_item,
            } => f
                .debug_struct("Adjunct")
                .field("owner", &owner.as_ref().map(|o| o.id()))
                .field("catalog_item", &catalog_item.as_ref().map(|c| c.id()))
                .finish(),
            ResolvedRelations::CatalogItem => f.write_str("CatalogItem"),
        }
    }
}

type Factory = dyn Fn(&str) -> anyhow::Result<ObjectRef> + Send + Sync;

/// A resolved type: its name, the kind it builds, and how to build it.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    kind: Kind,
    factory: Arc<Factory>,
}

impl TypeDescriptor {
    pub fn new<F>(name: impl Into<String>, kind: Kind, factory: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<ObjectRef> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Build a fresh, unreconstructed object with the given id.
    pub fn instantiate(&self, id: &str) -> anyhow::Result<ObjectRef> {
        (self.factory)(id)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps persisted type names to constructible types.
pub trait TypeLoader: Send + Sync {
    /// Fails with [`RebindError::TypeNotFound`] when `name` is unknown.
    fn load_type(&self, name: &str) -> Result<TypeDescriptor, RebindError>;
}

/// Default in-process [`TypeLoader`].
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, TypeDescriptor>>,
}

/// Type names registered by [`TypeRegistry::with_basic_types`].
pub const BASIC_ENTITY: &str = "mooring.basic.Entity";
pub const BASIC_APPLICATION: &str = "mooring.basic.Application";
pub const BASIC_LOCATION: &str = "mooring.basic.Location";
pub const BASIC_POLICY: &str = "mooring.basic.Policy";
pub const BASIC_ENRICHER: &str = "mooring.basic.Enricher";
pub const BASIC_FEED: &str = "mooring.basic.Feed";
pub const BASIC_CATALOG_ITEM: &str = "mooring.basic.CatalogItem";

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the basic reference implementations.
    pub fn with_basic_types() -> Self {
        let registry = Self::new();
        for name in [BASIC_ENTITY, BASIC_APPLICATION] {
            registry.register(name, Kind::Entity, move |id| {
                Ok(Arc::new(BasicEntity::new(id, name)) as ObjectRef)
            });
        }
        registry.register(BASIC_LOCATION, Kind::Location, |id| {
            Ok(Arc::new(BasicLocation::new(id, BASIC_LOCATION)) as ObjectRef)
        });
        for (name, kind) in [
            (BASIC_POLICY, Kind::Policy),
            (BASIC_ENRICHER, Kind::Enricher),
            (BASIC_FEED, Kind::Feed),
        ] {
            registry.register(name, kind, move |id| {
                Ok(Arc::new(BasicAdjunct::new(kind, id, name)?) as ObjectRef)
            });
        }
        registry.register(BASIC_CATALOG_ITEM, Kind::CatalogItem, |id| {
            Ok(Arc::new(BasicCatalogItem::new(id, BASIC_CATALOG_ITEM)) as ObjectRef)
        });
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&self, name: impl Into<String>, kind: Kind, factory: F)
    where
        F: Fn(&str) -> anyhow::Result<ObjectRef> + Send + Sync + 'static,
    {
        let descriptor = TypeDescriptor::new(name, kind, factory);
        debug!(type_name = descriptor.name(), %kind, "type registered");
        self.types
            .write()
            .insert(descriptor.name().to_owned(), descriptor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeLoader for TypeRegistry {
    fn load_type(&self, name: &str) -> Result<TypeDescriptor, RebindError> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RebindError::TypeNotFound(name.to_owned()))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

/// Overlay registry consulted before a parent loader.
pub struct ScopedTypeLoader {
    overlay: TypeRegistry,
    parent: Arc<dyn TypeLoader>,
}

impl ScopedTypeLoader {
    pub fn new(parent: Arc<dyn TypeLoader>) -> Self {
        Self {
            overlay: TypeRegistry::new(),
            parent,
        }
    }

    pub fn overlay(&self) -> &TypeRegistry {
        &self.overlay
    }
}

impl TypeLoader for ScopedTypeLoader {
    fn load_type(&self, name: &str) -> Result<TypeDescriptor, RebindError> {
        match self.overlay.load_type(name) {
            Err(RebindError::TypeNotFound(_)) => self.parent.load_type(name),
            found => found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_types_build_objects_of_their_kind() {
        let registry = TypeRegistry::with_basic_types();
        for (name, kind) in [
            (BASIC_APPLICATION, Kind::Entity),
            (BASIC_LOCATION, Kind::Location),
            (BASIC_ENRICHER, Kind::Enricher),
            (BASIC_CATALOG_ITEM, Kind::CatalogItem),
        ] {
            let descriptor = registry.load_type(name).unwrap();
            assert_eq!(descriptor.kind(), kind);
            let object = descriptor.instantiate("x-1").unwrap();
            assert_eq!(object.id(), "x-1");
            assert_eq!(object.type_name(), name);
            assert_eq!(mooring_memento::classify(object.as_ref()), kind);
        }
    }

    #[test]
    fn unknown_type_is_type_not_found() {
        let registry = TypeRegistry::new();
        assert!(matches!(
            registry.load_type("acme.Missing"),
            Err(RebindError::TypeNotFound(name)) if name == "acme.Missing"
        ));
    }

    #[test]
    fn scoped_loader_prefers_overlay_then_falls_back() {
        let parent: Arc<dyn TypeLoader> = Arc::new(TypeRegistry::with_basic_types());
        let scoped = ScopedTypeLoader::new(parent);
        scoped.overlay().register(BASIC_LOCATION, Kind::Location, |id| {
            Ok(Arc::new(BasicLocation::new(id, "overlay.Location")) as ObjectRef)
        });

        let overridden = scoped.load_type(BASIC_LOCATION).unwrap();
        assert_eq!(overridden.instantiate("l").unwrap().type_name(), "overlay.Location");
        assert!(scoped.load_type(BASIC_FEED).is_ok());
        assert!(scoped.load_type("acme.Missing").is_err());
    }
}
