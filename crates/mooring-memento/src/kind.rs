//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Memento model and kind taxonomy."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MementoError;

/// Fixed taxonomy of manageable object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    /// Deployable component.
    Entity,
    /// Execution location a component runs in.
    Location,
    /// Behaviour policy attached to a component.
    Policy,
    /// Metric enricher attached to a component.
    Enricher,
    /// Data feed attached to a component.
    Feed,
    /// Catalog entry describing a deployable blueprint.
    CatalogItem,
    /// Anything that implements none of the above.
    Unknown,
}

/// Order in which [`classify`] probes an object.
///
/// Append-only: inserting a kind ahead of an existing one would reclassify
/// objects implementing both.
pub const CLASSIFICATION_ORDER: [Kind; 6] = [
    Kind::Entity,
    Kind::Location,
    Kind::Policy,
    Kind::Enricher,
    Kind::Feed,
    Kind::CatalogItem,
];

/// Storable kinds in the order a full load reads them.
const PERSISTED: [Kind; 6] = [
    Kind::CatalogItem,
    Kind::Location,
    Kind::Entity,
    Kind::Policy,
    Kind::Enricher,
    Kind::Feed,
];

impl Kind {
    /// Storage sub-namespace for mementos of this kind.
    pub fn subpath(&self) -> &'static str {
        match self {
            Kind::Entity => "entities",
            Kind::Location => "locations",
            Kind::Policy => "policies",
            Kind::Enricher => "enrichers",
            Kind::Feed => "feeds",
            Kind::CatalogItem => "catalog",
            Kind::Unknown => "unknown",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Entity => "entity",
            Kind::Location => "location",
            Kind::Policy => "policy",
            Kind::Enricher => "enricher",
            Kind::Feed => "feed",
            Kind::CatalogItem => "catalog-item",
            Kind::Unknown => "unknown",
        }
    }

    /// Every kind that has a memento variant, in load order.
    pub fn persisted() -> &'static [Kind] {
        &PERSISTED
    }

    /// Policies, enrichers and feeds hang off an owning entity.
    pub fn is_adjunct(&self) -> bool {
        matches!(self, Kind::Policy | Kind::Enricher | Kind::Feed)
    }

    pub fn from_subpath(subpath: &str) -> Option<Kind> {
        PERSISTED.iter().copied().find(|kind| kind.subpath() == subpath)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = MementoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(Kind::Entity),
            "location" => Ok(Kind::Location),
            "policy" => Ok(Kind::Policy),
            "enricher" => Ok(Kind::Enricher),
            "feed" => Ok(Kind::Feed),
            "catalog-item" => Ok(Kind::CatalogItem),
            "unknown" => Ok(Kind::Unknown),
            other => Err(MementoError::UnknownKind(other.to_owned())),
        }
    }
}

/// Capability probe consulted by [`classify`].
pub trait Classified {
    /// Whether the object implements the interface associated with `kind`.
    fn implements(&self, kind: Kind) -> bool;
}

/// Map an object to the first kind in [`CLASSIFICATION_ORDER`] it implements.
pub fn classify<T: Classified + ?Sized>(object: &T) -> Kind {
    CLASSIFICATION_ORDER
        .iter()
        .copied()
        .find(|kind| object.implements(*kind))
        .unwrap_or(Kind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Implements(&'static [Kind]);

    impl Classified for Implements {
        fn implements(&self, kind: Kind) -> bool {
            self.0.contains(&kind)
        }
    }

    #[test]
    fn first_matching_kind_wins() {
        assert_eq!(classify(&Implements(&[Kind::Feed, Kind::Policy])), Kind::Policy);
        assert_eq!(
            classify(&Implements(&[Kind::Location, Kind::Entity])),
            Kind::Entity
        );
        assert_eq!(classify(&Implements(&[Kind::CatalogItem])), Kind::CatalogItem);
    }

    #[test]
    fn objects_without_capabilities_are_unknown() {
        assert_eq!(classify(&Implements(&[])), Kind::Unknown);
    }

    #[test]
    fn subpaths_round_trip() {
        for kind in Kind::persisted() {
            assert_eq!(Kind::from_subpath(kind.subpath()), Some(*kind));
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), *kind);
        }
        assert_eq!(Kind::from_subpath("unknown"), None);
    }
}
