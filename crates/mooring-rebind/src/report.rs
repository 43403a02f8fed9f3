//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
use std::fmt;

use mooring_memento::Kind;
use serde::{Deserialize, Serialize};

/// Step of a rebind pass a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebindPhase {
    Load,
    Reconstruct,
    Resolve,
    Rebind,
    Manage,
}

impl RebindPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebindPhase::Load => "load",
            RebindPhase::Reconstruct => "reconstruct",
            RebindPhase::Resolve => "resolve",
            RebindPhase::Rebind => "rebind",
            RebindPhase::Manage => "manage",
        }
    }
}

impl fmt::Display for RebindPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure observed during a pass, whatever the handler decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindIssue {
    pub phase: RebindPhase,
    pub kind: Kind,
    /// `None` for failures that concern a whole kind.
    pub id: Option<String>,
    pub message: String,
}

impl RebindIssue {
    pub fn new(phase: RebindPhase, kind: Kind, id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            id: id.map(str::to_owned),
            message: message.into(),
        }
    }
}

impl fmt::Display for RebindIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} {} '{}': {}", self.phase, self.kind, id, self.message),
            None => write!(f, "{} {}: {}", self.phase, self.kind, self.message),
        }
    }
}

/// Summary of a pass handed to `on_done` and returned in the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindReport {
    pub reconstructed: usize,
    pub rebound: usize,
    pub managed: usize,
    /// Objects left out of the graph, by kind and id.
    pub omitted: Vec<(Kind, String)>,
    /// Objects replaced by a handler-provided substitute.
    pub substituted: Vec<(Kind, String)>,
    /// Distinct `(referencing object, id)` pairs that did not resolve.
    pub dangling: usize,
    pub issues: Vec<RebindIssue>,
    pub duration_ms: u64,
}

impl RebindReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub(crate) fn record(&mut self, issue: RebindIssue) {
        self.issues.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_display_names_the_object() {
        let issue = RebindIssue::new(RebindPhase::Rebind, Kind::Entity, Some("app-1"), "boom");
        assert_eq!(issue.to_string(), "rebind entity 'app-1': boom");
        let kind_level = RebindIssue::new(RebindPhase::Load, Kind::Feed, None, "unreadable");
        assert_eq!(kind_level.to_string(), "load feed: unreadable");
    }
}
