//! ---
//! mooring_section: "01-core-functionality"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Rebind orchestration for the control plane."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Policy hooks consulted by the orchestrator for every per-object failure.
//!
//! Each callback returns an explicit outcome. The per-kind callbacks
//! delegate to a kind-parameterised one by default, so a handler can
//! override either level.

use mooring_common::{FailureMode, RebindConfig};
use mooring_memento::Kind;
use mooring_persistence::{LoadDisposition, LoadFailureSink, PersistenceError};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::object::ObjectRef;
use crate::report::{RebindIssue, RebindPhase, RebindReport};
use crate::RebindError;

/// Continue with the next object, or abort the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Abort,
}

/// Answer to a missing object: leave it out, stand something in, or abort.
#[derive(Debug, Clone)]
pub enum Resolution<T> {
    Omit,
    Substitute(T),
    Abort,
}

impl<T> Resolution<T> {
    pub fn is_abort(&self) -> bool {
        matches!(self, Resolution::Abort)
    }
}

/// Failure policy for one rebind pass.
pub trait RebindExceptionHandler: Send + Sync {
    /// Called once an accepted pass starts, before anything is loaded.
    fn on_pass_started(&self) {}

    /// A single memento could not be read.
    fn on_load_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        message: &str,
        error: &PersistenceError,
    ) -> Disposition {
        warn!(%kind, id, error = %error, "{message}");
        Disposition::Continue
    }

    /// A whole kind could not be read. Escalates unless overridden.
    fn on_load_kind_failed(&self, kind: Kind, message: &str, error: &PersistenceError) -> Disposition {
        error!(%kind, error = %error, "{message}");
        Disposition::Abort
    }

    fn on_create_failed(
        &self,
        kind: Kind,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        warn!(%kind, id, type_name, error = %error, "failed to reconstruct object; omitting");
        Resolution::Omit
    }

    fn on_create_location_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::Location, id, type_name, error)
    }

    fn on_create_entity_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::Entity, id, type_name, error)
    }

    fn on_create_policy_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::Policy, id, type_name, error)
    }

    fn on_create_enricher_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::Enricher, id, type_name, error)
    }

    fn on_create_feed_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::Feed, id, type_name, error)
    }

    fn on_create_catalog_item_failed(
        &self,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.on_create_failed(Kind::CatalogItem, id, type_name, error)
    }

    /// `referenced_by` names the object whose memento holds the id.
    fn on_dangling_ref(&self, kind: Kind, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        warn!(%kind, id, referenced_by, "dangling reference; omitting");
        Resolution::Omit
    }

    fn on_dangling_entity_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::Entity, id, referenced_by)
    }

    fn on_dangling_location_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::Location, id, referenced_by)
    }

    fn on_dangling_policy_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::Policy, id, referenced_by)
    }

    fn on_dangling_enricher_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::Enricher, id, referenced_by)
    }

    fn on_dangling_feed_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::Feed, id, referenced_by)
    }

    fn on_dangling_catalog_item_ref(&self, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.on_dangling_ref(Kind::CatalogItem, id, referenced_by)
    }

    fn on_rebind_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        warn!(%kind, id, error = %error, "failed to rebind object");
        Disposition::Continue
    }

    fn on_rebind_entity_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_rebind_failed(Kind::Entity, id, error)
    }

    fn on_rebind_location_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_rebind_failed(Kind::Location, id, error)
    }

    fn on_rebind_policy_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_rebind_failed(Kind::Policy, id, error)
    }

    /// Enrichers and feeds. Policies route here too unless
    /// [`Self::on_rebind_policy_failed`] is overridden.
    fn on_rebind_adjunct_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        match kind {
            Kind::Policy => self.on_rebind_policy_failed(id, error),
            other => self.on_rebind_failed(other, id, error),
        }
    }

    fn on_rebind_catalog_item_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_rebind_failed(Kind::CatalogItem, id, error)
    }

    fn on_manage_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        warn!(%kind, id, error = %error, "failed to manage object");
        Disposition::Continue
    }

    fn on_manage_entity_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_manage_failed(Kind::Entity, id, error)
    }

    fn on_manage_location_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_manage_failed(Kind::Location, id, error)
    }

    fn on_manage_adjunct_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_manage_failed(kind, id, error)
    }

    fn on_manage_catalog_item_failed(&self, id: &str, error: &anyhow::Error) -> Disposition {
        self.on_manage_failed(Kind::CatalogItem, id, error)
    }

    /// Checked once phase 3 completes, before `on_done`. `Some` fails the pass.
    fn deferred_failure(&self) -> Option<RebindError> {
        None
    }

    fn on_done(&self, report: &RebindReport) {
        info!(
            managed = report.managed,
            omitted = report.omitted.len(),
            issues = report.issues.len(),
            "rebind complete"
        );
    }

    /// Converts the triggering cause into the error `rebind` returns.
    fn on_failed(&self, cause: RebindError) -> RebindError {
        error!(error = %cause, "rebind failed");
        cause
    }
}

/// Routes store load failures into a [`RebindExceptionHandler`].
pub(crate) struct HandlerLoadSink<'a> {
    handler: &'a dyn RebindExceptionHandler,
    issues: Mutex<Vec<RebindIssue>>,
}

impl<'a> HandlerLoadSink<'a> {
    pub(crate) fn new(handler: &'a dyn RebindExceptionHandler) -> Self {
        Self {
            handler,
            issues: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_issues(self) -> Vec<RebindIssue> {
        self.issues.into_inner()
    }
}

fn to_load(disposition: Disposition) -> LoadDisposition {
    match disposition {
        Disposition::Continue => LoadDisposition::Skip,
        Disposition::Abort => LoadDisposition::Abort,
    }
}

impl LoadFailureSink for HandlerLoadSink<'_> {
    fn on_load_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition {
        self.issues.lock().push(RebindIssue::new(
            RebindPhase::Load,
            kind,
            Some(id),
            format!("{message}: {error}"),
        ));
        to_load(self.handler.on_load_memento_failed(kind, id, message, error))
    }

    fn on_load_kind_failed(
        &self,
        kind: Kind,
        message: &str,
        error: &PersistenceError,
    ) -> LoadDisposition {
        self.issues.lock().push(RebindIssue::new(
            RebindPhase::Load,
            kind,
            None,
            format!("{message}: {error}"),
        ));
        to_load(self.handler.on_load_kind_failed(kind, message, error))
    }
}

/// Handler driven by one [`FailureMode`] per failure category.
///
/// `FailFast` aborts at the failure, `FailAtEnd` lets the pass run to the
/// end and then fails it with the first deferred issue, `Continue` only logs.
#[derive(Debug, Default)]
pub struct DefaultRebindExceptionHandler {
    config: RebindConfig,
    issues: Mutex<Vec<RebindIssue>>,
    deferred: Mutex<Vec<RebindIssue>>,
}

impl DefaultRebindExceptionHandler {
    pub fn new(config: RebindConfig) -> Self {
        Self {
            config,
            issues: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RebindConfig {
        &self.config
    }

    /// Issues seen during the current or most recent pass.
    pub fn issues(&self) -> Vec<RebindIssue> {
        self.issues.lock().clone()
    }

    pub fn reset(&self) {
        self.issues.lock().clear();
        self.deferred.lock().clear();
    }

    fn record(&self, mode: FailureMode, issue: RebindIssue) -> bool {
        match mode {
            FailureMode::FailFast => warn!(issue = %issue, "rebind issue; aborting"),
            FailureMode::FailAtEnd => {
                warn!(issue = %issue, "rebind issue; failing at end of pass");
                self.deferred.lock().push(issue.clone());
            }
            FailureMode::Continue => warn!(issue = %issue, "rebind issue; continuing"),
        }
        self.issues.lock().push(issue);
        mode == FailureMode::FailFast
    }

    fn disposition(&self, mode: FailureMode, issue: RebindIssue) -> Disposition {
        if self.record(mode, issue) {
            Disposition::Abort
        } else {
            Disposition::Continue
        }
    }

    fn resolution(&self, mode: FailureMode, issue: RebindIssue) -> Resolution<ObjectRef> {
        if self.record(mode, issue) {
            Resolution::Abort
        } else {
            Resolution::Omit
        }
    }
}

impl RebindExceptionHandler for DefaultRebindExceptionHandler {
    fn on_pass_started(&self) {
        self.reset();
    }

    fn on_load_memento_failed(
        &self,
        kind: Kind,
        id: &str,
        message: &str,
        error: &PersistenceError,
    ) -> Disposition {
        self.disposition(
            self.config.load_memento,
            RebindIssue::new(RebindPhase::Load, kind, Some(id), format!("{message}: {error}")),
        )
    }

    fn on_load_kind_failed(&self, kind: Kind, message: &str, error: &PersistenceError) -> Disposition {
        self.disposition(
            self.config.load_kind,
            RebindIssue::new(RebindPhase::Load, kind, None, format!("{message}: {error}")),
        )
    }

    fn on_create_failed(
        &self,
        kind: Kind,
        id: &str,
        type_name: &str,
        error: &anyhow::Error,
    ) -> Resolution<ObjectRef> {
        self.resolution(
            self.config.create,
            RebindIssue::new(
                RebindPhase::Reconstruct,
                kind,
                Some(id),
                format!("{type_name}: {error:#}"),
            ),
        )
    }

    fn on_dangling_ref(&self, kind: Kind, id: &str, referenced_by: &str) -> Resolution<ObjectRef> {
        self.resolution(
            self.config.dangling_ref,
            RebindIssue::new(
                RebindPhase::Resolve,
                kind,
                Some(id),
                format!("referenced by '{referenced_by}' but not present"),
            ),
        )
    }

    fn on_rebind_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        self.disposition(
            self.config.rebind,
            RebindIssue::new(RebindPhase::Rebind, kind, Some(id), format!("{error:#}")),
        )
    }

    fn on_manage_failed(&self, kind: Kind, id: &str, error: &anyhow::Error) -> Disposition {
        self.disposition(
            self.config.manage,
            RebindIssue::new(RebindPhase::Manage, kind, Some(id), format!("{error:#}")),
        )
    }

    fn deferred_failure(&self) -> Option<RebindError> {
        let mut deferred = self.deferred.lock();
        let total = deferred.len();
        let first = deferred.drain(..).next()?;
        Some(RebindError::Deferred { first, total })
    }
}
