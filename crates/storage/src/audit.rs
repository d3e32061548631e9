//! Audit trail for identity, role and lab administration.
//!
//! Every privileged mutation records who performed it, what it touched,
//! when it happened and whether it succeeded.
//!
//! # Backends
//!
//! - [`TracingAuditLogger`]: emits structured `tracing` events at INFO with
//!   `audit.*` fields, ready for a log aggregation layer.
//! - [`NoopAuditLogger`]: discards events.
//! - `RecordingAuditLogger` (with the `testutil` feature): keeps events in
//!   memory for assertions.
//!
//! # Usage
//!
//! ```no_run
//! use labgate_storage::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, lab_resource,
//! };
//! use labgate_storage::LabId;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let event = AuditEvent::builder()
//!     .actor("alice")
//!     .action(AuditAction::AddMember)
//!     .resource(lab_resource(LabId(3)))
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{LabId, UserId};

/// Privileged operation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A new identity registered itself.
    RegisterIdentity,
    /// A lab creator provisioned a new identity into their lab.
    ProvisionIdentity,
    /// An identity's profile was changed by its provisioner.
    UpdateIdentity,
    /// An identity was deleted by its provisioner.
    DeleteIdentity,
    /// A role was granted.
    AssignRole,
    /// A role was revoked.
    RemoveRole,
    /// A lab was created.
    CreateLab,
    /// A lab's name or details changed.
    UpdateLab,
    /// A lab was deleted.
    DeleteLab,
    /// A lab's active flag was changed.
    SetLabActive,
    /// An identity joined a lab.
    AddMember,
    /// An identity left a lab.
    RemoveMember,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegisterIdentity => "register_identity",
            Self::ProvisionIdentity => "provision_identity",
            Self::UpdateIdentity => "update_identity",
            Self::DeleteIdentity => "delete_identity",
            Self::AssignRole => "assign_role",
            Self::RemoveRole => "remove_role",
            Self::CreateLab => "create_lab",
            Self::UpdateLab => "update_lab",
            Self::DeleteLab => "delete_lab",
            Self::SetLabActive => "set_lab_active",
            Self::AddMember => "add_member",
            Self::RemoveMember => "remove_member",
        };
        f.write_str(name)
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Username of the actor, or `anonymous` for self-registration.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier, e.g. `lab:3` or `user:7`.
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context such as the role or member involved.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Sink for audit events.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation, e.g. `add_member`
/// - `audit.resource`: what was affected
/// - `audit.result`: `success` or `failure: ...`
/// - `audit.metadata`: `key=value` pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata = event
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Audit logger that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Audit logger that keeps events in memory.
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLogger {
    events: std::sync::Arc<parking_lot::Mutex<Vec<AuditEvent>>>,
}

#[cfg(any(test, feature = "testutil"))]
impl RecordingAuditLogger {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded actions, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }
}

#[cfg(any(test, feature = "testutil"))]
#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Resource identifier for a lab.
pub fn lab_resource(lab: LabId) -> String {
    format!("lab:{lab}")
}

/// Resource identifier for an identity.
pub fn user_resource(user: UserId) -> String {
    format!("user:{user}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::AssignRole.to_string(), "assign_role");
        assert_eq!(AuditAction::SetLabActive.to_string(), "set_lab_active");
        assert_eq!(AuditAction::ProvisionIdentity.to_string(), "provision_identity");
    }

    #[test]
    fn test_audit_result_display() {
        assert_eq!(AuditResult::Success.to_string(), "success");
        assert_eq!(
            AuditResult::Failure("already a member".to_owned()).to_string(),
            "failure: already a member"
        );
    }

    #[test]
    fn test_builder_defaults() {
        let event = AuditEvent::builder()
            .actor("alice")
            .action(AuditAction::CreateLab)
            .resource(lab_resource(LabId(1)))
            .result(AuditResult::Success)
            .build();

        assert_eq!(event.resource, "lab:1");
        assert!(event.metadata.is_empty());
        assert!((Utc::now() - event.timestamp).num_seconds() < 2);
    }

    #[test]
    fn test_resource_helpers() {
        assert_eq!(lab_resource(LabId(42)), "lab:42");
        assert_eq!(user_resource(UserId(7)), "user:7");
    }

    #[tokio::test]
    async fn test_recording_logger_keeps_order() {
        let logger = RecordingAuditLogger::new();
        for action in [AuditAction::AddMember, AuditAction::RemoveMember] {
            let event = AuditEvent::builder()
                .actor("alice")
                .action(action)
                .resource("lab:1")
                .result(AuditResult::Success)
                .build();
            logger.log(&event).await;
        }

        assert_eq!(logger.actions(), vec![AuditAction::AddMember, AuditAction::RemoveMember]);
    }

    #[derive(Clone, Default)]
    struct FieldCollector {
        fields: std::sync::Arc<parking_lot::Mutex<Vec<(String, String)>>>,
    }

    impl tracing::field::Visit for FieldCollector {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
            self.fields.lock().push((field.name().to_owned(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FieldCollector {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = self.clone();
            event.record(&mut visitor);
        }
    }

    #[tokio::test]
    async fn test_tracing_logger_emits_event() {
        let collector = FieldCollector::default();
        let fields = std::sync::Arc::clone(&collector.fields);
        let subscriber = tracing_subscriber::registry().with(collector);
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut metadata = BTreeMap::new();
        metadata.insert("role".to_owned(), "USER".to_owned());
        let event = AuditEvent::builder()
            .actor("alice")
            .action(AuditAction::AssignRole)
            .resource(user_resource(UserId(2)))
            .result(AuditResult::Success)
            .metadata(metadata)
            .build();

        TracingAuditLogger.log(&event).await;

        let recorded = fields.lock().clone();
        let value = |name: &str| {
            recorded.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()).unwrap()
        };
        assert_eq!(value("audit.actor"), "alice");
        assert_eq!(value("audit.action"), "assign_role");
        assert_eq!(value("audit.resource"), "user:2");
        assert_eq!(value("audit.result"), "success");
        assert_eq!(value("audit.metadata"), "role=USER");
    }
}
