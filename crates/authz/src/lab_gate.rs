//! Lab accessibility kill switch.
//!
//! A lab is accessible iff it exists and is active. The flag is read from
//! the store on every call; nothing is cached, so a deactivation takes
//! effect on the very next request.

use std::sync::Arc;

use labgate_storage::{Lab, LabId, LabStore};

/// Answers "may anything happen in this lab right now".
#[derive(Clone)]
pub struct LabGate {
    labs: Arc<dyn LabStore>,
}

impl std::fmt::Debug for LabGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabGate").finish_non_exhaustive()
    }
}

impl LabGate {
    /// Creates a gate over `labs`.
    pub fn new(labs: Arc<dyn LabStore>) -> Self {
        Self { labs }
    }

    /// Returns `true` if `lab` exists and is active.
    ///
    /// Fails closed: a store error is logged and reported as inaccessible.
    #[tracing::instrument(skip(self))]
    pub async fn is_accessible(&self, lab: LabId) -> bool {
        match self.labs.find_lab(lab).await {
            Ok(Some(record)) => Self::admits(&record),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "lab lookup failed, treating lab as inaccessible");
                false
            },
        }
    }

    /// The same check against a record the caller already holds.
    #[must_use]
    pub fn admits(lab: &Lab) -> bool {
        lab.active
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use labgate_storage::{
        RoleName,
        testutil::{memory_directory, seed_identity, seed_lab},
    };

    use super::*;

    #[tokio::test]
    async fn test_active_lab_is_accessible() {
        let dir = memory_directory();
        let alice = seed_identity(dir.as_ref(), "alice", &[RoleName::Admin]).await;
        let lab = seed_lab(dir.as_ref(), "Central", alice.id).await;

        assert!(LabGate::new(dir).is_accessible(lab.id).await);
    }

    #[tokio::test]
    async fn test_missing_lab_is_not_accessible() {
        assert!(!LabGate::new(memory_directory()).is_accessible(LabId(404)).await);
    }

    #[tokio::test]
    async fn test_toggle_is_seen_on_next_call() {
        let dir = memory_directory();
        let alice = seed_identity(dir.as_ref(), "alice", &[RoleName::Admin]).await;
        let lab = seed_lab(dir.as_ref(), "Central", alice.id).await;
        let gate = LabGate::new(dir.clone());

        dir.set_lab_active(lab.id, false).await.unwrap();
        assert!(!gate.is_accessible(lab.id).await);

        dir.set_lab_active(lab.id, true).await.unwrap();
        assert!(gate.is_accessible(lab.id).await);
    }
}
