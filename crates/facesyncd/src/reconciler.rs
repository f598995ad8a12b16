//! Brings the remote face set into agreement with the identity store.
//!
//! A pass clears the remote set, re-adds every enrolled token concurrently,
//! then deletes reference images that no identity owns. Failures are logged
//! as critical and reported, never returned: the daemon stays usable when
//! sync fails.

use crate::identity_store::IdentityStore;
use facesync_cloud::{FaceProvider, RemoveTarget};
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SET_ID_PREFIX: &str = "facesync-";
const SET_ID_HASH_CHARS: usize = 16;

/// Remote set id for an installation. Distinct installations never share a set.
pub fn derive_set_id(installation_id: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(installation_id.as_bytes()));
    format!("{SET_ID_PREFIX}{}", &digest[..SET_ID_HASH_CHARS])
}

/// One-time clear of the set used by single-tenant releases.
/// The flag is shared by every reconciler built during this process.
#[derive(Clone, Default)]
pub struct LegacyMigration {
    set_id: Option<String>,
    done: Arc<AtomicBool>,
}

impl LegacyMigration {
    pub fn new(set_id: Option<String>) -> Self {
        Self {
            set_id,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The legacy id on the first call, `None` afterwards.
    fn take(&self) -> Option<&str> {
        let id = self.set_id.as_deref()?;
        (!self.done.swap(true, Ordering::SeqCst)).then_some(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub legacy_cleared: bool,
    /// Whether the remote set was cleared before re-adding.
    pub cleared: bool,
    pub added: Vec<String>,
    /// (token, error) for every add that failed.
    pub failed: Vec<(String, String)>,
    pub orphans_removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.cleared && self.failed.is_empty()
    }
}

pub struct Reconciler {
    provider: Arc<dyn FaceProvider>,
    store: IdentityStore,
    set_id: String,
    legacy: LegacyMigration,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn FaceProvider>,
        store: IdentityStore,
        set_id: String,
        legacy: LegacyMigration,
    ) -> Self {
        Self {
            provider,
            store,
            set_id,
            legacy,
        }
    }

    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    /// Run one pass. Safe to call repeatedly; consecutive passes converge on
    /// the same remote membership.
    pub async fn run(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if let Some(legacy) = self.legacy.take() {
            match self.provider.remove_from_set(legacy, RemoveTarget::All).await {
                Ok(()) => {
                    tracing::info!(set_id = legacy, "cleared legacy face set");
                    report.legacy_cleared = true;
                }
                Err(e) => tracing::error!(
                    critical = true,
                    set_id = legacy,
                    error = %e,
                    "failed to clear legacy face set"
                ),
            }
        }

        match self.provider.remove_from_set(&self.set_id, RemoveTarget::All).await {
            Ok(()) => report.cleared = true,
            Err(e) => tracing::error!(
                critical = true,
                set_id = %self.set_id,
                error = %e,
                "failed to clear remote face set"
            ),
        }

        let faces = match self.store.list().await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::error!(critical = true, error = %e, "cannot read identity store");
                return report;
            }
        };

        let adds = faces.keys().map(|token| async move {
            let outcome = self.provider.add_to_set(&self.set_id, token).await;
            (token.clone(), outcome)
        });
        for (token, outcome) in join_all(adds).await {
            match outcome {
                Ok(()) => report.added.push(token),
                Err(e) => {
                    tracing::error!(
                        critical = true,
                        token = %token,
                        error = %e,
                        "failed to add face to remote set"
                    );
                    report.failed.push((token, e.to_string()));
                }
            }
        }
        report.added.sort();

        match self.store.remove_orphaned_images().await {
            Ok(removed) => report.orphans_removed = removed,
            Err(e) => tracing::warn!(error = %e, "cannot scan reference images"),
        }

        tracing::info!(
            set_id = %self.set_id,
            added = report.added.len(),
            failed = report.failed.len(),
            orphans = report.orphans_removed.len(),
            "face set reconciled"
        );
        report
    }
}
