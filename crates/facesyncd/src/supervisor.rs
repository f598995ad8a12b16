//! Owns the active [`AppContext`] and serializes rebuilds and reconcile passes.
//!
//! Settings changes arrive on the settings store's change channel. A change
//! to `settings` rebuilds the context and reconciles; a change to `face_set`
//! only reconciles. Changes queued while a pass runs are folded into one
//! follow-up pass.

use crate::context::{AppContext, Services};
use crate::logbuf::LogBuffer;
use crate::reconciler::ReconcileReport;
use crate::settings::{SettingsError, SettingsStore, FACE_SET_KEY, SETTINGS_KEY};
use facesync_cloud::ProviderError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

#[derive(Error, Debug)]
enum RebuildError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Requests sent to the supervisor task.
enum SupervisorRequest {
    Reload {
        reply: oneshot::Sender<Option<ReconcileReport>>,
    },
    Reconcile {
        reply: oneshot::Sender<Option<ReconcileReport>>,
    },
}

/// Clone-safe handle to the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    active: Arc<RwLock<Option<Arc<AppContext>>>>,
    tx: mpsc::Sender<SupervisorRequest>,
}

impl SupervisorHandle {
    /// The active context, if credentials are configured.
    pub async fn current(&self) -> Option<Arc<AppContext>> {
        self.active.read().await.clone()
    }

    /// Rebuild the context from the saved settings and reconcile.
    /// Returns `None` when no context could be built.
    pub async fn reload(&self) -> Option<ReconcileReport> {
        self.request(|reply| SupervisorRequest::Reload { reply }).await
    }

    /// Run a reconcile pass on the active context.
    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        self.request(|reply| SupervisorRequest::Reconcile { reply }).await
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Option<ReconcileReport>>) -> SupervisorRequest,
    ) -> Option<ReconcileReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).await.is_err() {
            tracing::warn!("supervisor task is gone");
            return None;
        }
        reply_rx.await.ok().flatten()
    }
}

pub struct Supervisor {
    settings: Arc<SettingsStore>,
    services: Services,
    logs: LogBuffer,
    logs_path: Option<PathBuf>,
    active: Arc<RwLock<Option<Arc<AppContext>>>>,
}

impl Supervisor {
    pub fn new(
        settings: Arc<SettingsStore>,
        services: Services,
        logs: LogBuffer,
        logs_path: Option<PathBuf>,
    ) -> Self {
        Self {
            settings,
            services,
            logs,
            logs_path,
            active: Arc::new(RwLock::new(None)),
        }
    }

    /// Take over the settings change channel and run the supervisor loop on
    /// a tokio task.
    pub fn spawn(self) -> SupervisorHandle {
        let mut changes = self.settings.on_change();
        let (tx, mut rx) = mpsc::channel::<SupervisorRequest>(8);
        let handle = SupervisorHandle {
            active: Arc::clone(&self.active),
            tx,
        };

        tokio::spawn(async move {
            tracing::info!("supervisor started");
            loop {
                tokio::select! {
                    biased;
                    key = changes.recv() => {
                        let Some(key) = key else { break };
                        let mut keys = vec![key];
                        while let Ok(more) = changes.try_recv() {
                            keys.push(more);
                        }
                        self.apply(&keys).await;
                    }
                    request = rx.recv() => {
                        let Some(request) = request else { break };
                        match request {
                            SupervisorRequest::Reload { reply } => {
                                let report = self.apply(&[SETTINGS_KEY.to_string()]).await;
                                let _ = reply.send(report);
                            }
                            SupervisorRequest::Reconcile { reply } => {
                                let _ = reply.send(self.reconcile().await);
                            }
                        }
                    }
                }
            }
            tracing::info!("supervisor exiting");
        });

        handle
    }

    /// Handle a batch of changed keys with at most one rebuild and one pass.
    async fn apply(&self, keys: &[String]) -> Option<ReconcileReport> {
        let reload = keys.iter().any(|k| k == SETTINGS_KEY);
        let resync = reload || keys.iter().any(|k| k == FACE_SET_KEY);
        if keys.len() > 1 {
            tracing::debug!(changes = keys.len(), reload, resync, "coalesced settings changes");
        }

        if reload {
            self.rebuild().await;
        }
        if resync {
            self.reconcile().await
        } else {
            None
        }
    }

    async fn rebuild(&self) {
        if let Some(path) = &self.logs_path {
            if let Err(e) = self.logs.save(path) {
                tracing::warn!(error = %e, path = %path.display(), "cannot save logs");
            }
        }

        let context = match self.build_context().await {
            Ok(Some(ctx)) => {
                tracing::info!(set_id = %ctx.set_id, threshold = ctx.threshold, "app context ready");
                Some(Arc::new(ctx))
            }
            Ok(None) => {
                tracing::warn!("No API key entered in app settings");
                None
            }
            Err(e) => {
                tracing::error!(critical = true, error = %e, "cannot initialize face provider");
                None
            }
        };
        *self.active.write().await = context;
    }

    async fn build_context(&self) -> Result<Option<AppContext>, RebuildError> {
        let settings = self.settings.app_settings().await?;
        let installation_id = self.settings.installation_id().await?;
        Ok(AppContext::build(&settings, &installation_id, &self.services)?)
    }

    async fn reconcile(&self) -> Option<ReconcileReport> {
        let context = self.active.read().await.clone()?;
        tracing::debug!(set_id = context.reconciler.set_id(), "reconcile pass starting");
        Some(context.reconciler.run().await)
    }
}
