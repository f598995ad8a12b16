use crate::enrollment::IdentityMutations;
use crate::events::TriggerBus;
use crate::identity_store::IdentityStore;
use crate::reconciler::{derive_set_id, LegacyMigration, Reconciler};
use crate::recognizer::Recognizer;
use crate::settings::AppSettings;
use crate::snapshots::SnapshotRegistry;
use facesync_cloud::{ClientOptions, Credentials, FacePlusPlus, FaceProvider, ProviderError};
use std::sync::Arc;

/// Builds a provider client from credentials.
pub type ProviderFactory =
    Arc<dyn Fn(Credentials) -> Result<Arc<dyn FaceProvider>, ProviderError> + Send + Sync>;

/// Factory for the Face++ client.
pub fn face_plus_plus(options: ClientOptions) -> ProviderFactory {
    Arc::new(
        move |credentials: Credentials| -> Result<Arc<dyn FaceProvider>, ProviderError> {
            let client = FacePlusPlus::new(credentials, options.clone())?;
            Ok(Arc::new(client))
        },
    )
}

/// Pieces that live for the whole process and survive context rebuilds.
#[derive(Clone)]
pub struct Services {
    pub store: IdentityStore,
    pub snapshots: SnapshotRegistry,
    pub triggers: TriggerBus,
    pub legacy: LegacyMigration,
    pub provider_factory: ProviderFactory,
}

/// Everything that depends on the current credentials and threshold.
/// Replaced as a whole when the app settings change.
pub struct AppContext {
    pub set_id: String,
    pub threshold: f64,
    pub provider: Arc<dyn FaceProvider>,
    pub recognizer: Recognizer,
    pub reconciler: Reconciler,
    pub mutations: IdentityMutations,
}

impl AppContext {
    /// Build a context from the saved settings. `Ok(None)` when no
    /// credentials are configured.
    pub fn build(
        settings: &AppSettings,
        installation_id: &str,
        services: &Services,
    ) -> Result<Option<Self>, ProviderError> {
        let Some(credentials) = settings.credentials() else {
            return Ok(None);
        };
        let provider = (services.provider_factory)(credentials)?;
        Ok(Some(Self::with_provider(
            provider,
            derive_set_id(installation_id),
            settings.threshold(),
            services,
        )))
    }

    pub fn with_provider(
        provider: Arc<dyn FaceProvider>,
        set_id: String,
        threshold: f64,
        services: &Services,
    ) -> Self {
        let recognizer = Recognizer::new(
            Arc::clone(&provider),
            services.store.clone(),
            set_id.clone(),
            threshold,
            services.snapshots.clone(),
            services.triggers.clone(),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&provider),
            services.store.clone(),
            set_id.clone(),
            services.legacy.clone(),
        );
        let mutations =
            IdentityMutations::new(Arc::clone(&provider), services.store.clone(), set_id.clone());

        Self {
            set_id,
            threshold,
            provider,
            recognizer,
            reconciler,
            mutations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::settings::SettingsStore;
    use crate::testutil::{fake_factory, FakeProvider};
    use std::time::Duration;

    fn services() -> Services {
        Services {
            store: IdentityStore::new(
                Arc::new(SettingsStore::in_memory()),
                BlobStore::new(std::env::temp_dir().join("facesync-context-test")),
            ),
            snapshots: SnapshotRegistry::new(Duration::from_secs(1)),
            triggers: TriggerBus::new(4),
            legacy: LegacyMigration::default(),
            provider_factory: fake_factory(Arc::new(FakeProvider::default())),
        }
    }

    #[test]
    fn test_build_without_credentials() {
        let ctx = AppContext::build(&AppSettings::default(), "id", &services()).unwrap();
        assert!(ctx.is_none());
    }

    #[test]
    fn test_build_uses_settings() {
        let settings = AppSettings {
            api_key: "key".into(),
            api_secret: "secret".into(),
            threshold: Some(82.5),
        };
        let ctx = AppContext::build(&settings, "id", &services()).unwrap().unwrap();
        assert_eq!(ctx.threshold, 82.5);
        assert_eq!(ctx.set_id, derive_set_id("id"));
        assert_eq!(ctx.reconciler.set_id(), ctx.set_id);
    }

    #[test]
    fn test_face_plus_plus_factory() {
        let factory = face_plus_plus(ClientOptions::default());
        let credentials = Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
        };
        assert!(factory(credentials).is_ok());
    }
}
