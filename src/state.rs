use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::{
    clients::{firebase::FirebaseVerifier, openai::OpenAiGenerator, s3::S3UploadSigner},
    config::{Config, StorageBackend},
    repositories::{
        diary::PgDiaryStore,
        memory::MemoryStore,
        store::{DiaryStore, UserDirectory},
        user::PgUserDirectory,
    },
    services::{
        feedback::FeedbackOrchestrator,
        generation::FeedbackGenerator,
        identity::IdentityVerifier,
        session::SessionIssuer,
        uploads::{UploadService, UploadSigner},
    },
};

/// The collaborators `AppState` is assembled from.
pub struct Components {
    pub users: Arc<dyn UserDirectory>,
    pub diaries: Arc<dyn DiaryStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub generator: Arc<dyn FeedbackGenerator>,
    pub upload_signer: Option<Arc<dyn UploadSigner>>,
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    pub users: Arc<dyn UserDirectory>,
    pub diaries: Arc<dyn DiaryStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub sessions: SessionIssuer,
    pub feedback: FeedbackOrchestrator,
    /// `None` when no bucket is configured.
    pub uploads: Option<UploadService>,
}

impl AppState {
    /// Creates a new `AppState` with production collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let (users, diaries): (Arc<dyn UserDirectory>, Arc<dyn DiaryStore>) = match &config.storage {
            StorageBackend::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = crate::db::create_pool(database_url, *max_connections)
                    .context("Failed to create the PostgreSQL pool")?;
                crate::db::ensure_schema(&pool)
                    .await
                    .context("Failed to apply the database schema")?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");
                let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
                let diaries: Arc<dyn DiaryStore> = Arc::new(PgDiaryStore::new(pool));
                (users, diaries)
            }
            StorageBackend::Memory => {
                tracing::warn!("⚠️ Using in-memory storage; data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                let users: Arc<dyn UserDirectory> = store.clone();
                let diaries: Arc<dyn DiaryStore> = store;
                (users, diaries)
            }
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build the HTTP client")?;

        let project_id = config
            .firebase
            .project_id
            .clone()
            .context("FIREBASE_PROJECT_ID must be set")?;
        let identity = Arc::new(FirebaseVerifier::new(
            http.clone(),
            project_id,
            config.firebase.jwks_url.clone(),
        ));
        tracing::info!("✅ Identity verifier ready");

        let api_key = config
            .openai
            .api_key
            .clone()
            .context("OPENAI_API_KEY must be set")?;
        let generator = Arc::new(OpenAiGenerator::new(http, &config.openai, api_key));
        tracing::info!("✅ Feedback generator ready (model {})", config.openai.model);

        let upload_signer: Option<Arc<dyn UploadSigner>> = match &config.uploads {
            Some(uploads) => Some(Arc::new(S3UploadSigner::from_config(uploads).await)),
            None => {
                tracing::info!("ℹ️ AWS_S3_BUCKET_NAME not set; image uploads disabled");
                None
            }
        };

        Ok(Self::from_components(
            config.clone(),
            Components {
                users,
                diaries,
                identity,
                generator,
                upload_signer,
            },
        ))
    }

    /// Assembles state from already-built collaborators.
    pub fn from_components(config: Config, components: Components) -> Self {
        let sessions = SessionIssuer::new(config.session_secret.as_bytes(), config.session_ttl());
        let feedback = FeedbackOrchestrator::new(
            components.diaries.clone(),
            components.generator,
            config.feedback.clone(),
        );
        let uploads = match (components.upload_signer, &config.uploads) {
            (Some(signer), Some(upload_config)) => Some(UploadService::new(signer, upload_config)),
            _ => None,
        };

        Self {
            config: Arc::new(config),
            users: components.users,
            diaries: components.diaries,
            identity: components.identity,
            sessions,
            feedback,
            uploads,
        }
    }
}
