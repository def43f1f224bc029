//! HTTP API.
//!
//! Routes:
//! - `/api/appbundles`, `/api/forge/designautomation/*`: provisioning and jobs
//! - `/api/forge/callback/designautomation[/revit/...]`: job callbacks
//! - `/api/forge/oss/*`: bucket and object browsing
//! - `/api/forge/user/profile`: signed-in user
//! - `/api/relay`: live relay stream

pub mod handlers;
pub mod oss;
pub mod relay;
pub mod types;
pub mod user;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::automation::{BundleDirectory, JobRegistry, Orchestrator};
use crate::config::Settings;
use crate::error::Result;
use crate::forge::{
    AutomationService, ClientCredentials, DataManagementClient, DesignAutomationClient, DocumentVersions, ForgeHttp,
    ServiceCredentials, UserProfileClient, UserProfiles,
};
use crate::relay::SessionManager;
use crate::storage::{BlobStore, OssStorage};

/// Vendor API clients the server is built from
pub struct Collaborators {
    pub automation: Arc<dyn AutomationService>,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<dyn DocumentVersions>,
    pub profiles: Arc<dyn UserProfiles>,
    pub credentials: Arc<dyn ServiceCredentials>,
}

/// Application state shared across handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: JobRegistry,
    pub orchestrator: Orchestrator,
    pub blobs: Arc<dyn BlobStore>,
    pub profiles: Arc<dyn UserProfiles>,
    pub relay: SessionManager,
}

impl AppState {
    /// Build the state with the REST clients for the configured API base
    pub fn new(settings: Settings) -> Result<Self> {
        let http = Arc::new(ForgeHttp::new(&settings.api_base)?);
        let credentials: Arc<dyn ServiceCredentials> = Arc::new(ClientCredentials::new(
            http.clone(),
            settings.client_id.clone(),
            settings.client_secret.clone(),
        ));

        let collaborators = Collaborators {
            automation: Arc::new(DesignAutomationClient::new(
                http.clone(),
                credentials.clone(),
                &settings.da_region,
            )),
            blobs: Arc::new(OssStorage::new(http.clone())),
            documents: Arc::new(DataManagementClient::new(http.clone())),
            profiles: Arc::new(UserProfileClient::new(http)),
            credentials,
        };

        Ok(Self::from_parts(settings, collaborators))
    }

    pub fn from_parts(settings: Settings, parts: Collaborators) -> Self {
        let settings = Arc::new(settings);
        let relay = SessionManager::new();
        let bundles = BundleDirectory::new(settings.bundles_path.clone());

        let registry = JobRegistry::new(&settings, parts.automation.clone(), bundles);
        let orchestrator = Orchestrator::new(
            settings.clone(),
            parts.automation,
            parts.blobs.clone(),
            parts.documents,
            parts.profiles.clone(),
            parts.credentials,
            relay.clone(),
        );

        Self {
            settings,
            registry,
            orchestrator,
            blobs: parts.blobs,
            profiles: parts.profiles,
            relay,
        }
    }
}

/// Create the API router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // ================================================================
        // Provisioning
        // ================================================================
        .route("/api/appbundles", get(handlers::local_bundles))
        .route("/api/forge/designautomation/engines", get(handlers::engines))
        .route("/api/forge/designautomation/appbundles", post(handlers::create_app_bundle))
        .route(
            "/api/forge/designautomation/activities",
            get(handlers::defined_activities).post(handlers::create_activity),
        )
        .route(
            "/api/forge/designautomation/account",
            axum::routing::delete(handlers::clear_account),
        )
        // ================================================================
        // Jobs
        // ================================================================
        .route("/api/forge/designautomation/startworkitem", post(handlers::start_work_item))
        .route("/api/forge/designautomation/testing", get(handlers::start_document_job))
        .route("/api/forge/callback/designautomation", post(handlers::on_object_callback))
        .route(
            "/api/forge/callback/designautomation/revit/:session/:user/:project/:item/:storage/:file",
            post(handlers::on_document_callback),
        )
        // ================================================================
        // Storage and user
        // ================================================================
        .route("/api/forge/oss/buckets", get(oss::tree).post(oss::create_bucket))
        .route("/api/forge/oss/objects", post(oss::upload_object))
        .route("/api/forge/user/profile", get(user::profile))
        // ================================================================
        // Live relay
        // ================================================================
        .route("/api/relay", get(relay::stream))
        .route("/health", get(handlers::health))
}
