//! Courier Tracker Library
//!
//! Presence and location telemetry core for the courier companion daemon:
//! identity resolution from stored credentials, the on/off-duty shift
//! machine, the background position sampler, the fire-and-forget telemetry
//! path, and the dispatch session handshake.

pub mod api;
pub mod capture;
pub mod config;
pub mod identity;
pub mod logging;
pub mod publisher;
pub mod session;
pub mod shift;
pub mod storage;

use std::sync::Arc;

use tracing::warn;

use api::ApiClient;
use capture::{BackgroundSampler, FileLocationSource, LocationCapture};
use config::Config;
use identity::IdentityResolver;
use publisher::TelemetryPublisher;
use session::SessionChannel;
use shift::{PermissionPolicy, ShiftController};
use storage::{CredentialStore, SessionStore};

/// Foreground-context state: everything the operator-facing flow drives.
/// The background sampler shares nothing with this in memory; the
/// session store is the only bridge between the two contexts.
pub struct CourierState {
    pub session_store: SessionStore,
    pub identity: IdentityResolver,
    pub api: ApiClient,
    pub shift: ShiftController<PermissionPolicy, BackgroundSampler>,
    pub session: SessionChannel,
}

impl CourierState {
    pub fn new(config: &Config) -> Self {
        Self::with_store(config, CredentialStore::new())
    }

    pub fn with_store(config: &Config, store: CredentialStore) -> Self {
        let session_store = SessionStore::new(store);
        let identity = IdentityResolver::new(session_store.clone());
        let publisher = Arc::new(TelemetryPublisher::new(&config.api_base_url));
        let capture = LocationCapture::new(session_store.clone(), publisher);
        let sampler = BackgroundSampler::new(
            Arc::new(FileLocationSource::new(config.fix_file.clone())),
            capture,
        );

        Self {
            identity,
            api: ApiClient::new(&config.api_base_url),
            shift: ShiftController::new(session_store.clone(), PermissionPolicy::granted(), sampler),
            session: SessionChannel::new(&config.api_base_url, config.rederive_company_on_hello),
            session_store,
        }
    }

    /// Sign the courier out: stop location updates, drop the dispatch
    /// connection, and forget the stored identity. Best-effort throughout.
    pub fn sign_out(&mut self) {
        if let Err(e) = self.shift.stop_shift() {
            warn!("Failed to stop shift during sign-out: {}", e);
        }

        self.session.close();

        if let Err(e) = self.session_store.clear_auth_token() {
            warn!("Failed to forget auth token during sign-out: {}", e);
        }
        if let Err(e) = self.session_store.clear_unit_profile() {
            warn!("Failed to forget unit profile during sign-out: {}", e);
        }
        if let Err(e) = self.session_store.clear_courier_id() {
            warn!("Failed to forget courier id during sign-out: {}", e);
        }
    }
}
