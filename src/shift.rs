//! Shift Control Module
//!
//! On/off-duty state machine. Starting a shift verifies location permissions,
//! persists the duty flag, and registers the background sampler; stopping
//! clears the flag and deregisters. Transitions are operator-triggered only,
//! with no timers or auto-expiry.

use std::time::Duration;

use tracing::{info, warn};

use crate::storage::{SessionStore, StorageError};

/// Duty state. The persisted form is the presence of the `onShift` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftState {
    Offline,
    Online,
}

/// Sampling floors handed to the platform scheduler. The scheduler delivers
/// a fix when at least `min_interval` has elapsed or the courier has moved
/// at least `min_distance_m` since the previous delivery; the subsystem must
/// not ask for tighter sampling than this.
#[derive(Debug, Clone, Copy)]
pub struct SamplerOptions {
    pub min_interval: Duration,
    pub min_distance_m: f64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_m: 10.0,
        }
    }
}

/// Location permission broker. Both scopes follow the same pattern: check,
/// request if missing, check again.
pub trait PermissionGate {
    fn foreground_granted(&self) -> bool;
    fn request_foreground(&self) -> bool;
    fn background_granted(&self) -> bool;
    fn request_background(&self) -> bool;
}

/// Static permission policy. Platforms without an interactive prompt broker
/// grant or deny by configuration.
#[derive(Debug, Clone, Copy)]
pub struct PermissionPolicy {
    pub foreground: bool,
    pub background: bool,
}

impl PermissionPolicy {
    pub fn granted() -> Self {
        Self {
            foreground: true,
            background: true,
        }
    }
}

impl PermissionGate for PermissionPolicy {
    fn foreground_granted(&self) -> bool {
        self.foreground
    }
    fn request_foreground(&self) -> bool {
        self.foreground
    }
    fn background_granted(&self) -> bool {
        self.background
    }
    fn request_background(&self) -> bool {
        self.background
    }
}

/// Handle to the platform's background sampler task registration.
pub trait SamplerRegistry {
    fn is_registered(&self) -> bool;
    fn register(&self, options: SamplerOptions) -> Result<(), ShiftError>;
    fn deregister(&self) -> Result<(), ShiftError>;
}

/// Shift errors
#[derive(Debug, thiserror::Error)]
pub enum ShiftError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sampler error: {0}")]
    Sampler(String),
}

/// Drives shift transitions against the store and the sampler registry.
pub struct ShiftController<G, R> {
    session: SessionStore,
    gate: G,
    registry: R,
    options: SamplerOptions,
    state: ShiftState,
}

impl<G: PermissionGate, R: SamplerRegistry> ShiftController<G, R> {
    pub fn new(session: SessionStore, gate: G, registry: R) -> Self {
        Self {
            session,
            gate,
            registry,
            options: SamplerOptions::default(),
            state: ShiftState::Offline,
        }
    }

    pub fn state(&self) -> ShiftState {
        self.state
    }

    /// Start a shift. Permission refusal aborts before anything is
    /// persisted, leaving no partial activation. The duty flag is persisted
    /// before the sampler is registered; a task firing before the flag is
    /// durable drops that one sample, which the next fix makes up for.
    pub fn start_shift(&mut self) -> Result<(), ShiftError> {
        if !self.gate.foreground_granted() && !self.gate.request_foreground() {
            warn!("Foreground location permission refused");
            return Err(ShiftError::PermissionDenied);
        }
        if !self.gate.background_granted() && !self.gate.request_background() {
            warn!("Background location permission refused");
            return Err(ShiftError::PermissionDenied);
        }

        self.session.set_on_shift()?;

        if !self.registry.is_registered() {
            self.registry.register(self.options)?;
        }

        self.state = ShiftState::Online;
        info!("Shift started");
        Ok(())
    }

    /// Stop a shift. Idempotent: clearing an absent flag and deregistering
    /// an absent task are both no-ops.
    pub fn stop_shift(&mut self) -> Result<(), ShiftError> {
        if let Err(e) = self.session.clear_on_shift() {
            warn!("Failed to clear duty flag: {}", e);
        }

        if self.registry.is_registered() {
            self.registry.deregister()?;
        }

        self.state = ShiftState::Offline;
        info!("Shift stopped");
        Ok(())
    }
}
