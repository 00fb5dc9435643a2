//! Location Capture Module
//!
//! Background half of the telemetry path. The platform scheduler hands the
//! capture handler a batch of position fixes; the handler keeps only the
//! most recent one, gates on the persisted duty flag and mirrored courier
//! id, and emits at most one telemetry event per invocation. This code runs
//! outside the foreground context: it has no error channel to the operator,
//! so a fix that cannot be attributed is dropped silently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::shift::{SamplerOptions, SamplerRegistry, ShiftError};
use crate::storage::SessionStore;

/// One position fix from the platform, ephemeral.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    /// Meters per second, when the platform reports it.
    pub speed: Option<f64>,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

/// One reported location sample, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub courier_id: i64,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: Option<f64>,
    pub status: String,
    pub timestamp: String,
}

/// Fire-and-forget sink for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, event: TelemetryEvent);
}

/// Builds telemetry events from scheduler-delivered fixes.
#[derive(Clone)]
pub struct LocationCapture {
    session: SessionStore,
    sink: Arc<dyn TelemetrySink>,
}

impl LocationCapture {
    pub fn new(session: SessionStore, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { session, sink }
    }

    /// Handle one scheduler invocation. Only the most recent fix in the
    /// batch counts; older ones are discarded without averaging.
    pub fn handle_batch(&self, fixes: &[LocationSample]) {
        let Some(fix) = fixes.last() else {
            return;
        };

        let courier_id = self.session.courier_id();
        let on_shift = self.session.on_shift();

        let Some(courier_id) = courier_id else {
            debug!("Dropping fix: no mirrored courier id");
            return;
        };
        if !on_shift {
            debug!("Dropping fix: not on shift");
            return;
        }

        let event = TelemetryEvent {
            event_type: "location".into(),
            courier_id,
            lat: fix.lat,
            lng: fix.lng,
            speed_kmh: fix.speed.map(|mps| mps * 3.6),
            status: "on_shift".into(),
            timestamp: fix
                .captured_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        // Hand off without waiting on delivery.
        self.sink.publish(event);
    }
}

/// Source of the current best position fix. In production an external GPS
/// bridge keeps this up to date; the sampler only ever polls it.
pub trait LocationSource: Send + Sync {
    fn current_fix(&self) -> Option<LocationSample>;
}

/// Reads the latest fix from a JSON file maintained by the GPS bridge.
pub struct FileLocationSource {
    path: std::path::PathBuf,
}

impl FileLocationSource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocationSource for FileLocationSource {
    fn current_fix(&self) -> Option<LocationSample> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(fix) => Some(fix),
            Err(e) => {
                debug!("Unreadable fix file: {}", e);
                None
            }
        }
    }
}

/// Scheduler task driving [`LocationCapture`] from a [`LocationSource`].
/// Registration spawns one polling task honoring the configured floors;
/// registering while registered and deregistering while absent are no-ops.
pub struct BackgroundSampler {
    source: Arc<dyn LocationSource>,
    capture: LocationCapture,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundSampler {
    pub fn new(source: Arc<dyn LocationSource>, capture: LocationCapture) -> Self {
        Self {
            source,
            capture,
            worker: Mutex::new(None),
        }
    }
}

impl SamplerRegistry for BackgroundSampler {
    fn is_registered(&self) -> bool {
        self.worker
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    fn register(&self, options: SamplerOptions) -> Result<(), ShiftError> {
        let mut guard = self
            .worker
            .lock()
            .map_err(|_| ShiftError::Sampler("sampler lock poisoned".into()))?;
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let source = Arc::clone(&self.source);
        let capture = self.capture.clone();
        *guard = Some(tokio::spawn(sample_loop(source, capture, options)));
        debug!("Background sampler registered");
        Ok(())
    }

    fn deregister(&self) -> Result<(), ShiftError> {
        let mut guard = self
            .worker
            .lock()
            .map_err(|_| ShiftError::Sampler("sampler lock poisoned".into()))?;
        if let Some(handle) = guard.take() {
            handle.abort();
            debug!("Background sampler deregistered");
        }
        Ok(())
    }
}

async fn sample_loop(
    source: Arc<dyn LocationSource>,
    capture: LocationCapture,
    options: SamplerOptions,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_delivery: Option<(tokio::time::Instant, f64, f64)> = None;

    loop {
        ticker.tick().await;

        let Some(fix) = source.current_fix() else {
            continue;
        };

        let qualifies = match last_delivery {
            None => true,
            Some((at, lat, lng)) => {
                at.elapsed() >= options.min_interval
                    || haversine_m(lat, lng, fix.lat, fix.lng) >= options.min_distance_m
            }
        };
        if !qualifies {
            continue;
        }

        last_delivery = Some((tokio::time::Instant::now(), fix.lat, fix.lng));
        capture.handle_batch(&[fix]);
    }
}

/// Great-circle distance in meters.
fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CredentialStore;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for RecordingSink {
        fn publish(&self, event: TelemetryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn fix(lat: f64, lng: f64, speed: Option<f64>) -> LocationSample {
        LocationSample {
            lat,
            lng,
            speed,
            captured_at: Utc::now(),
        }
    }

    fn capture_with(dir: &TempDir) -> (LocationCapture, Arc<RecordingSink>, SessionStore) {
        let session = SessionStore::new(CredentialStore::with_root(dir.path()));
        let sink = Arc::new(RecordingSink::default());
        let capture = LocationCapture::new(session.clone(), sink.clone());
        (capture, sink, session)
    }

    #[test]
    fn off_shift_fix_is_dropped() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(42).unwrap();

        capture.handle_batch(&[fix(55.75, 37.61, Some(4.0))]);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_courier_id_drops_the_fix() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_on_shift().unwrap();

        capture.handle_batch(&[fix(55.75, 37.61, None)]);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn on_shift_fix_becomes_one_event_with_kmh_speed() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(42).unwrap();
        session.set_on_shift().unwrap();

        capture.handle_batch(&[fix(55.75, 37.61, Some(10.0))]);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, "location");
        assert_eq!(event.courier_id, 42);
        assert_eq!(event.status, "on_shift");
        assert_eq!(event.speed_kmh, Some(36.0));
    }

    #[test]
    fn absent_speed_stays_null() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(42).unwrap();
        session.set_on_shift().unwrap();

        capture.handle_batch(&[fix(55.75, 37.61, None)]);

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].speed_kmh, None);
        let json = serde_json::to_value(&events[0]).unwrap();
        assert!(json["speedKmh"].is_null());
    }

    #[test]
    fn only_the_most_recent_fix_in_a_batch_counts() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(42).unwrap();
        session.set_on_shift().unwrap();

        capture.handle_batch(&[fix(1.0, 1.0, None), fix(2.0, 2.0, None), fix(3.0, 3.0, None)]);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lat, 3.0);
        assert_eq!(events[0].lng, 3.0);
    }

    #[test]
    fn empty_batch_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(42).unwrap();
        session.set_on_shift().unwrap();

        capture.handle_batch(&[]);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn event_wire_shape_matches_the_collector() {
        let dir = TempDir::new().unwrap();
        let (capture, sink, session) = capture_with(&dir);
        session.set_courier_id(7).unwrap();
        session.set_on_shift().unwrap();

        capture.handle_batch(&[fix(55.0, 37.0, Some(2.5))]);

        let events = sink.events.lock().unwrap();
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["type"], "location");
        assert_eq!(json["courierId"], 7);
        assert_eq!(json["lat"], 55.0);
        assert_eq!(json["lng"], 37.0);
        assert_eq!(json["speedKmh"], 9.0);
        assert_eq!(json["status"], "on_shift");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn sampler_registration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (capture, _sink, _session) = capture_with(&dir);

        struct NoFix;
        impl LocationSource for NoFix {
            fn current_fix(&self) -> Option<LocationSample> {
                None
            }
        }

        let sampler = BackgroundSampler::new(Arc::new(NoFix), capture);
        assert!(!sampler.is_registered());

        sampler.register(SamplerOptions::default()).unwrap();
        sampler.register(SamplerOptions::default()).unwrap();
        assert!(sampler.is_registered());

        sampler.deregister().unwrap();
        sampler.deregister().unwrap();
        assert!(!sampler.is_registered());
    }
}
