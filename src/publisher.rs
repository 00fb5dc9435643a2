//! Telemetry Publisher Module
//!
//! Fire-and-forget delivery of location events to the collector endpoint.
//! A send either lands or it doesn't: failures are logged at debug level and
//! discarded. No retry and no queue — the next fix arrives within the
//! scheduler floor, and replaying stale positions is worse than a gap.

use tracing::debug;

use crate::capture::{TelemetryEvent, TelemetrySink};

/// HTTP sink posting events to `<base>/api/location`.
pub struct TelemetryPublisher {
    endpoint: String,
    client: reqwest::Client,
}

impl TelemetryPublisher {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: format!("{}/api/location", base_url.trim_end_matches('/')),
            client,
        }
    }
}

impl TelemetrySink for TelemetryPublisher {
    fn publish(&self, event: TelemetryEvent) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            match client.post(&endpoint).json(&event).send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!("Collector rejected location event: {}", response.status());
                }
                Ok(_) => {}
                Err(e) => debug!("Location send failed: {}", e),
            }
        });
    }
}
