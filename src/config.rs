//! Configuration Module
//!
//! Environment-derived settings with workable defaults.

use std::path::PathBuf;

const DEFAULT_API_URL: &str = "https://deliveryappserver-eu.onrender.com";

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP origin of the delivery backend; the dispatch websocket lives on
    /// the same origin.
    pub api_base_url: String,
    /// Re-read the company claim from the credential on every session open
    /// instead of freezing it at open-call time. On by default: the company
    /// can change server-side without a re-login.
    pub rederive_company_on_hello: bool,
    /// JSON file where the GPS bridge keeps the latest position fix.
    pub fix_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let api_base_url =
            std::env::var("COURIER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let rederive_company_on_hello = std::env::var("COURIER_REDERIVE_COMPANY")
            .map(|v| v != "0")
            .unwrap_or(true);

        let fix_file = std::env::var("COURIER_FIX_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_fix_file());

        Self {
            api_base_url,
            rederive_company_on_hello,
            fix_file,
        }
    }
}

fn default_fix_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("CourierTracker")
        .join("current_fix.json")
}
