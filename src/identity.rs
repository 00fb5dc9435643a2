//! Identity Resolution Module
//!
//! Derives the canonical courier identity from whatever the session store
//! currently holds. Resolution is an ordered list of strategies, first
//! success wins: the cached profile record, then the claims embedded in the
//! bearer token. A successful resolution is written back to the cache and
//! the bare id is mirrored under its own key for the background task, which
//! only ever needs the id and must not parse profile JSON on every fix.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::storage::SessionStore;

/// Resolved courier identity. Once resolved, the id stays fixed for the
/// process lifetime; it only changes through re-authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitProfile {
    pub unit_id: i64,
    pub unit_nickname: Option<String>,
}

/// Identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no courier identity could be resolved")]
    Unresolved,
}

/// Resolves a [`UnitProfile`] from the session store.
#[derive(Clone)]
pub struct IdentityResolver {
    session: SessionStore,
}

impl IdentityResolver {
    pub fn new(session: SessionStore) -> Self {
        Self { session }
    }

    /// Resolve the courier identity, persisting the canonical record and the
    /// mirrored id on success.
    pub fn resolve(&self) -> Result<UnitProfile, IdentityError> {
        let strategies: &[(&str, fn(&Self) -> Option<UnitProfile>)] = &[
            ("cached profile", Self::from_cached_profile),
            ("token claims", Self::from_token_claims),
        ];

        for (name, strategy) in strategies {
            if let Some(profile) = strategy(self) {
                debug!("Identity resolved via {}: unit {}", name, profile.unit_id);
                self.persist(&profile);
                return Ok(profile);
            }
        }

        warn!("No identity source yielded a courier id");
        Err(IdentityError::Unresolved)
    }

    /// Company context for the current token, if any. Re-derived from the
    /// credential on demand rather than cached alongside the profile: the
    /// company claim can change without a full re-login.
    pub fn company_id(&self) -> Option<i64> {
        let token = self.session.auth_token()?;
        let claims = decode_claims(&token)?;
        claim_number(&claims, &["companyId", "company_id"])
    }

    fn from_cached_profile(&self) -> Option<UnitProfile> {
        self.session.unit_profile()
    }

    fn from_token_claims(&self) -> Option<UnitProfile> {
        let token = self.session.auth_token()?;
        let claims = decode_claims(&token)?;
        let unit_id = claim_number(&claims, &["unitId", "userId", "unit_id", "user_id"])?;
        let unit_nickname = claim_string(&claims, &["unitNickname", "unit_nickname", "nickname"]);
        Some(UnitProfile {
            unit_id,
            unit_nickname,
        })
    }

    fn persist(&self, profile: &UnitProfile) {
        if let Err(e) = self.session.set_unit_profile(profile) {
            warn!("Failed to cache unit profile: {}", e);
        }
        if let Err(e) = self.session.set_courier_id(profile.unit_id) {
            warn!("Failed to mirror courier id: {}", e);
        }

        info!("Courier identity persisted: unit {}", profile.unit_id);
    }
}

/// Decode the claims segment of a bearer token. Returns `None` on any
/// malformed input: missing segments, bad encoding, non-JSON payload.
pub fn decode_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;

    let mut normalized: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = BASE64_STANDARD.decode(normalized).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// First numeric claim found under any of the aliases. Accepts numbers and
/// decimal strings; servers are not consistent about which they emit.
fn claim_number(claims: &Value, aliases: &[&str]) -> Option<i64> {
    for alias in aliases {
        match claims.get(alias) {
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_i64() {
                    return Some(id);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(id) = s.parse() {
                    return Some(id);
                }
            }
            _ => {}
        }
    }
    None
}

fn claim_string(claims: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|alias| claims.get(alias).and_then(Value::as_str))
        .map(str::to_owned)
}
