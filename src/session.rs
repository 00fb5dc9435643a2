//! Session Channel Module
//!
//! Duplex connection to the dispatch service. One connection lives per
//! resolved identity: opening for a new identity closes whatever is live
//! first, so the process never holds two connections. On open the channel
//! sends exactly one hello frame announcing the courier; inbound frames are
//! logged and otherwise ignored until a command protocol exists. A dropped
//! connection is not retried — reconnection only happens through a later
//! identity resolution.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::identity::{IdentityResolver, UnitProfile};

/// Connection lifecycle, observable from the foreground context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

/// Identity handshake frame, sent once per successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHello {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub role: String,
    pub courier_id: i64,
    pub courier_nickname: Option<String>,
    pub company_id: Option<i64>,
}

impl SessionHello {
    pub fn new(profile: &UnitProfile, company_id: Option<i64>) -> Self {
        Self {
            frame_type: "hello".into(),
            role: "courier".into(),
            courier_id: profile.unit_id,
            courier_nickname: profile.unit_nickname.clone(),
            company_id,
        }
    }
}

struct SessionHandle {
    courier_id: i64,
    state: Arc<Mutex<ConnectionState>>,
    worker: JoinHandle<()>,
}

/// Owns the at-most-one live dispatch connection.
pub struct SessionChannel {
    ws_url: String,
    rederive_company: bool,
    current: Option<SessionHandle>,
}

impl SessionChannel {
    /// `base_url` is the HTTP origin of the dispatch service; the websocket
    /// endpoint is the same origin with the scheme swapped.
    pub fn new(base_url: &str, rederive_company: bool) -> Self {
        Self {
            ws_url: ws_url_from(base_url),
            rederive_company,
            current: None,
        }
    }

    /// Open a connection for a resolved identity, replacing any live one.
    /// The company claim is taken from the current credential at open time;
    /// with `rederive_company` it is re-read after the transport is up, so a
    /// token swapped mid-connect still wins.
    pub fn open(&mut self, profile: &UnitProfile, resolver: &IdentityResolver) {
        self.close();

        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let eager_company = if self.rederive_company {
            None
        } else {
            resolver.company_id()
        };

        let worker = tokio::spawn(run_connection(
            self.ws_url.clone(),
            profile.clone(),
            resolver.clone(),
            self.rederive_company,
            eager_company,
            Arc::clone(&state),
        ));

        self.current = Some(SessionHandle {
            courier_id: profile.unit_id,
            state,
            worker,
        });
    }

    /// Close the live connection, if any. Immediate and idempotent; nothing
    /// waits for in-flight frames.
    pub fn close(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.worker.abort();
            set_state(&handle.state, ConnectionState::Closed);
            info!("Session channel closed for courier {}", handle.courier_id);
        }
    }

    /// State of the live connection, absent when nothing was ever opened
    /// or the last connection was replaced.
    pub fn state(&self) -> Option<ConnectionState> {
        self.current
            .as_ref()
            .map(|handle| *handle.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn current_courier(&self) -> Option<i64> {
        self.current.as_ref().map(|handle| handle.courier_id)
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    ws_url: String,
    profile: UnitProfile,
    resolver: IdentityResolver,
    rederive_company: bool,
    eager_company: Option<i64>,
    state: Arc<Mutex<ConnectionState>>,
) {
    let mut ws = match connect_async(ws_url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!("Session connect failed: {}", e);
            set_state(&state, ConnectionState::Failed);
            return;
        }
    };
    set_state(&state, ConnectionState::Open);

    let company_id = if rederive_company {
        resolver.company_id()
    } else {
        eager_company
    };
    let hello = SessionHello::new(&profile, company_id);

    let frame = match serde_json::to_string(&hello) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to encode hello frame: {}", e);
            set_state(&state, ConnectionState::Failed);
            return;
        }
    };
    if let Err(e) = ws.send(Message::Text(frame)).await {
        warn!("Failed to send hello frame: {}", e);
        set_state(&state, ConnectionState::Failed);
        return;
    }
    info!("Session hello sent for courier {}", profile.unit_id);

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(frame) => debug!("Session frame: {}", frame),
                Err(_) => debug!("Session raw frame: {}", text),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Session transport error: {}", e);
                set_state(&state, ConnectionState::Failed);
                return;
            }
        }
    }

    set_state(&state, ConnectionState::Closed);
}

fn set_state(state: &Arc<Mutex<ConnectionState>>, next: ConnectionState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

/// Swap the transport scheme of the dispatch origin: `http` -> `ws`,
/// `https` -> `wss`.
pub fn ws_url_from(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https") {
        format!("wss{}", rest)
    } else if let Some(rest) = base.strip_prefix("http") {
        format!("ws{}", rest)
    } else {
        base.to_string()
    }
}
