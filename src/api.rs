//! API Client Module
//!
//! HTTP communication with the delivery backend for interactive,
//! operator-initiated calls: courier login and order-detail lookup. Unlike
//! the telemetry path, failures here surface to the operator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// API client for the delivery backend
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Log a courier in, returning the bearer token. A non-JSON body on a
    /// JSON endpoint is a transport-shape failure, reported separately from
    /// a business-level rejection.
    pub async fn courier_login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let url = format!("{}/api/auth/courierlogin", self.base_url);

        debug!("Courier login at: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                unit_email: email,
                unit_password: password,
            })
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !content_type.contains("application/json") {
            warn!("Non-JSON login response, status {}", status);
            return Err(ApiError::Parse(format!(
                "unexpected non-JSON response (status {})",
                status
            )));
        }

        let data: LoginBody =
            serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))?;

        if !status.is_success() {
            let message = data
                .error
                .or(data.message)
                .unwrap_or_else(|| "Login failed".into());
            return Err(ApiError::Server(message));
        }

        match data.token {
            Some(token) => {
                info!("Courier login succeeded");
                Ok(token)
            }
            None => Err(ApiError::Server("server did not return a token".into())),
        }
    }

    /// Fetch one order by id with the courier's bearer token.
    pub async fn fetch_order(&self, access_token: &str, order_id: i64) -> Result<Value, ApiError> {
        let url = format!("{}/api/mobile-orders/{}", self.base_url, order_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let data: OrderBody = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        if !data.ok {
            return Err(ApiError::Server(
                data.error.unwrap_or_else(|| "Failed to load order".into()),
            ));
        }

        data.item
            .ok_or_else(|| ApiError::Parse("order response carried no item".into()))
    }
}

// Request/Response types

#[derive(Serialize)]
struct LoginRequest<'a> {
    unit_email: &'a str,
    unit_password: &'a str,
}

#[derive(Deserialize)]
struct LoginBody {
    token: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct OrderBody {
    ok: bool,
    item: Option<Value>,
    error: Option<String>,
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves exactly one canned HTTP response, returning the base URL and
    /// a handle resolving to the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = vec![0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "{}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    /// Headers fully received, plus the declared body when one is coming.
    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text
            .lines()
            .find_map(|line| line.to_lowercase().strip_prefix("content-length:").map(str::to_owned))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn login_returns_the_token() {
        let (base, request) = one_shot_server(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"token":"abc.def.ghi"}"#,
        )
        .await;

        let token = ApiClient::new(&base)
            .courier_login("c@example.com", "pw")
            .await
            .unwrap();
        assert_eq!(token, "abc.def.ghi");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/auth/courierlogin"));
        assert!(raw.contains(r#""unit_email":"c@example.com""#));
        assert!(raw.contains(r#""unit_password":"pw""#));
    }

    #[tokio::test]
    async fn login_rejection_surfaces_the_server_message() {
        let (base, _request) = one_shot_server(
            "HTTP/1.1 401 Unauthorized",
            "application/json",
            r#"{"error":"bad credentials"}"#,
        )
        .await;

        let err = ApiClient::new(&base)
            .courier_login("c@example.com", "pw")
            .await
            .unwrap_err();
        match err {
            ApiError::Server(message) => assert_eq!(message, "bad credentials"),
            other => panic!("expected server error, got {}", other),
        }
    }

    #[tokio::test]
    async fn non_json_login_body_is_a_transport_shape_failure() {
        let (base, _request) = one_shot_server(
            "HTTP/1.1 502 Bad Gateway",
            "text/html",
            "<html>upstream down</html>",
        )
        .await;

        let err = ApiClient::new(&base)
            .courier_login("c@example.com", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)), "got {}", err);
    }

    #[tokio::test]
    async fn fetch_order_returns_the_item() {
        let (base, request) = one_shot_server(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"ok":true,"item":{"id":5,"address":"Main St 1"}}"#,
        )
        .await;

        let item = ApiClient::new(&base).fetch_order("tok", 5).await.unwrap();
        assert_eq!(item["id"], 5);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("GET /api/mobile-orders/5"));
        assert!(raw.to_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn fetch_order_rejection_surfaces_the_error() {
        let (base, _request) = one_shot_server(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"ok":false,"error":"order not found"}"#,
        )
        .await;

        let err = ApiClient::new(&base).fetch_order("tok", 9).await.unwrap_err();
        match err {
            ApiError::Server(message) => assert_eq!(message, "order not found"),
            other => panic!("expected server error, got {}", other),
        }
    }
}
