use crate::config::UplinkSettings;
use crate::error::{Result, TrackerError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Header that makes the tunnel in front of the server skip its browser interstitial
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

/// One update-location POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkRequest {
    pub url: String,
    pub token: String,
    pub body: String,
}

/// A 2xx answer from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub status: u16,
}

/// Completion of a POST: `Delivered`, or `Transport` / `RemoteRejected`
pub type UplinkOutcome = Result<Delivered>;

/// A POST that is already in flight
pub type PendingPost = JoinHandle<UplinkOutcome>;

/// Outbound delivery of telemetry. `post` must return immediately.
pub trait Uplink: Send + Sync {
    fn post(&self, request: UplinkRequest) -> PendingPost;
}

/// Fire-and-forget HTTP client for update-location POSTs.
///
/// # Error Handling
/// - Network failure (timeout, DNS, refused): `TrackerError::Transport`, logged, fix dropped
/// - Non-2xx: `TrackerError::RemoteRejected` with a truncated body, logged, fix dropped
/// - No retry and no queue in either case
#[derive(Clone)]
pub struct UplinkClient {
    client: reqwest::Client,
    in_flight: Option<Arc<Semaphore>>,
    body_snippet_chars: usize,
}

impl UplinkClient {
    pub fn new(settings: &UplinkSettings) -> Result<Self> {
        // reqwest has no separate read timeout; the total request timeout bounds the response
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .user_agent(concat!("bus-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(UplinkClient {
            client,
            in_flight: settings
                .max_in_flight
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            body_snippet_chars: settings.body_snippet_chars,
        })
    }

    /// Perform one POST and classify the result
    pub async fn send(&self, request: &UplinkRequest) -> UplinkOutcome {
        let response = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(AUTHORIZATION, format!("Token {}", request.token))
            .header(TUNNEL_BYPASS_HEADER, "true")
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TrackerError::Transport(format!("timeout: {}", e))
                } else {
                    TrackerError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(self.body_snippet_chars).collect();

        if status.is_success() {
            log::debug!("POST response: status={}, body={}", status.as_u16(), snippet);
            Ok(Delivered {
                status: status.as_u16(),
            })
        } else {
            Err(TrackerError::RemoteRejected {
                status: status.as_u16(),
                body: snippet,
            })
        }
    }
}

impl Uplink for UplinkClient {
    fn post(&self, request: UplinkRequest) -> PendingPost {
        let this = self.clone();

        tokio::spawn(async move {
            // Held until the POST completes
            let _permit = match &this.in_flight {
                Some(limit) => limit.clone().acquire_owned().await.ok(),
                None => None,
            };

            let outcome = this.send(&request).await;
            match &outcome {
                Ok(delivered) => log::info!("POST {} delivered ({})", request.url, delivered.status),
                Err(TrackerError::RemoteRejected { status, body }) => {
                    log::warn!("POST unsuccessful: {} {} body={}", request.url, status, body)
                }
                Err(e) => log::error!("POST failed: {} {}", request.url, e),
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(i64, HeaderMap, String)>>>,
    }

    async fn update_location(
        State(captured): State<Captured>,
        Path(bus_id): Path<i64>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        captured.requests.lock().unwrap().push((bus_id, headers, body));
        StatusCode::OK
    }

    async fn failing() -> (StatusCode, String) {
        (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(500))
    }

    async fn start_server() -> (SocketAddr, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/api/buses/:bus_id/update-location/", post(update_location))
            .route("/fail", post(failing))
            .with_state(captured.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, captured)
    }

    fn request(url: String) -> UplinkRequest {
        UplinkRequest {
            url,
            token: "tok123".to_string(),
            body: r#"{"latitude":30.0,"longitude":31.0,"speed":0.0,"timestamp":1}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn test_post_sends_wire_headers_and_body() {
        let (addr, captured) = start_server().await;
        let client = UplinkClient::new(&UplinkSettings::default()).unwrap();

        let url = format!("http://{}/api/buses/42/update-location/", addr);
        let outcome = client.post(request(url)).await.unwrap();
        assert_eq!(outcome, Ok(Delivered { status: 200 }));

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (bus_id, headers, body) = &requests[0];
        assert_eq!(*bus_id, 42);
        assert_eq!(headers["authorization"], "Token tok123");
        assert_eq!(headers["content-type"], JSON_CONTENT_TYPE);
        assert_eq!(headers[TUNNEL_BYPASS_HEADER], "true");
        assert!(body.starts_with(r#"{"latitude":30.0"#));
    }

    #[tokio::test]
    async fn test_non_2xx_is_remote_rejected_with_snippet() {
        let (addr, _) = start_server().await;
        let client = UplinkClient::new(&UplinkSettings::default()).unwrap();

        let outcome = client.send(&request(format!("http://{}/fail", addr))).await;
        match outcome {
            Err(TrackerError::RemoteRejected { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), 200);
            }
            other => panic!("expected RemoteRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UplinkClient::new(&UplinkSettings {
            connect_timeout: Duration::from_secs(2),
            ..UplinkSettings::default()
        })
        .unwrap();

        let outcome = client
            .send(&request(format!("http://{}/api/buses/1/update-location/", addr)))
            .await;
        assert!(matches!(outcome, Err(TrackerError::Transport(_))));
    }

    #[tokio::test]
    async fn test_bounded_in_flight_still_delivers_all() {
        let (addr, captured) = start_server().await;
        let client = UplinkClient::new(&UplinkSettings {
            max_in_flight: Some(1),
            ..UplinkSettings::default()
        })
        .unwrap();

        let url = format!("http://{}/api/buses/5/update-location/", addr);
        let pending: Vec<PendingPost> = (0..4).map(|_| client.post(request(url.clone()))).collect();
        for p in pending {
            assert!(p.await.unwrap().is_ok());
        }
        assert_eq!(captured.requests.lock().unwrap().len(), 4);
    }
}
