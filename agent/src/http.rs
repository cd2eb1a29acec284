//! HTTP collaborators: the catalog listing and the archive sink.

use async_trait::async_trait;
use reqwest::{Client, Response};
use sensorsim_env::{CatalogSource, EnvError, Measurement, MeasurementSink, SensorDefinition, SensorListResponse};
use std::time::Duration;

/// Request timeout for archive deliveries.
pub const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request timeout for the catalog listing, body included.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the shared client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn request_error(err: reqwest::Error, timeout: Duration) -> EnvError {
    if err.is_timeout() {
        EnvError::Timeout(timeout.as_millis() as u64)
    } else if err.is_decode() {
        EnvError::decode(err)
    } else {
        EnvError::transport(err)
    }
}

/// Turns a non-2xx response into `EnvError::Status`.
async fn check_status(resp: Response) -> Result<Response, EnvError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let code = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(EnvError::Status { code, body })
}

/// Reads the simulated-sensor listing from the catalog service.
pub struct HttpCatalog {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpCatalog {
    pub fn new(client: Client, base_url: &str, page_size: u32, timeout: Duration) -> Self {
        Self {
            client,
            url: listing_url(base_url, page_size),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Only the first page is requested.
fn listing_url(base_url: &str, page_size: u32) -> String {
    format!(
        "{}/sensors?simulate=true&page=1&pageSize={}",
        base_url.trim_end_matches('/'),
        page_size
    )
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn list_simulated(&self) -> Result<Vec<SensorDefinition>, EnvError> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        let resp = check_status(resp).await?;
        let listing: SensorListResponse = resp.json().await.map_err(|e| request_error(e, self.timeout))?;
        Ok(listing.items)
    }
}

/// Posts measurements to the archive service.
pub struct HttpArchiveSink {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpArchiveSink {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: format!("{}/measurements", base_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait]
impl MeasurementSink for HttpArchiveSink {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn deliver(&self, measurement: &Measurement) -> Result<(), EnvError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(measurement)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    /// Serves `app` on an ephemeral port and returns its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn listing() -> serde_json::Value {
        serde_json::json!({
            "items": [{
                "id": "6f1c2d9e-8a2b-4c55-9f0e-0a4b8e0c1d11",
                "sensorId": "temp-1",
                "sensorType": "temperature",
                "unit": "C",
                "operatingMin": -10.0,
                "operatingMax": 40.0,
                "warningMin": 0.0,
                "warningMax": 30.0,
                "intervalMs": 1000,
                "enabled": true,
                "simulate": true,
                "updatedAt": "2024-05-01T12:00:00+00:00"
            }],
            "page": 1,
            "pageSize": 500,
            "total": 1
        })
    }

    #[test]
    fn test_listing_url() {
        assert_eq!(
            listing_url("http://catalog:8080/", 500),
            "http://catalog:8080/sensors?simulate=true&page=1&pageSize=500"
        );
    }

    #[tokio::test]
    async fn test_catalog_decodes_listing() {
        let base = serve(Router::new().route("/sensors", get(|| async { Json(listing()) }))).await;
        let catalog = HttpCatalog::new(Client::new(), &base, 500, CATALOG_TIMEOUT);

        let defs = catalog.list_simulated().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].sensor_id, "temp-1");
        assert_eq!(defs[0].interval_ms, 1000);
    }

    #[tokio::test]
    async fn test_catalog_non_success_is_status_error() {
        let app = Router::new().route(
            "/sensors",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let base = serve(app).await;
        let catalog = HttpCatalog::new(Client::new(), &base, 500, CATALOG_TIMEOUT);

        match catalog.list_simulated().await {
            Err(EnvError::Status { code, body }) => {
                assert_eq!(code, 503);
                assert_eq!(body, "warming up");
            }
            other => panic!("expected status error, got {:?}", other.map(|d| d.len())),
        }
    }

    #[tokio::test]
    async fn test_catalog_unreachable_is_transport_error() {
        let catalog = HttpCatalog::new(Client::new(), "http://127.0.0.1:1", 500, CATALOG_TIMEOUT);
        assert!(matches!(catalog.list_simulated().await, Err(EnvError::Transport(_))));
    }

    /// Accepts connections and never writes a byte back.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_catalog_silent_server_times_out() {
        let base = silent_server().await;
        let catalog = HttpCatalog::new(Client::new(), &base, 500, Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), catalog.list_simulated())
            .await
            .expect("listing must give up on its own");
        assert!(matches!(result, Err(EnvError::Timeout(200))));
    }

    #[tokio::test]
    async fn test_catalog_slow_response_times_out() {
        let app = Router::new().route(
            "/sensors",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(listing())
            }),
        );
        let base = serve(app).await;
        let catalog = HttpCatalog::new(Client::new(), &base, 500, Duration::from_millis(100));

        assert!(matches!(catalog.list_simulated().await, Err(EnvError::Timeout(100))));
    }

    #[tokio::test]
    async fn test_archive_posts_measurement() {
        type Received = Arc<Mutex<Vec<serde_json::Value>>>;
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/measurements",
                post(|State(rx): State<Received>, Json(body): Json<serde_json::Value>| async move {
                    rx.lock().unwrap().push(body);
                    StatusCode::CREATED
                }),
            )
            .with_state(received.clone());
        let base = serve(app).await;
        let sink = HttpArchiveSink::new(Client::new(), &base, ARCHIVE_TIMEOUT);

        sink.deliver(&Measurement::new("temp-1", Utc::now(), 21.5)).await.unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["sensorId"], "temp-1");
        assert_eq!(bodies[0]["value"], 21.5);
    }

    #[tokio::test]
    async fn test_archive_rejection_is_error() {
        let app = Router::new().route("/measurements", post(|| async { StatusCode::BAD_REQUEST }));
        let base = serve(app).await;
        let sink = HttpArchiveSink::new(Client::new(), &base, ARCHIVE_TIMEOUT);

        let result = sink.deliver(&Measurement::new("temp-1", Utc::now(), 1.0)).await;
        assert!(matches!(result, Err(EnvError::Status { code: 400, .. })));
    }

    #[tokio::test]
    async fn test_archive_timeout() {
        let app = Router::new().route(
            "/measurements",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let base = serve(app).await;
        let sink = HttpArchiveSink::new(Client::new(), &base, Duration::from_millis(100));

        let result = sink.deliver(&Measurement::new("temp-1", Utc::now(), 1.0)).await;
        assert!(matches!(result, Err(EnvError::Timeout(100))));
    }
}
