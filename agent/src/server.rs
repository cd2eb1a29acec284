//! Introspection HTTP endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Liveness banner |
//! | `GET` | `/sensors` | Configs of every running generator |

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use sensorsim_core::RuntimeRegistry;
use sensorsim_env::SimulatorContext;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct Banner {
    service: &'static str,
    status: &'static str,
}

/// Creates the introspection router over a shared registry.
pub fn router<Ctx: SimulatorContext>(registry: Arc<RuntimeRegistry<Ctx>>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/sensors", get(list_sensors::<Ctx>))
        .with_state(registry)
}

/// `GET /`
async fn banner() -> impl IntoResponse {
    Json(Banner {
        service: "sensor-simulator",
        status: "running",
    })
}

/// `GET /sensors` - point-in-time snapshot, sorted by sensor id.
async fn list_sensors<Ctx: SimulatorContext>(
    State(registry): State<Arc<RuntimeRegistry<Ctx>>>,
) -> impl IntoResponse {
    let mut sensors = registry.list();
    sensors.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
    Json(sensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sensorsim_core::{SensorConfig, Sinks};
    use sensorsim_env::{EnvError, Measurement, MeasurementSink, TokioContext};
    use std::time::Duration;
    use tower::ServiceExt;

    struct NullSink;

    #[async_trait]
    impl MeasurementSink for NullSink {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn deliver(&self, _measurement: &Measurement) -> Result<(), EnvError> {
            Ok(())
        }
    }

    fn test_registry() -> Arc<RuntimeRegistry<TokioContext>> {
        RuntimeRegistry::shared(
            TokioContext::shared(),
            Sinks::new(Arc::new(NullSink), Arc::new(NullSink)),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_banner() {
        let (status, body) = get_json(router(test_registry()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "sensor-simulator");
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn test_sensors_empty() {
        let (status, body) = get_json(router(test_registry()), "/sensors").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_sensors_lists_running() {
        let registry = test_registry();
        for id in ["pressure-2", "temp-1"] {
            let config = SensorConfig::new(id, "temperature", Duration::from_millis(250), 1.0, 2.0).unwrap();
            registry.upsert(config).await;
        }
        let disabled = SensorConfig::new("off", "temperature", Duration::from_secs(1), 0.0, 1.0)
            .unwrap()
            .with_enabled(false);
        registry.upsert(disabled).await;

        let (status, body) = get_json(router(Arc::clone(&registry)), "/sensors").await;
        assert_eq!(status, StatusCode::OK);

        let sensors = body.as_array().unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0]["sensorId"], "pressure-2");
        assert_eq!(sensors[1]["sensorId"], "temp-1");
        assert_eq!(sensors[1]["intervalMs"], 250);
        assert_eq!(sensors[1]["enabled"], true);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = router(test_registry()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
