use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::AppError;
use crate::metrics::{self, DashboardSummary};
use crate::model::{AppState, ScrapeResult};

/// How much raw scraper output is echoed back in a parse-error response.
/// The full payload goes to the log instead.
const RAW_SNIPPET_LIMIT: usize = 512;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    /// The scrape result exactly as the scraper produced it.
    pub data: Value,
    pub summary: DashboardSummary,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/scrape", post(scrape_handler))
        .route("/api/dashboard", post(dashboard_handler))
        // The browser UI is served from a different origin, same as the
        // original deployment.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "OK"
}

/// Relay endpoint: credentials in, the scraper's JSON out, verbatim.
async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Value>, AppError> {
    let raw = run_scrape(&state, &credentials).await?;
    Ok(Json(raw))
}

/// Relay plus derivation: the same scrape, with the metrics the dashboard
/// renders precomputed alongside the raw data.
async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<DashboardResponse>, AppError> {
    let raw = run_scrape(&state, &credentials).await?;
    let result: ScrapeResult =
        serde_json::from_value(raw.clone()).map_err(|e| AppError::InvalidJson {
            details: e.to_string(),
        })?;
    let summary = metrics::derive_summary(&result);
    Ok(Json(DashboardResponse { data: raw, summary }))
}

async fn run_scrape(state: &AppState, credentials: &Credentials) -> Result<Value, AppError> {
    let username = credentials.username.trim();
    let password = credentials.password.trim();
    // Validation happens before anything is spawned.
    if username.is_empty() || password.is_empty() {
        return Err(AppError::MissingCredentials);
    }

    let _permit = state
        .scrape_permits
        .try_acquire()
        .map_err(|_| AppError::Busy)?;

    let stdout = state.scraper.scrape(username, password).await?;
    match serde_json::from_str::<Value>(&stdout) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("scraper returned invalid JSON: {e}; raw output follows\n{stdout}");
            Err(AppError::InvalidJson {
                details: snippet(&stdout),
            })
        }
    }
}

fn snippet(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= RAW_SNIPPET_LIMIT {
        return trimmed.to_string();
    }
    let mut end = RAW_SNIPPET_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::Scraper;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    /// Counting double for the subprocess seam: serves a canned response
    /// and records how often it was invoked.
    struct FakeScraper {
        response: Result<String, AppError>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeScraper {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(body.to_string()),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn err(error: AppError) -> Arc<Self> {
            Arc::new(Self {
                response: Err(error),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn slow(body: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(body.to_string()),
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scraper for FakeScraper {
        async fn scrape(&self, _username: &str, _password: &str) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.response {
                Ok(body) => Ok(body.clone()),
                Err(AppError::ScraperFailed { exit_code, details }) => {
                    Err(AppError::ScraperFailed {
                        exit_code: *exit_code,
                        details: details.clone(),
                    })
                }
                Err(AppError::Timeout { secs }) => Err(AppError::Timeout { secs: *secs }),
                Err(_) => Err(AppError::Busy),
            }
        }
    }

    fn router(scraper: Arc<FakeScraper>, permits: usize) -> Router {
        app(Arc::new(AppState {
            scraper,
            scrape_permits: Semaphore::new(permits),
        }))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn missing_password_is_400_and_spawns_nothing() {
        let scraper = FakeScraper::ok("{}");
        let app = router(scraper.clone(), 4);

        let response = app
            .oneshot(post_json("/api/scrape", json!({ "username": "alice" })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Missing credentials" })
        );
        assert_eq!(scraper.calls(), 0);
    }

    #[tokio::test]
    async fn blank_username_is_still_missing() {
        let scraper = FakeScraper::ok("{}");
        let app = router(scraper.clone(), 4);

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "   ", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(scraper.calls(), 0);
    }

    #[tokio::test]
    async fn success_relays_scraper_json_verbatim() {
        // Unknown keys must survive: the relay never goes through the typed
        // model.
        let scraper = FakeScraper::ok(
            r#"{ "profile": { "name": "Kavya" }, "new_portal_field": [1, 2, 3] }"#,
        );
        let app = router(scraper.clone(), 4);

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "alice", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "profile": { "name": "Kavya" }, "new_portal_field": [1, 2, 3] })
        );
        assert_eq!(scraper.calls(), 1);
    }

    #[tokio::test]
    async fn scraper_failure_maps_to_500_with_exit_code() {
        let scraper = FakeScraper::err(AppError::ScraperFailed {
            exit_code: Some(1),
            details: "Login failed".to_string(),
        });
        let app = router(scraper, 4);

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "alice", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Scraper failed", "exitCode": 1, "details": "Login failed" })
        );
    }

    #[tokio::test]
    async fn non_json_output_maps_to_500_with_snippet() {
        let scraper = FakeScraper::ok("Traceback (most recent call last): boom");
        let app = router(scraper, 4);

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "alice", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid JSON returned by scraper");
        assert!(body["details"]
            .as_str()
            .expect("details")
            .contains("Traceback"));
    }

    #[tokio::test]
    async fn timeout_maps_to_504() {
        let scraper = FakeScraper::err(AppError::Timeout { secs: 120 });
        let app = router(scraper, 4);

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "alice", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_with_503() {
        let scraper = FakeScraper::slow("{}", Duration::from_secs(5));
        let app = router(scraper.clone(), 1);

        let first = app.clone();
        let in_flight = tokio::spawn(async move {
            first
                .oneshot(post_json(
                    "/api/scrape",
                    json!({ "username": "alice", "password": "pw" }),
                ))
                .await
        });

        // Give the first request time to take the only permit.
        while scraper.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = app
            .oneshot(post_json(
                "/api/scrape",
                json!({ "username": "bob", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Too many concurrent scrapes" })
        );
        in_flight.abort();
    }

    #[tokio::test]
    async fn dashboard_returns_raw_data_and_derived_summary() {
        let scraper = FakeScraper::ok(
            r#"{
                "profile": { "name": "Kavya", "regno": "RA221100" },
                "courses": [
                    { "course_code": "CS101 Regular", "course_title": "Data Structures",
                      "credits": "4", "faculty": "Dr. A", "slot": "A",
                      "academic_year": "2024-25" }
                ],
                "attendance": [
                    { "course_code": "CS101 Theory", "course_title": "Data Structures",
                      "category": "Theory", "faculty": "Dr. A",
                      "hours_conducted": "20", "hours_absent": "8",
                      "attendance_percent": "60.00" }
                ],
                "marks": [
                    { "course_code": "CS101 Regular",
                      "tests": [ { "label": "FT-I/50", "score": "40" } ] }
                ],
                "total_credits": 4
            }"#,
        );
        let app = router(scraper, 4);

        let response = app
            .oneshot(post_json(
                "/api/dashboard",
                json!({ "username": "alice", "password": "pw" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;

        // Raw data relayed untouched.
        assert_eq!(body["data"]["profile"]["regno"], "RA221100");

        let summary = &body["summary"];
        assert_eq!(summary["overall_attendance"]["conducted"], 20);
        assert_eq!(summary["overall_attendance"]["present"], 12);
        assert_eq!(summary["overall_attendance"]["percent"], 60.0);
        // 60% of 20 conducted: ceil((15 - 12) / 0.25) = 12 classes required.
        assert_eq!(summary["standings"][0]["margin"]["kind"], "required");
        assert_eq!(summary["standings"][0]["margin"]["classes"], 12);
        // Course joins attendance through the normalized code.
        assert_eq!(summary["courses"][0]["attendance_percent"], 60.0);
        assert_eq!(summary["cumulative_marks"]["percent"], 80.0);
        assert_eq!(summary["total_credits"], 4.0);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = router(FakeScraper::ok("{}"), 1);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
