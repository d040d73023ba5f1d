//! One log line per ingress request, carrying the admission outcome.
//!
//! `POST /` attaches an [`AdmissionOutcome`] to its response. The layer opens
//! an `http_request` span around the handler, so domain logs nest under it,
//! then reports the outcome at a level that follows the status class.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{error, field, info, info_span, warn, Instrument, Level, Span};

/// What the gateway decided for one submitted event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionOutcome {
    pub device_id: Option<String>,
    pub event_type: Option<String>,
    /// `accepted`, `malformed_json`, or the rejecting error's kind
    pub outcome: &'static str,
}

impl AdmissionOutcome {
    pub const ACCEPTED: &'static str = "accepted";
    pub const MALFORMED: &'static str = "malformed_json";
}

#[derive(Clone, Debug)]
pub struct HttpLoggingConfig {
    /// Requests whose path starts with one of these are served without a log line
    pub quiet_paths: Vec<String>,
}

impl Default for HttpLoggingConfig {
    fn default() -> Self {
        Self {
            quiet_paths: vec!["/health".to_string()],
        }
    }
}

impl HttpLoggingConfig {
    fn is_quiet(&self, path: &str) -> bool {
        self.quiet_paths.iter().any(|prefix| path.starts_with(prefix))
    }
}

#[derive(Clone)]
pub struct HttpLoggingLayer {
    config: HttpLoggingConfig,
}

impl HttpLoggingLayer {
    pub fn new(config: HttpLoggingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for HttpLoggingLayer {
    type Service = HttpLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpLoggingService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct HttpLoggingService<S> {
    inner: S,
    config: HttpLoggingConfig,
}

impl<S> Service<Request<Body>> for HttpLoggingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The driven clone is the one poll_ready was called on
        let ready = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, ready);

        let quiet = self.config.is_quiet(req.uri().path());
        let span = info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            device_id = field::Empty,
            event_type = field::Empty,
        );
        let started = Instant::now();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                if let (Ok(response), false) = (&result, quiet) {
                    report(response, started.elapsed().as_millis() as u64);
                }
                result
            }
            .instrument(span),
        )
    }
}

fn report(response: &Response, elapsed_ms: u64) {
    let status = response.status();
    let outcome = response.extensions().get::<AdmissionOutcome>();

    if let Some(outcome) = outcome {
        let span = Span::current();
        if let Some(device_id) = &outcome.device_id {
            span.record("device_id", device_id.as_str());
        }
        if let Some(event_type) = &outcome.event_type {
            span.record("event_type", event_type.as_str());
        }
    }
    let outcome = outcome.map_or("-", |outcome| outcome.outcome);

    match level_for(status) {
        Level::ERROR => error!(status = status.as_u16(), outcome, elapsed_ms, "request failed"),
        Level::WARN => warn!(status = status.as_u16(), outcome, elapsed_ms, "request rejected"),
        _ => info!(status = status.as_u16(), outcome, elapsed_ms, "request served"),
    }
}

/// 5xx is an error on our side, 4xx a rejected device request
fn level_for(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn test_level_follows_status_class() {
        assert_eq!(level_for(StatusCode::OK), Level::INFO);
        assert_eq!(level_for(StatusCode::UNAUTHORIZED), Level::WARN);
        assert_eq!(level_for(StatusCode::CONFLICT), Level::WARN);
        assert_eq!(level_for(StatusCode::SERVICE_UNAVAILABLE), Level::ERROR);
    }

    #[test]
    fn test_health_is_quiet_by_default() {
        let config = HttpLoggingConfig::default();
        assert!(config.is_quiet("/health"));
        assert!(!config.is_quiet("/"));
    }

    #[tokio::test]
    async fn test_layer_passes_outcome_through() {
        let router = Router::new()
            .route(
                "/",
                get(|| async {
                    let mut response = StatusCode::UNAUTHORIZED.into_response();
                    response.extensions_mut().insert(AdmissionOutcome {
                        device_id: Some("1".to_string()),
                        event_type: Some("STARTUP".to_string()),
                        outcome: "unauthenticated",
                    });
                    response
                }),
            )
            .layer(HttpLoggingLayer::new(HttpLoggingConfig::default()));

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .extensions()
                .get::<AdmissionOutcome>()
                .map(|outcome| outcome.outcome),
            Some("unauthenticated")
        );
    }
}
