//! [`tower`] middleware emitting one log record per request.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use axum::{body::Body, extract::Request, response::Response};
use http::{HeaderMap, StatusCode};
use tower::{Layer, Service};

use crate::{
    body::{capture_request, PendingRecord, ResponseTap},
    builder::{emit, Outcome},
    config::{Config, ResolvedConfig},
    context::RequestContext,
    logger::{JsonLogger, Logger},
};

/// A [`Layer`] wrapping services with [`RequestLog`].
///
/// # Example
///
/// ```
/// use axum::{routing::get, Router};
/// use request_log::{Config, Field, RequestLogLayer};
///
/// let app: Router = Router::new()
///     .route("/users/:id", get(|| async { "Hello" }))
///     .route("/health", get(|| async { "OK" }))
///     .layer(RequestLogLayer::new(
///         Config::new()
///             .skip_uri("/health")
///             .fields([Field::Method, Field::Route, Field::Status, Field::Latency]),
///     ));
/// ```
#[derive(Clone, Debug)]
pub struct RequestLogLayer {
    config: Arc<ResolvedConfig>,
}

impl RequestLogLayer {
    /// Creates a layer, logging to [`JsonLogger::stderr`] unless `config` names a logger.
    pub fn new(config: Config) -> Self {
        Self::with_default_logger(config, Arc::new(JsonLogger::stderr()))
    }

    /// Creates a layer, logging to `default_logger` unless `config` names a logger.
    pub fn with_default_logger(config: Config, default_logger: Arc<dyn Logger>) -> Self {
        Self::from_resolved(config.resolve(default_logger))
    }

    /// Creates a layer from an already resolved configuration.
    pub fn from_resolved(config: ResolvedConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for RequestLogLayer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Middleware logging every request forwarded to the inner service.
///
/// The result of the inner service is returned unchanged, errors included. Payloads are
/// observed while they stream: the request payload is read ahead up to the body limit and
/// replayed to the inner service, and the record of a request whose response payload is logged
/// is emitted once that payload has been streamed or dropped.
#[derive(Clone, Debug)]
pub struct RequestLog<S> {
    inner: S,
    config: Arc<ResolvedConfig>,
}

/// An error reported by a handler through its response.
///
/// Frameworks such as axum turn handler errors into responses before middleware sees them.
/// Inserting a [`HandlerError`] into the response extensions makes the error available to the
/// `error` field.
///
/// ```
/// use axum::response::{IntoResponse, Response};
/// use http::StatusCode;
/// use request_log::HandlerError;
///
/// fn internal_error(error: std::io::Error) -> Response {
///     let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
///     response.extensions_mut().insert(HandlerError::new(&error));
///     response
/// }
/// ```
#[derive(Clone, Debug)]
pub struct HandlerError(Arc<str>);

impl HandlerError {
    /// Captures the text of `error`.
    pub fn new(error: impl fmt::Display) -> Self {
        Self(Arc::from(error.to_string()))
    }

    /// The text of the error.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> Service<Request> for RequestLog<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let config = Arc::clone(&self.config);

        // The clone may not be ready yet; keep the service that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut context = RequestContext::capture(&request, config.needs_headers());
            if config.should_skip(&context) {
                tracing::debug!(path = context.path(), "Skipping request log");
                return inner.call(request).await;
            }

            let (request, captured) = if config.needs_request_body() {
                let (parts, body) = request.into_parts();
                let (body, captured) = capture_request(body, config.body_limit()).await;
                (Request::from_parts(parts, body), Some(captured))
            } else {
                (request, None)
            };

            let start = Instant::now();
            let result = inner.call(request).await;
            let latency = start.elapsed();

            if let Some(captured) = captured {
                context.set_body(captured.prefix(), captured.received());
            }

            match result {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    let headers = if config.needs_headers() {
                        parts.headers.clone()
                    } else {
                        HeaderMap::new()
                    };
                    context.set_response(parts.status, headers);
                    let handler_error = parts.extensions.get::<HandlerError>().cloned();

                    let body = if config.needs_response_body() {
                        let limit = config.body_limit();
                        let pending = PendingRecord {
                            config,
                            context,
                            latency,
                            handler_error,
                        };
                        Body::new(ResponseTap::new(body, limit, pending))
                    } else {
                        emit(
                            &config,
                            &context,
                            Outcome {
                                latency,
                                error: handler_error.as_ref().map(HandlerError::message),
                            },
                        );
                        body
                    };

                    Ok(Response::from_parts(parts, body))
                }
                Err(error) => {
                    let message = error.to_string();
                    context.set_response(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new());
                    emit(
                        &config,
                        &context,
                        Outcome {
                            latency,
                            error: Some(&message),
                        },
                    );

                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use http_body_util::{Full, Limited};
    use tower::ServiceExt;

    use super::*;
    use crate::{test_utils::CapturingLogger, Field, FieldValue, Level};

    fn layer(config: Config, logger: &Arc<CapturingLogger>) -> RequestLogLayer {
        let logger: Arc<dyn Logger> = logger.clone();
        RequestLogLayer::with_default_logger(config, logger)
    }

    #[test]
    fn handler_error_keeps_the_error_text() {
        let error = HandlerError::new(std::io::Error::other("disk full"));
        assert_eq!(error.message(), "disk full");
        assert_eq!(error.to_string(), "disk full");
    }

    #[tokio::test]
    async fn failing_response_bodies_are_forwarded_and_logged_as_errors() {
        let logger = Arc::new(CapturingLogger::default());
        let config = Config::new().fields([
            Field::Status,
            Field::ResponseBody,
            Field::BytesSent,
            Field::Error,
        ]);
        let service = layer(config, &logger).layer(tower::service_fn(|_: Request| async {
            let body = Limited::new(Full::new(Bytes::from_static(b"payload")), 2);
            Ok::<_, Infallible>(Response::new(Body::new(body)))
        }));

        let response = service
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(logger.entries().is_empty());

        let forwarded = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(forwarded.is_err());

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.get("status"), Some(&FieldValue::Int(200)));
        assert_eq!(
            entries[0].record.get("resBody"),
            Some(&FieldValue::Bytes(Bytes::new()))
        );
        assert_eq!(entries[0].record.get("bytesSent"), Some(&FieldValue::Int(0)));
        assert!(matches!(
            entries[0].record.get("error"),
            Some(FieldValue::Error(text)) if text.contains("length limit exceeded")
        ));
    }

    #[tokio::test]
    async fn records_wait_for_the_response_payload() {
        let logger = Arc::new(CapturingLogger::default());
        let config = Config::new().fields([Field::ResponseBody, Field::BytesSent]);
        let service = layer(config, &logger).layer(tower::service_fn(|_: Request| async {
            Ok::<_, Infallible>(Response::new(Body::from("streamed reply")))
        }));

        let response = service
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert!(logger.entries().is_empty());

        drop(response);

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.get("bytesSent"), Some(&FieldValue::Int(0)));
    }

    #[tokio::test]
    async fn unbuffered_bodies_are_passed_through() {
        let logger = Arc::new(CapturingLogger::default());
        let service = layer(Config::new(), &logger).layer(tower::service_fn(
            |request: Request| async move {
                let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                Ok::<_, Infallible>(Response::new(Body::from(body)))
            },
        ));

        let response = service
            .oneshot(Request::new(Body::from("streamed")))
            .await
            .unwrap();
        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(echoed, "streamed");

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Success");
        assert!(!entries[0].record.contains_key("error"));
    }
}
