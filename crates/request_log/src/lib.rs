//! `request_log` provides HTTP request logging middleware for [`tower`] and [`axum`].
//!
//! It emits exactly one structured record per request, after the downstream service completes.
//! It offers:
//! - A [`RequestLogLayer`] wrapping any service with the [`RequestLog`] middleware.
//! - A [`Config`] selecting which [`Field`]s are logged and in which order, which requests are
//!   skipped, and the message and [`Level`] used for every status [`Tier`].
//! - A [`Logger`] abstraction with a [`JsonLogger`] writing one JSON object per line, and a
//!   [`TracingLogger`] forwarding records to the [`tracing`] ecosystem.
//!
//! # Example
//!
//! ```
//! use axum::{routing::get, Router};
//! use request_log::{Config, Field, JsonLogger, Level, RequestLogLayer};
//!
//! let logger = JsonLogger::stderr()
//!     .with_field("service", "orders")
//!     .expect("`service` is not a reserved key");
//!
//! let config = Config::new()
//!     .logger(logger)
//!     .skip_uri("/health")
//!     .fields([
//!         Field::RequestId,
//!         Field::Method,
//!         Field::Route,
//!         Field::Status,
//!         Field::Latency,
//!         Field::Error,
//!     ])
//!     .levels([Level::ERROR, Level::WARN, Level::DEBUG]);
//!
//! let app: Router = Router::new()
//!     .route("/orders/:id", get(|| async { "Order" }))
//!     .layer(RequestLogLayer::new(config));
//! ```

mod body;
mod builder;
mod config;
mod context;
mod field;
mod logger;
mod middleware;
mod record;
#[cfg(test)]
mod test_utils;

pub use self::{
    builder::{build_record, emit, Outcome},
    config::{
        BodyGetter, Config, LoggerFactory, Predicate, ResolvedConfig, Settings, Tier, Tiered,
        DEFAULT_BODY_LIMIT, DEFAULT_LEVELS, DEFAULT_MESSAGES,
    },
    context::RequestContext,
    field::{Field, UnknownField},
    logger::{JsonLogger, Level, Logger, LoggerError, TracingLogger},
    middleware::{HandlerError, RequestLog, RequestLogLayer},
    record::{FieldValue, LogRecord},
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const MESSAGE: &str = "message";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const TIME: &str = "time";
    pub(crate) const HOSTNAME: &str = "hostname";

    pub(crate) static IMPLICIT_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| [MESSAGE, LEVEL, TIME, HOSTNAME].iter().copied().collect());
}
