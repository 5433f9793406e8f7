//! Middleware configuration and its resolution into an immutable, fully defaulted form.

use std::{fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
use http::StatusCode;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{context::RequestContext, field::Field, logger::Logger, Level};

/// Decides something about a request from its [`RequestContext`].
pub type Predicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Produces the payload logged under the `resBody` key.
pub type BodyGetter = Arc<dyn Fn(&RequestContext) -> Bytes + Send + Sync>;

/// Builds the logger used for a single request.
pub type LoggerFactory = Arc<dyn Fn(&RequestContext) -> Arc<dyn Logger> + Send + Sync>;

/// Messages used when none are configured, by [`Tier`].
pub const DEFAULT_MESSAGES: [&str; 3] = ["Server error", "Client error", "Success"];

/// Levels used when none are configured, by [`Tier`].
pub const DEFAULT_LEVELS: [Level; 3] = [Level::ERROR, Level::WARN, Level::INFO];

/// Maximum number of payload bytes captured for logging, when none is configured.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// User-supplied configuration of the request logging middleware.
///
/// Every option is optional; [`Config::resolve`] fills in the defaults.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use request_log::{Config, Field, JsonLogger, Level};
///
/// let config = Config::new()
///     .skip_uri("/health")
///     .skip(|ctx| ctx.method() == http::Method::OPTIONS)
///     .fields([Field::Method, Field::Path, Field::Status, Field::Latency])
///     .levels([Level::ERROR, Level::INFO])
///     .resolve(Arc::new(JsonLogger::stderr()));
///
/// assert_eq!(config.fields().len(), 4);
/// ```
#[derive(Clone, Default)]
pub struct Config {
    /// Skips logging of a request entirely when it returns `true`.
    pub skip: Option<Predicate>,

    /// Omits the `body` field when it returns `true`.
    pub skip_body: Option<Predicate>,

    /// Omits the `resBody` field when it returns `true`.
    pub skip_response_body: Option<Predicate>,

    /// Replaces the raw response payload logged under `resBody`, e.g. to log a readable form of
    /// a compressed response.
    pub response_body: Option<BodyGetter>,

    /// Request paths that are never logged.
    pub skip_uris: Vec<String>,

    /// Logger shared by all requests.
    pub logger: Option<Arc<dyn Logger>>,

    /// Builds a logger for every request. Takes precedence over [`Config::logger`].
    pub logger_factory: Option<LoggerFactory>,

    /// Fields to log, in order.
    pub fields: Option<Vec<Field>>,

    /// Messages for server errors, client errors and everything else, in that order.
    pub messages: Option<Vec<String>>,

    /// Levels for server errors, client errors and everything else, in that order.
    pub levels: Option<Vec<Level>>,

    /// Maximum number of payload bytes captured for the `body` and `resBody` fields.
    ///
    /// Longer payloads still reach their destination whole; only the logged copy is cut.
    pub body_limit: Option<usize>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the predicate skipping logging of a request.
    pub fn skip(mut self, skip: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Sets the predicate omitting the `body` field.
    pub fn skip_body(
        mut self,
        skip: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_body = Some(Arc::new(skip));
        self
    }

    /// Sets the predicate omitting the `resBody` field.
    pub fn skip_response_body(
        mut self,
        skip: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_response_body = Some(Arc::new(skip));
        self
    }

    /// Sets the function producing the payload logged under `resBody`.
    pub fn response_body(
        mut self,
        getter: impl Fn(&RequestContext) -> Bytes + Send + Sync + 'static,
    ) -> Self {
        self.response_body = Some(Arc::new(getter));
        self
    }

    /// Adds a request path that is never logged.
    pub fn skip_uri(mut self, uri: impl Into<String>) -> Self {
        self.skip_uris.push(uri.into());
        self
    }

    /// Sets the logger shared by all requests.
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Sets the function building a logger for every request.
    pub fn logger_factory(
        mut self,
        factory: impl Fn(&RequestContext) -> Arc<dyn Logger> + Send + Sync + 'static,
    ) -> Self {
        self.logger_factory = Some(Arc::new(factory));
        self
    }

    /// Sets the fields to log, in order.
    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields = Some(fields.into_iter().collect());
        self
    }

    /// Sets the per-tier messages.
    pub fn messages<S: Into<String>>(mut self, messages: impl IntoIterator<Item = S>) -> Self {
        self.messages = Some(messages.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the per-tier levels.
    pub fn levels(mut self, levels: impl IntoIterator<Item = Level>) -> Self {
        self.levels = Some(levels.into_iter().collect());
        self
    }

    /// Sets the maximum number of payload bytes captured for logging.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    /// Fills in the defaults, using `default_logger` if neither a logger nor a logger factory
    /// is configured.
    ///
    /// Empty message or level lists are treated as absent. Lists shorter than three entries
    /// reuse their last entry for the remaining tiers.
    pub fn resolve(self, default_logger: Arc<dyn Logger>) -> ResolvedConfig {
        let has_logger_factory = self.logger_factory.is_some();
        let logger = match (self.logger_factory, self.logger) {
            (Some(factory), _) => LoggerSource::PerRequest(factory),
            (None, Some(logger)) => LoggerSource::Shared(logger),
            (None, None) => LoggerSource::Shared(default_logger),
        };

        let fields = self.fields.unwrap_or_else(|| Field::DEFAULT.to_vec());
        let needs_request_body = fields.iter().any(|field| field.needs_request_body());
        let needs_response_body = fields.iter().any(|field| field.needs_response_body());
        let needs_headers = fields.iter().any(|field| field.needs_headers())
            || self.skip.is_some()
            || self.skip_body.is_some()
            || self.skip_response_body.is_some()
            || self.response_body.is_some()
            || has_logger_factory;

        ResolvedConfig {
            skip: self.skip,
            skip_body: self.skip_body,
            skip_response_body: self.skip_response_body,
            response_body: self.response_body,
            skip_uris: self.skip_uris.into_iter().collect(),
            logger,
            fields,
            messages: Tiered::from_list(self.messages, || {
                Tiered::from(DEFAULT_MESSAGES.map(String::from))
            }),
            levels: Tiered::from_list(self.levels, || Tiered::from(DEFAULT_LEVELS)),
            body_limit: self.body_limit.unwrap_or(DEFAULT_BODY_LIMIT),
            needs_request_body,
            needs_response_body,
            needs_headers,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("skip", &self.skip.is_some())
            .field("skip_body", &self.skip_body.is_some())
            .field("skip_response_body", &self.skip_response_body.is_some())
            .field("response_body", &self.response_body.is_some())
            .field("skip_uris", &self.skip_uris)
            .field("logger", &self.logger)
            .field("logger_factory", &self.logger_factory.is_some())
            .field("fields", &self.fields)
            .field("messages", &self.messages)
            .field("levels", &self.levels)
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

/// Severity tier of a response, derived from its status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Status 500 and above.
    ServerError,

    /// Status 400 to 499.
    ClientError,

    /// Every other status.
    Success,
}

impl Tier {
    /// Classifies a response status.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            500.. => Self::ServerError,
            400..=499 => Self::ClientError,
            _ => Self::Success,
        }
    }
}

/// One value per [`Tier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tiered<T> {
    server_error: T,
    client_error: T,
    success: T,
}

impl<T: Clone> Tiered<T> {
    /// Spreads a list of up to three values over the tiers, reusing the last value for tiers the
    /// list does not cover. Falls back to `default` if the list is absent or empty.
    fn from_list(list: Option<Vec<T>>, default: impl FnOnce() -> Self) -> Self {
        let list = list.unwrap_or_default();
        let Some(last) = list.last() else {
            return default();
        };
        let at = |index: usize| list.get(index).unwrap_or(last).clone();

        Self {
            server_error: at(0),
            client_error: at(1),
            success: at(2),
        }
    }
}

impl<T> Tiered<T> {
    /// The value of `tier`.
    pub fn get(&self, tier: Tier) -> &T {
        match tier {
            Tier::ServerError => &self.server_error,
            Tier::ClientError => &self.client_error,
            Tier::Success => &self.success,
        }
    }
}

impl<T> From<[T; 3]> for Tiered<T> {
    fn from([server_error, client_error, success]: [T; 3]) -> Self {
        Self {
            server_error,
            client_error,
            success,
        }
    }
}

#[derive(Clone)]
enum LoggerSource {
    Shared(Arc<dyn Logger>),
    PerRequest(LoggerFactory),
}

/// Immutable configuration the middleware runs with, produced by [`Config::resolve`].
#[derive(Clone)]
pub struct ResolvedConfig {
    skip: Option<Predicate>,
    skip_body: Option<Predicate>,
    skip_response_body: Option<Predicate>,
    response_body: Option<BodyGetter>,
    skip_uris: FxHashSet<String>,
    logger: LoggerSource,
    fields: Vec<Field>,
    messages: Tiered<String>,
    levels: Tiered<Level>,
    body_limit: usize,
    needs_request_body: bool,
    needs_response_body: bool,
    needs_headers: bool,
}

impl ResolvedConfig {
    /// Fields to log, in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Messages by tier.
    pub fn messages(&self) -> &Tiered<String> {
        &self.messages
    }

    /// Levels by tier.
    pub fn levels(&self) -> &Tiered<Level> {
        &self.levels
    }

    /// Maximum number of payload bytes captured for logging.
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Whether logging of this request is skipped altogether.
    pub fn should_skip(&self, context: &RequestContext) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(context))
            || self.skip_uris.contains(context.path())
    }

    /// Whether the `body` field is omitted for this request.
    pub fn should_skip_body(&self, context: &RequestContext) -> bool {
        self.skip_body.as_ref().is_some_and(|skip| skip(context))
    }

    /// Whether the `resBody` field is omitted for this request.
    pub fn should_skip_response_body(&self, context: &RequestContext) -> bool {
        self.skip_response_body
            .as_ref()
            .is_some_and(|skip| skip(context))
    }

    /// The payload logged under `resBody`.
    pub fn response_body_of(&self, context: &RequestContext) -> Bytes {
        match &self.response_body {
            Some(getter) => getter(context),
            None => context.response_body().clone(),
        }
    }

    /// The logger to emit this request's record to.
    pub fn logger_for(&self, context: &RequestContext) -> Arc<dyn Logger> {
        match &self.logger {
            LoggerSource::Shared(logger) => Arc::clone(logger),
            LoggerSource::PerRequest(factory) => factory(context),
        }
    }

    pub(crate) fn needs_request_body(&self) -> bool {
        self.needs_request_body
    }

    pub(crate) fn needs_response_body(&self) -> bool {
        self.needs_response_body
    }

    /// Whether headers have to be copied into the request context.
    pub(crate) fn needs_headers(&self) -> bool {
        self.needs_headers
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("skip_uris", &self.skip_uris)
            .field("fields", &self.fields)
            .field("messages", &self.messages)
            .field("levels", &self.levels)
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

/// Serializable subset of [`Config`], for embedding in an application's configuration file.
///
/// Unknown field tags and unparsable levels are ignored.
///
/// # Example
///
/// ```
/// use request_log::{Config, Settings};
///
/// let settings: Settings = serde_json::from_str(
///     r#"{ "skip_uris": ["/health"], "fields": ["status", "user-agent"], "levels": ["warn"] }"#,
/// )
/// .expect("valid settings");
/// let config = Config::from(settings);
///
/// assert_eq!(config.skip_uris, ["/health"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Request paths that are never logged.
    pub skip_uris: Vec<String>,

    /// Field tags to log, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,

    /// Messages by tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,

    /// Levels by tier (`error`, `warn`, `info`, `debug` or `trace`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<String>>,

    /// Maximum number of payload bytes captured for logging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_limit: Option<usize>,
}

impl From<Settings> for Config {
    fn from(settings: Settings) -> Self {
        let levels = settings.levels.map(|levels| {
            levels
                .iter()
                .zip(DEFAULT_LEVELS)
                .map(|(level, default)| {
                    Level::from_str(level).unwrap_or_else(|error| {
                        tracing::warn!(
                            "Invalid request log level `{level}`, using `{default}` instead: {error}"
                        );
                        default
                    })
                })
                .collect()
        });

        Self {
            skip_uris: settings.skip_uris,
            fields: settings.fields.map(Field::parse_list),
            messages: settings.messages,
            levels,
            body_limit: settings.body_limit,
            ..Self::default()
        }
    }
}
