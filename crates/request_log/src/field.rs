//! Field tags selecting which values end up in a request log record.

use std::{fmt, str::FromStr};

/// A value that can be extracted from a request/response cycle and attached to a log record.
///
/// The canonical tag of each variant (see [`Field::key`]) is also the key the value is logged
/// under, except for [`Field::RequestHeaders`] which expands into one key per request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    /// `Referer` request header.
    Referer,

    /// Request scheme, `http` unless the request URI carries another one.
    Protocol,

    /// Identifier of the current process.
    Pid,

    /// Remote port of the client connection.
    Port,

    /// Remote IP address of the client connection.
    Ip,

    /// `X-Forwarded-For` request header.
    Ips,

    /// Host the request was addressed to.
    Host,

    /// Request path.
    Path,

    /// Original request target, path and query.
    Url,

    /// `User-Agent` request header.
    UserAgent,

    /// Time spent in the downstream service.
    Latency,

    /// Response status code.
    Status,

    /// Response payload.
    ResponseBody,

    /// Raw query string.
    QueryParams,

    /// Request payload.
    Body,

    /// Length of the request payload in bytes.
    BytesReceived,

    /// Length of the response payload in bytes.
    BytesSent,

    /// Route pattern the request was matched against.
    Route,

    /// Request method.
    Method,

    /// `X-Request-Id` response header.
    RequestId,

    /// Error returned by the downstream service, if any.
    Error,

    /// Every request header, each logged under its own name.
    RequestHeaders,
}

impl Field {
    /// All fields, in declaration order.
    pub const ALL: [Self; 22] = [
        Self::Referer,
        Self::Protocol,
        Self::Pid,
        Self::Port,
        Self::Ip,
        Self::Ips,
        Self::Host,
        Self::Path,
        Self::Url,
        Self::UserAgent,
        Self::Latency,
        Self::Status,
        Self::ResponseBody,
        Self::QueryParams,
        Self::Body,
        Self::BytesReceived,
        Self::BytesSent,
        Self::Route,
        Self::Method,
        Self::RequestId,
        Self::Error,
        Self::RequestHeaders,
    ];

    /// Fields logged when none are configured.
    pub const DEFAULT: [Self; 5] = [
        Self::Latency,
        Self::Status,
        Self::Method,
        Self::Url,
        Self::Error,
    ];

    /// The canonical tag of the field, used as its key in log records.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Referer => "referer",
            Self::Protocol => "protocol",
            Self::Pid => "pid",
            Self::Port => "port",
            Self::Ip => "ip",
            Self::Ips => "ips",
            Self::Host => "host",
            Self::Path => "path",
            Self::Url => "url",
            Self::UserAgent => "ua",
            Self::Latency => "latency",
            Self::Status => "status",
            Self::ResponseBody => "resBody",
            Self::QueryParams => "queryParams",
            Self::Body => "body",
            Self::BytesReceived => "bytesReceived",
            Self::BytesSent => "bytesSent",
            Self::Route => "route",
            Self::Method => "method",
            Self::RequestId => "requestId",
            Self::Error => "error",
            Self::RequestHeaders => "reqHeaders",
        }
    }

    /// Whether the request payload has to be captured to extract this field.
    pub(crate) const fn needs_request_body(self) -> bool {
        matches!(self, Self::Body | Self::BytesReceived)
    }

    /// Whether the response payload has to be observed to extract this field.
    pub(crate) const fn needs_response_body(self) -> bool {
        matches!(self, Self::ResponseBody | Self::BytesSent)
    }

    /// Whether request or response headers are read to extract this field.
    pub(crate) const fn needs_headers(self) -> bool {
        matches!(
            self,
            Self::Referer
                | Self::Ips
                | Self::Host
                | Self::UserAgent
                | Self::RequestId
                | Self::RequestHeaders
        )
    }

    /// Parses a list of tags, dropping the ones that are not recognized.
    ///
    /// ```
    /// use request_log::Field;
    ///
    /// let fields = Field::parse_list(["status", "user-agent", "nonsense", "latency"]);
    /// assert_eq!(fields, vec![Field::Status, Field::UserAgent, Field::Latency]);
    /// ```
    pub fn parse_list<I, S>(tags: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter()
            .filter_map(|tag| match tag.as_ref().parse() {
                Ok(field) => Some(field),
                Err(error) => {
                    tracing::debug!("Ignoring request log field: {error}");
                    None
                }
            })
            .collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error returned when a string does not name a known [`Field`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown field tag `{0}`")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "referer" => Self::Referer,
            "protocol" => Self::Protocol,
            "pid" => Self::Pid,
            "port" => Self::Port,
            "ip" => Self::Ip,
            "ips" => Self::Ips,
            "host" => Self::Host,
            "path" => Self::Path,
            "url" => Self::Url,
            "ua" | "user-agent" => Self::UserAgent,
            "latency" => Self::Latency,
            "status" => Self::Status,
            "resBody" | "response-body" => Self::ResponseBody,
            "queryParams" | "query-params" => Self::QueryParams,
            "body" => Self::Body,
            "bytesReceived" | "bytes-received" => Self::BytesReceived,
            "bytesSent" | "bytes-sent" => Self::BytesSent,
            "route" => Self::Route,
            "method" => Self::Method,
            "requestId" | "request-id" => Self::RequestId,
            "error" => Self::Error,
            "reqHeaders" | "request-headers" => Self::RequestHeaders,
            _ => return Err(UnknownField(s.to_owned())),
        };
        Ok(field)
    }
}
