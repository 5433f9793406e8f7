//! Read-only view of a request/response cycle, handed to field extraction and to user callbacks.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, MatchedPath, OriginalUri};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, Method, Request, StatusCode, Uri, Version};

/// Response half of a [`RequestContext`], available once the downstream service has answered.
#[derive(Clone, Debug)]
struct ResponseView {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    bytes_sent: u64,
}

/// Snapshot of the request and, after the downstream service completed, of its response.
///
/// Accessors never fail: values that are not available (no matched route, missing header,
/// response not produced yet) are reported as empty strings, empty payloads or defaults.
#[derive(Clone, Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    route: Option<String>,
    remote_addr: Option<SocketAddr>,
    body: Bytes,
    bytes_received: u64,
    response: Option<ResponseView>,
}

impl RequestContext {
    /// Captures the request line, headers and routing information of `request`.
    ///
    /// The payload is not captured; the middleware attaches it separately when a configured
    /// field needs it.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::capture(request, true)
    }

    /// Like [`RequestContext::from_request`], leaving the headers out unless `with_headers` is
    /// set.
    pub(crate) fn capture<B>(request: &Request<B>, with_headers: bool) -> Self {
        let extensions = request.extensions();
        let uri = extensions
            .get::<OriginalUri>()
            .map_or_else(|| request.uri().clone(), |original| original.0.clone());

        Self {
            method: request.method().clone(),
            uri,
            version: request.version(),
            headers: if with_headers {
                request.headers().clone()
            } else {
                HeaderMap::new()
            },
            route: extensions
                .get::<MatchedPath>()
                .map(|matched| matched.as_str().to_owned()),
            remote_addr: extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|connect_info| connect_info.0),
            body: Bytes::new(),
            bytes_received: 0,
            response: None,
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes, bytes_received: u64) {
        self.body = body;
        self.bytes_received = bytes_received;
    }

    pub(crate) fn set_response(&mut self, status: StatusCode, headers: HeaderMap) {
        self.response = Some(ResponseView {
            status,
            headers,
            body: Bytes::new(),
            bytes_sent: 0,
        });
    }

    /// Has no effect until a response is recorded.
    pub(crate) fn set_response_body(&mut self, body: Bytes, bytes_sent: u64) {
        if let Some(response) = &mut self.response {
            response.body = body;
            response.bytes_sent = bytes_sent;
        }
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path, taken from the URI the server originally received.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request path and query, as originally received.
    pub fn original_url(&self) -> &str {
        self.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// Raw query string, empty if the request had none.
    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// Route pattern the request matched, empty if no route matched.
    pub fn route(&self) -> &str {
        self.route.as_deref().unwrap_or_default()
    }

    /// Value of the `Host` header, falling back to the authority of the request URI.
    pub fn hostname(&self) -> &str {
        match self.header(&header::HOST) {
            "" => self.uri.authority().map_or("", |authority| authority.as_str()),
            host => host,
        }
    }

    /// Request scheme, `http` unless the request URI carries one.
    pub fn protocol(&self) -> &str {
        self.uri.scheme_str().unwrap_or("http")
    }

    /// HTTP version of the request.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Remote IP address of the client, empty if the connection info is not available.
    pub fn ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Remote port of the client, empty if the connection info is not available.
    pub fn port(&self) -> String {
        self.remote_addr
            .map(|addr| addr.port().to_string())
            .unwrap_or_default()
    }

    /// Value of a request header, empty if absent or not valid visible ASCII.
    pub fn header(&self, name: &HeaderName) -> &str {
        header_str(&self.headers, name)
    }

    /// All request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Captured request payload, empty unless captured and cut at the body limit.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Length of the request payload read by the downstream service, zero unless captured.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Response status code.
    ///
    /// Reports `200 OK` until a response has been produced.
    pub fn status(&self) -> StatusCode {
        self.response
            .as_ref()
            .map_or(StatusCode::OK, |response| response.status)
    }

    /// Value of a response header, empty if absent or if no response has been produced.
    pub fn response_header(&self, name: &HeaderName) -> &str {
        self.response
            .as_ref()
            .map_or("", |response| header_str(&response.headers, name))
    }

    /// Length of the response payload streamed to the client, zero unless captured.
    pub fn bytes_sent(&self) -> u64 {
        self.response
            .as_ref()
            .map_or(0, |response| response.bytes_sent)
    }

    /// Captured response payload, empty unless captured and cut at the body limit.
    pub fn response_body(&self) -> &Bytes {
        static EMPTY: Bytes = Bytes::from_static(b"");

        self.response
            .as_ref()
            .map_or(&EMPTY, |response| &response.body)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_request_line_and_connection_info() {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/users/42?verbose=true&page=2")
            .header(header::HOST, "api.example.com:8080")
            .header(header::USER_AGENT, "curl/8.5.0")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 51234))));

        let context = RequestContext::from_request(&request);

        assert_eq!(context.method(), Method::POST);
        assert_eq!(context.path(), "/users/42");
        assert_eq!(context.original_url(), "/users/42?verbose=true&page=2");
        assert_eq!(context.query_string(), "verbose=true&page=2");
        assert_eq!(context.hostname(), "api.example.com:8080");
        assert_eq!(context.protocol(), "http");
        assert_eq!(context.header(&header::USER_AGENT), "curl/8.5.0");
        assert_eq!(context.ip(), "10.0.0.7");
        assert_eq!(context.port(), "51234");
    }

    #[test]
    fn missing_values_degrade_to_defaults() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let context = RequestContext::from_request(&request);

        assert_eq!(context.route(), "");
        assert_eq!(context.ip(), "");
        assert_eq!(context.port(), "");
        assert_eq!(context.header(&header::REFERER), "");
        assert_eq!(context.status(), StatusCode::OK);
        assert_eq!(context.response_header(&HeaderName::from_static("x-request-id")), "");
        assert!(context.response_body().is_empty());
    }

    #[test]
    fn headers_are_only_copied_on_demand() {
        let request = Request::builder()
            .uri("/orders")
            .header(header::USER_AGENT, "curl/8.5.0")
            .body(())
            .unwrap();

        let context = RequestContext::capture(&request, false);
        assert!(context.headers().is_empty());
        assert_eq!(context.path(), "/orders");

        let context = RequestContext::capture(&request, true);
        assert_eq!(context.headers().len(), 1);
    }

    #[test]
    fn response_payload_requires_a_response() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let mut context = RequestContext::from_request(&request);

        context.set_response_body(Bytes::from_static(b"early"), 5);
        assert_eq!(context.bytes_sent(), 0);

        context.set_response(StatusCode::CREATED, HeaderMap::new());
        context.set_response_body(Bytes::from_static(b"late"), 4);
        assert_eq!(context.status(), StatusCode::CREATED);
        assert_eq!(context.response_body(), "late");
        assert_eq!(context.bytes_sent(), 4);
    }

    #[test]
    fn prefers_the_original_uri_over_a_nested_one() {
        let mut request = Request::builder().uri("/42").body(()).unwrap();
        request
            .extensions_mut()
            .insert(OriginalUri("/api/users/42".parse().unwrap()));

        let context = RequestContext::from_request(&request);
        assert_eq!(context.path(), "/api/users/42");
    }
}
