//! Assembly and emission of the log record of a single request.

use std::{sync::LazyLock, time::Duration};

use bytes::Bytes;
use http::{header, HeaderName};

use crate::{
    config::{ResolvedConfig, Tier},
    context::RequestContext,
    field::Field,
    record::LogRecord,
};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

static PID: LazyLock<u64> = LazyLock::new(|| u64::from(std::process::id()));

/// Outcome of the downstream service, as far as logging is concerned.
#[derive(Clone, Copy, Debug)]
pub struct Outcome<'a> {
    /// Time spent in the downstream service.
    pub latency: Duration,

    /// Text of the error the downstream service failed with, if any.
    pub error: Option<&'a str>,
}

/// Builds the record of a request, visiting the configured fields in order.
///
/// Fields whose value is not available are logged with an empty or zero value; `error` is only
/// present if `outcome` carries one, `body` and `resBody` are omitted when their skip predicate
/// says so, and `reqHeaders` expands into one key per request header.
pub fn build_record(
    config: &ResolvedConfig,
    context: &RequestContext,
    outcome: Outcome<'_>,
) -> LogRecord {
    let mut record = LogRecord::with_capacity(config.fields().len());

    for &field in config.fields() {
        let key = field.key();
        match field {
            Field::Referer => record.str(key, context.header(&header::REFERER)),
            Field::Protocol => record.str(key, context.protocol()),
            Field::Pid => record.int(key, *PID),
            Field::Port => record.str(key, context.port()),
            Field::Ip => record.str(key, context.ip()),
            Field::Ips => record.str(key, context.header(&X_FORWARDED_FOR)),
            Field::Host => record.str(key, context.hostname()),
            Field::Path => record.str(key, context.path()),
            Field::Url => record.str(key, context.original_url()),
            Field::UserAgent => record.str(key, context.header(&header::USER_AGENT)),
            Field::Latency => record.duration(key, outcome.latency),
            Field::Status => record.int(key, u64::from(context.status().as_u16())),
            Field::ResponseBody => {
                if !config.should_skip_response_body(context) {
                    record.bytes(key, config.response_body_of(context));
                }
            }
            Field::QueryParams => record.str(key, context.query_string()),
            Field::Body => {
                if !config.should_skip_body(context) {
                    record.bytes(key, context.body().clone());
                }
            }
            Field::BytesReceived => record.int(key, context.bytes_received()),
            Field::BytesSent => record.int(key, context.bytes_sent()),
            Field::Route => record.str(key, context.route()),
            Field::Method => record.str(key, context.method().as_str()),
            Field::RequestId => record.str(key, context.response_header(&X_REQUEST_ID)),
            Field::Error => {
                if let Some(error) = outcome.error {
                    record.error(key, error);
                }
            }
            Field::RequestHeaders => {
                for (name, value) in context.headers() {
                    record.bytes(
                        name.as_str().to_owned(),
                        Bytes::copy_from_slice(value.as_bytes()),
                    );
                }
            }
        }
    }

    record
}

/// Builds the record of a request and emits it, once, to the logger configured for it.
///
/// The message and level are picked from the tier of the response status.
pub fn emit(config: &ResolvedConfig, context: &RequestContext, outcome: Outcome<'_>) {
    let logger = config.logger_for(context);
    let record = build_record(config, context, outcome);

    let tier = Tier::from_status(context.status());
    logger.log(
        *config.levels().get(tier),
        config.messages().get(tier),
        &record,
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use http::{HeaderMap, Request, StatusCode};
    use proptest::prelude::*;

    use super::*;
    use crate::{record::FieldValue, test_utils::CapturingLogger, Config, Level};

    fn context_with_response(status: u16, response_body: &'static [u8]) -> RequestContext {
        let request = Request::builder()
            .method("POST")
            .uri("/orders?id=7")
            .header(header::USER_AGENT, "curl/8.4.0")
            .header(header::REFERER, "https://example.com/")
            .header("x-tenant", "acme")
            .body(())
            .unwrap();
        let mut context = RequestContext::from_request(&request);
        context.set_body(Bytes::from_static(b"{\"qty\":2}"), 9);

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-123".parse().unwrap());
        context.set_response(StatusCode::from_u16(status).unwrap(), headers);
        context.set_response_body(
            Bytes::from_static(response_body),
            u64::try_from(response_body.len()).unwrap(),
        );
        context
    }

    fn no_error() -> Outcome<'static> {
        Outcome {
            latency: Duration::from_millis(3),
            error: None,
        }
    }

    #[test]
    fn extracts_request_and_response_values() {
        let config = Config::new()
            .fields([
                Field::Method,
                Field::Url,
                Field::Path,
                Field::QueryParams,
                Field::UserAgent,
                Field::Referer,
                Field::Status,
                Field::Body,
                Field::ResponseBody,
                Field::BytesReceived,
                Field::BytesSent,
                Field::RequestId,
                Field::Route,
                Field::Latency,
            ])
            .resolve(Arc::new(CapturingLogger::default()));
        let context = context_with_response(201, b"created");

        let record = build_record(&config, &context, no_error());

        let str_of = |key: &str| match record.get(key) {
            Some(FieldValue::Str(value)) => value.clone(),
            other => panic!("`{key}` is not a string: {other:?}"),
        };
        assert_eq!(str_of("method"), "POST");
        assert_eq!(str_of("url"), "/orders?id=7");
        assert_eq!(str_of("path"), "/orders");
        assert_eq!(str_of("queryParams"), "id=7");
        assert_eq!(str_of("ua"), "curl/8.4.0");
        assert_eq!(str_of("referer"), "https://example.com/");
        assert_eq!(str_of("requestId"), "req-123");
        assert_eq!(str_of("route"), "");
        assert_eq!(record.get("status"), Some(&FieldValue::Int(201)));
        assert_eq!(record.get("bytesReceived"), Some(&FieldValue::Int(9)));
        assert_eq!(record.get("bytesSent"), Some(&FieldValue::Int(7)));
        assert_eq!(
            record.get("resBody"),
            Some(&FieldValue::Bytes(Bytes::from_static(b"created")))
        );
        assert_eq!(
            record.get("latency"),
            Some(&FieldValue::Duration(Duration::from_millis(3)))
        );
    }

    #[test]
    fn pid_is_the_current_process() {
        let config = Config::new()
            .fields([Field::Pid])
            .resolve(Arc::new(CapturingLogger::default()));
        let record = build_record(&config, &context_with_response(200, b""), no_error());

        assert_eq!(
            record.get("pid"),
            Some(&FieldValue::Int(u64::from(std::process::id())))
        );
    }

    #[test]
    fn error_is_only_logged_when_present() {
        let config = Config::new().resolve(Arc::new(CapturingLogger::default()));
        let context = context_with_response(500, b"");

        let without = build_record(&config, &context, no_error());
        assert!(!without.contains_key("error"));

        let with = build_record(
            &config,
            &context,
            Outcome {
                error: Some("database unavailable"),
                ..no_error()
            },
        );
        assert_eq!(
            with.get("error"),
            Some(&FieldValue::Error("database unavailable".to_owned()))
        );
    }

    #[test]
    fn skip_predicates_omit_payload_fields() {
        let config = Config::new()
            .fields([Field::Body, Field::ResponseBody, Field::Status])
            .skip_body(|_| true)
            .skip_response_body(|ctx| ctx.status().is_success())
            .resolve(Arc::new(CapturingLogger::default()));

        let record = build_record(&config, &context_with_response(200, b"ok"), no_error());
        assert_eq!(record.keys().collect::<Vec<_>>(), ["status"]);

        let record = build_record(&config, &context_with_response(502, b"bad"), no_error());
        assert_eq!(record.keys().collect::<Vec<_>>(), ["resBody", "status"]);
    }

    #[test]
    fn response_body_getter_replaces_the_raw_payload() {
        let config = Config::new()
            .fields([Field::ResponseBody, Field::BytesSent])
            .response_body(|_| Bytes::from_static(b"{\"decoded\":true}"))
            .resolve(Arc::new(CapturingLogger::default()));

        let record = build_record(&config, &context_with_response(200, b"\x1f\x8b\x08"), no_error());
        assert_eq!(
            record.get("resBody"),
            Some(&FieldValue::Bytes(Bytes::from_static(b"{\"decoded\":true}")))
        );
        assert_eq!(record.get("bytesSent"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn request_headers_expand_into_their_own_keys() {
        let config = Config::new()
            .fields([Field::Status, Field::RequestHeaders])
            .resolve(Arc::new(CapturingLogger::default()));

        let record = build_record(&config, &context_with_response(200, b""), no_error());
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            ["status", "user-agent", "referer", "x-tenant"]
        );
        assert_eq!(
            record.get("x-tenant"),
            Some(&FieldValue::Bytes(Bytes::from_static(b"acme")))
        );
    }

    #[test]
    fn emits_once_with_the_tier_message_and_level() {
        for (status, level, message) in [
            (503, Level::ERROR, "Server error"),
            (404, Level::WARN, "Client error"),
            (200, Level::INFO, "Success"),
            (302, Level::INFO, "Success"),
        ] {
            let logger = Arc::new(CapturingLogger::default());
            let config = Config::new().resolve(logger.clone());

            emit(&config, &context_with_response(status, b""), no_error());

            let entries = logger.entries();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].level, level);
            assert_eq!(entries[0].message, message);
        }
    }

    proptest! {
        #[test]
        fn record_keys_follow_the_configured_order(
            fields in proptest::sample::subsequence(
                Field::ALL
                    .into_iter()
                    .filter(|field| *field != Field::RequestHeaders)
                    .collect::<Vec<_>>(),
                0..=21,
            )
            .prop_shuffle()
        ) {
            let config = Config::new()
                .fields(fields.iter().copied())
                .resolve(Arc::new(CapturingLogger::default()));
            let outcome = Outcome { error: Some("boom"), ..no_error() };

            let record = build_record(&config, &context_with_response(200, b"ok"), outcome);

            let expected = fields.iter().map(|field| field.key()).collect::<Vec<_>>();
            prop_assert_eq!(record.keys().collect::<Vec<_>>(), expected);
        }
    }
}
