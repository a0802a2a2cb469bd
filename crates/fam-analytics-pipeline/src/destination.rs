// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What a remote collector looks like to the uploader: where each record kind
//! goes, how a group of records is wrapped into a request, and which non-2xx
//! answers still count as delivered.

use std::fmt;

use serde::Deserialize;
use tracing::warn;

use crate::error::{ApiError, DeliveryError};
use crate::http::{HttpResponse, PreparedRequest};
use crate::record::{Record, RecordKind};

/// Endpoint a group of records is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Short name used in logs, e.g. `events`
    pub name: &'static str,
    pub url: String,
}

impl Route {
    pub fn new(name: &'static str, url: impl Into<String>) -> Self {
        Route {
            name,
            url: url.into(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// A non-2xx response that is logged and otherwise treated as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenignRejection {
    pub status: u16,
    /// Required error code, or any code when `None`
    pub code: Option<&'static str>,
}

impl BenignRejection {
    pub fn matches(&self, status: u16, code: &str) -> bool {
        self.status == status && self.code.map_or(true, |expected| expected == code)
    }
}

pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    /// Route for records of `kind`, or `None` when this destination does not
    /// accept them.
    fn route_for(&self, kind: RecordKind) -> Option<Route>;

    /// Wraps `records`, all of which share `route`, into one request.
    fn build_request(
        &self,
        route: &Route,
        records: &[Record],
    ) -> Result<PreparedRequest, DeliveryError>;

    fn benign_rejections(&self) -> &[BenignRejection] {
        &[]
    }
}

// Segment answers `{code, message}`; Mixpanel uses a numeric code and `error`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

fn code_text(code: serde_json::Value) -> String {
    match code {
        serde_json::Value::String(code) => code,
        other => other.to_string(),
    }
}

/// Maps a response to delivered (`Ok`) or an [`ApiError`].
pub fn check_response(
    destination: &dyn Destination,
    url: &str,
    response: &HttpResponse,
) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }

    let parsed = serde_json::from_str::<ErrorBody>(&response.body).ok();
    let (code, message) = match parsed {
        Some(ErrorBody {
            code: Some(code),
            message,
        }) => (code_text(code), message.unwrap_or_default()),
        Some(ErrorBody {
            code: None,
            message: Some(message),
        }) => ("unknown".to_string(), message),
        _ => ("unknown".to_string(), response.body.clone()),
    };

    if destination
        .benign_rejections()
        .iter()
        .any(|rejection| rejection.matches(response.status, &code))
    {
        warn!(
            "{}: {} rejected the request with {} ({}), treating it as delivered",
            destination.name(),
            url,
            code,
            response.status
        );
        return Ok(());
    }

    Err(ApiError {
        url: url.to_string(),
        status: response.status,
        code,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    struct Collector;

    impl Destination for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        fn route_for(&self, _kind: RecordKind) -> Option<Route> {
            Some(Route::new("all", "http://collector/batch"))
        }

        fn build_request(
            &self,
            route: &Route,
            records: &[Record],
        ) -> Result<PreparedRequest, DeliveryError> {
            Ok(PreparedRequest::new(
                route.url.clone(),
                serde_json::to_value(records).map_err(|e| DeliveryError::Payload(e.to_string()))?,
            ))
        }

        fn benign_rejections(&self) -> &[BenignRejection] {
            &[BenignRejection {
                status: 401,
                code: Some("invalid_write_key"),
            }]
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_success_statuses() {
        for status in [200, 201, 204] {
            assert!(check_response(&Collector, "u", &response(status, "")).is_ok());
        }
    }

    #[test]
    fn test_error_body_is_parsed() {
        let error = check_response(
            &Collector,
            "http://collector/batch",
            &response(400, r#"{"code":"bad_request","message":"malformed batch"}"#),
        )
        .expect_err("400 is an error");
        assert_eq!(
            error,
            ApiError {
                url: "http://collector/batch".to_string(),
                status: 400,
                code: "bad_request".to_string(),
                message: "malformed batch".to_string(),
            }
        );
    }

    #[test]
    fn test_plain_body_becomes_message() {
        let error = check_response(&Collector, "u", &response(502, "Bad Gateway"))
            .expect_err("502 is an error");
        assert_eq!(error.code, "unknown");
        assert_eq!(error.message, "Bad Gateway");
    }

    #[test]
    fn test_numeric_code_and_error_field() {
        let error = check_response(
            &Collector,
            "u",
            &response(400, r#"{"code":400,"error":"invalid project","status":"Bad Request"}"#),
        )
        .expect_err("400 is an error");
        assert_eq!(error.code, "400");
        assert_eq!(error.message, "invalid project");
    }

    #[test]
    #[traced_test]
    fn test_benign_rejection_is_delivered() {
        let result = check_response(
            &Collector,
            "u",
            &response(401, r#"{"code":"invalid_write_key","message":"nope"}"#),
        );
        assert!(result.is_ok());
        assert!(logs_contain("treating it as delivered"));

        // Same status, different code.
        assert!(check_response(
            &Collector,
            "u",
            &response(401, r#"{"code":"expired","message":"nope"}"#),
        )
        .is_err());
    }
}
