// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::RecordKind;

/// Errors surfaced synchronously to the code that builds or enqueues records.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Non-2xx answer from a destination that was not allow-listed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[Analytics: {url}] {code}: {message} ({status})")]
pub struct ApiError {
    pub url: String,
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// Errors raised while delivering a batch. These never reach the caller of
/// `enqueue`; they are handed to the pipeline's failure callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to reach {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Delivery panicked: {0}")]
    Panicked(String),

    #[error("No route for {kind} records on destination {destination}")]
    Unroutable {
        kind: RecordKind,
        destination: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let error = ApiError {
            url: "http://test.com".to_string(),
            status: 200,
            code: "200".to_string(),
            message: "OK".to_string(),
        };
        assert_eq!(error.to_string(), "[Analytics: http://test.com] 200: OK (200)");
    }

    #[test]
    fn test_delivery_error_wraps_api_error() {
        let error: DeliveryError = ApiError {
            url: "https://api.segment.io/v1/batch".to_string(),
            status: 400,
            code: "bad_request".to_string(),
            message: "malformed".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "[Analytics: https://api.segment.io/v1/batch] bad_request: malformed (400)"
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let error = PipelineError::InvalidConfig("upload_size must be at least 1".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: upload_size must be at least 1"
        );
    }

    #[test]
    fn test_unroutable_display() {
        let error = DeliveryError::Unroutable {
            kind: RecordKind::Alias,
            destination: "mixpanel".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "No route for alias records on destination mixpanel"
        );
    }
}
