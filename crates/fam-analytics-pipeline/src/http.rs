// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP plumbing between the uploader and a destination endpoint.
//!
//! Destinations describe a request as a [`PreparedRequest`]; an [`HttpSender`]
//! performs it. The production sender wraps a pooled `reqwest::Client`, tests
//! point it at a mock server or swap in their own sender.

use core::time::Duration;
use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::config::PipelineConfig;
use crate::error::DeliveryError;

/// A destination request, ready to be posted as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// `(username, password)` for HTTP basic auth
    pub basic_auth: Option<(String, String)>,
    pub body: Value,
}

impl PreparedRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        PreparedRequest {
            url: url.into(),
            headers: Vec::new(),
            basic_auth: None,
            body,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpSender: Send + Sync {
    /// Posts `request`. Only transport problems are errors; any HTTP status
    /// comes back as a response.
    async fn post(&self, request: &PreparedRequest) -> Result<HttpResponse, DeliveryError>;
}

/// [`HttpSender`] backed by a shared, pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        ReqwestSender {
            client: get_client(config),
        }
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post(&self, request: &PreparedRequest) -> Result<HttpResponse, DeliveryError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                url: request.url.clone(),
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response.text().await;
        into_response(&request.url, status, body)
    }
}

/// Pairs a status with its body. A body that cannot be read after a 2xx
/// status is logged and ignored, since the server already accepted the
/// request and a retry would deliver it twice.
fn into_response<E: fmt::Display>(
    url: &str,
    status: u16,
    body: Result<String, E>,
) -> Result<HttpResponse, DeliveryError> {
    let success = (200..300).contains(&status);
    match body {
        Ok(body) => Ok(HttpResponse { status, body }),
        Err(e) if success => {
            warn!("Accepted by {url} ({status}) but the response body was unreadable: {e}");
            Ok(HttpResponse {
                status,
                body: String::new(),
            })
        }
        Err(e) => Err(DeliveryError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Builds the pooled client used by every worker of a pipeline.
///
/// An invalid proxy is logged and the client falls back to a direct
/// connection, so a misconfigured proxy never stops delivery altogether.
#[must_use]
pub fn get_client(config: &PipelineConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &PipelineConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.proxy_https {
            client = client.proxy(reqwest::Proxy::https(https_uri.as_str())?);
        }
    }

    Ok(client.build()?)
}
