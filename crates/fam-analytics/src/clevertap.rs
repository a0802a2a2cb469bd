// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CleverTap upload API: events and profile updates share one endpoint and
//! are posted as `{"d": [...]}`.

use std::env;
use std::sync::Arc;

use fam_analytics_pipeline::{
    DeliveryError, Destination, Pipeline, PipelineError, PreparedRequest, Record, RecordKind,
    Route,
};
use serde_json::{json, Map, Value};

use crate::options::{ClientOptions, MessageMeta};
use crate::utils::{id_value, require_identity, require_non_empty};

pub const DEFAULT_URL: &str = "https://in1.api.clevertap.com/1/upload";

pub const ACCOUNT_ID_HEADER: &str = "X-CleverTap-Account-Id";
pub const PASSCODE_HEADER: &str = "X-CleverTap-Passcode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleverTapConfig {
    pub account_id: String,
    pub passcode: String,
    /// Full upload URL; defaults to [`DEFAULT_URL`].
    pub host_url: Option<String>,
}

impl CleverTapConfig {
    pub fn new(account_id: impl Into<String>, passcode: impl Into<String>) -> Self {
        CleverTapConfig {
            account_id: account_id.into(),
            passcode: passcode.into(),
            host_url: None,
        }
    }

    /// Reads `FAM_ANALYTICS_CLEVERTAP_ACCOUNT_ID`,
    /// `FAM_ANALYTICS_CLEVERTAP_PASSCODE` and `FAM_ANALYTICS_CLEVERTAP_URL`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let required = |name: &str| {
            env::var(name).map_err(|_| PipelineError::InvalidConfig(format!("{name} is not set")))
        };
        Ok(CleverTapConfig {
            account_id: required("FAM_ANALYTICS_CLEVERTAP_ACCOUNT_ID")?,
            passcode: required("FAM_ANALYTICS_CLEVERTAP_PASSCODE")?,
            host_url: env::var("FAM_ANALYTICS_CLEVERTAP_URL").ok(),
        })
    }

    pub fn url(&self) -> &str {
        self.host_url.as_deref().unwrap_or(DEFAULT_URL)
    }
}

#[derive(Debug, Clone)]
pub struct CleverTapDestination {
    url: String,
    account_id: String,
    passcode: String,
}

impl CleverTapDestination {
    pub fn new(config: &CleverTapConfig) -> Self {
        CleverTapDestination {
            url: config.url().to_string(),
            account_id: config.account_id.clone(),
            passcode: config.passcode.clone(),
        }
    }
}

impl Destination for CleverTapDestination {
    fn name(&self) -> &str {
        "clevertap"
    }

    fn route_for(&self, kind: RecordKind) -> Option<Route> {
        match kind {
            RecordKind::Event | RecordKind::Profile => Some(Route::new("upload", self.url.clone())),
            _ => None,
        }
    }

    fn build_request(
        &self,
        route: &Route,
        records: &[Record],
    ) -> Result<PreparedRequest, DeliveryError> {
        Ok(PreparedRequest::new(route.url.clone(), json!({ "d": records }))
            .header(ACCOUNT_ID_HEADER, self.account_id.clone())
            .header(PASSCODE_HEADER, self.passcode.clone()))
    }
}

pub struct CleverTapClient {
    pipeline: Pipeline,
}

impl CleverTapClient {
    /// Must be called from within a tokio runtime.
    pub fn new(config: CleverTapConfig, options: ClientOptions) -> Result<Self, PipelineError> {
        let pipeline = options.build_pipeline(Arc::new(CleverTapDestination::new(&config)))?;
        Ok(CleverTapClient { pipeline })
    }

    /// Queues an event. The user id becomes `identity`, the anonymous id
    /// `objectId`.
    pub fn track(
        &self,
        meta: MessageMeta,
        event: &str,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_non_empty("event", event)?;
        let mut fields = base_fields(&meta)?;
        fields.insert("evtName".to_string(), Value::from(event));
        fields.insert("evtData".to_string(), Value::Object(properties));
        Ok(self.pipeline.enqueue(Record::new(RecordKind::Event, fields)))
    }

    /// Queues a profile update.
    pub fn identify(
        &self,
        meta: MessageMeta,
        traits: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        let mut fields = base_fields(&meta)?;
        fields.insert("profileData".to_string(), Value::Object(traits));
        Ok(self.pipeline.enqueue(Record::new(RecordKind::Profile, fields)))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn flush(&self) {
        self.pipeline.flush().await;
    }

    pub async fn join(&self) {
        self.pipeline.join().await;
    }

    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
    }
}

fn base_fields(meta: &MessageMeta) -> Result<Map<String, Value>, PipelineError> {
    require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
    let mut fields = Map::new();
    fields.insert(
        "ts".to_string(),
        Value::from(meta.event_time().timestamp_secs().to_string()),
    );
    fields.insert("identity".to_string(), id_value(meta.user_id.as_ref()));
    fields.insert("objectId".to_string(), id_value(meta.anonymous_id.as_ref()));
    Ok(fields)
}
