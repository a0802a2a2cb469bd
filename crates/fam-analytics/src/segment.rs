// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Segment HTTP tracking API.
//!
//! Every message kind is posted to `{host}/v1/batch` as
//! `{"batch": [...], "sentAt": ...}`, authenticated with the write key as the
//! basic-auth user.

use std::env;
use std::sync::Arc;

use fam_analytics_pipeline::{
    BenignRejection, DeliveryError, Destination, Pipeline, PipelineError, PreparedRequest, Record,
    RecordKind, Route,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::options::{ClientOptions, MessageMeta};
use crate::utils::{
    id_value, remove_trailing_slash, require_identity, require_non_empty, EventTime, Identifier,
};

pub const DEFAULT_HOST: &str = "https://api.segment.io";
pub const LIBRARY_NAME: &str = "fam-analytics";

/// Segment drops single messages above 32 KiB.
pub const MAX_MESSAGE_BYTES: usize = 32 * 1024;
/// Kept under Segment's 500 KB request limit to leave room for the envelope.
pub const MAX_BATCH_BYTES: usize = 475_000;

const INVALID_WRITE_KEY: &str = "invalid_write_key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentConfig {
    pub write_key: String,
    pub host_url: Option<String>,
}

impl SegmentConfig {
    pub fn new(write_key: impl Into<String>) -> Self {
        SegmentConfig {
            write_key: write_key.into(),
            host_url: None,
        }
    }

    /// Reads `FAM_ANALYTICS_SEGMENT_WRITE_KEY` and `FAM_ANALYTICS_SEGMENT_HOST`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let config = SegmentConfig {
            write_key: env::var("FAM_ANALYTICS_SEGMENT_WRITE_KEY").unwrap_or_default(),
            host_url: env::var("FAM_ANALYTICS_SEGMENT_HOST").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.write_key.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Segment write key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        remove_trailing_slash(self.host_url.as_deref().unwrap_or(DEFAULT_HOST))
    }
}

#[derive(Debug, Clone)]
pub struct SegmentDestination {
    url: String,
    write_key: String,
}

impl SegmentDestination {
    pub fn new(config: &SegmentConfig) -> Self {
        SegmentDestination {
            url: format!("{}/v1/batch", config.host()),
            write_key: config.write_key.clone(),
        }
    }
}

impl Destination for SegmentDestination {
    fn name(&self) -> &str {
        "segment"
    }

    fn route_for(&self, kind: RecordKind) -> Option<Route> {
        match kind {
            RecordKind::Track
            | RecordKind::Identify
            | RecordKind::Group
            | RecordKind::Page
            | RecordKind::Screen
            | RecordKind::Alias => Some(Route::new("batch", self.url.clone())),
            RecordKind::Event | RecordKind::Profile => None,
        }
    }

    fn build_request(
        &self,
        route: &Route,
        records: &[Record],
    ) -> Result<PreparedRequest, DeliveryError> {
        Ok(PreparedRequest::new(
            route.url.clone(),
            json!({
                "batch": records,
                "sentAt": EventTime::now().to_iso(),
            }),
        )
        .basic_auth(self.write_key.clone(), ""))
    }

    fn benign_rejections(&self) -> &[BenignRejection] {
        // A bad write key would fail forever; it is logged instead of retried
        // into the failure callback.
        &[
            BenignRejection {
                status: 400,
                code: Some(INVALID_WRITE_KEY),
            },
            BenignRejection {
                status: 401,
                code: Some(INVALID_WRITE_KEY),
            },
        ]
    }
}

/// Builds Segment messages and queues them for delivery.
pub struct SegmentClient {
    pipeline: Pipeline,
}

impl SegmentClient {
    /// Must be called from within a tokio runtime.
    pub fn new(config: SegmentConfig, mut options: ClientOptions) -> Result<Self, PipelineError> {
        config.validate()?;
        options.config.max_batch_bytes = Some(
            options
                .config
                .max_batch_bytes
                .map_or(MAX_BATCH_BYTES, |bytes| bytes.min(MAX_BATCH_BYTES)),
        );
        let pipeline = options.build_pipeline(Arc::new(SegmentDestination::new(&config)))?;
        Ok(SegmentClient { pipeline })
    }

    pub fn track(
        &self,
        meta: MessageMeta,
        event: &str,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
        require_non_empty("event", event)?;
        let mut fields = common_fields(meta);
        fields.insert("event".to_string(), Value::from(event));
        fields.insert("properties".to_string(), Value::Object(properties));
        self.enqueue(RecordKind::Track, fields)
    }

    pub fn identify(
        &self,
        meta: MessageMeta,
        traits: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
        let mut fields = common_fields(meta);
        fields.insert("traits".to_string(), Value::Object(traits));
        self.enqueue(RecordKind::Identify, fields)
    }

    pub fn group(
        &self,
        meta: MessageMeta,
        group_id: impl Into<Identifier>,
        traits: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
        let group_id = group_id.into();
        require_non_empty("group_id", group_id.as_str())?;
        let mut fields = common_fields(meta);
        fields.insert("groupId".to_string(), group_id.into());
        fields.insert("traits".to_string(), Value::Object(traits));
        self.enqueue(RecordKind::Group, fields)
    }

    /// Links `previous_id` to the user id carried by `meta`.
    pub fn alias(
        &self,
        previous_id: impl Into<Identifier>,
        meta: MessageMeta,
    ) -> Result<(bool, Record), PipelineError> {
        let previous_id = previous_id.into();
        require_non_empty("previous_id", previous_id.as_str())?;
        if meta.user_id.is_none() {
            return Err(PipelineError::Validation(
                "alias requires a user_id".to_string(),
            ));
        }
        let mut fields = common_fields(meta);
        fields.insert("previousId".to_string(), previous_id.into());
        self.enqueue(RecordKind::Alias, fields)
    }

    pub fn page(
        &self,
        meta: MessageMeta,
        category: Option<&str>,
        name: Option<&str>,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        self.view(RecordKind::Page, meta, category, name, properties)
    }

    pub fn screen(
        &self,
        meta: MessageMeta,
        category: Option<&str>,
        name: Option<&str>,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        self.view(RecordKind::Screen, meta, category, name, properties)
    }

    fn view(
        &self,
        kind: RecordKind,
        meta: MessageMeta,
        category: Option<&str>,
        name: Option<&str>,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
        let mut fields = common_fields(meta);
        fields.insert("category".to_string(), category.map_or(Value::Null, Value::from));
        fields.insert("name".to_string(), name.map_or(Value::Null, Value::from));
        fields.insert("properties".to_string(), Value::Object(properties));
        self.enqueue(kind, fields)
    }

    fn enqueue(
        &self,
        kind: RecordKind,
        fields: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        let record = Record::new(kind, fields);
        if record.encoded_len() > MAX_MESSAGE_BYTES {
            return Err(PipelineError::Validation(format!(
                "{kind} message is {} bytes, above the {MAX_MESSAGE_BYTES} byte limit",
                record.encoded_len()
            )));
        }
        Ok(self.pipeline.enqueue(record))
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

fn common_fields(meta: MessageMeta) -> Map<String, Value> {
    let MessageMeta {
        user_id,
        anonymous_id,
        mut context,
        timestamp,
        integrations,
    } = meta;
    context.insert(
        "library".to_string(),
        json!({"name": LIBRARY_NAME, "version": env!("CARGO_PKG_VERSION")}),
    );

    let mut fields = Map::new();
    fields.insert(
        "messageId".to_string(),
        Value::from(Uuid::new_v4().to_string()),
    );
    fields.insert(
        "timestamp".to_string(),
        Value::from(timestamp.unwrap_or_else(EventTime::now).to_iso()),
    );
    fields.insert("userId".to_string(), id_value(user_id.as_ref()));
    fields.insert("anonymousId".to_string(), id_value(anonymous_id.as_ref()));
    fields.insert("context".to_string(), Value::Object(context));
    fields.insert("integrations".to_string(), Value::Object(integrations));
    fields
}
