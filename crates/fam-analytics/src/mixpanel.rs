// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mixpanel ingestion: events go to the import API, profile updates to the
//! engage API. A batch holding both is split into two requests that are
//! retried and reported independently.

use std::env;
use std::sync::Arc;

use fam_analytics_pipeline::{
    DeliveryError, Destination, Pipeline, PipelineError, PreparedRequest, Record, RecordKind,
    Route,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::options::{ClientOptions, MessageMeta};
use crate::utils::{remove_trailing_slash, require_identity, require_non_empty};

pub const DEFAULT_HOST: &str = "https://api.mixpanel.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixpanelConfig {
    pub project_id: String,
    pub project_token: String,
    pub service_account_username: String,
    pub service_account_secret: String,
    pub host_url: Option<String>,
}

impl MixpanelConfig {
    /// Reads `FAM_ANALYTICS_MIXPANEL_PROJECT_ID`, `_PROJECT_TOKEN`,
    /// `_SERVICE_ACCOUNT_USERNAME`, `_SERVICE_ACCOUNT_SECRET` and `_HOST`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let required = |name: &str| {
            env::var(name).map_err(|_| PipelineError::InvalidConfig(format!("{name} is not set")))
        };
        let config = MixpanelConfig {
            project_id: required("FAM_ANALYTICS_MIXPANEL_PROJECT_ID")?,
            project_token: required("FAM_ANALYTICS_MIXPANEL_PROJECT_TOKEN")?,
            service_account_username: required("FAM_ANALYTICS_MIXPANEL_SERVICE_ACCOUNT_USERNAME")?,
            service_account_secret: required("FAM_ANALYTICS_MIXPANEL_SERVICE_ACCOUNT_SECRET")?,
            host_url: env::var("FAM_ANALYTICS_MIXPANEL_HOST").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.project_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Mixpanel project id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        remove_trailing_slash(self.host_url.as_deref().unwrap_or(DEFAULT_HOST))
    }
}

#[derive(Debug, Clone)]
pub struct MixpanelDestination {
    events_url: String,
    profiles_url: String,
    username: String,
    secret: String,
}

impl MixpanelDestination {
    pub fn new(config: &MixpanelConfig) -> Self {
        MixpanelDestination {
            events_url: format!(
                "{}/import?strict=1&project_id={}",
                config.host(),
                config.project_id
            ),
            profiles_url: format!("{}/engage#profile-set", config.host()),
            username: config.service_account_username.clone(),
            secret: config.service_account_secret.clone(),
        }
    }
}

impl Destination for MixpanelDestination {
    fn name(&self) -> &str {
        "mixpanel"
    }

    fn route_for(&self, kind: RecordKind) -> Option<Route> {
        match kind {
            RecordKind::Event => Some(Route::new("events", self.events_url.clone())),
            RecordKind::Profile => Some(Route::new("profiles", self.profiles_url.clone())),
            _ => None,
        }
    }

    /// The APIs expect a bare array; the kind only selects the endpoint.
    fn build_request(
        &self,
        route: &Route,
        records: &[Record],
    ) -> Result<PreparedRequest, DeliveryError> {
        let body = Value::Array(records.iter().map(Record::to_untagged_value).collect());
        Ok(PreparedRequest::new(route.url.clone(), body)
            .header("accept", "application/json")
            .basic_auth(self.username.clone(), self.secret.clone()))
    }
}

pub struct MixpanelClient {
    pipeline: Pipeline,
    project_token: String,
}

impl MixpanelClient {
    /// Must be called from within a tokio runtime.
    pub fn new(config: MixpanelConfig, options: ClientOptions) -> Result<Self, PipelineError> {
        config.validate()?;
        let pipeline = options.build_pipeline(Arc::new(MixpanelDestination::new(&config)))?;
        Ok(MixpanelClient {
            pipeline,
            project_token: config.project_token,
        })
    }

    /// Queues an event for the import API. The distinct id is the user id,
    /// or the anonymous id when there is none.
    pub fn track(
        &self,
        meta: MessageMeta,
        event: &str,
        properties: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        require_non_empty("event", event)?;
        let distinct_id = distinct_id(&meta)?;

        let mut props = properties;
        props.insert(
            "time".to_string(),
            Value::from(meta.event_time().timestamp_millis()),
        );
        props.insert("distinct_id".to_string(), distinct_id);
        props.insert(
            "$insert_id".to_string(),
            Value::from(Uuid::new_v4().simple().to_string()),
        );

        let mut fields = Map::new();
        fields.insert("event".to_string(), Value::from(event));
        fields.insert("properties".to_string(), Value::Object(props));
        Ok(self.pipeline.enqueue(Record::new(RecordKind::Event, fields)))
    }

    /// Queues a `$set` profile update.
    pub fn identify(
        &self,
        meta: MessageMeta,
        traits: Map<String, Value>,
    ) -> Result<(bool, Record), PipelineError> {
        let distinct_id = distinct_id(&meta)?;
        let mut fields = Map::new();
        fields.insert("$token".to_string(), Value::from(self.project_token.as_str()));
        fields.insert("$distinct_id".to_string(), distinct_id);
        fields.insert("$set".to_string(), Value::Object(traits));
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

fn distinct_id(meta: &MessageMeta) -> Result<Value, PipelineError> {
    require_identity(meta.user_id.as_ref(), meta.anonymous_id.as_ref())?;
    Ok(meta
        .user_id
        .as_ref()
        .or(meta.anonymous_id.as_ref())
        .map_or(Value::Null, |id| Value::from(id.clone())))
}
