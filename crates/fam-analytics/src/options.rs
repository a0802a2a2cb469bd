// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use fam_analytics_pipeline::{
    Backoff, DeliveryError, Destination, ErrorCallback, HttpSender, Pipeline, PipelineConfig,
    PipelineError, Record,
};
use serde_json::{Map, Value};

use crate::utils::{EventTime, Identifier};

/// Pipeline settings and hooks shared by every client.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub config: PipelineConfig,
    pub on_error: Option<ErrorCallback>,
    pub sender: Option<Arc<dyn HttpSender>>,
    pub backoff: Option<Arc<dyn Backoff>>,
}

impl ClientOptions {
    pub fn new(config: PipelineConfig) -> Self {
        ClientOptions {
            config,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&DeliveryError, &[Record]) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn HttpSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub(crate) fn build_pipeline(
        self,
        destination: Arc<dyn Destination>,
    ) -> Result<Pipeline, PipelineError> {
        let mut builder = Pipeline::builder(self.config, destination);
        if let Some(sender) = self.sender {
            builder = builder.sender(sender);
        }
        if let Some(backoff) = self.backoff {
            builder = builder.backoff(backoff);
        }
        if let Some(on_error) = self.on_error {
            builder = builder.on_error(move |e: &DeliveryError, records: &[Record]| {
                on_error(e, records);
            });
        }
        builder.build()
    }
}

/// Who a message is about, when it happened, and the optional extras every
/// message kind accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMeta {
    pub user_id: Option<Identifier>,
    pub anonymous_id: Option<Identifier>,
    pub context: Map<String, Value>,
    /// Defaults to the time the message is built.
    pub timestamp: Option<EventTime>,
    pub integrations: Map<String, Value>,
}

impl MessageMeta {
    pub fn user(user_id: impl Into<Identifier>) -> Self {
        MessageMeta {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn anonymous(anonymous_id: impl Into<Identifier>) -> Self {
        MessageMeta {
            anonymous_id: Some(anonymous_id.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn anonymous_id(mut self, anonymous_id: impl Into<Identifier>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    #[must_use]
    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<EventTime>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    #[must_use]
    pub fn integrations(mut self, integrations: Map<String, Value>) -> Self {
        self.integrations = integrations;
        self
    }

    pub(crate) fn event_time(&self) -> EventTime {
        self.timestamp.unwrap_or_else(EventTime::now)
    }
}
