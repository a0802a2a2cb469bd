// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of one batch.
//!
//! ```text
//!   Batch
//!     │ partition by route (first-seen order)
//!     v
//!   ┌────────┐ ┌────────┐       ┌────────────┐
//!   │ group  │ │ group  │  ...  │ unroutable │──> callback
//!   └───┬────┘ └───┬────┘       └────────────┘
//!       │ build + post, retried independently (join_all)
//!       v
//!   delivered, or callback once with the group's records
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error};

use crate::batcher::Batch;
use crate::destination::{check_response, Destination, Route};
use crate::error::DeliveryError;
use crate::http::HttpSender;
use crate::record::{Record, RecordKind};
use crate::retry::RetryPolicy;

/// Called once for every group of records that could not be delivered.
pub type ErrorCallback = Arc<dyn Fn(&DeliveryError, &[Record]) + Send + Sync>;

#[derive(Clone)]
pub struct Uploader {
    destination: Arc<dyn Destination>,
    sender: Arc<dyn HttpSender>,
    retry: RetryPolicy,
    on_error: Option<ErrorCallback>,
}

impl Uploader {
    pub fn new(
        destination: Arc<dyn Destination>,
        sender: Arc<dyn HttpSender>,
        retry: RetryPolicy,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Uploader {
            destination,
            sender,
            retry,
            on_error,
        }
    }

    /// Delivers `batch`. Returns `true` only when every record was delivered;
    /// every other record has been handed to the callback exactly once.
    pub async fn upload(&self, batch: Batch) -> bool {
        let start = Instant::now();
        let size = batch.len();
        let (groups, unroutable) = self.partition(batch.into_records());

        let mut delivered = true;
        for (kind, records) in unroutable {
            let e = DeliveryError::Unroutable {
                kind,
                destination: self.destination.name().to_string(),
            };
            error!("Dropping {} records: {}", records.len(), e);
            self.report(&e, &records);
            delivered = false;
        }

        let results = join_all(
            groups
                .iter()
                .map(|(route, records)| self.send_group(route, records)),
        )
        .await;

        for ((route, records), result) in groups.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    "{}: failed to deliver {} records to {}: {}",
                    self.destination.name(),
                    records.len(),
                    route,
                    e
                );
                self.report(&e, records);
                delivered = false;
            }
        }

        debug!(
            "{}: uploaded batch of {} records in {} ms (delivered: {})",
            self.destination.name(),
            size,
            start.elapsed().as_millis(),
            delivered
        );
        delivered
    }

    #[allow(clippy::type_complexity)]
    fn partition(
        &self,
        records: Vec<Record>,
    ) -> (Vec<(Route, Vec<Record>)>, Vec<(RecordKind, Vec<Record>)>) {
        let mut groups: Vec<(Route, Vec<Record>)> = Vec::new();
        let mut unroutable: Vec<(RecordKind, Vec<Record>)> = Vec::new();
        for record in records {
            match self.destination.route_for(record.kind()) {
                Some(route) => match groups.iter_mut().find(|(known, _)| *known == route) {
                    Some((_, group)) => group.push(record),
                    None => groups.push((route, vec![record])),
                },
                None => {
                    let kind = record.kind();
                    match unroutable.iter_mut().find(|(known, _)| *known == kind) {
                        Some((_, group)) => group.push(record),
                        None => unroutable.push((kind, vec![record])),
                    }
                }
            }
        }
        (groups, unroutable)
    }

    /// A panic while building or sending the group fails the group, so its
    /// records still reach the callback.
    async fn send_group(&self, route: &Route, records: &[Record]) -> Result<(), DeliveryError> {
        AssertUnwindSafe(self.try_send_group(route, records))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DeliveryError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn try_send_group(
        &self,
        route: &Route,
        records: &[Record],
    ) -> Result<(), DeliveryError> {
        let request = match self.destination.build_request(route, records) {
            Ok(request) => request,
            Err(DeliveryError::Payload(message)) => return Err(DeliveryError::Payload(message)),
            Err(other) => return Err(DeliveryError::Payload(other.to_string())),
        };
        let label = format!("{}/{}", self.destination.name(), route.name);
        let label = label.as_str();
        let request = &request;
        let destination = &*self.destination;
        let sender = &*self.sender;

        self.retry
            .run(label, move |attempt| async move {
                debug!(
                    "{label}: posting {} records to {} (attempt {attempt})",
                    records.len(),
                    request.url
                );
                let response = sender.post(request).await?;
                check_response(destination, &request.url, &response)?;
                Ok::<(), DeliveryError>(())
            })
            .await
    }

    fn report(&self, e: &DeliveryError, records: &[Record]) {
        let Some(on_error) = &self.on_error else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| on_error(e, records))).is_err() {
            error!("Failure callback panicked while handling: {}", e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::http::{HttpResponse, PreparedRequest};
    use crate::retry::ImmediateRetry;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Routes `event` and `profile` separately; everything else is unroutable.
    struct TwoRoutes;

    impl Destination for TwoRoutes {
        fn name(&self) -> &str {
            "two-routes"
        }

        fn route_for(&self, kind: RecordKind) -> Option<Route> {
            match kind {
                RecordKind::Event => Some(Route::new("events", "http://test/events")),
                RecordKind::Profile => Some(Route::new("profiles", "http://test/profiles")),
                _ => None,
            }
        }

        fn build_request(
            &self,
            route: &Route,
            records: &[Record],
        ) -> Result<PreparedRequest, DeliveryError> {
            if records.iter().any(|r| r.get("poison").is_some()) {
                return Err(DeliveryError::Payload("poisoned record".to_string()));
            }
            Ok(PreparedRequest::new(
                route.url.clone(),
                Value::Array(records.iter().map(Record::to_untagged_value).collect()),
            ))
        }
    }

    /// Answers with a fixed status per URL and records every request.
    #[derive(Default)]
    struct ScriptedSender {
        failing_urls: Vec<&'static str>,
        requests: Mutex<Vec<PreparedRequest>>,
    }

    #[async_trait]
    impl HttpSender for ScriptedSender {
        async fn post(&self, request: &PreparedRequest) -> Result<HttpResponse, DeliveryError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.failing_urls.contains(&request.url.as_str()) {
                Ok(HttpResponse {
                    status: 500,
                    body: r#"{"code":"internal","message":"boom"}"#.to_string(),
                })
            } else {
                Ok(HttpResponse {
                    status: 200,
                    body: "{}".to_string(),
                })
            }
        }
    }

    type Reports = Arc<Mutex<Vec<(DeliveryError, Vec<Record>)>>>;

    fn collecting_callback() -> (ErrorCallback, Reports) {
        let reports: Reports = Arc::default();
        let sink = Arc::clone(&reports);
        let callback: ErrorCallback = Arc::new(move |e: &DeliveryError, records: &[Record]| {
            sink.lock().unwrap().push((e.clone(), records.to_vec()));
        });
        (callback, reports)
    }

    fn record(kind: RecordKind, i: u64) -> Record {
        let mut fields = Map::new();
        fields.insert("i".to_string(), Value::from(i));
        Record::new(kind, fields)
    }

    fn uploader(sender: Arc<ScriptedSender>, attempts: u32, on_error: Option<ErrorCallback>) -> Uploader {
        Uploader::new(
            Arc::new(TwoRoutes),
            sender,
            RetryPolicy::new(attempts, Arc::new(ImmediateRetry)),
            on_error,
        )
    }

    #[tokio::test]
    async fn test_partition_preserves_order_within_routes() {
        let sender = Arc::new(ScriptedSender::default());
        let (callback, reports) = collecting_callback();
        let batch = Batch::new(vec![
            record(RecordKind::Event, 0),
            record(RecordKind::Profile, 1),
            record(RecordKind::Event, 2),
            record(RecordKind::Profile, 3),
        ])
        .unwrap();

        assert!(uploader(Arc::clone(&sender), 3, Some(callback)).upload(batch).await);
        assert!(reports.lock().unwrap().is_empty());

        let mut requests = sender.requests.lock().unwrap().clone();
        requests.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "http://test/events");
        assert_eq!(requests[0].body, serde_json::json!([{"i": 0}, {"i": 2}]));
        assert_eq!(requests[1].body, serde_json::json!([{"i": 1}, {"i": 3}]));
    }

    #[tokio::test]
    async fn test_failing_route_reported_once_after_max_attempts() {
        let sender = Arc::new(ScriptedSender {
            failing_urls: vec!["http://test/events"],
            ..Default::default()
        });
        let (callback, reports) = collecting_callback();
        let batch = Batch::new(vec![
            record(RecordKind::Event, 0),
            record(RecordKind::Profile, 1),
            record(RecordKind::Event, 2),
        ])
        .unwrap();

        assert!(!uploader(Arc::clone(&sender), 4, Some(callback)).upload(batch).await);

        let requests = sender.requests.lock().unwrap();
        let event_posts = requests.iter().filter(|r| r.url.ends_with("events")).count();
        let profile_posts = requests.iter().filter(|r| r.url.ends_with("profiles")).count();
        assert_eq!(event_posts, 4);
        assert_eq!(profile_posts, 1);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let (error, records) = &reports[0];
        assert_eq!(
            error,
            &DeliveryError::Api(ApiError {
                url: "http://test/events".to_string(),
                status: 500,
                code: "internal".to_string(),
                message: "boom".to_string(),
            })
        );
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind() == RecordKind::Event));
    }

    #[tokio::test]
    async fn test_unroutable_records_are_reported() {
        let sender = Arc::new(ScriptedSender::default());
        let (callback, reports) = collecting_callback();
        let batch = Batch::new(vec![
            record(RecordKind::Alias, 0),
            record(RecordKind::Event, 1),
            record(RecordKind::Alias, 2),
        ])
        .unwrap();

        assert!(!uploader(Arc::clone(&sender), 2, Some(callback)).upload(batch).await);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].0,
            DeliveryError::Unroutable {
                kind: RecordKind::Alias,
                ..
            }
        ));
        assert_eq!(reports[0].1.len(), 2);
        assert_eq!(sender.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_error_is_not_retried() {
        let sender = Arc::new(ScriptedSender::default());
        let (callback, reports) = collecting_callback();
        let mut fields = Map::new();
        fields.insert("poison".to_string(), Value::Bool(true));
        let batch = Batch::new(vec![Record::new(RecordKind::Event, fields)]).unwrap();

        assert!(!uploader(Arc::clone(&sender), 5, Some(callback)).upload(batch).await);
        assert!(sender.requests.lock().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert!(matches!(reports[0].0, DeliveryError::Payload(_)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_callback_is_contained() {
        let sender = Arc::new(ScriptedSender {
            failing_urls: vec!["http://test/events"],
            ..Default::default()
        });
        let callback: ErrorCallback = Arc::new(|_: &DeliveryError, _: &[Record]| {
            panic!("callback bug");
        });
        let batch = Batch::new(vec![record(RecordKind::Event, 0)]).unwrap();

        assert!(!uploader(sender, 1, Some(callback)).upload(batch).await);
        assert!(logs_contain("Failure callback panicked"));
    }

    struct PanickingSender;

    #[async_trait]
    impl HttpSender for PanickingSender {
        async fn post(&self, _request: &PreparedRequest) -> Result<HttpResponse, DeliveryError> {
            panic!("sender bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_sender_reports_group() {
        let (callback, reports) = collecting_callback();
        let uploader = Uploader::new(
            Arc::new(TwoRoutes),
            Arc::new(PanickingSender),
            RetryPolicy::new(3, Arc::new(ImmediateRetry)),
            Some(callback),
        );
        let batch = Batch::new(vec![
            record(RecordKind::Event, 0),
            record(RecordKind::Profile, 1),
            record(RecordKind::Event, 2),
        ])
        .unwrap();

        assert!(!uploader.upload(batch).await);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports
            .iter()
            .all(|(e, _)| *e == DeliveryError::Panicked("sender bug".to_string())));
        let reported: usize = reports.iter().map(|(_, records)| records.len()).sum();
        assert_eq!(reported, 3);
    }
}
