// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::future::Future;

use tokio::io::{stdin, AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use fam_analytics::{
    CleverTapClient, CleverTapConfig, ClientOptions, MixpanelClient, MixpanelConfig,
    PipelineConfig, SegmentClient, SegmentConfig,
};
use fam_analytics_pipeline::{logger, Pipeline, PipelineError, Record};

const DESTINATION_ENV: &str = "FAM_ANALYTICS_DESTINATION";

enum Client {
    Segment(SegmentClient),
    CleverTap(CleverTapClient),
    Mixpanel(MixpanelClient),
}

impl Client {
    fn from_env(destination: &str, config: PipelineConfig) -> Result<Self, PipelineError> {
        let options = ClientOptions::new(config);
        match destination {
            "segment" => Ok(Client::Segment(SegmentClient::new(
                SegmentConfig::from_env()?,
                options,
            )?)),
            "clevertap" => Ok(Client::CleverTap(CleverTapClient::new(
                CleverTapConfig::from_env()?,
                options,
            )?)),
            "mixpanel" => Ok(Client::Mixpanel(MixpanelClient::new(
                MixpanelConfig::from_env()?,
                options,
            )?)),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown destination '{other}', expected segment, clevertap or mixpanel"
            ))),
        }
    }

    fn pipeline(&self) -> &Pipeline {
        match self {
            Client::Segment(client) => client.pipeline(),
            Client::CleverTap(client) => client.pipeline(),
            Client::Mixpanel(client) => client.pipeline(),
        }
    }
}

#[tokio::main]
pub async fn main() {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading pipeline config: {e}");
            return;
        }
    };

    if let Err(e) = logger::init(config.effective_log_level()) {
        eprintln!("Error initializing logger: {e}");
        return;
    }

    let destination = env::var(DESTINATION_ENV)
        .map(|val| val.trim().to_lowercase())
        .unwrap_or("segment".to_string());

    let client = match Client::from_env(&destination, config) {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating {destination} client: {e}");
            return;
        }
    };
    let pipeline = client.pipeline();
    info!("Relaying records from stdin to {destination}");

    let relayed = relay(
        pipeline,
        BufReader::new(stdin()),
        tokio::signal::ctrl_c(),
    )
    .await;

    pipeline.shutdown().await;
    info!("Relayed {relayed} records, {} left pending", pipeline.pending());
}

/// Relays `input` line by line until it ends or `interrupt` resolves.
/// Returns the number of records accepted.
async fn relay<R, F, T>(pipeline: &Pipeline, input: R, interrupt: F) -> u64
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = T>,
{
    let mut lines = input.lines();
    let mut relayed: u64 = 0;
    // Polled across iterations so an interrupt arriving while a line is
    // relayed is not lost.
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if relay_line(pipeline, &line) {
                        relayed += 1;
                    }
                }
                Ok(None) => {
                    debug!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Error reading stdin: {e}");
                    break;
                }
            }
        }
    }
    relayed
}

/// Parses and enqueues one input line. Blank lines are skipped.
fn relay_line(pipeline: &Pipeline, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    let record = match serde_json::from_str(line)
        .map_err(|e| PipelineError::Validation(e.to_string()))
        .and_then(Record::from_value)
    {
        Ok(record) => record,
        Err(e) => {
            warn!("Skipping invalid record: {e}");
            return false;
        }
    };
    let (accepted, record) = pipeline.enqueue(record);
    if !accepted {
        warn!("Dropped {} record, buffer is full or closed", record.kind());
    }
    accepted
}
