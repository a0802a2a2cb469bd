// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Analytics clients for Segment, CleverTap and Mixpanel.
//!
//! Each client turns call-site arguments into a [`Record`] and hands it to
//! its own [`fam_analytics_pipeline::Pipeline`], so tracking calls return
//! without touching the network.
//!
//! ```rust,ignore
//! let client = SegmentClient::new(SegmentConfig::new(write_key), ClientOptions::default())?;
//! client.track(MessageMeta::user(42), "Signed Up", Map::new())?;
//! client.shutdown().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod clevertap;
pub mod mixpanel;
pub mod options;
pub mod segment;
pub mod utils;

pub use clevertap::{CleverTapClient, CleverTapConfig};
pub use fam_analytics_pipeline::{PipelineConfig, Record, RecordKind};
pub use mixpanel::{MixpanelClient, MixpanelConfig};
pub use options::{ClientOptions, MessageMeta};
pub use segment::{SegmentClient, SegmentConfig};
pub use utils::{clean_properties, EventTime, Identifier};
