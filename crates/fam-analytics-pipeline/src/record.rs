// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of work carried through the pipeline.
//!
//! A [`Record`] is an already-built event: the pipeline never inspects its
//! fields beyond the [`RecordKind`] tag, which destinations use to pick the
//! endpoint a record is posted to.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Field holding the kind tag in a record's JSON form.
pub const KIND_FIELD: &str = "type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Track,
    Identify,
    Group,
    Page,
    Screen,
    Alias,
    Event,
    Profile,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Identify => "identify",
            Self::Group => "group",
            Self::Page => "page",
            Self::Screen => "screen",
            Self::Alias => "alias",
            Self::Event => "event",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "track" => Ok(Self::Track),
            "identify" => Ok(Self::Identify),
            "group" => Ok(Self::Group),
            "page" => Ok(Self::Page),
            "screen" => Ok(Self::Screen),
            "alias" => Ok(Self::Alias),
            "event" => Ok(Self::Event),
            "profile" => Ok(Self::Profile),
            other => Err(PipelineError::Validation(format!(
                "unknown record type '{other}'"
            ))),
        }
    }
}

/// One immutable instrumentation event.
///
/// Fields live behind an `Arc`, so handing a copy back to the caller after
/// enqueueing does not duplicate the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    kind: RecordKind,
    fields: Arc<Map<String, Value>>,
    encoded_len: usize,
}

#[derive(Serialize)]
struct Tagged<'a> {
    #[serde(rename = "type")]
    kind: RecordKind,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

impl Record {
    /// Builds a record. A stray `type` entry in `fields` is discarded in
    /// favour of `kind`.
    pub fn new(kind: RecordKind, mut fields: Map<String, Value>) -> Self {
        fields.remove(KIND_FIELD);
        let encoded_len = serde_json::to_vec(&Tagged {
            kind,
            fields: &fields,
        })
        .map_or(0, |bytes| bytes.len());
        Record {
            kind,
            fields: Arc::new(fields),
            encoded_len,
        }
    }

    /// Parses a record from its JSON form, which must be an object carrying
    /// a known `type`.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        let Value::Object(mut fields) = value else {
            return Err(PipelineError::Validation(
                "record must be a JSON object".to_string(),
            ));
        };
        let kind = match fields.remove(KIND_FIELD) {
            Some(Value::String(kind)) => kind.parse()?,
            Some(other) => {
                return Err(PipelineError::Validation(format!(
                    "record type must be a string, got {other}"
                )))
            }
            None => {
                return Err(PipelineError::Validation(
                    "record is missing its type".to_string(),
                ))
            }
        };
        Ok(Record::new(kind, fields))
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// JSON form including the `type` tag.
    pub fn to_value(&self) -> Value {
        let mut object = (*self.fields).clone();
        object.insert(
            KIND_FIELD.to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        Value::Object(object)
    }

    /// JSON form without the `type` tag, for destinations that route on it
    /// instead of sending it.
    pub fn to_untagged_value(&self) -> Value {
        Value::Object((*self.fields).clone())
    }

    /// Size in bytes of the tagged JSON encoding, computed once at build time.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged {
            kind: self.kind,
            fields: &self.fields,
        }
        .serialize(serializer)
    }
}
