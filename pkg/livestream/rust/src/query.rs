// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::handler::StreamHealth;
use crate::series::SeriesSnapshot;
use serde::{Deserialize, Serialize};

/// Capacity used when a query does not set `buffer`.
pub const DEFAULT_BUFFER: usize = 2000;

const DEFAULT_STREAM_NAME: &str = "stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum QueryType {
    #[serde(rename = "openStreamInfo")]
    OpenStreams,
    // Wire name kept as the query editors send it.
    #[serde(rename = "avaliableStreams")]
    AvailableStreams,
    /// Accepted for compatibility; bodies are decoded as NDJSON.
    #[serde(rename = "telegraph")]
    Telegraph,
    #[default]
    #[serde(rename = "json")]
    Json,
}

impl QueryType {
    /// True for query types backed by a live HTTP stream.
    pub fn is_stream(self) -> bool {
        matches!(self, QueryType::Json | QueryType::Telegraph)
    }
}

/// One query target as sent by the query editor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuery {
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub query_type: QueryType,
    /// Path appended to the data source base URL.
    #[serde(default)]
    pub stream: Option<String>,
    /// Per-series capacity.
    #[serde(default)]
    pub buffer: Option<i64>,
}

impl LiveQuery {
    pub fn stream(path: impl Into<String>) -> Self {
        Self {
            stream: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_buffer(mut self, buffer: i64) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    /// Series capacity for this query. An unset buffer falls back to
    /// `default`; a non-positive one is rejected.
    pub fn capacity(&self, default: usize) -> Result<usize> {
        match self.buffer {
            None => Ok(default),
            Some(n) if n > 0 => {
                usize::try_from(n).map_err(|_| Error::InvalidCapacity { capacity: n })
            }
            Some(n) => Err(Error::InvalidCapacity { capacity: n }),
        }
    }

    pub fn stream_name(&self) -> &str {
        match self.stream.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => DEFAULT_STREAM_NAME,
        }
    }
}

/// Data source instance settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceOptions {
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadingState {
    Streaming,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    Series(SeriesSnapshot),
    StreamInfo { rows: Vec<StreamHealth> },
}

/// Event published to query subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub key: String,
    pub state: LoadingState,
    pub data: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Series frame named `name`, if present.
    pub fn series(&self, name: &str) -> Option<&SeriesSnapshot> {
        self.data.iter().find_map(|frame| match frame {
            Frame::Series(s) if s.name == name => Some(s),
            _ => None,
        })
    }

    /// Rows of the first stream-info frame.
    pub fn rows(&self) -> &[StreamHealth] {
        self.data
            .iter()
            .find_map(|frame| match frame {
                Frame::StreamInfo { rows } => Some(rows.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }
}
