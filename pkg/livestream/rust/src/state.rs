// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Never opened, or explicitly closed.
    Closed,
    /// Request sent, waiting for the response head.
    Opening,
    /// Reading the response body.
    Streaming,
    /// Body ended.
    Done,
    /// Connect or read failed.
    Failed,
}

impl StreamState {
    /// A read task owns the connection in these states.
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Opening | StreamState::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Done | StreamState::Failed)
    }

    pub(crate) fn can_transition_to(self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Done, Opening)
                | (Failed, Opening)
                | (Opening, Streaming)
                | (Opening, Failed)
                | (Opening, Closed)
                | (Streaming, Done)
                | (Streaming, Failed)
                | (Streaming, Closed)
                | (Done, Closed)
                | (Failed, Closed)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Closed => write!(f, "closed"),
            StreamState::Opening => write!(f, "opening"),
            StreamState::Streaming => write!(f, "streaming"),
            StreamState::Done => write!(f, "done"),
            StreamState::Failed => write!(f, "failed"),
        }
    }
}
