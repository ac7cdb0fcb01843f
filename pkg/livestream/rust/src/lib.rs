// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Live NDJSON stream ingestion.
//!
//! Opens chunked HTTP streams of newline-delimited JSON records
//! (`{"name": .., "ts": .., "val": ..}`), keeps the most recent samples of
//! every named series in bounded buffers and publishes a snapshot of all
//! series after each chunk.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod config;
mod decoder;
mod dispatcher;
mod errors;
mod handler;
mod query;
mod registry;
mod series;
mod state;

// Re-export the public API
pub use decoder::{ChunkDecoder, DEFAULT_MAX_LINE_BYTES, Record};
pub use dispatcher::{NoVariables, QueryDispatcher, QueryStream, TemplateVariables, VariableResolver};
pub use errors::{Error, Result};
pub use handler::{DEFAULT_CHANNEL_CAPACITY, StreamHandler, StreamHealth, StreamOptions};
pub use query::{
    DEFAULT_BUFFER, DataSourceOptions, Frame, LiveQuery, LoadingState, QueryResponse, QueryType,
};
pub use registry::StreamRegistry;
pub use series::{CircularSeriesBuffer, Sample, SeriesSnapshot};
pub use state::StreamState;
