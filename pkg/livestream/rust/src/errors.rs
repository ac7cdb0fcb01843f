// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid buffer capacity {capacity}: must be greater than zero")]
    InvalidCapacity { capacity: i64 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
