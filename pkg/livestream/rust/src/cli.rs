// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Result, anyhow};
use clap::Parser;
use dd_livestream::{LiveQuery, QueryType, TemplateVariables};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dd-livestream")]
#[command(about = "Tail NDJSON HTTP streams into bounded series buffers")]
#[command(version)]
pub struct Args {
    /// YAML config file
    #[arg(short, long, env = "DD_LIVESTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL prepended to every stream path (overrides the config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Stream path to query; repeat for several streams
    #[arg(short, long = "stream", required = true)]
    pub streams: Vec<String>,

    /// Per-series capacity
    #[arg(short, long)]
    pub buffer: Option<i64>,

    /// Template variable substituted in stream paths, as KEY=VALUE
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Print the stream table when exiting
    #[arg(long)]
    pub info: bool,
}

impl Args {
    pub fn queries(&self) -> Vec<LiveQuery> {
        self.streams
            .iter()
            .enumerate()
            .map(|(i, stream)| LiveQuery {
                ref_id: ref_id(i),
                query_type: QueryType::Json,
                stream: Some(stream.clone()),
                buffer: self.buffer,
            })
            .collect()
    }

    pub fn variables(&self) -> TemplateVariables {
        self.vars.iter().cloned().collect()
    }
}

/// Query editor style ref ids: A, B, ..., Z, A1, B1, ...
fn ref_id(i: usize) -> String {
    let letter = char::from(b'A' + (i % 26) as u8);
    match i / 26 {
        0 => letter.to_string(),
        round => format!("{letter}{round}"),
    }
}

fn parse_var(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(anyhow!("empty variable name in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
