// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::decoder::DEFAULT_MAX_LINE_BYTES;
use crate::errors::Result;
use crate::handler::{DEFAULT_CHANNEL_CAPACITY, StreamHealth, StreamOptions};
use crate::query::{
    DEFAULT_BUFFER, DataSourceOptions, Frame, LiveQuery, LoadingState, QueryResponse, QueryType,
};
use crate::registry::StreamRegistry;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;

/// Merged events of every target of one query.
pub type QueryStream = Pin<Box<dyn Stream<Item = QueryResponse> + Send>>;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Substitutes dashboard variables in a stream path.
pub trait VariableResolver: Send + Sync {
    fn replace(&self, input: &str) -> String;
}

/// Leaves paths untouched.
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn replace(&self, input: &str) -> String {
        input.to_string()
    }
}

/// Replaces `$name` and `${name}` with values from a fixed map. Unknown
/// variables are left as written.
#[derive(Debug, Clone, Default)]
pub struct TemplateVariables {
    vars: HashMap<String, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl VariableResolver for TemplateVariables {
    fn replace(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let braced = chars.next_if_eq(&'{').is_some();
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_ascii_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            let closed = braced && chars.next_if_eq(&'}').is_some();

            match self.vars.get(&name) {
                Some(value) if closed || !braced => out.push_str(value),
                _ => {
                    out.push('$');
                    if braced {
                        out.push('{');
                    }
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
        }
        out
    }
}

enum Target {
    Stream { url: String, options: StreamOptions },
    Info(QueryType),
}

/// Entry point for queries against one data source instance.
///
/// Owns the stream registry; handlers live as long as the dispatcher unless
/// they are evicted.
pub struct QueryDispatcher {
    base_url: String,
    default_buffer: usize,
    channel_capacity: usize,
    max_line_bytes: usize,
    registry: Arc<StreamRegistry>,
    variables: Arc<dyn VariableResolver>,
}

impl QueryDispatcher {
    pub fn new(options: &DataSourceOptions, client: reqwest::Client) -> Self {
        Self {
            base_url: options.base_url.clone(),
            default_buffer: DEFAULT_BUFFER,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            registry: Arc::new(StreamRegistry::new(client)),
            variables: Arc::new(NoVariables),
        }
    }

    pub fn with_variables(mut self, variables: Arc<dyn VariableResolver>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_default_buffer(mut self, capacity: usize) -> Self {
        self.default_buffer = capacity;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Base URL followed by the variable-substituted stream path.
    pub fn stream_url(&self, query: &LiveQuery) -> String {
        let path = query.stream.as_deref().unwrap_or_default();
        format!("{}{}", self.base_url, self.variables.replace(path))
    }

    fn stream_options(&self, query: &LiveQuery) -> Result<StreamOptions> {
        let mut options = StreamOptions::from_query(query, self.default_buffer)?;
        options.channel_capacity = self.channel_capacity;
        options.max_line_bytes = self.max_line_bytes;
        Ok(options)
    }

    /// Run every target of a query and merge their events.
    ///
    /// Stream targets share one handler per resolved URL across calls; the
    /// handler is opened unless it is already connecting or streaming.
    /// Introspection targets yield a single table event. All targets are
    /// validated before any stream is opened. Must be called from within a
    /// Tokio runtime.
    pub fn query(&self, targets: &[LiveQuery]) -> Result<QueryStream> {
        let plan = targets
            .iter()
            .map(|target| -> Result<Target> {
                if target.query_type.is_stream() {
                    Ok(Target::Stream {
                        url: self.stream_url(target),
                        options: self.stream_options(target)?,
                    })
                } else {
                    Ok(Target::Info(target.query_type))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut merged: StreamMap<usize, QueryStream> = StreamMap::new();
        let mut seen = HashSet::new();
        for (idx, target) in plan.into_iter().enumerate() {
            match target {
                Target::Stream { url, options } => {
                    if !seen.insert(url.clone()) {
                        continue;
                    }
                    let (_, rx) = self.registry.attach(&url, options);
                    merged.insert(idx, subscription(url, rx));
                }
                Target::Info(kind) => {
                    let event = match kind {
                        QueryType::OpenStreams => self.open_stream_info(),
                        _ => self.available_streams(),
                    };
                    merged.insert(idx, Box::pin(tokio_stream::once(event)));
                }
            }
        }

        debug!("dispatching {} target(s)", merged.len());
        Ok(Box::pin(merged.map(|(_, event)| event)))
    }

    /// One row per stream that is connecting or streaming.
    pub fn open_stream_info(&self) -> QueryResponse {
        let rows = self
            .registry
            .list()
            .into_iter()
            .filter(|row| row.state.is_active())
            .collect();
        info_response("openStreamInfo", rows)
    }

    /// One row per registered stream.
    pub fn available_streams(&self) -> QueryResponse {
        info_response("avaliableStreams", self.registry.list())
    }

    /// Periodically evict streams idle for `max_idle`, until `token` is
    /// cancelled.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        max_idle: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_REAP_INTERVAL));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(max_idle);
                        if !evicted.is_empty() {
                            debug!("reaper evicted {} stream(s)", evicted.len());
                        }
                    }
                }
            }
        })
    }

    /// Close every stream.
    pub fn shutdown(&self) {
        self.registry.close_all();
    }
}

fn info_response(key: &str, rows: Vec<StreamHealth>) -> QueryResponse {
    QueryResponse {
        key: key.to_string(),
        state: LoadingState::Done,
        data: vec![Frame::StreamInfo { rows }],
        error: None,
    }
}

fn subscription(url: String, rx: broadcast::Receiver<QueryResponse>) -> QueryStream {
    Box::pin(BroadcastStream::new(rx).filter_map(move |event| match event {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("[{url}] subscriber lagged, skipped {skipped} snapshot(s)");
            None
        }
    }))
}
