// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One live HTTP stream and the series buffers it feeds.
//!
//! A [`StreamHandler`] owns a single connection. [`StreamHandler::open`]
//! spawns a read task that awaits body chunks one at a time, decodes them,
//! appends the records to per-series buffers and publishes a snapshot of
//! every series on a broadcast channel after each chunk. The task is
//! cancelled by [`StreamHandler::close`]; every mutation it makes is done
//! under the handler lock after re-checking its cancellation token, so a read
//! that completes after `close()` is dropped on the floor.

use crate::decoder::{ChunkDecoder, DEFAULT_MAX_LINE_BYTES, Record};
use crate::errors::{Error, Result};
use crate::query::{Frame, LiveQuery, LoadingState, QueryResponse};
use crate::series::CircularSeriesBuffer;
use crate::state::StreamState;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Snapshot events buffered per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Display name of the stream, from the query's path.
    pub name: String,
    /// Capacity of every series buffer of the stream.
    pub capacity: NonZeroUsize,
    pub channel_capacity: usize,
    pub max_line_bytes: usize,
}

impl StreamOptions {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(Error::InvalidCapacity { capacity: 0 })?;
        Ok(Self {
            name: name.into(),
            capacity,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        })
    }

    pub fn from_query(query: &LiveQuery, default_capacity: usize) -> Result<Self> {
        Self::new(query.stream_name(), query.capacity(default_capacity)?)
    }
}

/// Health of one stream, as shown by the introspection queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHealth {
    pub stream: String,
    pub name: String,
    /// Epoch millis of the last `open()`.
    pub opened: i64,
    /// Epoch millis of the last chunk that carried bytes.
    pub last_message: Option<i64>,
    pub chunks: u64,
    pub observers: usize,
    pub malformed: u64,
    pub state: StreamState,
}

struct Inner {
    state: StreamState,
    series: Vec<CircularSeriesBuffer>,
    index: HashMap<String, usize>,
    decoder: ChunkDecoder,
    opened: i64,
    last_message: Option<i64>,
    last_activity: Instant,
    chunks: u64,
    sender: Option<broadcast::Sender<QueryResponse>>,
    cancel: CancellationToken,
    /// Set once the handler is dropped from its registry. A retired handler
    /// never starts another read task.
    retired: bool,
}

impl Inner {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            state: StreamState::Closed,
            series: Vec::new(),
            index: HashMap::new(),
            decoder: ChunkDecoder::new(max_line_bytes),
            opened: now_millis(),
            last_message: None,
            last_activity: Instant::now(),
            chunks: 0,
            sender: None,
            cancel: CancellationToken::new(),
            retired: false,
        }
    }

    fn transition(&mut self, key: &str, next: StreamState) {
        if !self.state.can_transition_to(next) {
            warn!("[{key}] unexpected transition {} -> {next}", self.state);
        }
        self.state = next;
    }

    fn sender(&mut self, capacity: usize) -> &broadcast::Sender<QueryResponse> {
        self.sender
            .get_or_insert_with(|| broadcast::channel(capacity.max(1)).0)
    }

    /// Receiver for the current read. Without a pending read the receiver is
    /// already closed, as nothing would ever publish on it.
    fn receiver(&mut self, capacity: usize) -> broadcast::Receiver<QueryResponse> {
        if self.state.is_active() {
            return self.sender(capacity).subscribe();
        }
        broadcast::channel(1).1
    }

    fn publish(&self, event: QueryResponse) {
        if let Some(tx) = &self.sender {
            // An error only means nobody is subscribed right now.
            let _ = tx.send(event);
        }
    }

    fn frames(&self) -> Vec<Frame> {
        self.series
            .iter()
            .map(|buffer| Frame::Series(buffer.snapshot()))
            .collect()
    }

    fn append(&mut self, capacity: NonZeroUsize, record: &Record) {
        let idx = match self.index.get(&record.name) {
            Some(&idx) => idx,
            None => {
                let idx = self.series.len();
                self.series
                    .push(CircularSeriesBuffer::with_capacity(record.name.clone(), capacity));
                self.index.insert(record.name.clone(), idx);
                idx
            }
        };
        if let Some(buffer) = self.series.get_mut(idx) {
            buffer.append(record.sample());
        }
    }

    /// Apply one chunk and build the event to publish for it. `done` marks
    /// the end of the body.
    fn ingest(
        &mut self,
        key: &str,
        capacity: NonZeroUsize,
        chunk: &[u8],
        done: bool,
    ) -> QueryResponse {
        self.chunks += 1;
        self.last_activity = Instant::now();
        if !chunk.is_empty() {
            self.last_message = Some(now_millis());
        }

        let mut records = self.decoder.decode(chunk);
        if done {
            records.extend(self.decoder.finish());
        }
        for record in &records {
            self.append(capacity, record);
        }
        debug!(
            "[{key}] chunk {}: {} bytes, {} records",
            self.chunks,
            chunk.len(),
            records.len()
        );

        let state = if done {
            self.transition(key, StreamState::Done);
            LoadingState::Done
        } else {
            LoadingState::Streaming
        };
        QueryResponse {
            key: key.to_string(),
            state,
            data: self.frames(),
            error: None,
        }
    }

    fn health(&self, key: &str, name: &str) -> StreamHealth {
        StreamHealth {
            stream: key.to_string(),
            name: name.to_string(),
            opened: self.opened,
            last_message: self.last_message,
            chunks: self.chunks,
            observers: self
                .sender
                .as_ref()
                .map_or(0, broadcast::Sender::receiver_count),
            malformed: self.decoder.malformed(),
            state: self.state,
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

pub struct StreamHandler {
    url: String,
    options: StreamOptions,
    client: reqwest::Client,
    inner: Arc<Mutex<Inner>>,
}

impl StreamHandler {
    /// Create a closed handler for `url`. Nothing is fetched until `open()`.
    pub fn new(url: impl Into<String>, options: StreamOptions, client: reqwest::Client) -> Self {
        let inner = Inner::new(options.max_line_bytes);
        Self {
            url: url.into(),
            options,
            client,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// The stream key, i.e. the resolved URL.
    pub fn key(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn state(&self) -> StreamState {
        lock(&self.inner).state
    }

    /// Start reading the stream. Does nothing if a read task is already
    /// running. Reopening a finished, failed or closed stream reconnects and
    /// keeps the buffered series.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self) {
        let mut inner = lock(&self.inner);
        if inner.state.is_active() {
            debug!("[{}] already open", self.url);
            return;
        }
        self.start(&mut inner);
    }

    /// Open the stream unless it is already open, and subscribe to it. Both
    /// happen under the handler lock so the first snapshot of a new read
    /// cannot be missed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self) -> broadcast::Receiver<QueryResponse> {
        let mut inner = lock(&self.inner);
        if !inner.state.is_active() {
            self.start(&mut inner);
        }
        inner.receiver(self.options.channel_capacity)
    }

    fn start(&self, inner: &mut Inner) {
        if inner.retired {
            warn!("[{}] not reopening a stream that was removed", self.url);
            return;
        }
        inner.transition(&self.url, StreamState::Opening);
        inner.cancel = CancellationToken::new();
        inner.opened = now_millis();
        inner.last_activity = Instant::now();
        inner.decoder.reset();
        inner.sender(self.options.channel_capacity);

        info!("[{}] opening stream", self.url);
        // The task locks `inner` before it touches any state.
        tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            self.client.clone(),
            self.url.clone(),
            self.options.capacity,
            inner.cancel.clone(),
        ));
    }

    /// Cancel the read task and end the publication channel. No event is
    /// published after this returns.
    pub fn close(&self) {
        self.stop(&mut lock(&self.inner));
    }

    fn stop(&self, inner: &mut Inner) {
        inner.cancel.cancel();
        inner.sender = None;
        if inner.state != StreamState::Closed {
            inner.transition(&self.url, StreamState::Closed);
            info!("[{}] stream closed", self.url);
        }
    }

    /// Receive the snapshot events of the current read. The channel ends when
    /// the stream is done, fails or is closed; on a stream that is not open
    /// it is closed from the start.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryResponse> {
        lock(&self.inner).receiver(self.options.channel_capacity)
    }

    /// Close the stream for good. Used when it leaves its registry.
    pub(crate) fn retire(&self) {
        let mut inner = lock(&self.inner);
        self.stop(&mut inner);
        inner.retired = true;
    }

    pub fn info(&self) -> StreamHealth {
        lock(&self.inner).health(&self.url, &self.options.name)
    }

    /// Current contents of every series, in first-seen order.
    pub fn snapshot(&self) -> Vec<Frame> {
        lock(&self.inner).frames()
    }

    /// Time since the stream was last opened or last delivered a chunk.
    pub fn idle_for(&self) -> Duration {
        lock(&self.inner).last_activity.elapsed()
    }
}

impl Drop for StreamHandler {
    fn drop(&mut self) {
        lock(&self.inner).cancel.cancel();
    }
}

async fn read_loop(
    inner: Arc<Mutex<Inner>>,
    client: reqwest::Client,
    url: String,
    capacity: NonZeroUsize,
    token: CancellationToken,
) {
    let response = tokio::select! {
        _ = token.cancelled() => return,
        result = client.get(&url).send() => result.and_then(reqwest::Response::error_for_status),
    };
    let mut response = match response {
        Ok(response) => response,
        Err(source) => {
            fail(&inner, &url, &token, source);
            return;
        }
    };

    {
        let mut guard = lock(&inner);
        if token.is_cancelled() {
            return;
        }
        guard.transition(&url, StreamState::Streaming);
    }
    info!("[{url}] connected ({})", response.status());

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                if !deliver(&inner, &url, capacity, &token, &bytes, false) {
                    return;
                }
            }
            Ok(None) => {
                if deliver(&inner, &url, capacity, &token, &[], true) {
                    info!("[{url}] stream finished");
                }
                return;
            }
            Err(source) => {
                fail(&inner, &url, &token, source);
                return;
            }
        }
    }
}

/// Apply one chunk and publish its snapshot. Returns false if the handler
/// was closed in the meantime, in which case nothing is changed.
fn deliver(
    inner: &Mutex<Inner>,
    url: &str,
    capacity: NonZeroUsize,
    token: &CancellationToken,
    chunk: &[u8],
    done: bool,
) -> bool {
    let mut guard = lock(inner);
    if token.is_cancelled() {
        return false;
    }
    let event = guard.ingest(url, capacity, chunk, done);
    guard.publish(event);
    if done {
        guard.sender = None;
    }
    true
}

fn fail(inner: &Mutex<Inner>, url: &str, token: &CancellationToken, source: reqwest::Error) {
    let mut guard = lock(inner);
    if token.is_cancelled() {
        return;
    }
    let err = Error::Transport {
        url: url.to_string(),
        source,
    };
    warn!("[{url}] stream failed: {err}");
    guard.transition(url, StreamState::Failed);
    let event = QueryResponse {
        key: url.to_string(),
        state: LoadingState::Error,
        data: guard.frames(),
        error: Some(err.to_string()),
    };
    guard.publish(event);
    guard.sender = None;
}

#[cfg(test)]
impl StreamHandler {
    /// Put the handler in `Streaming` as if a read task had connected, and
    /// return that read's token.
    pub(crate) fn mark_connected(&self) -> CancellationToken {
        let mut inner = lock(&self.inner);
        inner.state = StreamState::Streaming;
        inner.sender(self.options.channel_capacity);
        inner.cancel.clone()
    }
}
