// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Local HTTP server that streams request bodies chunk by chunk.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use dd_livestream::QueryResponse;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type Chunk = Result<Bytes, io::Error>;
type Feeds = Arc<Mutex<HashMap<String, VecDeque<mpsc::Receiver<Chunk>>>>>;

/// Sending half of one response body. Dropping it ends the body.
pub struct Feed {
    tx: mpsc::Sender<Chunk>,
}

impl Feed {
    /// Send one chunk. Returns false once the client has gone away.
    pub async fn send(&self, chunk: &str) -> bool {
        self.tx
            .send(Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .await
            .is_ok()
    }

    /// Fail the body, which makes the server drop the connection before the
    /// terminating chunk.
    pub async fn abort(self) {
        let _ = self
            .tx
            .send(Err(io::Error::other("body aborted")))
            .await;
    }
}

/// Serves one queued [`Feed`] per request on a path; paths without a queued
/// feed answer 404.
pub struct StreamServer {
    addr: SocketAddr,
    feeds: Feeds,
    requests: Arc<Mutex<HashMap<String, usize>>>,
    task: JoinHandle<()>,
}

impl StreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let feeds: Feeds = Arc::default();
        let requests: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let task = tokio::spawn({
            let feeds = Arc::clone(&feeds);
            let requests = Arc::clone(&requests);
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let io = TokioIo::new(stream);
                    let feeds = Arc::clone(&feeds);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let path = req.uri().path().to_string();
                            *requests.lock().unwrap().entry(path.clone()).or_default() += 1;
                            let feed = feeds
                                .lock()
                                .unwrap()
                                .get_mut(&path)
                                .and_then(VecDeque::pop_front);
                            async move { Ok::<_, Infallible>(respond(feed)) }
                        });
                        let _ = http1::Builder::new().serve_connection(io, service).await;
                    });
                }
            }
        });

        Self {
            addr,
            feeds,
            requests,
            task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    /// Queue a body for the next request on `path`.
    pub fn feed(&self, path: &str) -> Feed {
        let (tx, rx) = mpsc::channel(16);
        self.feeds
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(rx);
        Feed { tx }
    }

    /// Number of requests received on `path`.
    pub fn requests(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn respond(feed: Option<mpsc::Receiver<Chunk>>) -> Response<BoxBody<Bytes, io::Error>> {
    match feed {
        Some(rx) => {
            let frames = ReceiverStream::new(rx).map(|chunk| chunk.map(Frame::data));
            Response::new(StreamBody::new(frames).boxed())
        }
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(
                Full::new(Bytes::from_static(b"Not found"))
                    .map_err(|never: Infallible| match never {})
                    .boxed(),
            )
            .unwrap(),
    }
}

/// Next merged event, failing the test after [`DEFAULT_TIMEOUT`].
pub async fn next_event<S>(events: &mut S) -> QueryResponse
where
    S: tokio_stream::Stream<Item = QueryResponse> + Unpin,
{
    tokio::time::timeout(DEFAULT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Wait for the merged stream to end, failing the test on any event.
pub async fn assert_ended<S>(events: &mut S)
where
    S: tokio_stream::Stream<Item = QueryResponse> + Unpin,
{
    let next = tokio::time::timeout(DEFAULT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for the stream to end");
    assert!(next.is_none(), "unexpected event: {next:?}");
}

/// One NDJSON line.
pub fn line(name: &str, ts: i64, val: f64) -> String {
    format!("{{\"name\":\"{name}\",\"ts\":{ts},\"val\":{val}}}\n")
}

/// Read events until one matches `pred` and return it.
pub async fn until<S, F>(events: &mut S, mut pred: F) -> QueryResponse
where
    S: tokio_stream::Stream<Item = QueryResponse> + Unpin,
    F: FnMut(&QueryResponse) -> bool,
{
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Timestamps of series `name` in `event`.
pub fn timestamps(event: &QueryResponse, name: &str) -> Vec<i64> {
    event
        .series(name)
        .map(|s| s.samples.iter().map(|sample| sample.timestamp).collect())
        .unwrap_or_default()
}
