// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::handler::{StreamHandler, StreamHealth, StreamOptions};
use crate::query::QueryResponse;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

type Handlers = BTreeMap<String, Arc<StreamHandler>>;

/// Handlers keyed by resolved URL. At most one handler exists per URL.
pub struct StreamRegistry {
    client: reqwest::Client,
    handlers: Mutex<Handlers>,
}

impl StreamRegistry {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            handlers: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the handler for `url`, creating a closed one with `options` if
    /// there is none. `options` is ignored when the handler already exists.
    pub fn resolve(&self, url: &str, options: StreamOptions) -> Arc<StreamHandler> {
        self.entry(&mut self.lock(), url, options)
    }

    /// Resolve the handler for `url`, open it unless it is already open and
    /// subscribe to it. The registry stays locked throughout, so the handler
    /// cannot be evicted between resolution and opening.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(
        &self,
        url: &str,
        options: StreamOptions,
    ) -> (Arc<StreamHandler>, broadcast::Receiver<QueryResponse>) {
        let mut handlers = self.lock();
        let handler = self.entry(&mut handlers, url, options);
        let rx = handler.attach();
        (handler, rx)
    }

    fn entry(&self, handlers: &mut Handlers, url: &str, options: StreamOptions) -> Arc<StreamHandler> {
        if let Some(handler) = handlers.get(url) {
            return Arc::clone(handler);
        }
        debug!("[{url}] registering stream (capacity {})", options.capacity);
        let handler = Arc::new(StreamHandler::new(url, options, self.client.clone()));
        handlers.insert(url.to_string(), Arc::clone(&handler));
        handler
    }

    pub fn get(&self, url: &str) -> Option<Arc<StreamHandler>> {
        self.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Health of every registered stream, ordered by key.
    pub fn list(&self) -> Vec<StreamHealth> {
        self.lock().values().map(|h| h.info()).collect()
    }

    /// Close and forget the handler for `url`. The removed handler cannot be
    /// reopened.
    pub fn remove(&self, url: &str) -> bool {
        let mut handlers = self.lock();
        match handlers.remove(url) {
            Some(handler) => {
                handler.retire();
                info!("[{url}] stream removed");
                true
            }
            None => false,
        }
    }

    /// Close and forget every handler that has no read task, no subscriber
    /// and no activity for at least `max_idle`. Returns the evicted keys.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut handlers = self.lock();
        let keys: Vec<String> = handlers
            .iter()
            .filter(|(_, h)| {
                let info = h.info();
                !info.state.is_active() && info.observers == 0 && h.idle_for() >= max_idle
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(handler) = handlers.remove(key) {
                handler.retire();
                info!("[{key}] evicted idle stream");
            }
        }
        keys
    }

    /// Close every handler, keeping them registered.
    pub fn close_all(&self) {
        for handler in self.lock().values() {
            handler.close();
        }
    }
}
