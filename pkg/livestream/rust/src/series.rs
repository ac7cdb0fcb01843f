// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// One observation of a series. `timestamp` is in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Serialized as a `[timestamp, value]` pair.
impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.timestamp, self.value).serialize(serializer)
    }
}

/// Point-in-time copy of a series, safe to hand to other tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub samples: Vec<Sample>,
}

/// Fixed-capacity buffer of samples for one named series.
///
/// Samples are kept in arrival order. Appending past capacity drops the
/// oldest sample.
#[derive(Debug)]
pub struct CircularSeriesBuffer {
    name: String,
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl CircularSeriesBuffer {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(Error::InvalidCapacity { capacity: 0 })?;
        Ok(Self::with_capacity(name, capacity))
    }

    pub fn with_capacity(name: impl Into<String>, capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            name: name.into(),
            capacity,
            // Large capacities grow on demand instead of reserving up front.
            samples: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn append(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            name: self.name.clone(),
            samples: self.samples.iter().copied().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
