// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::series::Sample;
use log::debug;
use memchr::memchr;
use serde::Deserialize;
use serde_json::Value;

/// Longest partial line carried between chunks before it is dropped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded NDJSON row. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub name: String,
    pub ts: f64,
    pub val: f64,
}

impl Record {
    pub fn sample(&self) -> Sample {
        Sample::new(self.ts as i64, self.val)
    }
}

/// Turns the chunks of one HTTP body into records.
///
/// Bytes after the last newline of a chunk are held back and prefixed to the
/// next chunk, so a line (or a UTF-8 character) split by the transport is
/// decoded once it is complete. Lines that do not decode into a [`Record`]
/// are skipped and counted; they never interrupt the rest of the chunk.
#[derive(Debug)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    max_line_bytes: usize,
    // Set after an oversized partial line was dropped; the rest of that line
    // is skipped up to the next newline.
    discarding: bool,
    malformed: u64,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl ChunkDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            malformed: 0,
        }
    }

    /// Decode every complete line of `chunk`, in order.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Record> {
        let mut records = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = memchr(b'\n', rest) {
            let (line, tail) = rest.split_at(pos);
            rest = tail.get(1..).unwrap_or_default();

            if self.discarding {
                self.discarding = false;
                self.pending.clear();
                continue;
            }
            if self.pending.is_empty() {
                self.decode_line(line, &mut records);
            } else {
                let mut joined = std::mem::take(&mut self.pending);
                joined.extend_from_slice(line);
                self.decode_line(&joined, &mut records);
            }
        }

        self.carry(rest);
        records
    }

    /// Decode whatever is still held back. Called once the body has ended.
    pub fn finish(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        let line = std::mem::take(&mut self.pending);
        if !std::mem::replace(&mut self.discarding, false) {
            self.decode_line(&line, &mut records);
        }
        records
    }

    /// Drop any partial line, e.g. before reconnecting.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    /// Number of lines skipped because they were not valid records.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn carry(&mut self, rest: &[u8]) {
        if rest.is_empty() || self.discarding {
            return;
        }
        if self.pending.len() + rest.len() > self.max_line_bytes {
            debug!(
                "dropping partial line longer than {} bytes",
                self.max_line_bytes
            );
            self.malformed += 1;
            self.pending.clear();
            self.discarding = true;
            return;
        }
        self.pending.extend_from_slice(rest);
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Record>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match parse_record(line) {
            Some(record) => out.push(record),
            None => {
                self.malformed += 1;
                debug!("skipping malformed line ({} bytes)", line.len());
            }
        }
    }
}

fn parse_record(line: &[u8]) -> Option<Record> {
    let text = String::from_utf8_lossy(line);
    let value: Value = serde_json::from_str(&text).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn record(name: &str, ts: f64, val: f64) -> Record {
        Record {
            name: name.to_string(),
            ts,
            val,
        }
    }

    #[test]
    fn test_good_and_malformed_line() {
        let mut dec = ChunkDecoder::default();
        let out = dec.decode(b"{\"name\":\"a\",\"ts\":1000,\"val\":5}\n{\"name\":\"a\",\"ts\":\n");
        assert_eq!(out, vec![record("a", 1000.0, 5.0)]);
        assert_eq!(dec.malformed(), 1);
    }

    #[test]
    fn test_malformed_line_does_not_stop_later_lines() {
        let mut dec = ChunkDecoder::default();
        let out = dec.decode(
            b"garbage\n{\"name\":\"a\",\"ts\":1,\"val\":1}\r\n{\"name\":\"b\",\"ts\":2,\"val\":2}\n",
        );
        assert_eq!(out, vec![record("a", 1.0, 1.0), record("b", 2.0, 2.0)]);
        assert_eq!(dec.malformed(), 1);
    }

    #[test]
    fn test_missing_or_mistyped_fields_are_skipped() {
        let mut dec = ChunkDecoder::default();
        let chunk = concat!(
            "{\"name\":\"a\",\"ts\":1}\n",
            "{\"ts\":1,\"val\":2}\n",
            "{\"name\":7,\"ts\":1,\"val\":2}\n",
            "{\"name\":\"a\",\"ts\":\"1\",\"val\":2}\n",
            "[\"a\",1,2]\n",
            "42\n",
        );
        assert!(dec.decode(chunk.as_bytes()).is_empty());
        assert_eq!(dec.malformed(), 6);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let mut dec = ChunkDecoder::default();
        let out = dec.decode(b"{\"name\":\"a\",\"ts\":5,\"val\":1.5,\"host\":\"h1\"}\n");
        assert_eq!(out, vec![record("a", 5.0, 1.5)]);
        assert_eq!(dec.malformed(), 0);
    }

    #[test]
    fn test_blank_lines_are_not_malformed() {
        let mut dec = ChunkDecoder::default();
        let out = dec.decode(b"\n\r\n   \n{\"name\":\"a\",\"ts\":1,\"val\":1}\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(dec.malformed(), 0);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut dec = ChunkDecoder::default();
        assert!(dec.decode(b"{\"name\":\"a\",\"ts\"").is_empty());
        assert_eq!(dec.pending_len(), 16);
        let out = dec.decode(b":10,\"val\":3}\n{\"name\":\"b\"");
        assert_eq!(out, vec![record("a", 10.0, 3.0)]);
        let out = dec.decode(b",\"ts\":11,\"val\":4}\n");
        assert_eq!(out, vec![record("b", 11.0, 4.0)]);
        assert_eq!(dec.malformed(), 0);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let line = "{\"name\":\"température\",\"ts\":1,\"val\":2}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (head, tail) = line.split_at(split);

        let mut dec = ChunkDecoder::default();
        assert!(dec.decode(head).is_empty());
        let out = dec.decode(tail);
        assert_eq!(out, vec![record("température", 1.0, 2.0)]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut dec = ChunkDecoder::default();
        let out = dec.decode(b"{\"name\":\"a\",\"ts\":1000,\"val\":5}\n{\"name\":\"a\",\"ts\":2000,\"val\":7}");
        assert_eq!(out, vec![record("a", 1000.0, 5.0)]);
        assert_eq!(dec.finish(), vec![record("a", 2000.0, 7.0)]);
        assert_eq!(dec.pending_len(), 0);
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn test_finish_with_garbled_tail_counts_malformed() {
        let mut dec = ChunkDecoder::default();
        dec.decode(b"{\"name\":\"a\",\"ts");
        assert!(dec.finish().is_empty());
        assert_eq!(dec.malformed(), 1);
    }

    #[test]
    fn test_oversized_partial_line_is_dropped() {
        let mut dec = ChunkDecoder::new(16);
        assert!(dec.decode(b"{\"name\":\"aaaaaaaaaaaaaaaa").is_empty());
        assert_eq!(dec.pending_len(), 0);
        assert!(dec.decode(b"aaaaaaaa").is_empty());
        let out = dec.decode(b"\",\"ts\":1,\"val\":1}\n{\"name\":\"b\",\"ts\":2,\"val\":2}\n");
        assert_eq!(out, vec![record("b", 2.0, 2.0)]);
        assert_eq!(dec.malformed(), 1);
    }

    #[test]
    fn test_reset_drops_partial_line() {
        let mut dec = ChunkDecoder::default();
        dec.decode(b"{\"name\":");
        dec.reset();
        assert_eq!(dec.pending_len(), 0);
        assert!(dec.finish().is_empty());
        assert_eq!(dec.malformed(), 0);
    }

    #[test]
    fn test_record_sample_truncates_timestamp() {
        let sample = record("a", 1500.9, 2.5).sample();
        assert_eq!(sample, Sample::new(1500, 2.5));
    }
}
