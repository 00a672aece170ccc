//! Child stderr record reader.
//!
//! ffmpeg rewrites its progress line with bare carriage returns, so a plain
//! `lines()` reader would sit on the data until the process exits. This
//! reader yields records delimited by `\r` or `\n` as soon as they arrive.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Yields text records from a child output stream, split on `\r` and `\n`.
pub struct StderrRecords<R> {
    source: R,
    carry: Vec<u8>,
    ready: VecDeque<String>,
    chunk: Box<[u8; 8192]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> StderrRecords<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            carry: Vec::new(),
            ready: VecDeque::new(),
            chunk: Box::new([0u8; 8192]),
            eof: false,
        }
    }

    /// Next non-empty record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.source.read(&mut self.chunk[..]).await?;
            if n == 0 {
                self.eof = true;
                let tail = String::from_utf8_lossy(&self.carry).trim().to_string();
                self.carry.clear();
                if !tail.is_empty() {
                    self.ready.push_back(tail);
                }
                continue;
            }

            self.carry.extend_from_slice(&self.chunk[..n]);
            self.split_carry();
        }
    }

    /// Move complete records out of the carry buffer.
    fn split_carry(&mut self) {
        let mut start = 0;
        for i in 0..self.carry.len() {
            if self.carry[i] == b'\n' || self.carry[i] == b'\r' {
                if i > start {
                    let record = String::from_utf8_lossy(&self.carry[start..i])
                        .trim()
                        .to_string();
                    if !record.is_empty() {
                        self.ready.push_back(record);
                    }
                }
                start = i + 1;
            }
        }
        self.carry.drain(..start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn collect(input: &'static [u8]) -> Vec<String> {
        let (mut tx, rx) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = tx.write_all(input).await;
        });

        let mut reader = StderrRecords::new(rx);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_splits_on_cr_and_lf() {
        let records = collect(b"one\rtwo\nthree\r\nfour").await;
        assert_eq!(records, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    async fn test_skips_empty_records() {
        let records = collect(b"\r\r\na\n\n\rb\n").await;
        assert_eq!(records, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_trailing_record_without_delimiter() {
        let records = collect(b"frame=1\rframe=2").await;
        assert_eq!(records, vec!["frame=1", "frame=2"]);
    }
}
