//! Diagnostic reader for child process stderr.
//!
//! Image tools write warnings and progress to stderr, sometimes rewriting the
//! same terminal line with carriage returns. This reader yields trimmed text
//! records delimited by either `\n` or `\r`, and caps the length of a single
//! record so a tool dumping binary garbage on stderr cannot grow the buffer
//! without bound.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Longest record kept; anything beyond this is cut into several records.
const MAX_RECORD_LEN: usize = 4096;

/// Reads an async stream and yields text records delimited by `\n` or `\r`.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 1024],
    max_len: usize,
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 1024],
            max_len: MAX_RECORD_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Returns the next non-empty record from the stream, or `None` at EOF.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            let delimiter = find_record_delimiter(&self.pending);
            if let Some(idx) = delimiter
                && idx <= self.max_len
            {
                let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
                consume_delimiters(&mut self.pending);
                if let Some(record) = to_record(&record_bytes) {
                    return Ok(Some(record));
                }
                continue;
            }

            if delimiter.is_some() || self.pending.len() >= self.max_len {
                let record_bytes: Vec<u8> = self.pending.drain(..self.max_len).collect();
                if let Some(record) = to_record(&record_bytes) {
                    return Ok(Some(record));
                }
                continue;
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let rest = std::mem::take(&mut self.pending);
                return Ok(to_record(&rest));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn to_record(bytes: &[u8]) -> Option<String> {
    let record = String::from_utf8_lossy(bytes).trim().to_string();
    (!record.is_empty()).then_some(record)
}

fn find_record_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| matches!(b, b'\n' | b'\r'))
}

fn consume_delimiters(buf: &mut Vec<u8>) {
    let n = buf
        .iter()
        .take_while(|&&b| matches!(b, b'\n' | b'\r'))
        .count();
    if n > 0 {
        buf.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn records(input: &'static [u8], max_len: Option<usize>) -> Vec<String> {
        let (mut tx, rx) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = tx.write_all(input).await;
        });

        let mut reader = OutputRecordReader::new(rx);
        if let Some(max) = max_len {
            reader = reader.with_max_len(max);
        }
        let mut out = Vec::new();
        while let Some(line) = reader.next_record().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn splits_on_cr_and_lf() {
        assert_eq!(
            records(b"one\rtwo\nthree\r\nfour", None).await,
            vec!["one", "two", "three", "four"]
        );
    }

    #[tokio::test]
    async fn skips_blank_records() {
        assert_eq!(records(b"\n\n  \nwarning: x\n\n", None).await, vec!["warning: x"]);
    }

    #[tokio::test]
    async fn caps_record_length() {
        assert_eq!(records(b"abcdefgh\n", Some(3)).await, vec!["abc", "def", "gh"]);
    }
}
