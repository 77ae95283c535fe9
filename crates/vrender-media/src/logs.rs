//! Bounded capture of subprocess output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Default cap on retained log bytes.
pub const DEFAULT_LOG_LIMIT: usize = 64 * 1024;

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct Inner {
    lines: VecDeque<String>,
    bytes: usize,
    dropped_bytes: usize,
    limit: usize,
}

/// Shared, size-capped line buffer.
///
/// Lines are kept in arrival order. Once the retained size passes the limit
/// the oldest lines are dropped, so memory stays bounded no matter how much
/// the process writes. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LIMIT)
    }
}

impl LogBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                lines: VecDeque::new(),
                bytes: 0,
                dropped_bytes: 0,
                limit: limit.max(2),
            })),
        }
    }

    /// Append one line of output.
    pub fn push(&self, stream: LogStream, line: &str) {
        let mut line = match stream {
            LogStream::Stdout => line.to_string(),
            LogStream::Stderr => format!("[stderr] {}", line),
        };

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // A single line larger than the whole budget keeps only its tail.
        if line.len() + 1 > inner.limit {
            let mut cut = line.len() + 1 - inner.limit;
            while !line.is_char_boundary(cut) {
                cut += 1;
            }
            inner.dropped_bytes += cut;
            line.drain(..cut);
        }

        inner.bytes += line.len() + 1;
        inner.lines.push_back(line);

        while inner.bytes > inner.limit {
            match inner.lines.pop_front() {
                Some(old) => {
                    inner.bytes -= old.len() + 1;
                    inner.dropped_bytes += old.len() + 1;
                }
                None => break,
            }
        }
    }

    /// Number of bytes dropped from the front so far.
    pub fn dropped_bytes(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).dropped_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).lines.is_empty()
    }

    /// Retained output, prefixed with a marker when anything was dropped.
    pub fn snapshot(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::with_capacity(inner.bytes + 64);
        if inner.dropped_bytes > 0 {
            out.push_str(&format!("[... {} bytes truncated ...]\n", inner.dropped_bytes));
        }
        for (i, line) in inner.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// Last `max_bytes` of retained output, cut at a line boundary when possible.
    pub fn tail(&self, max_bytes: usize) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut taken = Vec::new();
        let mut size = 0;
        for line in inner.lines.iter().rev() {
            if size + line.len() + 1 > max_bytes && !taken.is_empty() {
                break;
            }
            size += line.len() + 1;
            taken.push(line.as_str());
        }
        taken.reverse();
        let joined = taken.join("\n");
        if joined.len() > max_bytes {
            let mut cut = joined.len() - max_bytes;
            while !joined.is_char_boundary(cut) {
                cut += 1;
            }
            joined[cut..].to_string()
        } else {
            joined
        }
    }
}
