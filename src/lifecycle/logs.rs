//! Log streams returned by the lifecycle manager.
//!
//! A snapshot is a finite, restartable list of lines. A follow stream reads a
//! live source and ends when the token is cancelled or the source closes.

use crate::cancel::CancelToken;
use crate::cloud::LogSource;
use crate::error::{DeployError, Result};

/// Lazily consumed log lines.
pub enum LogStream {
    /// Lines fetched once.
    Snapshot(LogSnapshot),
    /// Live lines.
    Follow(FollowStream),
}

impl LogStream {
    /// Next line, or `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the live source fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        match self {
            Self::Snapshot(snapshot) => Ok(snapshot.next()),
            Self::Follow(stream) => stream.next_line().await,
        }
    }

    /// Returns true for a live stream.
    #[must_use]
    pub const fn is_follow(&self) -> bool {
        matches!(self, Self::Follow(_))
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snapshot(snapshot) => f.debug_tuple("Snapshot").field(snapshot).finish(),
            Self::Follow(_) => f.write_str("Follow"),
        }
    }
}

/// Finite log output that can be read again from the start.
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    lines: Vec<String>,
    position: usize,
}

impl LogSnapshot {
    /// Wraps fetched lines.
    #[must_use]
    pub const fn new(lines: Vec<String>) -> Self {
        Self { lines, position: 0 }
    }

    /// Starts over from the first line.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// All lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Iterator for LogSnapshot {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.get(self.position).cloned();
        if line.is_some() {
            self.position += 1;
        }
        line
    }
}

/// Live log lines from the provider.
pub struct FollowStream {
    source: Box<dyn LogSource>,
    cancel: CancelToken,
}

impl FollowStream {
    /// Wraps a live source.
    #[must_use]
    pub fn new(source: Box<dyn LogSource>, cancel: CancelToken) -> Self {
        Self { source, cancel }
    }

    /// Next line; `None` once cancelled or closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Ok(None),
            line = self.source.next_line() => match line {
                // An interrupt also reaches the child; its exit is not a failure.
                Err(_) if self.cancel.is_cancelled() => Ok(None),
                other => other.map_err(DeployError::from),
            },
        }
    }
}
