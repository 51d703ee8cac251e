//! Injected logging handle.
//!
//! Components receive a [`Logger`] at construction instead of reaching for a
//! process-wide logger. Every message is emitted as a `tracing` event; the
//! handle adds two things on top:
//!
//! - an `update` flag marking progress lines that a terminal front end may
//!   redraw in place; those lines are emitted under [`PROGRESS_TARGET`],
//! - a demotion depth. While any [`VerbosityGuard`] returned by
//!   [`Logger::demote`] is alive, `info` messages are emitted at `debug`
//!   level. Clones share the depth, so a sweep can quiet the evaluator it
//!   drives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::Level;

/// Target of in-place progress lines, so subscribers can route them apart.
pub const PROGRESS_TARGET: &str = "mayo::progress";

/// A log line recorded by a capturing logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub update: bool,
}

#[derive(Debug, Default)]
struct LoggerState {
    demotion: AtomicUsize,
    records: Option<Mutex<Vec<LogRecord>>>,
}

/// Cloneable logging handle.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    state: Arc<LoggerState>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger that also keeps every emitted line in memory.
    pub fn capturing() -> Self {
        Self {
            state: Arc::new(LoggerState {
                demotion: AtomicUsize::new(0),
                records: Some(Mutex::new(Vec::new())),
            }),
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(Level::DEBUG, message.as_ref(), false);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(self.info_level(), message.as_ref(), false);
    }

    /// An `info` line that replaces the previous progress line.
    pub fn info_update(&self, message: impl AsRef<str>) {
        self.emit(self.info_level(), message.as_ref(), true);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(Level::WARN, message.as_ref(), false);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(Level::ERROR, message.as_ref(), false);
    }

    /// Push one demotion level; it is popped when the guard drops.
    pub fn demote(&self) -> VerbosityGuard {
        self.state.demotion.fetch_add(1, Ordering::SeqCst);
        VerbosityGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_demoted(&self) -> bool {
        self.state.demotion.load(Ordering::SeqCst) > 0
    }

    /// Lines captured so far. Empty unless built with [`Logger::capturing`].
    pub fn records(&self) -> Vec<LogRecord> {
        match &self.state.records {
            Some(records) => records.lock().map(|r| r.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn info_level(&self) -> Level {
        if self.is_demoted() {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    fn emit(&self, level: Level, message: &str, update: bool) {
        if update {
            match level {
                Level::INFO => tracing::info!(target: PROGRESS_TARGET, update, "{message}"),
                _ => tracing::debug!(target: PROGRESS_TARGET, update, "{message}"),
            }
        } else {
            match level {
                Level::ERROR => tracing::error!(update, "{message}"),
                Level::WARN => tracing::warn!(update, "{message}"),
                Level::INFO => tracing::info!(update, "{message}"),
                Level::DEBUG => tracing::debug!(update, "{message}"),
                _ => tracing::trace!(update, "{message}"),
            }
        }
        if let Some(records) = &self.state.records {
            if let Ok(mut records) = records.lock() {
                records.push(LogRecord {
                    level,
                    message: message.to_string(),
                    update,
                });
            }
        }
    }
}

/// Scope token returned by [`Logger::demote`].
#[must_use = "demotion ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct VerbosityGuard {
    state: Arc<LoggerState>,
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        self.state.demotion.fetch_sub(1, Ordering::SeqCst);
    }
}
