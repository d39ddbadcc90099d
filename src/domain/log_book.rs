//! User-visible session log
//!
//! A bounded ring of the most recent entries, plus a cloneable handle that
//! appends to it, mirrors to `tracing` and forwards to the front end.

use crate::domain::models::{AppEvent, LogDirection, LogEntry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const DEFAULT_LOG_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct LogBook {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
}

impl LogBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    pub fn push(&mut self, text: impl Into<String>, direction: LogDirection) -> LogEntry {
        let entry = LogEntry {
            id: self.next_id,
            timestamp: now_millis(),
            text: text.into(),
            direction,
        };
        self.next_id += 1;

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    book: Arc<Mutex<LogBook>>,
    events: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl SessionLog {
    pub fn new(capacity: usize, events: Option<mpsc::UnboundedSender<AppEvent>>) -> Self {
        Self {
            book: Arc::new(Mutex::new(LogBook::new(capacity))),
            events,
        }
    }

    /// A log with nowhere to forward entries to.
    pub fn detached() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY, None)
    }

    pub fn append(&self, text: impl Into<String>, direction: LogDirection) {
        let entry = self
            .book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text, direction);

        match direction {
            LogDirection::Plain => info!("{}", entry.text),
            LogDirection::Out => debug!(">> {}", entry.text),
            LogDirection::In => debug!("<< {}", entry.text),
        }

        if let Some(events) = &self.events {
            let _ = events.send(AppEvent::Log(entry));
        }
    }

    pub fn plain(&self, text: impl Into<String>) {
        self.append(text, LogDirection::Plain);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .cloned()
            .collect()
    }

    /// Forward an arbitrary event to the front end, if one is listening.
    pub fn emit(&self, event: AppEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_only_most_recent_entries() {
        let mut book = LogBook::new(DEFAULT_LOG_CAPACITY);
        for i in 0..25 {
            book.push(format!("line {}", i), LogDirection::Plain);
        }
        assert_eq!(book.len(), 20);
        let first = book.entries().next().unwrap();
        assert_eq!(first.id, 5);
        assert_eq!(first.text, "line 5");
    }

    #[test]
    fn session_log_forwards_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let log = SessionLog::new(4, Some(tx));
        log.append("135;80;1", LogDirection::Out);

        match rx.try_recv() {
            Ok(AppEvent::Log(entry)) => {
                assert_eq!(entry.text, "135;80;1");
                assert_eq!(entry.direction, LogDirection::Out);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(log.snapshot().len(), 1);
    }
}
