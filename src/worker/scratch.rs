//! Per-task scratch space.
//!
//! Each task owns one `Scratch` for its lifetime. It holds cached summaries,
//! page selections and free-form notes between attempts, and is dropped when
//! the task reaches a terminal state. Nothing in it is shared across tasks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// A note recorded by a task attempt.
#[derive(Debug, Clone)]
pub struct ScratchNote {
    pub attempt: u32,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Key/value arena owned by a single task.
#[derive(Debug)]
pub struct Scratch {
    task_id: Uuid,
    attempt: u32,
    entries: BTreeMap<String, serde_json::Value>,
    notes: Vec<ScratchNote>,
    /// Coverage gaps seen by the current attempt.
    limitations: Vec<String>,
}

impl Scratch {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            attempt: 0,
            entries: BTreeMap::new(),
            notes: Vec::new(),
            limitations: Vec::new(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start a new attempt. Cached entries survive; limitations are
    /// re-collected by every attempt.
    pub fn begin_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
        self.limitations.clear();
    }

    /// Store a value under `key`, replacing any previous one.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.into(), value);
        Ok(())
    }

    /// Fetch and decode the value under `key`. `None` if absent or of the
    /// wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(ScratchNote {
            attempt: self.attempt,
            message: message.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn notes(&self) -> &[ScratchNote] {
        &self.notes
    }

    /// Record a coverage gap once per attempt.
    pub fn add_limitation(&mut self, limitation: impl Into<String>) {
        let limitation = limitation.into();
        if !self.limitations.contains(&limitation) {
            self.limitations.push(limitation);
        }
    }

    pub fn limitations(&self) -> &[String] {
        &self.limitations
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
