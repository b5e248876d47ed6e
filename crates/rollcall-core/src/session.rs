//! Per-run attendance state.
//!
//! Each identity moves from unseen to recorded exactly once per session.
//! There is no expiry: a person who leaves and returns stays recorded.

use crate::types::normalize_identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One recorded first sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub first_seen: DateTime<Utc>,
}

/// Outcome of a single `observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    FirstSighting,
    AlreadyRecorded,
}

/// In-memory attendance state for one run. `observe` is the only mutator.
#[derive(Debug)]
pub struct AttendanceSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    seen: HashSet<String>,
    records: Vec<AttendanceRecord>,
}

impl AttendanceSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            seen: HashSet::new(),
            records: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a sighting of `identity` at the current time.
    pub fn observe(&mut self, identity: &str) -> Outcome {
        self.observe_at(identity, Utc::now())
    }

    /// Record a sighting with an explicit timestamp.
    ///
    /// Only the first call for a given (normalized) identity mutates state.
    pub fn observe_at(&mut self, identity: &str, at: DateTime<Utc>) -> Outcome {
        let key = normalize_identity(identity);
        if self.seen.contains(&key) {
            return Outcome::AlreadyRecorded;
        }
        self.seen.insert(key.clone());
        self.records.push(AttendanceRecord {
            identity: key,
            first_seen: at,
        });
        Outcome::FirstSighting
    }

    pub fn is_recorded(&self, identity: &str) -> bool {
        self.seen.contains(&normalize_identity(identity))
    }

    /// Records in first-sighting order.
    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for AttendanceSession {
    fn default() -> Self {
        Self::new()
    }
}
