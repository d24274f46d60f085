//! Explicitly owned session store
//!
//! A front end keeps one [`SessionStore`] and passes it to whoever needs it;
//! sessions live until removed or evicted for idleness.

use crate::loader::TaskRequest;
use crate::params::{EpochParams, FilterParams, ParamSet};
use crate::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Length of a session id in hex characters
pub const SESSION_ID_LEN: usize = 8;

/// Short random session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh id: the first eight hex characters of a random UUID
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(SESSION_ID_LEN);
        Self(id)
    }

    /// The id as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() == SESSION_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(PipelineError::SessionNotFound { id: s.to_string() })
        }
    }
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    created: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

/// Timestamps of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionTimes {
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last read or write
    pub last_access: DateTime<Utc>,
}

/// Concurrent id → value map with idle eviction
#[derive(Debug)]
pub struct SessionStore<T> {
    entries: DashMap<SessionId, Entry<T>>,
}

impl<T> Default for SessionStore<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T: Clone> SessionStore<T> {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under a fresh id
    pub fn create(&self, value: T) -> SessionId {
        let now = Utc::now();
        loop {
            let id = SessionId::generate();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.entries.entry(id.clone()) {
                slot.insert(Entry {
                    value,
                    created: now,
                    last_access: now,
                });
                tracing::debug!(session = %id, "[session] created");
                return id;
            }
        }
    }

    /// Copy of the session's value
    pub fn get(&self, id: &SessionId) -> Result<T> {
        let mut entry = self.entry_mut(id)?;
        entry.last_access = Utc::now();
        Ok(entry.value.clone())
    }

    /// Mutate the session's value in place
    pub fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut entry = self.entry_mut(id)?;
        entry.last_access = Utc::now();
        Ok(f(&mut entry.value))
    }

    /// Creation and last-access times
    pub fn times(&self, id: &SessionId) -> Result<SessionTimes> {
        let entry = self.entry_mut(id)?;
        Ok(SessionTimes {
            created: entry.created,
            last_access: entry.last_access,
        })
    }

    fn entry_mut(&self, id: &SessionId) -> Result<dashmap::mapref::one::RefMut<'_, SessionId, Entry<T>>> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| PipelineError::SessionNotFound { id: id.to_string() })
    }

    /// Drop a session, returning its value
    pub fn remove(&self, id: &SessionId) -> Option<T> {
        self.entries.remove(id).map(|(_, e)| e.value)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove sessions idle for longer than `max_idle`; returns how many
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Utc::now(), max_idle)
    }

    /// [`Self::evict_idle`] with an explicit clock
    pub fn evict_idle_at(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.last_access <= max_idle);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::info!(evicted, remaining = self.entries.len(), "[session] evicted idle sessions");
        }
        evicted
    }
}

/// Parameter section of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Base filter parameters
    Filter,
    /// Epoch view parameters
    Epochs,
    /// Evoked view parameters
    Evoked,
}

impl FromStr for Section {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filter" => Ok(Self::Filter),
            "epochs" => Ok(Self::Epochs),
            "evoked" => Ok(Self::Evoked),
            other => Err(PipelineError::params(format!("unknown session section '{other}'"))),
        }
    }
}

/// One user's working state: the recording plus per-view parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Selected recording
    pub input: Option<TaskRequest>,
    /// Base filter parameters shared by every view
    pub filter: FilterParams,
    /// Epoch view
    pub epochs: Option<EpochParams>,
    /// Evoked view
    pub evoked: Option<EpochParams>,
}

impl Session {
    /// Copy the base filter fields into every child, keeping each child's `show_bad`
    pub fn normalize(&mut self) {
        for child in [&mut self.epochs, &mut self.evoked].into_iter().flatten() {
            let show_bad = child.filter.show_bad;
            child.filter = FilterParams {
                show_bad,
                ..self.filter.clone()
            };
        }
    }

    /// Replace one section from a JSON object, or clear it with `None`
    ///
    /// The base filter section cannot be cleared; `None` resets it to defaults.
    pub fn set(&mut self, section: Section, value: Option<Value>) -> Result<()> {
        match section {
            Section::Filter => {
                self.filter = value.map(FilterParams::from_value).transpose()?.unwrap_or_default();
            }
            Section::Epochs => self.epochs = value.map(EpochParams::from_value).transpose()?,
            Section::Evoked => self.evoked = value.map(EpochParams::from_value).transpose()?,
        }
        Ok(())
    }
}
