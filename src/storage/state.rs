//! Persisted queue state.
//!
//! The state record is a small YAML document rewritten in full after every
//! mutation:
//!
//! ```yaml
//! size: 2
//! first: 0192abcd-1234-7000-8000-000000000001
//! last: 0192abcd-1234-7000-8000-000000000002
//! ```
//!
//! Absent identifiers are written as empty strings. The overwrite is not atomic;
//! a crash part-way through leaves a record that [`QueueState::load`] rejects.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use log::trace;
use serde::{Deserialize, Serialize};

use super::{
    MessageId,
    error::{Context, QueueError},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueState {
    pub size: u64,
    pub first: Option<MessageId>,
    pub last: Option<MessageId>,
}

/// On-disk shape of [`QueueState`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRecord {
    size: u64,
    #[serde(default)]
    first: String,
    #[serde(default)]
    last: String,
}

impl QueueState {
    /// Reads the state record at `path`, or returns an empty state when no
    /// record exists yet.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        if !path.is_file() {
            trace!("no state record at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let f = File::open(path).map_err(|e| QueueError::Config {
            path: path.to_path_buf(),
            reason: format!("unreadable state record: {e}"),
        })?;
        let record: StateRecord =
            serde_yaml::from_reader(BufReader::new(f)).map_err(|e| QueueError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Self::try_from(record).map_err(|reason| QueueError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Overwrites the state record at `path`.
    pub fn save(&self, path: &Path) -> Result<(), QueueError> {
        let f = File::create(path).action("create state file")?;
        let mut writer = BufWriter::new(f);

        serde_yaml::to_writer(&mut writer, &StateRecord::from(self)).map_err(|e| {
            QueueError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        writer.flush().action("write state file")?;
        writer
            .get_ref()
            .sync_data()
            .action("sync state file")?;

        trace!("state saved: {self:?}");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl From<&QueueState> for StateRecord {
    fn from(value: &QueueState) -> Self {
        let id = |id: &Option<MessageId>| {
            id.as_ref()
                .map(|id| id.to_string())
                .unwrap_or_default()
        };
        Self {
            size: value.size,
            first: id(&value.first),
            last: id(&value.last),
        }
    }
}

impl TryFrom<StateRecord> for QueueState {
    type Error = String;

    fn try_from(value: StateRecord) -> Result<Self, Self::Error> {
        let id = |field: &str, raw: &str| -> Result<Option<MessageId>, String> {
            if raw.is_empty() {
                return Ok(None);
            }
            MessageId::parse(raw)
                .map(Some)
                .map_err(|e| format!("{field}: {e}"))
        };

        let state = Self {
            size: value.size,
            first: id("first", &value.first)?,
            last: id("last", &value.last)?,
        };

        match (state.size, state.first.is_some(), state.last.is_some()) {
            (0, false, false) => Ok(state),
            (0, _, _) => Err("empty queue must not reference messages".to_string()),
            (_, true, true) => Ok(state),
            (size, _, _) => Err(format!("queue of size {size} is missing first or last")),
        }
    }
}
