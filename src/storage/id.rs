//! Message identifiers and the shard layout derived from them.
//!
//! Identifiers are hyphenated UUIDv7 strings: 36 ASCII characters whose leading
//! digits encode the creation time, so ids minted by one process sort in the order
//! they were created. The same string names the message file on disk.
use std::{
    fmt,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use super::{
    error::QueueError,
    header::{MESSAGE_EXTENSION, NEXT_ID_SIZE},
};

const SHARD_OUTER: usize = 2;
const SHARD_INNER: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Mints a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().hyphenated().to_string())
    }

    /// Validates an identifier received from disk or from the network.
    ///
    /// Only ASCII alphanumerics and `-` are accepted so an id can never
    /// address a path outside its shard.
    pub fn parse(s: &str) -> Result<Self, QueueError> {
        let valid = s.len() == NEXT_ID_SIZE
            && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(QueueError::InvalidId(s.escape_debug().to_string()))
        }
    }

    /// Recovers the identifier from a message file path.
    pub fn from_path(path: &Path) -> Result<Self, QueueError> {
        let invalid = || QueueError::InvalidId(path.display().to_string());

        if path.extension().and_then(|ext| ext.to_str()) != Some(MESSAGE_EXTENSION) {
            return Err(invalid());
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
        Self::parse(stem)
    }

    /// Location of the message file relative to the queue root:
    /// `<id[0..2]>/<id[2..6]>/<id>.raw`.
    pub fn shard_path(&self) -> PathBuf {
        PathBuf::from(&self.0[..SHARD_OUTER])
            .join(&self.0[SHARD_OUTER..SHARD_INNER])
            .join(format!("{}.{MESSAGE_EXTENSION}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for MessageId {
    type Error = QueueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}
