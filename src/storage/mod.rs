//! Disk-backed FIFO storage.
//!
//! A queue owns one directory. Inside it lives a `state.yaml` record holding the
//! queue size and the identifiers of the head and tail messages, plus one file per
//! message laid out under short shard directories derived from the message id:
//!
//! ```text
//! <root>/state.yaml
//! <root>/01/92ab/0192abcd-....raw
//! ```
//!
//! Each message file starts with a fixed header carrying the id of the next message
//! in the queue (or zeros when it is the tail), so the files form a forward-linked
//! chain from `first` to `last`.
//!
//! # Example
//! ```rust
//! use std::io::Read;
//! use spool::storage::Queue;
//!
//! let dir = std::env::temp_dir().join(format!("spool-doc-{}", std::process::id()));
//! let queue = Queue::open(&dir).unwrap();
//!
//! let id = queue.enqueue_bytes(b"hello").unwrap();
//! let mut message = queue.dequeue().unwrap().expect("queue is not empty");
//! assert_eq!(message.id(), &id);
//!
//! let mut body = String::new();
//! message.read_to_string(&mut body).unwrap();
//! message.close().unwrap();
//! assert_eq!(body, "hello");
//! # std::fs::remove_dir_all(dir).unwrap();
//! ```
pub mod fs;
pub mod id;
pub mod message;
pub mod queue;
pub mod state;

pub use error::QueueError;
pub use id::MessageId;
pub use message::{Message, MessageHeader};
pub use queue::Queue;
pub use state::QueueState;

pub mod header {
    /// Width of a hyphenated identifier as stored in a message header.
    pub(crate) const NEXT_ID_SIZE: usize = 36;
    pub(crate) const DELIMITER_SIZE: usize = 1;
    pub(crate) const HEADER_SIZE: usize = NEXT_ID_SIZE + DELIMITER_SIZE;

    pub(crate) const NEXT_ID: usize = 0;
    pub(crate) const DELIMITER: usize = NEXT_ID + NEXT_ID_SIZE;

    pub(crate) const DELIMITER_BYTE: u8 = b'\n';

    pub(crate) const STATE_FILE: &str = "state.yaml";
    pub(crate) const MESSAGE_EXTENSION: &str = "raw";
}

pub mod error {
    use std::{io, path::PathBuf};

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum QueueError {
        /// The persisted state record could not be read or does not describe a
        /// valid queue.
        #[error("[state][{path}]: {reason}")]
        Config { path: PathBuf, reason: String },

        #[error("[io][{action}]: {source}")]
        Io {
            action: &'static str,
            #[source]
            source: io::Error,
        },

        /// A message file exists but its header cannot be decoded.
        #[error("[message][{id}]: {reason}")]
        Corrupt { id: String, reason: String },

        #[error("invalid message id '{0}'")]
        InvalidId(String),
    }

    /// Tags an I/O failure with the storage step that produced it.
    pub(crate) trait Context<T> {
        fn action(self, action: &'static str) -> Result<T, QueueError>;
    }

    impl<T> Context<T> for Result<T, io::Error> {
        fn action(self, action: &'static str) -> Result<T, QueueError> {
            self.map_err(|source| QueueError::Io { action, source })
        }
    }
}
