//! Message files and the handle returned by a dequeue.
use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::PathBuf,
    sync::Arc,
};

use log::debug;

use super::{
    MessageId,
    error::{Context, QueueError},
    fs::ShardTree,
    header::{DELIMITER, DELIMITER_BYTE, HEADER_SIZE, NEXT_ID, NEXT_ID_SIZE},
};

/// Fixed-size header at the start of every message file.
///
/// `next` names the message that follows this one in the queue. A tail message
/// has no successor, stored on disk as an all-zero id field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub next: Option<MessageId>,
}

impl MessageHeader {
    pub fn tail() -> Self {
        Self { next: None }
    }

    pub fn linked(next: MessageId) -> Self {
        Self { next: Some(next) }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0; HEADER_SIZE];
        if let Some(next) = &self.next {
            out[NEXT_ID..NEXT_ID + NEXT_ID_SIZE].clone_from_slice(next.as_bytes());
        }
        out[DELIMITER] = DELIMITER_BYTE;
        out
    }

    /// Decodes the header of the message `owner`.
    pub fn decode(owner: &MessageId, buf: &[u8; HEADER_SIZE]) -> Result<Self, QueueError> {
        let corrupt = |reason: String| QueueError::Corrupt {
            id: owner.to_string(),
            reason,
        };

        if buf[DELIMITER] != DELIMITER_BYTE {
            return Err(corrupt(format!(
                "unexpected header delimiter {:#04x}",
                buf[DELIMITER]
            )));
        }

        let field = &buf[NEXT_ID..NEXT_ID + NEXT_ID_SIZE];
        if field.iter().all(|b| *b == 0) {
            return Ok(Self::tail());
        }

        let next = std::str::from_utf8(field)
            .map_err(|e| corrupt(format!("next id is not utf-8: {e}")))
            .and_then(|s| MessageId::parse(s).map_err(|e| corrupt(e.to_string())))?;
        Ok(Self::linked(next))
    }

    pub(crate) fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }

    pub(crate) fn read_from<R: Read>(owner: &MessageId, mut reader: R) -> Result<Self, QueueError> {
        let mut buf = [0; HEADER_SIZE];
        reader.read_exact(&mut buf).action("read message header")?;
        Self::decode(owner, &buf)
    }
}

/// A dequeued message.
///
/// Reading yields the payload. The message has already been removed from the
/// queue state; its file stays on disk until [`Message::close`] succeeds. A handle
/// dropped without closing leaves the file behind for out-of-band cleanup.
pub struct Message {
    id: MessageId,
    len: u64,
    file: File,
    path: PathBuf,
    tree: Arc<ShardTree>,
}

impl Message {
    pub(crate) fn new(id: MessageId, len: u64, file: File, tree: Arc<ShardTree>) -> Self {
        let path = tree.message_path(&id);
        Self {
            id,
            len,
            file,
            path,
            tree,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Payload size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Releases the payload stream, then deletes the message file and any shard
    /// directories left empty.
    pub fn close(self) -> Result<(), QueueError> {
        let Self { id, file, path, tree, .. } = self;

        // The stream must be released before the file goes away.
        drop(file);

        tree.remove(&path).action("remove message file")?;
        debug!("message {id} removed");
        Ok(())
    }
}

impl Read for Message {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("path", &self.path)
            .finish()
    }
}
