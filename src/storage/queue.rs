//! The persistent FIFO queue.
//!
//! [`Queue`] ties the state record, the shard tree and the message chain
//! together. Payloads are written to their own file before any lock is taken;
//! only the step that links a message into the chain and persists the new state
//! is serialized, together with dequeues and size reads.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info, warn};

use super::{
    Message, MessageHeader, MessageId, QueueState,
    error::{Context, QueueError},
    fs::ShardTree,
    header::{HEADER_SIZE, STATE_FILE},
};

#[derive(Debug)]
pub struct Queue {
    state_path: PathBuf,
    state: Mutex<QueueState>,
    tree: Arc<ShardTree>,
}

impl Queue {
    /// Opens the queue stored in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Config`] if an existing state record is malformed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, QueueError> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root).action("create queue directory")?;

        let state_path = root.join(STATE_FILE);
        let state = QueueState::load(&state_path)?;
        info!(
            "opened queue at {} holding {} messages",
            root.display(),
            state.size
        );

        Ok(Self {
            state_path,
            state: Mutex::new(state),
            tree: Arc::new(ShardTree::new(root)),
        })
    }

    pub fn dir(&self) -> &Path {
        self.tree.root()
    }

    /// Appends the contents of `reader` as a new message.
    pub fn enqueue<R: Read>(&self, mut reader: R) -> Result<MessageId, QueueError> {
        self.write_message(|writer| io::copy(&mut reader, writer).map(|_| ()))
    }

    /// Appends the contents of `reader`, copying through the caller's `buf`.
    ///
    /// Lets a caller that enqueues repeatedly (such as a connection worker)
    /// reuse one copy buffer across messages.
    pub fn enqueue_with_buffer<R: Read>(
        &self,
        mut reader: R,
        buf: &mut [u8],
    ) -> Result<MessageId, QueueError> {
        if buf.is_empty() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "copy buffer is empty"))
                .action("copy message payload");
        }
        self.write_message(|writer| copy_with_buffer(&mut reader, writer, buf).map(|_| ()))
    }

    pub fn enqueue_bytes(&self, data: &[u8]) -> Result<MessageId, QueueError> {
        self.write_message(|writer| writer.write_all(data))
    }

    /// Removes the head of the queue. Returns `None` when the queue is empty.
    ///
    /// The queue state is updated before any payload is read: once this returns
    /// the message is gone from the queue, whether or not the handle is read.
    pub fn dequeue(&self) -> Result<Option<Message>, QueueError> {
        let mut state = self.lock_state();
        let Some(first) = state.first.clone() else {
            return Ok(None);
        };

        let path = self.tree.message_path(&first);
        let mut file = File::open(&path).action("open message file")?;
        let len = file
            .metadata()
            .action("stat message file")?
            .len()
            .saturating_sub(HEADER_SIZE as u64);
        let header = MessageHeader::read_from(&first, &mut file)?;

        let remaining = state.size.saturating_sub(1);
        let next = match header.next {
            Some(next) if remaining > 0 => QueueState {
                size: remaining,
                first: Some(next),
                last: state.last.clone(),
            },
            link => {
                if link.is_some() || remaining > 0 {
                    warn!(
                        "message {first} disagrees with queue state (size {}, next {link:?}); resetting to empty",
                        state.size
                    );
                }
                QueueState::default()
            }
        };

        next.save(&self.state_path)?;
        *state = next;
        debug!("dequeued {first} ({len} bytes), {} remaining", state.size);

        Ok(Some(Message::new(first, len, file, Arc::clone(&self.tree))))
    }

    pub fn size(&self) -> u64 {
        self.lock_state().size
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().is_empty()
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> QueueState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes a new message file, then links it into the chain.
    ///
    /// Any failure removes the new file (and shard directories it alone
    /// needed) and leaves the queue state untouched.
    fn write_message<F>(&self, write_payload: F) -> Result<MessageId, QueueError>
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let id = MessageId::generate();
        let file = self.tree.create(&id).action("create message file")?;

        let written = write_file(file, write_payload).and_then(|_| self.append(&id));
        if let Err(e) = written {
            self.discard(&id);
            return Err(e);
        }

        debug!("enqueued {id}");
        Ok(id)
    }

    fn append(&self, id: &MessageId) -> Result<(), QueueError> {
        let mut state = self.lock_state();

        let next = QueueState {
            size: state.size + 1,
            first: state.first.clone().or_else(|| Some(id.clone())),
            last: Some(id.clone()),
        };

        if let Some(last) = &state.last {
            self.write_header(last, &MessageHeader::linked(id.clone()))?;
        }

        if let Err(e) = next.save(&self.state_path) {
            if let Some(last) = &state.last {
                if let Err(undo) = self.write_header(last, &MessageHeader::tail()) {
                    warn!("failed to unlink {last} after state write failure: {undo}");
                }
            }
            return Err(e);
        }

        *state = next;
        Ok(())
    }

    /// Rewrites the header of an existing message in place.
    fn write_header(&self, id: &MessageId, header: &MessageHeader) -> Result<(), QueueError> {
        let mut f = OpenOptions::new()
            .write(true)
            .open(self.tree.message_path(id))
            .action("open previous message")?;
        header.write_to(&mut f).action("link previous message")?;
        f.sync_data().action("sync previous message")
    }

    fn discard(&self, id: &MessageId) {
        let path = self.tree.message_path(id);
        if let Err(e) = self.tree.remove(&path) {
            warn!("failed to remove partial message {}: {e}", path.display());
        }
    }
}

fn write_file<F>(file: File, write_payload: F) -> Result<(), QueueError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let mut writer = BufWriter::new(file);
    MessageHeader::tail()
        .write_to(&mut writer)
        .action("write message header")?;
    write_payload(&mut writer).action("write message payload")?;

    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .action("flush message payload")?;
    file.sync_data().action("sync message file")
}

fn copy_with_buffer<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut copied = 0;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
}
