pub mod protocol;
pub mod storage;

pub use protocol::{ClientError, ConfigError, QueueClient, QueueServer, ServerConfig};
pub use storage::{Message, MessageId, Queue, QueueError};
