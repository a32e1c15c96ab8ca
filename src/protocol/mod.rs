//! Client-server communication protocol.
//!
//! This module defines the line-oriented TCP protocol used to reach a
//! [`Queue`](crate::storage::Queue) from other processes: the command and status
//! vocabulary, the framing codec, the multi-connection server and the client.
//!
//! # Overview
//!
//! A client sends one command at a time and waits for the full response before
//! sending the next; there is no pipelining. Each connection is served by its own
//! worker, so a slow or broken peer only ever stalls or closes its own
//! connection.
//!
//! # Wire Format
//!
//! Commands are exactly three bytes, a verb followed by CRLF:
//!
//! | verb | command | response                                   |
//! |------|---------|--------------------------------------------|
//! | `p`  | put     | status, then one frame with the new id     |
//! | `g`  | get     | status, then id frame and body frame       |
//! | `s`  | size    | status, then one frame with the decimal size |
//! | `q`  | quit    | none; the server closes the connection     |
//!
//! A put command is followed by a size line `<hex-length>\r\n` and exactly that
//! many payload bytes.
//!
//! Every response starts with a status line `<code>\r\n`:
//!
//! - `0`: ok
//! - `1`: client error, followed by a frame with the reason
//! - `2`: server error, followed by a frame with the reason
//! - `3`: end of queue, nothing follows
//!
//! Frames are length-prefixed: `<hex-length>\r\n<bytes>\r\n`.
//!
//! # Key Components
//!
//! - [`ProtocolTransport`]: Line and frame codec over any `Read + Write` stream.
//! - [`QueueServer`]: Accepts connections and runs their command loops on a
//!   bounded worker pool, turning away connections once every worker is busy.
//! - [`QueueClient`]: Typed access to a remote queue.
//!
//! # See Also
//!
//! - [`storage`](crate::storage): The queue every command ends up in.
mod client;
mod config;
mod request;
mod response;
mod server;
mod thread;
mod transport;

use thread::ThreadPool;

pub use client::{ClientError, QueueClient, RemoteMessage};
pub use config::{ConfigError, ServerConfig};
pub use request::{Request, RequestError};
pub use response::Status;
pub use server::{LogFacade, QueueServer, ServerLog};
pub use transport::{Payload, ProtocolTransport, TransportError};
