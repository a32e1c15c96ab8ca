//! Client side of the queue protocol.
//!
//! A [`QueueClient`] owns one connection and issues one command at a time. It is
//! not meant to be shared between callers without external locking.
//!
//! ```no_run
//! use spool::protocol::QueueClient;
//!
//! let mut client = QueueClient::connect("127.0.0.1:6666").unwrap();
//! let id = client.put(b"hello").unwrap();
//!
//! if let Some(message) = client.get().unwrap() {
//!     assert_eq!(message.id, id);
//!     assert_eq!(message.data, b"hello");
//! }
//! client.quit().unwrap();
//! ```
use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use thiserror::Error;

use crate::storage::MessageId;

use super::{
    Request, Status,
    transport::{ProtocolTransport, TransportError},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an error status; `message` is its text verbatim.
    #[error("{message}")]
    Remote { status: Status, message: String },

    #[error("unexpected status {0}")]
    UnexpectedStatus(i64),
}

/// A message received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: MessageId,
    pub data: Vec<u8>,
}

pub struct QueueClient<T: Read + Write = TcpStream> {
    transport: ProtocolTransport<T>,
}

impl QueueClient<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).map_err(TransportError::from)?;
        Ok(Self::from_stream(stream))
    }
}

impl<T: Read + Write> QueueClient<T> {
    pub fn from_stream(stream: T) -> Self {
        Self {
            transport: ProtocolTransport::new(stream),
        }
    }

    /// Enqueues `data` and returns the id the server assigned to it.
    pub fn put(&mut self, data: &[u8]) -> Result<MessageId, ClientError> {
        self.transport.write_request(Request::Put)?;
        self.transport.write_size(data.len() as u64)?;
        self.transport.write_raw(data)?;
        self.transport.flush()?;

        match self.read_status()? {
            Status::Ok => self.read_id(),
            Status::Eof => Err(ClientError::UnexpectedStatus(Status::Eof.code())),
            status => Err(self.remote_error(status)?),
        }
    }

    /// Dequeues the head message. Returns `None` if the queue is empty.
    pub fn get(&mut self) -> Result<Option<RemoteMessage>, ClientError> {
        self.transport.write_request(Request::Get)?;
        self.transport.flush()?;

        match self.read_status()? {
            Status::Eof => Ok(None),
            Status::Ok => {
                let id = self.read_id()?;
                let data = self.transport.read_frame()?;
                Ok(Some(RemoteMessage { id, data }))
            }
            status => Err(self.remote_error(status)?),
        }
    }

    /// Number of messages waiting in the queue.
    pub fn size(&mut self) -> Result<u64, ClientError> {
        self.transport.write_request(Request::Size)?;
        self.transport.flush()?;

        match self.read_status()? {
            Status::Ok => {
                let frame = self.transport.read_frame()?;
                std::str::from_utf8(&frame)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        TransportError::Protocol(format!(
                            "invalid queue size {:?}",
                            String::from_utf8_lossy(&frame)
                        ))
                        .into()
                    })
            }
            Status::Eof => Err(ClientError::UnexpectedStatus(Status::Eof.code())),
            status => Err(self.remote_error(status)?),
        }
    }

    /// Ends the session. The server closes the connection without replying.
    pub fn quit(mut self) -> Result<(), ClientError> {
        self.transport.write_request(Request::Quit)?;
        self.transport.flush()?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, ClientError> {
        let code = self.transport.read_status()?;
        Status::try_from(code).map_err(ClientError::UnexpectedStatus)
    }

    fn read_id(&mut self) -> Result<MessageId, ClientError> {
        let frame = self.transport.read_frame()?;
        std::str::from_utf8(&frame)
            .ok()
            .and_then(|s| MessageId::parse(s).ok())
            .ok_or_else(|| {
                TransportError::Protocol(format!(
                    "invalid message id {:?}",
                    String::from_utf8_lossy(&frame)
                ))
                .into()
            })
    }

    /// Reads the reason frame that follows an error status.
    fn remote_error(&mut self, status: Status) -> Result<ClientError, ClientError> {
        let frame = self.transport.read_frame()?;
        Ok(ClientError::Remote {
            status,
            message: String::from_utf8_lossy(&frame).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        net::TcpListener,
        fs,
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    use tempdir::TempDir;

    use crate::{
        protocol::{ConfigError, QueueServer, ServerConfig, ServerLog},
        storage::Queue,
    };

    use super::*;

    /// Loopback stream with scripted server output; records what the client sends.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLog {
        errors: Mutex<Vec<String>>,
    }

    impl ServerLog for RecordingLog {
        fn info(&self, _message: &str) {}

        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn start_server(dir: &std::path::Path) -> std::net::SocketAddr {
        start_server_with_log(dir, Arc::new(RecordingLog::default()))
    }

    fn start_server_with_log(
        dir: &std::path::Path,
        log: Arc<dyn ServerLog>,
    ) -> std::net::SocketAddr {
        start_server_with(dir, 4, log)
    }

    fn start_server_with(
        dir: &std::path::Path,
        workers: usize,
        log: Arc<dyn ServerLog>,
    ) -> std::net::SocketAddr {
        let queue = Arc::new(Queue::open(dir).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let config = ServerConfig {
            workers,
            ..ServerConfig::new(address)
        };

        let server = QueueServer::new(queue, config).unwrap().with_logger(log);
        thread::spawn(move || server.serve(listener));
        address
    }

    const ID: &str = "0192abcd-1234-7000-8000-000000000001";

    #[test]
    fn put_sends_size_line_and_payload() {
        let reply = format!("0\r\n24\r\n{ID}\r\n");
        let mut client = QueueClient::from_stream(Scripted::new(reply.as_bytes()));

        let id = client.put(b"hello").unwrap();
        assert_eq!(id.as_str(), ID);
        assert_eq!(client.transport.get_ref().sent, b"p\r\n5\r\nhello");
    }

    #[test]
    fn get_decodes_message() {
        let reply = format!("0\r\n24\r\n{ID}\r\n3\r\nabc\r\n3\r\n");
        let mut client = QueueClient::from_stream(Scripted::new(reply.as_bytes()));

        let message = client.get().unwrap().unwrap();
        assert_eq!(message.id.as_str(), ID);
        assert_eq!(message.data, b"abc");
        assert!(client.get().unwrap().is_none());
        assert_eq!(client.transport.get_ref().sent, b"g\r\ng\r\n");
    }

    #[test]
    fn remote_errors_are_verbatim() {
        let mut client = QueueClient::from_stream(Scripted::new(b"2\r\ne\r\nget: disk full\r\n"));

        match client.get().unwrap_err() {
            ClientError::Remote { status, message } => {
                assert_eq!(status, Status::ServerErr);
                assert_eq!(message, "get: disk full");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_replies() {
        for reply in [
            &b"x\r\n"[..],
            b"0\r\n24\r\nnot-an-id-but-thirty-six-characters!\r\n",
            b"0\r\nzz\r\n",
            b"0\r\n24\r\n0192abcd",
            b"0",
        ] {
            let mut client = QueueClient::from_stream(Scripted::new(reply));
            assert!(
                matches!(client.get(), Err(ClientError::Transport(_))),
                "accepted {:?}",
                String::from_utf8_lossy(reply)
            );
        }

        let mut client = QueueClient::from_stream(Scripted::new(b"7\r\n"));
        assert!(matches!(
            client.get(),
            Err(ClientError::UnexpectedStatus(7))
        ));
    }

    #[test]
    fn round_trip_over_tcp() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());
        let mut client = QueueClient::connect(address).unwrap();

        let big = (0..65_537).map(|i| (i % 256) as u8).collect::<Vec<_>>();
        for payload in [Vec::new(), vec![b'x'], big] {
            let id = client.put(&payload).unwrap();
            assert_eq!(client.size().unwrap(), 1);

            let message = client.get().unwrap().unwrap();
            assert_eq!(message.id, id);
            assert_eq!(message.data, payload);
            assert_eq!(client.size().unwrap(), 0);
        }

        assert!(client.get().unwrap().is_none());
        client.quit().unwrap();
    }

    #[test]
    fn fifo_across_connections() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());

        let mut producer = QueueClient::connect(address).unwrap();
        let ids = ["A", "B", "C"]
            .iter()
            .map(|p| producer.put(p.as_bytes()).unwrap())
            .collect::<Vec<_>>();

        let mut consumer = QueueClient::connect(address).unwrap();
        assert_eq!(consumer.size().unwrap(), 3);
        for (id, payload) in ids.iter().zip(["A", "B", "C"]) {
            let message = consumer.get().unwrap().unwrap();
            assert_eq!(&message.id, id);
            assert_eq!(message.data, payload.as_bytes());
        }
        assert!(consumer.get().unwrap().is_none());
    }

    #[test]
    fn invalid_command_is_client_error() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());

        let mut stream = TcpStream::connect(address).unwrap();
        stream.write_all(b"x\r\n").unwrap();

        let mut client = QueueClient::from_stream(stream);
        // The connection stays usable after the rejected command.
        let reply = client.transport.read_status().unwrap();
        assert_eq!(reply, Status::ClientErr.code());
        let reason = client.transport.read_frame().unwrap();
        assert!(String::from_utf8(reason).unwrap().contains("invalid command"));
        assert_eq!(client.size().unwrap(), 0);
    }

    #[test]
    fn malformed_size_line_is_client_error() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());

        let mut stream = TcpStream::connect(address).unwrap();
        stream.write_all(b"p\r\nnope\r\n").unwrap();

        let mut client = QueueClient::from_stream(stream);
        assert_eq!(
            client.transport.read_status().unwrap(),
            Status::ClientErr.code()
        );
        client.transport.read_frame().unwrap();
        assert_eq!(client.size().unwrap(), 0);
    }

    #[test]
    fn dropped_connection_leaves_server_running() {
        let temp = TempDir::new("client").unwrap();
        let log = Arc::new(RecordingLog::default());
        let address =
            start_server_with_log(temp.path(), Arc::clone(&log) as Arc<dyn ServerLog>);

        {
            // Promise ten bytes, send three, hang up.
            let mut stream = TcpStream::connect(address).unwrap();
            stream.write_all(b"p\r\na\r\nabc").unwrap();
        }

        let mut client = QueueClient::connect(address).unwrap();
        client.put(b"after").unwrap();
        assert_eq!(client.size().unwrap(), 1);
        assert_eq!(client.get().unwrap().unwrap().data, b"after");

        let dropped = (0..200).any(|_| {
            let logged = log
                .errors
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.contains("connection dropped"));
            if !logged {
                thread::sleep(Duration::from_millis(10));
            }
            logged
        });
        assert!(dropped);
    }

    #[test]
    fn overlong_size_line_gets_one_reply() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());

        let mut stream = TcpStream::connect(address).unwrap();
        let mut request = b"p\r\n".to_vec();
        request.extend_from_slice(&[b'0'; 40]);
        request.extend_from_slice(b"zz\r\n");
        stream.write_all(&request).unwrap();

        let mut client = QueueClient::from_stream(stream);
        assert_eq!(
            client.transport.read_status().unwrap(),
            Status::ClientErr.code()
        );
        client.transport.read_frame().unwrap();
        // The next reply answers the next command, not the leftover line.
        assert_eq!(client.size().unwrap(), 0);
    }

    #[test]
    fn missing_message_file_is_server_error() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());
        let mut client = QueueClient::connect(address).unwrap();

        let id = client.put(b"gone").unwrap();
        fs::remove_file(temp.path().join(id.shard_path())).unwrap();

        match client.get().unwrap_err() {
            ClientError::Remote { status, message } => {
                assert_eq!(status, Status::ServerErr);
                assert!(message.starts_with("get: "), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(client.size().unwrap(), 1);
    }

    #[test]
    fn quit_closes_without_reply() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server(temp.path());

        let mut stream = TcpStream::connect(address).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(b"q\r\n").unwrap();

        let mut buf = [0; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn idle_connections_do_not_stall_others() {
        let temp = TempDir::new("client").unwrap();
        let address = start_server_with(temp.path(), 2, Arc::new(RecordingLog::default()));

        let mut idle = (0..2)
            .map(|_| {
                let mut client = QueueClient::connect(address).unwrap();
                // Both peers hold a worker once they have been served.
                assert_eq!(client.size().unwrap(), 0);
                client
            })
            .collect::<Vec<_>>();

        let mut stream = TcpStream::connect(address).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut turned_away = ProtocolTransport::new(stream);
        assert_eq!(
            turned_away.read_status().unwrap(),
            Status::ServerErr.code()
        );
        let reason = String::from_utf8(turned_away.read_frame().unwrap()).unwrap();
        assert!(reason.contains("busy"), "{reason}");

        // A freed worker serves the next connection.
        idle.pop().unwrap().quit().unwrap();
        let served = (0..200).any(|_| {
            let size = QueueClient::connect(address).and_then(|mut client| client.size());
            if size.is_err() {
                thread::sleep(Duration::from_millis(10));
            }
            size.is_ok()
        });
        assert!(served);
    }

    #[test]
    fn empty_copy_buffer_is_rejected() {
        let temp = TempDir::new("client").unwrap();
        let queue = Arc::new(Queue::open(temp.path()).unwrap());
        let config = ServerConfig {
            buffer_size: 0,
            ..ServerConfig::default()
        };

        assert!(matches!(
            QueueServer::new(queue, config),
            Err(ConfigError::EmptyBuffer)
        ));
    }
}
