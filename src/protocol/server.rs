use std::{
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, error, info, trace, warn};

use crate::storage::Queue;

use super::{
    ConfigError, Request, ServerConfig, Status, ThreadPool,
    transport::{ProtocolTransport, TransportError},
};

/// Destination for the server's lifecycle and failure reports.
pub trait ServerLog: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards server reports to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl ServerLog for LogFacade {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }
}

/// Serves one [`Queue`] over TCP.
pub struct QueueServer {
    queue: Arc<Queue>,
    config: ServerConfig,
    log: Arc<dyn ServerLog>,
}

impl QueueServer {
    pub fn new(queue: Arc<Queue>, config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            queue,
            config,
            log: Arc::new(LogFacade),
        })
    }

    pub fn with_logger(mut self, log: Arc<dyn ServerLog>) -> Self {
        self.log = log;
        self
    }

    /// Binds the configured address and serves until the listener fails.
    pub fn listen(self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.config.address)?;
        self.serve(listener)
    }

    /// Serves connections accepted from `listener`, each on its own pool
    /// worker. A connection arriving while every worker is busy is answered
    /// with SERVER_ERR and closed.
    pub fn serve(self, listener: TcpListener) -> Result<(), TransportError> {
        let pool = ThreadPool::new(self.config.workers);
        let live = Arc::new(AtomicUsize::new(0));
        self.log.info(&format!(
            "listening at {} with {} workers",
            listener.local_addr()?,
            pool.size()
        ));

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let Some(slot) = Slot::acquire(&live, pool.size()) else {
                        self.reject(stream);
                        continue;
                    };
                    let queue = Arc::clone(&self.queue);
                    let log = Arc::clone(&self.log);
                    let config = self.config.clone();
                    pool.execute(move || {
                        let _slot = slot;
                        handle_connection(stream, queue, &config, log.as_ref())
                    });
                }
                Err(e) => self.log.error(&format!("broken connection: {e}")),
            }
        }
        Ok(())
    }

    fn reject(&self, stream: TcpStream) {
        let peer = peer_name(&stream);
        warn!("{peer}: rejected, all {} workers busy", self.config.workers);

        let reason = format!("server busy: {} connections open", self.config.workers);
        let mut transport = ProtocolTransport::new(stream);
        let sent = transport
            .write_response(Status::ServerErr, reason.as_bytes())
            .and_then(|_| transport.flush());
        if let Err(e) = sent {
            self.log.error(&format!("{peer}: failed to reject: {e}"));
        }
    }
}

/// One of the server's `workers` connection slots, released on drop.
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn acquire(live: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit).then_some(n + 1)
        })
        .ok()
        .map(|_| Self(Arc::clone(live)))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown peer".to_string())
}

fn handle_connection(
    stream: TcpStream,
    queue: Arc<Queue>,
    config: &ServerConfig,
    log: &dyn ServerLog,
) {
    let peer = peer_name(&stream);

    let timeouts = stream
        .set_read_timeout(config.read_timeout)
        .and_then(|_| stream.set_write_timeout(config.write_timeout));
    if let Err(e) = timeouts {
        log.error(&format!("{peer}: failed to set timeouts: {e}"));
        return;
    }

    debug!("{peer}: connected");
    let mut connection = Connection {
        transport: ProtocolTransport::new(stream),
        queue,
        buf: vec![0; config.buffer_size],
        log,
    };
    match connection.serve() {
        Ok(()) => debug!("{peer}: closed"),
        Err(e) => log.error(&format!("{peer}: connection dropped: {e}")),
    }
}

/// Command loop for a single client. Commands are served strictly in order.
struct Connection<'a, T: Read + Write> {
    transport: ProtocolTransport<T>,
    queue: Arc<Queue>,
    buf: Vec<u8>,
    log: &'a dyn ServerLog,
}

impl<T: Read + Write> Connection<'_, T> {
    fn serve(&mut self) -> Result<(), TransportError> {
        loop {
            let Some(command) = self.transport.read_command()? else {
                return Ok(());
            };

            let req = match Request::try_from(command) {
                Ok(req) => req,
                Err(e) => {
                    self.transport
                        .write_response(Status::ClientErr, e.to_string().as_bytes())?;
                    self.transport.flush()?;
                    continue;
                }
            };
            trace!("received request: {req:?}");

            match req {
                Request::Quit => return Ok(()),
                Request::Size => {
                    let size = self.queue.size().to_string();
                    self.transport.write_response(Status::Ok, size.as_bytes())?;
                }
                Request::Get => self.get()?,
                Request::Put => self.put()?,
            }
            self.transport.flush()?;
        }
    }

    fn get(&mut self) -> Result<(), TransportError> {
        let mut message = match self.queue.dequeue() {
            Ok(Some(message)) => message,
            Ok(None) => return self.transport.write_status(Status::Eof),
            Err(e) => {
                let reason = format!("get: {e}");
                return self.transport.write_response(Status::ServerErr, reason.as_bytes());
            }
        };

        self.transport
            .write_response(Status::Ok, message.id().as_str().as_bytes())?;
        // On failure the handle is dropped unclosed and the file stays on disk.
        let len = message.len();
        self.transport.write_frame_from(len, &mut message)?;
        self.transport.flush()?;

        let id = message.id().clone();
        if let Err(e) = message.close() {
            self.log
                .error(&format!("failed to remove delivered message {id}: {e}"));
        }
        Ok(())
    }

    fn put(&mut self) -> Result<(), TransportError> {
        let len = match self.transport.read_size() {
            Ok(len) => len,
            Err(TransportError::Protocol(reason)) => {
                let reason = format!("read message size: {reason}");
                return self
                    .transport
                    .write_response(Status::ClientErr, reason.as_bytes());
            }
            Err(e) => return Err(e),
        };

        let mut payload = self.transport.payload(len);
        let result = self.queue.enqueue_with_buffer(&mut payload, &mut self.buf);
        if result.is_err() {
            // Skip what is left of the payload so the next command lines up.
            io::copy(&mut payload, &mut io::sink())?;
        }

        match result {
            Ok(id) => self
                .transport
                .write_response(Status::Ok, id.as_str().as_bytes()),
            Err(e) => {
                let reason = format!("put: {e}");
                self.transport
                    .write_response(Status::ServerErr, reason.as_bytes())
            }
        }
    }
}
