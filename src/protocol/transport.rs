use std::io::{self, BufRead, BufReader, ErrorKind, Read, Take, Write};

use thiserror::Error;

use super::{
    request::{COMMAND_SIZE, Request},
    response::Status,
};

/// Longest status or size line accepted, CRLF included.
const MAX_LINE: u64 = 32;
/// How far past [`MAX_LINE`] an overlong line is skipped before giving up on
/// the stream.
const MAX_DISCARD: u64 = 64 * 1024;
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Line and frame codec over a byte stream.
///
/// Reads go through a buffer; small writes are collected and sent on
/// [`ProtocolTransport::flush`], while large bodies are copied straight through.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
    out: Vec<u8>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream: BufReader::new(stream),
            out: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    pub fn write_request(&mut self, req: Request) -> Result<(), TransportError> {
        self.out.extend_from_slice(&req.as_bytes());
        Ok(())
    }

    /// Reads the next command. Returns `None` if the peer closed the connection
    /// between commands.
    pub fn read_command(&mut self) -> Result<Option<[u8; COMMAND_SIZE]>, TransportError> {
        if self.stream.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let mut cmd = [0; COMMAND_SIZE];
        self.stream.read_exact(&mut cmd)?;
        Ok(Some(cmd))
    }

    pub fn write_status(&mut self, status: Status) -> Result<(), TransportError> {
        write!(self.out, "{}\r\n", status.code())?;
        Ok(())
    }

    pub fn read_status(&mut self) -> Result<i64, TransportError> {
        let line = self.read_line()?;
        line.parse::<i64>()
            .map_err(|_| TransportError::Protocol(format!("invalid status line {line:?}")))
    }

    /// Writes a status followed by a single frame.
    pub fn write_response(&mut self, status: Status, payload: &[u8]) -> Result<(), TransportError> {
        self.write_status(status)?;
        self.write_frame(payload)
    }

    pub fn write_size(&mut self, len: u64) -> Result<(), TransportError> {
        write!(self.out, "{len:x}\r\n")?;
        Ok(())
    }

    pub fn read_size(&mut self) -> Result<u64, TransportError> {
        let line = self.read_line()?;
        parse_hex(&line)
    }

    /// Queues raw bytes with no framing.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.out.extend_from_slice(data);
        Ok(())
    }

    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.write_size(payload.len() as u64)?;
        self.out.extend_from_slice(payload);
        self.out.extend_from_slice(CRLF);
        Ok(())
    }

    /// Writes a frame of exactly `len` bytes copied from `body`.
    pub fn write_frame_from<R: Read>(&mut self, len: u64, body: R) -> Result<(), TransportError> {
        self.write_size(len)?;
        self.flush()?;

        let copied = io::copy(&mut body.take(len), self.stream.get_mut())?;
        if copied != len {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("frame body ended after {copied} of {len} bytes"),
            )
            .into());
        }

        self.out.extend_from_slice(CRLF);
        Ok(())
    }

    pub fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.read_size()?;

        let mut payload = Vec::new();
        let read = (&mut self.stream).take(len).read_to_end(&mut payload)? as u64;
        if read != len {
            return Err(TransportError::Protocol(format!(
                "frame truncated after {read} of {len} bytes"
            )));
        }

        let mut end = [0; 2];
        match self.stream.read_exact(&mut end) {
            Ok(()) if end == CRLF => Ok(payload),
            Ok(()) => Err(TransportError::Protocol(
                "frame is not terminated by CRLF".to_string(),
            )),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TransportError::Protocol(
                "frame is missing its terminator".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Reader over the next `len` raw bytes of the stream.
    pub fn payload(&mut self, len: u64) -> Payload<'_, BufReader<T>> {
        Payload {
            inner: (&mut self.stream).take(len),
        }
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        if !self.out.is_empty() {
            stream.write_all(&self.out)?;
            self.out.clear();
        }
        stream.flush()?;
        Ok(())
    }

    /// Reads one CRLF-terminated line and returns it without the terminator.
    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut line = Vec::new();
        (&mut self.stream)
            .take(MAX_LINE)
            .read_until(b'\n', &mut line)?;

        if line.is_empty() {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed").into());
        }
        if line.len() as u64 == MAX_LINE && !line.ends_with(b"\n") {
            self.skip_line()?;
            return Err(TransportError::Protocol(format!(
                "line longer than {MAX_LINE} bytes"
            )));
        }
        let Some(body) = line.strip_suffix(CRLF) else {
            return Err(TransportError::Protocol(format!(
                "unterminated line {:?}",
                String::from_utf8_lossy(&line)
            )));
        };

        String::from_utf8(body.to_vec())
            .map_err(|_| TransportError::Protocol("line is not valid utf-8".to_string()))
    }

    /// Consumes the rest of the current line, LF included.
    fn skip_line(&mut self) -> Result<(), TransportError> {
        let mut rest = Vec::new();
        (&mut self.stream)
            .take(MAX_DISCARD)
            .read_until(b'\n', &mut rest)?;

        if rest.ends_with(b"\n") {
            return Ok(());
        }
        Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("no line end within {} bytes", MAX_LINE + MAX_DISCARD),
        )
        .into())
    }
}

/// Exactly `len` bytes of a stream. Running out early is an
/// [`ErrorKind::UnexpectedEof`] error rather than a short read.
pub struct Payload<'a, R> {
    inner: Take<&'a mut R>,
}

impl<R> Payload<'_, R> {
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl<R: Read> Read for Payload<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.limit() == 0 || buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("payload ended with {} bytes missing", self.inner.limit()),
            )),
            n => Ok(n),
        }
    }
}

fn parse_hex(s: &str) -> Result<u64, TransportError> {
    let valid = !s.is_empty() && s.len() <= 16 && s.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(TransportError::Protocol(format!("invalid frame size {s:?}")));
    }
    u64::from_str_radix(s, 16)
        .map_err(|e| TransportError::Protocol(format!("invalid frame size {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek};

    use super::*;

    fn rewind<T: Read + Write + Seek>(transport: &mut ProtocolTransport<T>) {
        transport.flush().unwrap();
        transport
            .stream
            .get_mut()
            .seek(std::io::SeekFrom::Start(0))
            .unwrap();
    }

    fn reader(bytes: &[u8]) -> ProtocolTransport<Cursor<Vec<u8>>> {
        ProtocolTransport::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn response_layout() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));

        transport.write_response(Status::Ok, b"hello").unwrap();
        transport.write_status(Status::Eof).unwrap();
        transport.flush().unwrap();

        assert_eq!(transport.get_ref().get_ref(), b"0\r\n5\r\nhello\r\n3\r\n");
    }

    #[test]
    fn frame_size_is_hex() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let payload = vec![7; 255];

        transport.write_frame(&payload).unwrap();
        rewind(&mut transport);

        assert!(transport.get_ref().get_ref().starts_with(b"ff\r\n"));
        assert_eq!(transport.read_frame().unwrap(), payload);
    }

    #[test]
    fn streamed_frame() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));

        transport.write_frame_from(3, &b"abc"[..]).unwrap();
        rewind(&mut transport);
        assert_eq!(transport.read_frame().unwrap(), b"abc");

        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let err = transport.write_frame_from(4, &b"abc"[..]).unwrap_err();
        assert!(matches!(err, TransportError::Io(e) if e.kind() == ErrorKind::UnexpectedEof));
    }

    #[test]
    fn read_commands() {
        let mut transport = reader(b"g\r\nq\r\n");

        assert_eq!(transport.read_command().unwrap(), Some(*b"g\r\n"));
        assert_eq!(transport.read_command().unwrap(), Some(*b"q\r\n"));
        assert_eq!(transport.read_command().unwrap(), None);

        let mut transport = reader(b"g\r");
        assert!(matches!(
            transport.read_command(),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn malformed_frames() {
        for input in [
            &b"zz\r\n"[..],
            b"+1\r\nx\r\n",
            b"\r\n",
            b"5\n",
            b"5\r\nab",
            b"2\r\nabXY",
            b"2\r\nab",
            b"00000000000000000000000000000000000001\r\n",
        ] {
            let mut transport = reader(input);
            assert!(
                matches!(transport.read_frame(), Err(TransportError::Protocol(_))),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn overlong_line_is_skipped_whole() {
        let mut input = b"0".repeat(40);
        input.extend_from_slice(b"zz\r\ns\r\n");
        let mut transport = reader(&input);

        assert!(matches!(
            transport.read_size(),
            Err(TransportError::Protocol(_))
        ));
        assert_eq!(transport.read_command().unwrap(), Some(*b"s\r\n"));
        assert_eq!(transport.read_command().unwrap(), None);

        let mut transport = reader(&vec![b'0'; (MAX_LINE + MAX_DISCARD + 8) as usize]);
        assert!(matches!(
            transport.read_size(),
            Err(TransportError::Io(e)) if e.kind() == ErrorKind::InvalidData
        ));
    }

    #[test]
    fn status_lines() {
        assert_eq!(reader(b"2\r\n").read_status().unwrap(), 2);
        assert!(matches!(
            reader(b"ok\r\n").read_status(),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            reader(b"").read_status(),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn payload_reader_is_exact() {
        let mut transport = reader(b"abcdefq\r\n");

        let mut out = Vec::new();
        let mut payload = transport.payload(6);
        payload.read_to_end(&mut out).unwrap();
        assert_eq!(payload.remaining(), 0);
        assert_eq!(out, b"abcdef");
        assert_eq!(transport.read_command().unwrap(), Some(*b"q\r\n"));

        let mut transport = reader(b"abc");
        let err = transport.payload(6).read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
