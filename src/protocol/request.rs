use thiserror::Error;

/// Width of a command on the wire: one verb byte followed by CRLF.
pub const COMMAND_SIZE: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid command {0:?}")]
    Invalid(String),
}

/// Commands a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `p`: enqueue the payload that follows.
    Put,
    /// `g`: dequeue the head message.
    Get,
    /// `s`: report the queue size.
    Size,
    /// `q`: end the session.
    Quit,
}

impl Request {
    pub fn verb(self) -> u8 {
        match self {
            Request::Put => b'p',
            Request::Get => b'g',
            Request::Size => b's',
            Request::Quit => b'q',
        }
    }

    pub fn as_bytes(self) -> [u8; COMMAND_SIZE] {
        [self.verb(), b'\r', b'\n']
    }
}

impl TryFrom<[u8; COMMAND_SIZE]> for Request {
    type Error = RequestError;

    fn try_from(value: [u8; COMMAND_SIZE]) -> Result<Self, Self::Error> {
        match &value {
            b"p\r\n" => Ok(Request::Put),
            b"g\r\n" => Ok(Request::Get),
            b"s\r\n" => Ok(Request::Size),
            b"q\r\n" => Ok(Request::Quit),
            _ => Err(RequestError::Invalid(
                String::from_utf8_lossy(&value).into_owned(),
            )),
        }
    }
}
