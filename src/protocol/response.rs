/// Status line sent before every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success; payload frames follow depending on the command.
    Ok,
    /// The request was malformed. One frame with the reason follows.
    ClientErr,
    /// The queue failed to serve the request. One frame with the reason follows.
    ServerErr,
    /// The queue is empty. No frames follow.
    Eof,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Ok => 0,
            Status::ClientErr => 1,
            Status::ServerErr => 2,
            Status::Eof => 3,
        }
    }
}

impl TryFrom<i64> for Status {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::ClientErr),
            2 => Ok(Status::ServerErr),
            3 => Ok(Status::Eof),
            other => Err(other),
        }
    }
}
