use std::fmt;
use std::io;

/// The closed status taxonomy shared by the local and remote paths.
///
/// Every fallible core operation returns `Result<T, EtError>`. Argument
/// validation is detected at the call site before any shared state is
/// touched; transient queue conditions (`Empty`/`Busy`) only ever surface
/// for nonblocking or timed-out callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtError {
    Error,
    Timeout,
    NotImplemented,
    BadArgument,
    BadFormat,
    BadDomainType,
    AlreadyExists,
    NotInitialized,
    AlreadyInit,
    LostConnection,
    NetworkError,
    SocketError,
    PendError,
    IllegalMsgType,
    OutOfMemory,
    OutOfRange,
    LimitExceeded,
    BadDomainId,
    BadMessage,
    WrongDomainType,
    DifferentVersion,
    WrongPassword,
    ServerDied,
    Abort,
    Wakeup,
    Empty,
    Busy,
    Dead,
    Read,
    Write,
    Remote,
    TooMany,
    Io(io::ErrorKind),
}

pub type EtResult<T> = Result<T, EtError>;

impl fmt::Display for EtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtError::Error => write!(f, "generic error"),
            EtError::Timeout => write!(f, "operation timed out"),
            EtError::NotImplemented => write!(f, "not implemented"),
            EtError::BadArgument => write!(f, "bad argument"),
            EtError::BadFormat => write!(f, "bad format"),
            EtError::BadDomainType => write!(f, "bad domain type"),
            EtError::AlreadyExists => write!(f, "already exists"),
            EtError::NotInitialized => write!(f, "not initialized"),
            EtError::AlreadyInit => write!(f, "already initialized"),
            EtError::LostConnection => write!(f, "lost connection"),
            EtError::NetworkError => write!(f, "network error"),
            EtError::SocketError => write!(f, "socket error"),
            EtError::PendError => write!(f, "pend error"),
            EtError::IllegalMsgType => write!(f, "illegal message type"),
            EtError::OutOfMemory => write!(f, "out of memory"),
            EtError::OutOfRange => write!(f, "out of range"),
            EtError::LimitExceeded => write!(f, "limit exceeded"),
            EtError::BadDomainId => write!(f, "bad domain id"),
            EtError::BadMessage => write!(f, "bad message"),
            EtError::WrongDomainType => write!(f, "wrong domain type"),
            EtError::DifferentVersion => write!(f, "different version"),
            EtError::WrongPassword => write!(f, "wrong password"),
            EtError::ServerDied => write!(f, "server died"),
            EtError::Abort => write!(f, "aborted"),
            EtError::Wakeup => write!(f, "woken up"),
            EtError::Empty => write!(f, "empty"),
            EtError::Busy => write!(f, "busy"),
            EtError::Dead => write!(f, "system dead"),
            EtError::Read => write!(f, "read error"),
            EtError::Write => write!(f, "write error"),
            EtError::Remote => write!(f, "remote error"),
            EtError::TooMany => write!(f, "too many"),
            EtError::Io(kind) => write!(f, "io error: {kind:?}"),
        }
    }
}

impl std::error::Error for EtError {}

impl From<io::Error> for EtError {
    fn from(err: io::Error) -> Self {
        EtError::Io(err.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_round_trips_kind() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let et_err: EtError = io_err.into();
        assert_eq!(et_err, EtError::Io(io::ErrorKind::NotFound));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(EtError::Empty.to_string(), "empty");
        assert_eq!(EtError::Wakeup.to_string(), "woken up");
    }
}
