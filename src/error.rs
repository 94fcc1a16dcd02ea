use std::io;

/// Stable numeric error codes, mirrored from the original C++ source's
/// `enum ErrorCode`. Values are part of the public contract: callers may
/// match on them across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    NotImplement = 1,
    AlreadyInitialized = 2,

    SocketCreateFailed = 0x0001_0101,
    SocketBindFailed,
    SocketConnectFailed,
    SocketConnectInProgress,
    SocketListenFailed,

    CreateEpollFailed = 0x0001_0201,
    AddEpollEventFailed,
    DeleteEpollEventFailed,
    ModifyEpollEventFailed,

    BufferNotEnoughCapacity = 0x000F_0102,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} (0x{:08X})", self.as_i32())
    }
}

/// The library's single error type. Wraps a stable [`ErrorCode`] and,
/// where the failure originated at a syscall boundary, the source
/// `io::Error` so nothing about the underlying errno is lost.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Code(ErrorCode),

    #[error("{code}: {source}")]
    Io {
        code: ErrorCode,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Error::Code(code)
    }

    pub fn from_io(code: ErrorCode, source: io::Error) -> Self {
        Error::Io { code, source }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Code(c) => *c,
            Error::Io { code, .. } => *code,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable_numeric_values() {
        assert_eq!(ErrorCode::Success.as_i32(), 0);
        assert_eq!(ErrorCode::NotImplement.as_i32(), 1);
        assert_eq!(ErrorCode::AlreadyInitialized.as_i32(), 2);
        assert_eq!(ErrorCode::SocketCreateFailed.as_i32(), 0x0001_0101);
        assert_eq!(ErrorCode::SocketBindFailed.as_i32(), 0x0001_0102);
        assert_eq!(ErrorCode::SocketConnectFailed.as_i32(), 0x0001_0103);
        assert_eq!(ErrorCode::SocketConnectInProgress.as_i32(), 0x0001_0104);
        assert_eq!(ErrorCode::SocketListenFailed.as_i32(), 0x0001_0105);
        assert_eq!(ErrorCode::CreateEpollFailed.as_i32(), 0x0001_0201);
        assert_eq!(ErrorCode::AddEpollEventFailed.as_i32(), 0x0001_0202);
        assert_eq!(ErrorCode::DeleteEpollEventFailed.as_i32(), 0x0001_0203);
        assert_eq!(ErrorCode::ModifyEpollEventFailed.as_i32(), 0x0001_0204);
        assert_eq!(ErrorCode::BufferNotEnoughCapacity.as_i32(), 0x000F_0102);
    }

    #[test]
    fn code_roundtrips_through_both_variants() {
        let a = Error::new(ErrorCode::SocketBindFailed);
        assert_eq!(a.code(), ErrorCode::SocketBindFailed);

        let b = Error::from_io(ErrorCode::SocketConnectFailed, io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(b.code(), ErrorCode::SocketConnectFailed);
    }
}
