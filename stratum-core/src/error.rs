//! The closed, numeric error taxonomy every fallible operation in this
//! crate returns through (spec §6/§7).

use std::fmt;
use std::io;

/// Process-wide error taxonomy. Closed by design: callers match on it
/// exhaustively rather than probing an open `Other(i32)` escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  /// Not actually an error; used where a `Result` return is convenient
  /// but the completion itself carries no error (e.g. an `open_done`
  /// continuation that succeeded).
  Ok,
  NoMemory,
  NotReady,
  NotSupported,
  Invalid,
  InUse,
  /// Non-terminal: the caller should await a continuation rather than
  /// treat this as failure.
  InProgress,
  TimedOut,
  /// Normal EOF from the peer. Not logged at error severity (§7).
  RemoteClosed,
  /// Opaque transport I/O failure, propagated to the user read callback.
  Io,
}

impl ErrorCode {
  pub fn is_terminal(self) -> bool {
    !matches!(self, ErrorCode::Ok | ErrorCode::InProgress)
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorCode::Ok => "ok",
      ErrorCode::NoMemory => "out of memory",
      ErrorCode::NotReady => "not ready",
      ErrorCode::NotSupported => "not supported",
      ErrorCode::Invalid => "invalid argument",
      ErrorCode::InUse => "in use",
      ErrorCode::InProgress => "in progress",
      ErrorCode::TimedOut => "timed out",
      ErrorCode::RemoteClosed => "remote closed",
      ErrorCode::Io => "i/o error",
    };
    f.write_str(s)
  }
}

/// An [`ErrorCode`] plus, where one exists, the underlying OS error that
/// produced it.
#[derive(Debug, Clone)]
pub struct Error {
  code: ErrorCode,
  detail: Option<String>,
}

impl Error {
  pub fn new(code: ErrorCode) -> Self {
    Self { code, detail: None }
  }

  pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
    Self { code, detail: Some(detail.into()) }
  }

  pub fn code(&self) -> ErrorCode {
    self.code
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.detail {
      Some(detail) => write!(f, "{}: {}", self.code, detail),
      None => write!(f, "{}", self.code),
    }
  }
}

impl std::error::Error for Error {}

impl From<ErrorCode> for Error {
  fn from(code: ErrorCode) -> Self {
    Error::new(code)
  }
}

/// Maps an OS error at the `OsServices` boundary. `WouldBlock`/`Interrupted`
/// must never reach here: retrying on `EAGAIN`/`EINTR` is the reactor's job
/// (SPEC_FULL §7), so callers filter those out of the `io::Result` before
/// constructing an `Error`.
impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    debug_assert!(
      e.kind() != io::ErrorKind::WouldBlock
        && e.kind() != io::ErrorKind::Interrupted,
      "WouldBlock/Interrupted must be handled by the reactor, not surfaced as an Error"
    );
    let code = match e.kind() {
      io::ErrorKind::NotFound => ErrorCode::Invalid,
      io::ErrorKind::PermissionDenied => ErrorCode::NotSupported,
      io::ErrorKind::ConnectionReset
      | io::ErrorKind::ConnectionAborted
      | io::ErrorKind::BrokenPipe
      | io::ErrorKind::UnexpectedEof => ErrorCode::RemoteClosed,
      io::ErrorKind::TimedOut => ErrorCode::TimedOut,
      io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
        ErrorCode::Invalid
      }
      io::ErrorKind::AlreadyExists => ErrorCode::InUse,
      io::ErrorKind::OutOfMemory => ErrorCode::NoMemory,
      _ => ErrorCode::Io,
    };
    Error::with_detail(code, e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
