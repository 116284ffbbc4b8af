//! The OS-services contract the core consumes (spec §6): locks, timers,
//! one-shot runners, and fd readiness registration. The core is generic
//! over any `OsServices` implementation — it never assumes a particular
//! event loop.
//!
//! Unlike the source this crate is grounded on, there is no
//! `alloc`/`free` pair for any of these: every handle frees its OS
//! resource in its own `Drop` impl, which is both the idiomatic Rust
//! rendition and strictly safer (nothing here can be leaked by a
//! forgotten `free_*` call).

pub mod reactor;

mod lock;

pub use lock::{Lock, LockGuard, assert_no_locks_held};

use std::io::IoSlice;
use std::os::fd::RawFd;
use std::time::Duration;

/// Outcome of [`Timer::stop_with_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStopStatus {
  /// The timer had already fired or was not running.
  TimedOut,
  /// The timer was running and has now been cancelled.
  Stopping,
}

/// Severity for the process-wide log sink (spec §9 "global/process-wide
/// logging" realized as a sink method rather than a literal global, see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Error,
  Warn,
  Info,
  Debug,
}

/// A one-shot, idempotent-while-pending callback scheduler (spec
/// `alloc_runner`/`run`/`free_runner`). Calling `run` while a previous
/// invocation's callback has not yet fired must not schedule a second
/// call; this is the primitive the deferred-op mechanism in §4.1/§4.3
/// relies on to avoid lock nesting.
pub trait Runner: Send + Sync {
  /// Arms the runner. A no-op if already armed.
  fn run(&self);
}

/// A single-shot timer (spec `alloc_timer`/`start_timer`/
/// `stop_timer_with_done`/`free_timer`).
pub trait Timer: Send + Sync {
  /// Arms the timer to fire after `after`, replacing any previous
  /// arming.
  fn start(&self, after: Duration) -> crate::Result<()>;

  /// Cancels the timer. `done` is invoked (off the caller's stack, via
  /// the reactor) once it is safe to assume the timer will not fire
  /// again; returns immediately with the status.
  fn stop_with_done(
    &self,
    done: Box<dyn FnOnce() + Send>,
  ) -> crate::Result<TimerStopStatus>;
}

/// Readiness registration for one fd (spec `set_fd_handlers` +
/// `set_read_handler`/`set_write_handler`/`set_except_handler`/
/// `clear_fd_handlers`/`clear_fd_handlers_norpt`).
pub trait FdRegistration: Send + Sync {
  fn set_read_handler(&self, enabled: bool);
  fn set_write_handler(&self, enabled: bool);
  fn set_except_handler(&self, enabled: bool);

  /// Deregisters the fd and invokes the `cleared` callback once the
  /// reactor guarantees no further readiness callback for this fd will
  /// run (possibly asynchronously, if a callback is in flight).
  fn clear(&self);

  /// Deregisters the fd without ever invoking `cleared`. Used on the
  /// disable-and-abandon path (spec `GENSIO_LL_FUNC_DISABLE`).
  fn clear_norpt(&self);
}

/// The four callbacks a registered fd delivers readiness through, bound
/// to a single handler (closures capture whatever per-fd state they
/// need, standing in for the C contract's `void *data` + bare fn
/// pointer pairs).
pub struct FdCallbacks {
  pub read_ready: std::sync::Arc<dyn Fn() + Send + Sync>,
  pub write_ready: std::sync::Arc<dyn Fn() + Send + Sync>,
  pub except_ready: std::sync::Arc<dyn Fn() + Send + Sync>,
  pub cleared: std::sync::Arc<dyn Fn() + Send + Sync>,
}

/// The contract itself. An application picks one concrete
/// implementation (see [`reactor::ReactorOsServices`] for the bundled
/// default) and threads it through every `Ll`/`Filter`/`BaseStream`/
/// dispatcher `Context` it creates.
pub trait OsServices: Clone + Send + Sync + 'static {
  type Runner: Runner;
  type Timer: Timer;
  type FdReg: FdRegistration;

  fn alloc_runner<F>(&self, callback: F) -> crate::Result<Self::Runner>
  where
    F: FnMut() + Send + 'static;

  fn alloc_timer<F>(&self, callback: F) -> crate::Result<Self::Timer>
  where
    F: FnMut() + Send + 'static;

  fn register_fd(
    &self,
    fd: RawFd,
    callbacks: FdCallbacks,
  ) -> crate::Result<Self::FdReg>;

  /// Scatter/gather write, passed straight through to the OS (spec
  /// `write`). `WouldBlock`/`Interrupted` are returned as-is so the
  /// caller's own retry-on-readiness logic can see them; they are
  /// never converted to `Error` (see `error::Error::from<io::Error>`).
  fn write_sg(&self, fd: RawFd, bufs: &[IoSlice<'_>]) -> std::io::Result<usize>;

  /// Buffer-taking read (spec `read`).
  fn read_into(&self, fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize>;

  fn log(&self, severity: Severity, message: &str);
}
