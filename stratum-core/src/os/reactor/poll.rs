//! OS-specific readiness polling, abstracted so [`super::ReactorOsServices`]
//! can run unmodified on epoll and kqueue platforms. Grounded on the
//! `ReadinessPoll`/`Interest` split from the teacher's pollingv2 backend,
//! but level-triggered (no `EPOLLONESHOT`/`EV_ONESHOT`): the spec's
//! enable flags are level intents ("keep telling me while this is
//! true"), not one-shot arm requests.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
  pub read: bool,
  pub write: bool,
}

impl Interest {
  pub const NONE: Self = Self { read: false, write: false };
}

#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
  pub key: u64,
  pub readable: bool,
  pub writable: bool,
  /// `EPOLLERR`/`EPOLLHUP` or the kqueue `EV_ERROR`/`EV_EOF` flags:
  /// surfaced to both the read and except callbacks so a half-closed
  /// peer is never silently missed.
  pub error: bool,
}

pub trait Poller: Send + Sync + Sized {
  fn new() -> io::Result<Self>;

  /// Registers `fd` under `key`. Not idempotent: fails if already added.
  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Changes the interest for an already-added `fd`.
  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Removes all interest for `fd`.
  fn delete(&self, fd: RawFd) -> io::Result<()>;

  /// Blocks (up to `timeout`, or indefinitely if `None`) for readiness
  /// events, appending them to `out`. Returns the number appended.
  fn wait(
    &self,
    out: &mut Vec<ReadyEvent>,
    timeout: Option<Duration>,
  ) -> io::Result<usize>;

  /// Wakes a concurrent, possibly-blocked `wait` call.
  fn notify(&self) -> io::Result<()>;
}

#[cfg(target_os = "linux")]
pub type DefaultPoller = super::epoll::EpollPoller;

#[cfg(not(target_os = "linux"))]
pub type DefaultPoller = super::kqueue::KqueuePoller;
