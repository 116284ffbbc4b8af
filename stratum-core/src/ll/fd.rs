//! Fd-backed [`Ll`], grounded on `gensio_ll_fd.c`.
//!
//! The source this is grounded on supports pluggable `sub_open`/
//! `retry_open` hooks so the same state machine backs TCP, UDP, serial
//! and stdio transports with different connect semantics. Connection
//! establishment is out of scope here (spec Non-goals): a `FdLl` always
//! wraps an fd that is already open, so `open` has no in-progress state
//! to drive and completes synchronously.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::os::fd::RawFd;
use std::sync::Arc;

use super::{Ll, LlCallback, LlEvent};
use crate::error::ErrorCode;
use crate::os::{FdCallbacks, FdRegistration, OsServices, Runner};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Closed,
  Open,
  InClose,
}

struct Shared {
  state: State,
  read_enabled: bool,
  pending_read: VecDeque<u8>,
  pending_err: Option<Error>,
  in_read: bool,
  close_done: Option<Box<dyn FnOnce() + Send>>,
}

/// Fd-backed lower layer. Generic over the [`OsServices`] reactor so it
/// never hardcodes which event loop drives it.
pub struct FdLl<O: OsServices> {
  os: O,
  fd: RawFd,
  max_read_size: usize,
  shared: Arc<crate::os::Lock<Shared>>,
  cb: Arc<crate::sync::Mutex<Option<Box<LlCallback>>>>,
  fd_reg: Option<O::FdReg>,
  deferred: Option<O::Runner>,
}

impl<O: OsServices> FdLl<O> {
  pub fn new(os: O, fd: RawFd, max_read_size: usize) -> Self {
    Self {
      os,
      fd,
      max_read_size,
      shared: Arc::new(crate::os::Lock::new(Shared {
        state: State::Open,
        read_enabled: false,
        pending_read: VecDeque::new(),
        pending_err: None,
        in_read: false,
        close_done: None,
      })),
      cb: Arc::new(crate::sync::Mutex::new(None)),
      fd_reg: None,
      deferred: None,
    }
  }

  fn deliver_read(shared: &Arc<crate::os::Lock<Shared>>, cb: &Arc<crate::sync::Mutex<Option<Box<LlCallback>>>>) {
    loop {
      let (chunk, err, more) = {
        let mut s = shared.lock();
        if s.pending_read.is_empty() && s.pending_err.is_none() {
          return;
        }
        let chunk: Vec<u8> = s.pending_read.drain(..).collect();
        let err = s.pending_err.take();
        (chunk, err, s.read_enabled)
      };
      crate::os::assert_no_locks_held();
      let consumed = {
        let mut cb = cb.lock();
        match cb.as_mut() {
          Some(cb) => cb(LlEvent::Read { data: &chunk, err: err.as_ref() }),
          None => chunk.len(),
        }
      };
      if consumed < chunk.len() {
        let mut s = shared.lock();
        for &b in chunk[consumed..].iter().rev() {
          s.pending_read.push_front(b);
        }
      }
      if !more || err.is_some() {
        return;
      }
    }
  }

  fn register(&mut self) -> Result<()> {
    let shared = self.shared.clone();
    let cb = self.cb.clone();
    let os = self.os.clone();
    let fd = self.fd;
    let max_read = self.max_read_size.max(1);

    let read_shared = shared.clone();
    let read_cb = cb.clone();
    let read_os = os.clone();
    let read_ready: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
      let should_read = {
        let mut s = read_shared.lock();
        if s.in_read || s.state != State::Open {
          false
        } else {
          s.in_read = true;
          true
        }
      };
      if !should_read {
        return;
      }
      let mut buf = vec![0u8; max_read];
      let result = read_os.read_into(fd, &mut buf);
      {
        let mut s = read_shared.lock();
        s.in_read = false;
        match result {
          Ok(0) => s.pending_err = Some(ErrorCode::RemoteClosed.into()),
          Ok(n) => s.pending_read.extend(buf[..n].iter().copied()),
          Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
              || e.kind() == std::io::ErrorKind::Interrupted => {}
          Err(e) => s.pending_err = Some(e.into()),
        }
      }
      Self::deliver_read(&read_shared, &read_cb);
    });

    let write_cb = cb.clone();
    let write_ready: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
      crate::os::assert_no_locks_held();
      let mut cb = write_cb.lock();
      if let Some(cb) = cb.as_mut() {
        cb(LlEvent::WriteReady);
      }
    });

    let except_shared = shared.clone();
    let except_cb = cb.clone();
    let except_ready: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
      {
        let mut s = except_shared.lock();
        if s.pending_err.is_none() {
          s.pending_err = Some(ErrorCode::RemoteClosed.into());
        }
      }
      Self::deliver_read(&except_shared, &except_cb);
    });

    let cleared_shared = shared.clone();
    let cleared: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
      let done = {
        let mut s = cleared_shared.lock();
        s.state = State::Closed;
        s.close_done.take()
      };
      if let Some(done) = done {
        done();
      }
    });

    let reg = os.register_fd(
      fd,
      FdCallbacks { read_ready, write_ready, except_ready, cleared },
    )?;
    self.fd_reg = Some(reg);

    let deferred_shared = shared.clone();
    let deferred_cb = cb.clone();
    let runner = os.alloc_runner(move || {
      Self::deliver_read(&deferred_shared, &deferred_cb);
    })?;
    self.deferred = Some(runner);
    Ok(())
  }
}

impl<O: OsServices> Ll for FdLl<O> {
  fn set_callback(&mut self, callback: Box<LlCallback>) {
    *self.cb.lock() = Some(callback);
  }

  fn open(&mut self, done: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()> {
    self.register()?;
    done(Ok(()));
    Ok(())
  }

  fn close(&mut self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
    let mut s = self.shared.lock();
    if s.state != State::Open {
      return Err(ErrorCode::NotReady.into());
    }
    s.state = State::InClose;
    s.close_done = Some(done);
    drop(s);
    if let Some(reg) = &self.fd_reg {
      reg.clear();
    }
    Ok(())
  }

  fn write(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
    match self.os.write_sg(self.fd, bufs) {
      Ok(n) => Ok(n),
      Err(e)
        if e.kind() == std::io::ErrorKind::WouldBlock
          || e.kind() == std::io::ErrorKind::Interrupted =>
      {
        Ok(0)
      }
      Err(e) => Err(e.into()),
    }
  }

  fn set_read_callback_enable(&mut self, enabled: bool) {
    let has_pending = {
      let mut s = self.shared.lock();
      s.read_enabled = enabled;
      enabled && !s.pending_read.is_empty()
    };
    if has_pending {
      if let Some(runner) = &self.deferred {
        runner.run();
      }
    }
    if let Some(reg) = &self.fd_reg {
      reg.set_read_handler(enabled);
      reg.set_except_handler(enabled);
    }
  }

  fn set_write_callback_enable(&mut self, enabled: bool) {
    if let Some(reg) = &self.fd_reg {
      reg.set_write_handler(enabled);
    }
  }

  fn remote_id(&self) -> Option<i32> {
    Some(self.fd as i32)
  }
}
