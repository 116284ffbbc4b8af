//! The base stream object: couples exactly one [`Ll`] and one
//! [`Filter`] into the uniform open/close/read/write contract every
//! caller sees (spec §4.3). Grounded on the `GENSIO_FILTER_FUNC_*`/
//! `GENSIO_LL_FUNC_*` contracts in `gensio_base.h`; there is no
//! `gensio_base.c` in the source this is grounded on to translate
//! directly, so the enable-derivation, open-protocol, and
//! write-pump loops below are built from that header plus
//! `gensio_ll_fd.c`'s own caller-side usage of it.
//!
//! The lower layer and the filter+state live behind two separate
//! locks. A real reactor-backed `Ll` never calls back into its
//! registered callback from inside `open`/`close`/
//! `set_read_callback_enable`/`set_write_callback_enable` — it just
//! reprograms the poll set (or completes asynchronously off the
//! reactor thread) and returns, same as `gensio_ll_fd.c`'s
//! `o->set_read_handler`. A synchronous test double (`PipeLl`) can't
//! make that promise: its `open`/`close` call `done` before returning,
//! and its enables can call the registered callback directly. Every
//! entry point that calls into the `Ll` trait object therefore holds
//! `in_ll_call` for the duration of that call, so a reentrant attempt
//! to touch the `Ll` from inside the synchronous callback sees it set
//! and just marks itself pending instead of recursing into the `Ll`
//! lock the outer call already holds; leaving the guarded section
//! drains whatever got deferred, including any user-facing
//! continuation that would otherwise have fired while the `Ll` lock
//! was still held (spec §5 lock discipline rule 1).

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::filter::{Filter, HandshakeProgress};
use crate::ll::{Ll, LlEvent};
use crate::os::{Lock, OsServices, Timer};
use crate::{Error, ErrorCode, Result};

/// Event delivered to the stream's user callback (spec §6 user event
/// callback).
pub enum Event<'a> {
  /// Bytes decoded by the filter, ready for the user to consume.
  /// Returns the number of bytes consumed from `data`; anything left
  /// over is redelivered on the next readiness callback.
  Read { data: &'a [u8] },
  WriteReady,
  /// The stream hit a terminal, unrecoverable error.
  Err(&'a Error),
}

pub type UserCallback = dyn FnMut(Event<'_>) -> usize + Send;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Closed,
  InOpen,
  Open,
  InClose,
}

struct FilterState {
  filter: Box<dyn Filter>,
  state: State,
  read_enabled: bool,
  write_enabled: bool,
  /// Bytes the filter has decoded but the user hasn't drained yet,
  /// separate from any buffering the filter does internally: this is
  /// strictly post-filter, pre-user.
  pending_to_user: VecDeque<u8>,
  open_done: Option<Box<dyn FnOnce(Result<()>) + Send>>,
  close_done: Option<Box<dyn FnOnce() + Send>>,
}

struct Inner<O: OsServices> {
  os: O,
  fs: Lock<FilterState>,
  ll: Lock<Box<dyn Ll>>,
  /// The filter handshake's retry timer (scenario S4), live only
  /// between a `Retry(timeout)` and the next `try_connect` attempt.
  timer: Lock<Option<O::Timer>>,
  user_cb: crate::sync::Mutex<Option<Box<UserCallback>>>,
  in_ll_call: AtomicBool,
  recompute_pending: AtomicBool,
  write_ready_pending: AtomicBool,
  /// User-facing continuations that arrived while `in_ll_call` was
  /// held and so couldn't run without violating "never call user code
  /// with an internal lock held" — drained the moment the guard is
  /// released.
  deferred: Lock<VecDeque<Box<dyn FnOnce() + Send>>>,
}

/// Couples one [`Ll`] and one [`Filter`] over an `O: OsServices`,
/// which the open protocol's handshake-retry timer (spec §4.3 step 3,
/// scenario S4) is allocated from.
///
/// Cloning shares the same underlying stream: every clone sees the same
/// open/close state and the same callback, the way multiple references
/// to the same `gensio` object would. This is what lets a user callback
/// hold a handle to its own stream to write back from inside a read
/// event without re-entering through a raw pointer.
pub struct BaseStream<O: OsServices> {
  inner: Arc<Inner<O>>,
}

impl<O: OsServices> Clone for BaseStream<O> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

impl<O: OsServices> BaseStream<O> {
  pub fn new(os: O, ll: Box<dyn Ll>, filter: Box<dyn Filter>) -> Self {
    Self {
      inner: Arc::new(Inner {
        os,
        fs: Lock::new(FilterState {
          filter,
          state: State::Closed,
          read_enabled: false,
          write_enabled: false,
          pending_to_user: VecDeque::new(),
          open_done: None,
          close_done: None,
        }),
        ll: Lock::new(ll),
        timer: Lock::new(None),
        user_cb: crate::sync::Mutex::new(None),
        in_ll_call: AtomicBool::new(false),
        recompute_pending: AtomicBool::new(false),
        write_ready_pending: AtomicBool::new(false),
        deferred: Lock::new(VecDeque::new()),
      }),
    }
  }

  pub fn set_callback(&mut self, cb: Box<UserCallback>) {
    *self.inner.user_cb.lock() = Some(cb);
  }

  /// Drives the open protocol (spec §4.3 "Open protocol"): opens the
  /// LL, then drives `filter.try_connect` — arming the filter's retry
  /// timer on `Retry`, waiting for more I/O on `InProgress` — until it
  /// reports `Done`, gates on `filter.check_open_done`, and only then
  /// transitions to `Open` and fires `done`. Any failure along the way
  /// transitions back to `Closed` and fires `done` with the error.
  pub fn open(&mut self, done: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()> {
    {
      let mut fs = self.inner.fs.lock();
      if fs.state != State::Closed {
        return Err(ErrorCode::InUse.into());
      }
      fs.state = State::InOpen;
      fs.open_done = Some(done);
      fs.filter.setup()?;
    }

    let inner = self.inner.clone();
    self.inner.ll.lock().set_callback(Box::new(move |event| match event {
      LlEvent::Read { data, err } => on_ll_read(&inner, data, err),
      LlEvent::WriteReady => {
        on_ll_write_ready(&inner);
        0
      }
    }));

    let inner = self.inner.clone();
    call_ll_guarded(&self.inner, move |ll| {
      ll.open(Box::new(move |result| match result {
        Ok(()) => drive_handshake(&inner),
        Err(e) => fail_open(&inner, e),
      }))
    })
  }

  /// Drives the close protocol (spec §4.3 "Close protocol"): cancels
  /// any pending handshake-retry timer, runs `filter.try_disconnect`
  /// to completion (the bundled filters never return anything but
  /// `Done`; a real protocol filter would be pumped the same way
  /// `open` pumps `try_connect`), closes the LL, then fires `done`.
  pub fn close(&mut self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
    {
      let mut fs = self.inner.fs.lock();
      if fs.state != State::Open && fs.state != State::InOpen {
        return Err(ErrorCode::NotReady.into());
      }
      fs.state = State::InClose;
      fs.close_done = Some(done);
      let _ = fs.filter.try_disconnect();
      fs.filter.cleanup();
    }
    self.inner.timer.lock().take();

    let inner = self.inner.clone();
    call_ll_guarded(&self.inner, move |ll| {
      ll.close(Box::new(move || {
        let done = {
          let mut fs = inner.fs.lock();
          fs.state = State::Closed;
          fs.close_done.take()
        };
        if let Some(done) = done {
          fire_or_defer(&inner, move || done());
        }
      }))
    })
  }

  /// Writes `data` through the filter. The filter is expected to
  /// accept every byte of `data` (buffering whatever the lower layer
  /// doesn't immediately take) unless it's still backed up from a
  /// previous short write, in which case it reports `0` and the base
  /// relies on `WriteReady` to signal when to retry (spec §4.3 write
  /// pump, scenario S6 — the caller never loops to resend a
  /// remainder).
  pub fn write(&mut self, data: &[u8]) -> Result<usize> {
    {
      let fs = self.inner.fs.lock();
      if fs.state != State::Open {
        return Err(ErrorCode::NotReady.into());
      }
    }
    let n = {
      let mut fs = self.inner.fs.lock();
      let mut ll = self.inner.ll.lock();
      fs.filter.ul_write(data, &mut |bytes| ll.write(&[IoSlice::new(bytes)]))?
    };
    sync_ll(&self.inner);
    Ok(n)
  }

  pub fn set_read_callback_enable(&mut self, enabled: bool) {
    self.inner.fs.lock().read_enabled = enabled;
    sync_ll(&self.inner);
  }

  pub fn set_write_callback_enable(&mut self, enabled: bool) {
    self.inner.fs.lock().write_enabled = enabled;
    sync_ll(&self.inner);
  }

  pub fn control(&mut self, get: bool, option: u32, data: &mut Vec<u8>) -> Result<()> {
    match self.inner.fs.lock().filter.control(get, option, data) {
      Err(e) if e.code() == ErrorCode::NotSupported => self.inner.ll.lock().control(get, option, data),
      other => other,
    }
  }

  pub fn remote_id(&self) -> Option<i32> {
    self.inner.ll.lock().remote_id()
  }
}

/// Drives `filter.try_connect` one step (spec §4.3 open protocol steps
/// 2-3). Called after the LL finishes opening, after more handshake
/// bytes arrive (`InProgress`), and after the retry timer fires.
fn drive_handshake<O: OsServices>(inner: &Arc<Inner<O>>) {
  let progress = {
    let mut fs = inner.fs.lock();
    if fs.state != State::InOpen {
      return;
    }
    fs.filter.try_connect()
  };
  match progress {
    Ok(HandshakeProgress::Done) => finish_open(inner),
    Ok(HandshakeProgress::InProgress) => sync_ll(inner),
    Ok(HandshakeProgress::Retry(after)) => arm_retry_timer(inner, after),
    Err(e) => fail_open(inner, e),
  }
}

/// Arms the filter's retry timer (scenario S4: `retry_with_timer`).
/// `Weak` breaks the `Inner -> timer -> callback -> Inner` cycle the
/// timer handle would otherwise form by living inside the very struct
/// its callback needs to reach.
fn arm_retry_timer<O: OsServices>(inner: &Arc<Inner<O>>, after: Duration) {
  let weak: Weak<Inner<O>> = Arc::downgrade(inner);
  let timer = match inner.os.alloc_timer(move || {
    if let Some(inner) = weak.upgrade() {
      inner.fs.lock().filter.timeout();
      drive_handshake(&inner);
    }
  }) {
    Ok(t) => t,
    Err(e) => {
      fail_open(inner, e);
      return;
    }
  };
  if let Err(e) = timer.start(after) {
    fail_open(inner, e);
    return;
  }
  *inner.timer.lock() = Some(timer);
}

/// Final step of a successful handshake (spec §4.3 step 4, §4.2
/// `check_open_done`): gates on the filter's own final check before
/// transitioning to `Open` and firing the user's open continuation.
fn finish_open<O: OsServices>(inner: &Arc<Inner<O>>) {
  inner.timer.lock().take();
  let gate = inner.fs.lock().filter.check_open_done();
  match gate {
    Ok(()) => {
      let done = {
        let mut fs = inner.fs.lock();
        fs.state = State::Open;
        fs.open_done.take()
      };
      sync_ll(inner);
      if let Some(done) = done {
        fire_or_defer(inner, move || done(Ok(())));
      }
    }
    Err(e) => fail_open(inner, e),
  }
}

/// Aborts an in-progress open with `e` (spec §4.3 step 4 "on any
/// failure"): tears down the filter, drops the LL's handle on the
/// stream, and fires the user's continuation with the error.
fn fail_open<O: OsServices>(inner: &Arc<Inner<O>>, e: Error) {
  inner.timer.lock().take();
  let done = {
    let mut fs = inner.fs.lock();
    fs.state = State::Closed;
    fs.filter.cleanup();
    fs.open_done.take()
  };
  if let Some(done) = done {
    fire_or_defer(inner, move || done(Err(e)));
  }
}

/// Recomputes the lower layer's read/write enables from the user's
/// requested enables plus what the filter currently needs, and, if a
/// write-ready edge is pending, flushes whatever the filter is still
/// holding back from a prior short write before deciding whether to
/// deliver the user's `WriteReady` (spec §4.3 enable-derivation rule /
/// write pump). This is the single place that touches the `Ll` for
/// anything derived from state change, as opposed to a direct
/// open/close command.
fn sync_ll<O: OsServices>(inner: &Arc<Inner<O>>) {
  if inner.in_ll_call.swap(true, Ordering::AcqRel) {
    // Reentered from inside an `Ll` call on this same thread (a
    // synchronous test double's enable callback, say): mark pending
    // and let the outer call re-derive once it unwinds, instead of
    // recursing into the `Ll` lock it already holds.
    inner.recompute_pending.store(true, Ordering::Release);
    return;
  }

  let notify_write_ready = {
    let mut fs = inner.fs.lock();
    if fs.state != State::Open {
      drop(fs);
      leave_ll_call(inner);
      return;
    }
    let mut notify = false;
    if inner.write_ready_pending.swap(false, Ordering::AcqRel) {
      let mut ll = inner.ll.lock();
      let _ = fs.filter.ll_write_ready(&mut |bytes| ll.write(&[IoSlice::new(bytes)]));
      notify = !fs.filter.ll_write_pending();
    }
    let want_read =
      fs.read_enabled || fs.filter.ll_read_needed() || fs.filter.ul_read_pending() || !fs.pending_to_user.is_empty();
    let want_write = fs.write_enabled || fs.filter.ll_write_pending();
    drop(fs);
    {
      let mut ll = inner.ll.lock();
      ll.set_read_callback_enable(want_read);
      ll.set_write_callback_enable(want_write);
    }
    notify
  };

  leave_ll_call(inner);
  if notify_write_ready {
    fire_or_defer(inner, {
      let inner = inner.clone();
      move || {
        crate::os::assert_no_locks_held();
        let mut cb = inner.user_cb.lock();
        if let Some(cb) = cb.as_mut() {
          cb(Event::WriteReady);
        }
      }
    });
  }
}

/// Runs `f` against the locked `Ll` with `in_ll_call` held for the
/// duration, so a synchronous callback triggered from inside `f` (a
/// test double's `open`/`close` completing immediately, say) can't
/// recurse back into this same `Ll` lock via `sync_ll` — it just marks
/// itself pending and returns, same as the reentrant branch inside
/// `sync_ll` itself. Once `f` returns and the `Ll` lock is free again,
/// whatever got deferred during the call runs for real.
fn call_ll_guarded<O, F, R>(inner: &Arc<Inner<O>>, f: F) -> R
where
  O: OsServices,
  F: FnOnce(&mut Box<dyn Ll>) -> R,
{
  inner.in_ll_call.store(true, Ordering::Release);
  let result = f(&mut inner.ll.lock());
  leave_ll_call(inner);
  result
}

/// Clears `in_ll_call` and drains whatever accumulated while it was
/// held: a deferred enable recompute, then any deferred user-facing
/// continuations, each invoked with no internal lock on this stream
/// held (spec §5 lock discipline rule 1).
fn leave_ll_call<O: OsServices>(inner: &Arc<Inner<O>>) {
  inner.in_ll_call.store(false, Ordering::Release);
  if inner.recompute_pending.swap(false, Ordering::AcqRel) {
    sync_ll(inner);
  }
  loop {
    let next = inner.deferred.lock().pop_front();
    match next {
      Some(f) => {
        crate::os::assert_no_locks_held();
        f();
      }
      None => return,
    }
  }
}

/// Invokes `f` now if no internal lock chain is in flight on this
/// stream, or queues it to run the moment the current guarded `Ll`
/// call unwinds. Every user-facing continuation (`open_done`,
/// `close_done`, `WriteReady`) goes through this instead of calling
/// directly, because a synchronous `Ll` test double can complete
/// `open`/`close` before returning, which would otherwise fire the
/// continuation while this stream's own `Ll` lock is still held.
fn fire_or_defer<O: OsServices>(inner: &Arc<Inner<O>>, f: impl FnOnce() + Send + 'static) {
  if inner.in_ll_call.load(Ordering::Acquire) {
    inner.deferred.lock().push_back(Box::new(f));
  } else {
    crate::os::assert_no_locks_held();
    f();
  }
}

/// Feeds raw lower-layer bytes through the filter, queues whatever it
/// decodes, then drains that queue to the user. Returns the number of
/// raw `data` bytes consumed — always all of it, since the filter is
/// expected to buffer internally rather than push backpressure onto
/// the lower layer's read side.
fn on_ll_read<O: OsServices>(inner: &Arc<Inner<O>>, data: &[u8], err: Option<&Error>) -> usize {
  if let Some(err) = err {
    deliver_err(inner, err);
    return data.len();
  }
  let was_in_open = {
    let mut fs = inner.fs.lock();
    let in_open = fs.state == State::InOpen;
    let FilterState { filter, pending_to_user, .. } = &mut *fs;
    let _ = filter.ll_write(data, &mut |decoded| {
      pending_to_user.extend(decoded);
      decoded.len()
    });
    in_open
  };
  if was_in_open {
    // Spec `try_connect` contract: "retry once more I/O has happened on
    // the lower layer" — a filter mid-handshake consumes its handshake
    // bytes through the same `ll_write` seam and signals progress only
    // when `try_connect` is called again.
    drive_handshake(inner);
  }
  drain_to_user(inner);
  data.len()
}

fn drain_to_user<O: OsServices>(inner: &Arc<Inner<O>>) {
  loop {
    let chunk: Vec<u8> = {
      let fs = inner.fs.lock();
      if fs.pending_to_user.is_empty() {
        return;
      }
      fs.pending_to_user.iter().copied().collect()
    };
    crate::os::assert_no_locks_held();
    let consumed = {
      let mut cb = inner.user_cb.lock();
      match cb.as_mut() {
        Some(cb) => cb(Event::Read { data: &chunk }),
        None => 0,
      }
    };
    {
      let mut fs = inner.fs.lock();
      fs.pending_to_user.drain(..consumed);
    }
    sync_ll(inner);
    if consumed == 0 {
      return;
    }
  }
}

fn deliver_err<O: OsServices>(inner: &Arc<Inner<O>>, err: &Error) {
  crate::os::assert_no_locks_held();
  let mut cb = inner.user_cb.lock();
  if let Some(cb) = cb.as_mut() {
    cb(Event::Err(err));
  }
}

fn on_ll_write_ready<O: OsServices>(inner: &Arc<Inner<O>>) {
  inner.write_ready_pending.store(true, Ordering::Release);
  sync_ll(inner);
}
