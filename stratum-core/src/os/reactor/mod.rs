//! Reference [`OsServices`] implementation: a single background thread
//! running a readiness poll (epoll on Linux, kqueue elsewhere), a timer
//! heap, and a runner queue. Grounded on the teacher's
//! `backends/pollingv2` reactor plus the `OpStore`/id-table pattern from
//! `driver.rs`.

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(not(target_os = "linux"))]
mod kqueue;
mod poll;

use std::collections::{BinaryHeap, HashMap};
use std::io::IoSlice;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use poll::{DefaultPoller, Interest, Poller};

use super::{FdCallbacks, FdRegistration, Runner, Severity, Timer, TimerStopStatus};
use crate::error::ErrorCode;

fn next_id(counter: &AtomicU64) -> u64 {
  counter.fetch_add(1, Ordering::Relaxed)
}

struct FdEntry {
  fd: RawFd,
  interest: Interest,
  callbacks: FdCallbacks,
  cleared: bool,
}

struct RunnerEntry {
  callback: Box<dyn FnMut() + Send>,
  armed: bool,
}

struct TimerEntry {
  callback: Box<dyn FnMut() + Send>,
  deadline: Option<Instant>,
  done: Option<Box<dyn FnOnce() + Send>>,
}

#[derive(PartialEq, Eq)]
struct HeapKey {
  deadline: Instant,
  id: u64,
}

impl Ord for HeapKey {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
  }
}

impl PartialOrd for HeapKey {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

struct Tables {
  fds: HashMap<u64, FdEntry>,
  runners: HashMap<u64, RunnerEntry>,
  runner_queue: Vec<u64>,
  timers: HashMap<u64, TimerEntry>,
  timer_heap: BinaryHeap<HeapKey>,
  shutdown: bool,
}

struct Inner {
  poller: DefaultPoller,
  tables: Mutex<Tables>,
  next_fd_key: AtomicU64,
  next_runner_id: AtomicU64,
  next_timer_id: AtomicU64,
  thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the reactor; every `Timer`/`Runner`/`FdRegistration`
/// it hands out shares this `Arc`.
#[derive(Clone)]
pub struct ReactorOsServices {
  inner: Arc<Inner>,
}

impl ReactorOsServices {
  pub fn new() -> crate::Result<Self> {
    let poller = DefaultPoller::new().map_err(|e| {
      crate::Error::with_detail(ErrorCode::Io, format!("reactor init failed: {e}"))
    })?;
    let inner = Arc::new(Inner {
      poller,
      tables: Mutex::new(Tables {
        fds: HashMap::new(),
        runners: HashMap::new(),
        runner_queue: Vec::new(),
        timers: HashMap::new(),
        timer_heap: BinaryHeap::new(),
        shutdown: false,
      }),
      next_fd_key: AtomicU64::new(1),
      next_runner_id: AtomicU64::new(1),
      next_timer_id: AtomicU64::new(1),
      thread: Mutex::new(None),
    });
    let thread_inner = inner.clone();
    let handle = std::thread::Builder::new()
      .name("stratum-reactor".into())
      .spawn(move || reactor_loop(thread_inner))
      .map_err(|e| crate::Error::with_detail(ErrorCode::Io, e.to_string()))?;
    *inner.thread.lock().unwrap() = Some(handle);
    Ok(Self { inner })
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.tables.lock().unwrap().shutdown = true;
    let _ = self.poller.notify();
    if let Some(handle) = self.thread.lock().unwrap().take() {
      let _ = handle.join();
    }
  }
}

fn reactor_loop(inner: Arc<Inner>) {
  let mut events = Vec::with_capacity(256);
  loop {
    let timeout = {
      let tables = inner.tables.lock().unwrap();
      if tables.shutdown {
        return;
      }
      if !tables.runner_queue.is_empty() {
        Some(Duration::ZERO)
      } else {
        tables.timer_heap.peek().map(|k| {
          k.deadline.saturating_duration_since(Instant::now())
        })
      }
    };
    events.clear();
    if let Err(e) = inner.poller.wait(&mut events, timeout) {
      if e.kind() != std::io::ErrorKind::Interrupted {
        eprintln!("stratum-core: reactor poll failed: {e}");
      }
      continue;
    }
    for ev in &events {
      dispatch_fd_event(&inner, ev.key, ev.readable, ev.writable, ev.error);
    }
    run_due_timers(&inner);
    run_queued_runners(&inner);
  }
}

fn dispatch_fd_event(inner: &Arc<Inner>, key: u64, readable: bool, writable: bool, error: bool) {
  // Callbacks are invoked with no lock held, per the crate's reentrancy
  // discipline: clone what's needed, drop the guard, then call out.
  let (read_cb, write_cb, except_cb) = {
    let tables = inner.tables.lock().unwrap();
    match tables.fds.get(&key) {
      Some(entry) if !entry.cleared => {
        let want_read = readable && entry.interest.read;
        let want_write = writable && entry.interest.write;
        (
          want_read.then(|| dup_fn(&entry.callbacks.read_ready)),
          want_write.then(|| dup_fn(&entry.callbacks.write_ready)),
          error.then(|| dup_fn(&entry.callbacks.except_ready)),
        )
      }
      _ => (None, None, None),
    }
  };
  if let Some(cb) = read_cb {
    cb();
  }
  if let Some(cb) = write_cb {
    cb();
  }
  if let Some(cb) = except_cb {
    cb();
  }
}

fn dup_fn(f: &Arc<dyn Fn() + Send + Sync>) -> Arc<dyn Fn() + Send + Sync> {
  f.clone()
}

fn run_due_timers(inner: &Arc<Inner>) {
  loop {
    let due_id = {
      let mut tables = inner.tables.lock().unwrap();
      match tables.timer_heap.peek().map(|top| top.deadline) {
        Some(top_deadline) if top_deadline <= Instant::now() => {
          let id = tables.timer_heap.pop().unwrap().id;
          match tables.timers.get(&id) {
            Some(t) if t.deadline == Some(top_deadline) => Some(id),
            _ => None,
          }
        }
        _ => None,
      }
    };
    let Some(id) = due_id else { break };
    let mut cb = {
      let mut tables = inner.tables.lock().unwrap();
      match tables.timers.get_mut(&id) {
        Some(t) => {
          t.deadline = None;
          // Safe stand-in: callbacks are `FnMut`, not `Clone`; we move
          // it out behind a temporary no-op and restore nothing, since
          // a fired one-shot timer is not re-armed until `start` is
          // called again.
          std::mem::replace(&mut t.callback, Box::new(|| {}))
        }
        None => continue,
      }
    };
    cb();
  }
}

fn run_queued_runners(inner: &Arc<Inner>) {
  let ids = {
    let mut tables = inner.tables.lock().unwrap();
    std::mem::take(&mut tables.runner_queue)
  };
  for id in ids {
    let mut cb = {
      let mut tables = inner.tables.lock().unwrap();
      match tables.runners.get_mut(&id) {
        Some(r) if r.armed => {
          r.armed = false;
          Some(std::mem::replace(&mut r.callback, Box::new(|| {})))
        }
        _ => None,
      }
    };
    if let Some(cb) = &mut cb {
      cb();
    }
    if let Some(cb) = cb {
      let mut tables = inner.tables.lock().unwrap();
      if let Some(r) = tables.runners.get_mut(&id) {
        if !r.armed {
          r.callback = cb;
        }
      }
    }
  }
}

pub struct ReactorRunner {
  inner: Arc<Inner>,
  id: u64,
}

impl Runner for ReactorRunner {
  fn run(&self) {
    let mut tables = self.inner.tables.lock().unwrap();
    if let Some(r) = tables.runners.get_mut(&self.id) {
      if !r.armed {
        r.armed = true;
        tables.runner_queue.push(self.id);
        drop(tables);
        let _ = self.inner.poller.notify();
      }
    }
  }
}

pub struct ReactorTimer {
  inner: Arc<Inner>,
  id: u64,
}

impl Timer for ReactorTimer {
  fn start(&self, after: Duration) -> crate::Result<()> {
    let deadline = Instant::now() + after;
    let mut tables = self.inner.tables.lock().unwrap();
    if let Some(t) = tables.timers.get_mut(&self.id) {
      t.deadline = Some(deadline);
    }
    tables.timer_heap.push(HeapKey { deadline, id: self.id });
    drop(tables);
    self.inner.poller.notify().map_err(crate::Error::from)
  }

  fn stop_with_done(
    &self,
    done: Box<dyn FnOnce() + Send>,
  ) -> crate::Result<TimerStopStatus> {
    let mut tables = self.inner.tables.lock().unwrap();
    let Some(t) = tables.timers.get_mut(&self.id) else {
      drop(tables);
      done();
      return Ok(TimerStopStatus::TimedOut);
    };
    let was_running = t.deadline.is_some();
    t.deadline = None;
    t.done = Some(done);
    drop(tables);
    let mut tables = self.inner.tables.lock().unwrap();
    if let Some(done) = tables.timers.get_mut(&self.id).and_then(|t| t.done.take()) {
      drop(tables);
      done();
    }
    Ok(if was_running { TimerStopStatus::Stopping } else { TimerStopStatus::TimedOut })
  }
}

pub struct ReactorFdReg {
  inner: Arc<Inner>,
  fd: RawFd,
  key: u64,
}

impl ReactorFdReg {
  fn apply(&self, interest: Interest) {
    let mut tables = self.inner.tables.lock().unwrap();
    if let Some(entry) = tables.fds.get_mut(&self.key) {
      entry.interest = interest;
      let fd = entry.fd;
      let current = entry.interest;
      drop(tables);
      let _ = self.inner.poller.modify(fd, self.key, current);
    }
  }
}

impl FdRegistration for ReactorFdReg {
  fn set_read_handler(&self, enabled: bool) {
    let interest = {
      let mut tables = self.inner.tables.lock().unwrap();
      tables.fds.get_mut(&self.key).map(|e| {
        e.interest.read = enabled;
        e.interest
      })
    };
    if let Some(interest) = interest {
      let _ = self.inner.poller.modify(self.fd, self.key, interest);
    }
  }

  fn set_write_handler(&self, enabled: bool) {
    let interest = {
      let mut tables = self.inner.tables.lock().unwrap();
      tables.fds.get_mut(&self.key).map(|e| {
        e.interest.write = enabled;
        e.interest
      })
    };
    if let Some(interest) = interest {
      let _ = self.inner.poller.modify(self.fd, self.key, interest);
    }
  }

  fn set_except_handler(&self, _enabled: bool) {
    // Exceptions (EPOLLERR/EPOLLHUP, kqueue EV_EOF) are always reported
    // whenever the fd is registered for read or write; nothing to arm.
  }

  fn clear(&self) {
    let cleared_cb = {
      let mut tables = self.inner.tables.lock().unwrap();
      let _ = self.inner.poller.delete(self.fd);
      tables.fds.remove(&self.key).map(|e| e.callbacks.cleared)
    };
    if let Some(cb) = cleared_cb {
      cb();
    }
  }

  fn clear_norpt(&self) {
    let mut tables = self.inner.tables.lock().unwrap();
    let _ = self.inner.poller.delete(self.fd);
    tables.fds.remove(&self.key);
  }
}

impl super::OsServices for ReactorOsServices {
  type Runner = ReactorRunner;
  type Timer = ReactorTimer;
  type FdReg = ReactorFdReg;

  fn alloc_runner<F>(&self, callback: F) -> crate::Result<Self::Runner>
  where
    F: FnMut() + Send + 'static,
  {
    let id = next_id(&self.inner.next_runner_id);
    let mut tables = self.inner.tables.lock().unwrap();
    tables.runners.insert(id, RunnerEntry { callback: Box::new(callback), armed: false });
    Ok(ReactorRunner { inner: self.inner.clone(), id })
  }

  fn alloc_timer<F>(&self, callback: F) -> crate::Result<Self::Timer>
  where
    F: FnMut() + Send + 'static,
  {
    let id = next_id(&self.inner.next_timer_id);
    let mut tables = self.inner.tables.lock().unwrap();
    tables.timers.insert(id, TimerEntry { callback: Box::new(callback), deadline: None, done: None });
    Ok(ReactorTimer { inner: self.inner.clone(), id })
  }

  fn register_fd(&self, fd: RawFd, callbacks: FdCallbacks) -> crate::Result<Self::FdReg> {
    let key = next_id(&self.inner.next_fd_key);
    self.inner.poller.add(fd, key, Interest::NONE).map_err(crate::Error::from)?;
    let mut tables = self.inner.tables.lock().unwrap();
    tables.fds.insert(key, FdEntry { fd, interest: Interest::NONE, callbacks, cleared: false });
    Ok(ReactorFdReg { inner: self.inner.clone(), fd, key })
  }

  fn write_sg(&self, fd: RawFd, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
    let res = unsafe {
      libc::writev(fd, bufs.as_ptr() as *const libc::iovec, bufs.len() as i32)
    };
    if res < 0 {
      Err(std::io::Error::last_os_error())
    } else {
      Ok(res as usize)
    }
  }

  fn read_into(&self, fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if res < 0 {
      Err(std::io::Error::last_os_error())
    } else {
      Ok(res as usize)
    }
  }

  fn log(&self, severity: Severity, message: &str) {
    #[cfg(feature = "reactor")]
    {
      match severity {
        Severity::Error => log::error!("{message}"),
        Severity::Warn => log::warn!("{message}"),
        Severity::Info => log::info!("{message}"),
        Severity::Debug => log::debug!("{message}"),
      }
    }
    #[cfg(not(feature = "reactor"))]
    {
      let _ = (severity, message);
    }
  }
}
