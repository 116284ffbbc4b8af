//! The callback dispatcher: serializes external async notifications
//! onto the library's own runner rather than the thread that produced
//! them, grounded on `gensio_mdns.c`'s `enqueue_callback`/`m->runner`
//! pair and `avahi_watcher.c`'s single `gensio_lock` guarding every
//! callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stratum_core::os::{OsServices, Runner};

/// One entry in the dispatcher's FIFO (spec §4.4 "Drain rule"). `Data`
/// carries a real payload to route to its watch; `AllForNow`/`Remove`
/// are the spec's two special markers, each carrying the id of the
/// watch they apply to: `AllForNow` delivers the sentinel event to it,
/// `Remove` frees it from the watch table once popped.
pub enum CallbackEntry<T> {
  Data(T),
  AllForNow(u64),
  Remove(u64),
}

struct State<T> {
  queue: VecDeque<CallbackEntry<T>>,
  runner_pending: bool,
  stopped: bool,
}

/// Owns the runner every queued callback is eventually drained through.
/// Cloning a `Context` shares the same queue and refcount, mirroring
/// `gensio_mdns_ref`/`gensio_mdns_deref_and_unlock`.
pub struct Context<O: OsServices, T: Send + 'static> {
  state: Arc<Mutex<State<T>>>,
  runner: Arc<O::Runner>,
  refcount: Arc<AtomicUsize>,
  freed: Arc<AtomicBool>,
}

impl<O: OsServices, T: Send + 'static> Clone for Context<O, T> {
  fn clone(&self) -> Self {
    self.refcount.fetch_add(1, Ordering::AcqRel);
    Self {
      state: self.state.clone(),
      runner: self.runner.clone(),
      refcount: self.refcount.clone(),
      freed: self.freed.clone(),
    }
  }
}

impl<O: OsServices, T: Send + 'static> Context<O, T> {
  /// Builds a dispatcher. `drain` is invoked on the reactor's runner
  /// with each entry popped off the queue, in order, until the queue is
  /// empty again.
  pub fn new<F>(os: &O, mut drain: F) -> stratum_core::Result<Self>
  where
    F: FnMut(CallbackEntry<T>) + Send + 'static,
  {
    let state: Arc<Mutex<State<T>>> = Arc::new(Mutex::new(State {
      queue: VecDeque::new(),
      runner_pending: false,
      stopped: false,
    }));
    let runner_state = state.clone();
    let runner = os.alloc_runner(move || {
      loop {
        let entry = {
          let mut s = runner_state.lock().unwrap();
          match s.queue.pop_front() {
            Some(e) => e,
            None => {
              s.runner_pending = false;
              return;
            }
          }
        };
        drain(entry);
      }
    })?;
    Ok(Self {
      state,
      runner: Arc::new(runner),
      refcount: Arc::new(AtomicUsize::new(1)),
      freed: Arc::new(AtomicBool::new(false)),
    })
  }

  /// Queues `entry` and arms the runner if it isn't already pending
  /// (spec `enqueue_callback`).
  pub fn enqueue(&self, entry: CallbackEntry<T>) {
    let mut s = self.state.lock().unwrap();
    if s.stopped {
      return;
    }
    s.queue.push_back(entry);
    if !s.runner_pending {
      s.runner_pending = true;
      drop(s);
      self.runner.run();
    }
  }

  /// Marks the dispatcher stopped: queued entries already popped still
  /// drain, but no new entry is accepted.
  pub fn stop(&self) {
    self.state.lock().unwrap().stopped = true;
  }

  pub fn is_stopped(&self) -> bool {
    self.state.lock().unwrap().stopped
  }
}

impl<O: OsServices, T: Send + 'static> Drop for Context<O, T> {
  fn drop(&mut self) {
    if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.freed.store(true, Ordering::Release);
    }
  }
}
