//! In-memory [`Ll`] used by loopback tests: two `PipeLl`s joined by
//! [`PipeLl::pair`] exchange bytes without touching a real fd, so the
//! base-stream and filter layers can be exercised deterministically.
//! Since there's no reactor backing this, a write on one end directly
//! wakes whichever delivery closure the other end registered, standing
//! in for what an fd readiness callback would otherwise do.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::{Arc, Mutex};

use super::{Ll, LlCallback, LlEvent};
use crate::error::ErrorCode;
use crate::Result;

#[derive(Default)]
struct Channel {
  buf: VecDeque<u8>,
  closed: bool,
  waker: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct PipeState {
  cb: Option<Box<LlCallback>>,
  read_enabled: bool,
}

/// One end of an in-memory byte pipe.
pub struct PipeLl {
  state: Arc<Mutex<PipeState>>,
  inbox: Arc<Mutex<Channel>>,
  outbox: Arc<Mutex<Channel>>,
}

impl PipeLl {
  /// Builds two ends of a loopback pipe: writes to `a` are readable
  /// from `b`, and vice versa.
  pub fn pair() -> (Self, Self) {
    let a_to_b = Arc::new(Mutex::new(Channel::default()));
    let b_to_a = Arc::new(Mutex::new(Channel::default()));
    (
      PipeLl {
        state: Arc::new(Mutex::new(PipeState { cb: None, read_enabled: false })),
        inbox: b_to_a.clone(),
        outbox: a_to_b.clone(),
      },
      PipeLl {
        state: Arc::new(Mutex::new(PipeState { cb: None, read_enabled: false })),
        inbox: a_to_b,
        outbox: b_to_a,
      },
    )
  }

  fn wake_peer(outbox: &Arc<Mutex<Channel>>) {
    let waker = outbox.lock().unwrap().waker.clone();
    if let Some(waker) = waker {
      waker();
    }
  }
}

fn deliver(state: &Arc<Mutex<PipeState>>, inbox: &Arc<Mutex<Channel>>) {
  loop {
    let read_enabled = state.lock().unwrap().read_enabled;
    if !read_enabled {
      return;
    }
    let (chunk, closed): (Vec<u8>, bool) = {
      let mut inbox = inbox.lock().unwrap();
      if inbox.buf.is_empty() {
        (Vec::new(), inbox.closed)
      } else {
        (inbox.buf.drain(..).collect(), inbox.closed)
      }
    };
    if chunk.is_empty() && !closed {
      return;
    }
    let err = closed.then(|| ErrorCode::RemoteClosed.into());
    let consumed = {
      let mut s = state.lock().unwrap();
      match s.cb.as_mut() {
        Some(cb) => cb(LlEvent::Read { data: &chunk, err: err.as_ref() }),
        None => chunk.len(),
      }
    };
    if consumed < chunk.len() {
      let mut inbox = inbox.lock().unwrap();
      for &b in chunk[consumed..].iter().rev() {
        inbox.buf.push_front(b);
      }
    }
    if closed {
      return;
    }
  }
}

impl Ll for PipeLl {
  fn set_callback(&mut self, cb: Box<LlCallback>) {
    self.state.lock().unwrap().cb = Some(cb);
  }

  fn open(&mut self, done: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()> {
    let state = self.state.clone();
    let inbox = self.inbox.clone();
    self.inbox.lock().unwrap().waker = Some(Arc::new(move || deliver(&state, &inbox)));
    done(Ok(()));
    Ok(())
  }

  fn close(&mut self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
    self.outbox.lock().unwrap().closed = true;
    Self::wake_peer(&self.outbox);
    done();
    Ok(())
  }

  fn write(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
    let mut n = 0;
    {
      let mut outbox = self.outbox.lock().unwrap();
      for buf in bufs {
        outbox.buf.extend(buf.iter().copied());
        n += buf.len();
      }
    }
    Self::wake_peer(&self.outbox);
    Ok(n)
  }

  fn set_read_callback_enable(&mut self, enabled: bool) {
    self.state.lock().unwrap().read_enabled = enabled;
    if enabled {
      deliver(&self.state, &self.inbox);
    }
  }

  fn set_write_callback_enable(&mut self, enabled: bool) {
    if enabled {
      let mut s = self.state.lock().unwrap();
      if let Some(cb) = s.cb.as_mut() {
        cb(LlEvent::WriteReady);
      }
    }
  }
}
