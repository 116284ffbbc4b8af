//! Scenario S2: a user callback that only consumes part of a `Read`
//! event must see the remainder redelivered, starting at the advanced
//! cursor, entirely out of the base stream's own buffering — with no
//! further read issued against the transport in between.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stratum_core::base::{BaseStream, Event};
use stratum_core::filter::TransparentFilter;
use stratum_core::ll::{Ll, LlCallback, LlEvent};
use stratum_core::os::reactor::ReactorOsServices;
use stratum_core::Result;

/// A lower layer with no redelivery logic of its own: the only thing
/// that ever counts as a transport-level read is a `push` through its
/// handle, so a test can tell a genuine new read apart from the base
/// redelivering bytes it already has buffered internally.
struct PushLl {
  cb: Arc<Mutex<Option<Box<LlCallback>>>>,
}

/// Kept by the test after the `PushLl` itself has been boxed into a
/// `BaseStream`; drives data in and counts how many times that happened.
struct PushHandle {
  cb: Arc<Mutex<Option<Box<LlCallback>>>>,
  transport_reads: Arc<AtomicUsize>,
}

impl PushHandle {
  fn push(&self, data: &[u8]) {
    self.transport_reads.fetch_add(1, Ordering::SeqCst);
    if let Some(cb) = self.cb.lock().unwrap().as_mut() {
      cb(LlEvent::Read { data, err: None });
    }
  }
}

fn push_ll() -> (PushLl, PushHandle) {
  let cb = Arc::new(Mutex::new(None));
  let transport_reads = Arc::new(AtomicUsize::new(0));
  (PushLl { cb: cb.clone() }, PushHandle { cb, transport_reads })
}

impl Ll for PushLl {
  fn set_callback(&mut self, cb: Box<LlCallback>) {
    *self.cb.lock().unwrap() = Some(cb);
  }

  fn open(&mut self, done: Box<dyn FnOnce(Result<()>) + Send>) -> Result<()> {
    done(Ok(()));
    Ok(())
  }

  fn close(&mut self, done: Box<dyn FnOnce() + Send>) -> Result<()> {
    done();
    Ok(())
  }

  fn write(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize> {
    Ok(bufs.iter().map(|b| b.len()).sum())
  }

  fn set_read_callback_enable(&mut self, _enabled: bool) {}

  fn set_write_callback_enable(&mut self, _enabled: bool) {}
}

#[test]
fn partial_consumption_redelivers_the_remainder_without_a_new_transport_read() {
  let (ll, handle) = push_ll();
  let mut stream =
    BaseStream::new(ReactorOsServices::new().unwrap(), Box::new(ll), Box::new(TransparentFilter::new()));

  let deliveries: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
  let deliveries_cb = deliveries.clone();
  stream.set_callback(Box::new(move |event| match event {
    Event::Read { data } => {
      deliveries_cb.lock().unwrap().push(data.to_vec());
      data.len().min(2)
    }
    _ => 0,
  }));

  let (tx, rx) = channel();
  stream.open(Box::new(move |r| tx.send(r).unwrap())).unwrap();
  rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
  stream.set_read_callback_enable(true);

  handle.push(b"hello");

  let seen = deliveries.lock().unwrap().clone();
  assert_eq!(seen, vec![b"hello".to_vec(), b"llo".to_vec(), b"o".to_vec()]);
  assert_eq!(
    handle.transport_reads.load(Ordering::SeqCst),
    1,
    "the base must redeliver its own buffered remainder, not ask the transport for more"
  );
}
