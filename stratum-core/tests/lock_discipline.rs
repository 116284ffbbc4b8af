//! Exercises the reentrancy guard in `base::sync_ll`: a synchronous
//! `Ll` test double (`PipeLl`) that calls straight back into the
//! stream's own callback from inside `set_read_callback_enable`/
//! `set_write_callback_enable` must not deadlock or drop events.

use std::sync::mpsc::channel;
use std::time::Duration;

use stratum_core::base::{BaseStream, Event};
use stratum_core::filter::TransparentFilter;
use stratum_core::ll::PipeLl;
use stratum_core::os::reactor::ReactorOsServices;

/// A write from inside the read callback re-enters `BaseStream::write`,
/// which re-enters `sync_ll` while the read-side call into it is still
/// unwinding. Must complete without deadlocking.
#[test]
fn writing_from_inside_the_read_callback_does_not_deadlock() {
  let (a, b) = PipeLl::pair();
  let os = ReactorOsServices::new().unwrap();
  let mut side_a = BaseStream::new(os.clone(), Box::new(a), Box::new(TransparentFilter::new()));
  let mut side_b = BaseStream::new(os, Box::new(b), Box::new(TransparentFilter::new()));

  // `side_a_for_cb` is a second handle onto the same underlying stream
  // as `side_a`, so the callback can write back without borrowing
  // `side_a` itself.
  let mut side_a_for_cb = side_a.clone();
  side_a.set_callback(Box::new(move |event| match event {
    Event::Read { data } => {
      let _ = side_a_for_cb.write(data);
      data.len()
    }
    _ => 0,
  }));

  let (tx, rx) = channel();
  side_b.set_callback(Box::new(move |event| match event {
    Event::Read { data } => {
      tx.send(data.to_vec()).unwrap();
      data.len()
    }
    _ => 0,
  }));

  side_a.open(Box::new(|r| r.unwrap())).unwrap();
  side_b.open(Box::new(|r| r.unwrap())).unwrap();
  side_a.set_read_callback_enable(true);
  side_b.set_read_callback_enable(true);

  side_b.write(b"ping").unwrap();

  let received = rx.recv_timeout(Duration::from_secs(5)).expect("echo not delivered");
  assert_eq!(received, b"ping");
}

/// Toggling the user's read enable from inside the read callback itself
/// must take effect rather than being lost to the reentrancy guard.
#[test]
fn disabling_reads_from_inside_the_read_callback_takes_effect() {
  let (a, b) = PipeLl::pair();
  let os = ReactorOsServices::new().unwrap();
  let mut side_a = BaseStream::new(os.clone(), Box::new(a), Box::new(TransparentFilter::new()));
  let mut side_b = BaseStream::new(os, Box::new(b), Box::new(TransparentFilter::new()));

  let (tx, rx) = channel();
  let mut side_b_for_cb = side_b.clone();
  side_b.set_callback(Box::new(move |event| match event {
    Event::Read { data } => {
      tx.send(data.to_vec()).unwrap();
      side_b_for_cb.set_read_callback_enable(false);
      data.len()
    }
    _ => 0,
  }));
  side_a.set_callback(Box::new(|_| 0));

  side_a.open(Box::new(|r| r.unwrap())).unwrap();
  side_b.open(Box::new(|r| r.unwrap())).unwrap();
  side_b.set_read_callback_enable(true);

  side_a.write(b"one").unwrap();
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"one");

  side_a.write(b"two").unwrap();
  assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}
