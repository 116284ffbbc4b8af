//! The dispatcher `Context` is explicitly refcounted (spec `gensio_mdns_ref`/
//! `gensio_mdns_deref_and_unlock`): cloning bumps the count, dropping the
//! last clone marks the shared state freed, and a stopped dispatcher keeps
//! draining what was already queued but stops accepting new entries.

use std::sync::mpsc::channel;
use std::time::Duration;

use stratum_core::os::reactor::ReactorOsServices;
use stratum_discovery::dispatcher::{CallbackEntry, Context};

#[test]
fn dropping_a_clone_does_not_stop_delivery_through_the_other() {
  let os = ReactorOsServices::new().unwrap();
  let (tx, rx) = channel();
  let ctx: Context<ReactorOsServices, u32> = Context::new(&os, move |entry| {
    if let CallbackEntry::Data(n) = entry {
      tx.send(n).unwrap();
    }
  })
  .unwrap();

  let clone = ctx.clone();
  clone.enqueue(CallbackEntry::Data(1));
  drop(clone);

  ctx.enqueue(CallbackEntry::Data(2));

  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
}

#[test]
fn stopped_dispatcher_drains_queued_entries_but_rejects_new_ones() {
  let os = ReactorOsServices::new().unwrap();
  let (tx, rx) = channel();
  let ctx: Context<ReactorOsServices, u32> = Context::new(&os, move |entry| {
    if let CallbackEntry::Data(n) = entry {
      tx.send(n).unwrap();
    }
  })
  .unwrap();

  ctx.enqueue(CallbackEntry::Data(1));
  ctx.stop();
  ctx.enqueue(CallbackEntry::Data(2));

  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
  assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
  assert!(ctx.is_stopped());
}
