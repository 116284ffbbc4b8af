//! Property test for the dispatcher's FIFO ordering guarantee (spec
//! §5 "the dispatcher preserves FIFO order of enqueue per context"):
//! for any sequence of enqueued values, the drain order must match
//! the enqueue order exactly, no matter how many items are queued.

use std::sync::mpsc::channel;
use std::time::Duration;

use proptest::prelude::*;
use stratum_core::os::reactor::ReactorOsServices;
use stratum_discovery::dispatcher::{CallbackEntry, Context};

proptest! {
  #[test]
  fn drain_order_always_matches_enqueue_order(values in proptest::collection::vec(any::<u32>(), 0..128)) {
    let os = ReactorOsServices::new().unwrap();
    let (tx, rx) = channel();
    let ctx: Context<ReactorOsServices, u32> = Context::new(&os, move |entry| {
      if let CallbackEntry::Data(n) = entry {
        tx.send(n).unwrap();
      }
    })
    .unwrap();

    for &v in &values {
      ctx.enqueue(CallbackEntry::Data(v));
    }

    let mut got = Vec::with_capacity(values.len());
    for _ in 0..values.len() {
      got.push(rx.recv_timeout(Duration::from_secs(5)).expect("entry never drained"));
    }
    prop_assert_eq!(got, values);
  }
}
