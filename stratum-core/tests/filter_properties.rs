//! Property tests against the bundled filters directly (not through a
//! full `BaseStream`/reactor stack, for determinism and speed): the
//! write-pump buffering contract (spec §4.3, scenario S6) and the
//! XOR filter's self-inverse transform must hold for any input, not
//! just the handful of cases the integration tests happen to cover.

use std::collections::VecDeque;

use proptest::prelude::*;
use stratum_core::filter::{Filter, TransparentFilter, XorFilter};

/// Feeds `data` through `filter.ul_write` in one shot against a lower
/// layer that only accepts `cap` bytes per call, driving
/// `ll_write_ready` until the filter reports nothing left buffered,
/// and returns everything the lower layer ultimately received.
fn drain_through_capped_ll(filter: &mut dyn Filter, data: &[u8], cap: usize) -> Vec<u8> {
  let mut received = Vec::new();
  let mut write_ll = |bytes: &[u8]| -> stratum_core::Result<usize> {
    let n = bytes.len().min(cap.max(1));
    received.extend_from_slice(&bytes[..n]);
    Ok(n)
  };
  let consumed = filter.ul_write(data, &mut write_ll).unwrap();
  assert_eq!(consumed, data.len(), "ul_write must always report the whole buffer consumed");
  while filter.ll_write_pending() {
    filter.ll_write_ready(&mut write_ll).unwrap();
  }
  received
}

proptest! {
  #[test]
  fn transparent_filter_delivers_every_byte_unchanged_regardless_of_ll_chunking(
    data in proptest::collection::vec(any::<u8>(), 0..256),
    cap in 1usize..16,
  ) {
    let mut filter = TransparentFilter::new();
    let received = drain_through_capped_ll(&mut filter, &data, cap);
    prop_assert_eq!(received, data);
  }

  #[test]
  fn xor_filter_round_trips_through_its_own_inverse_regardless_of_ll_chunking(
    data in proptest::collection::vec(any::<u8>(), 0..256),
    key in any::<u8>(),
    cap in 1usize..16,
  ) {
    let mut encoder = XorFilter::new(key);
    let on_wire = drain_through_capped_ll(&mut encoder, &data, cap);

    let mut decoder = XorFilter::new(key);
    let mut decoded = VecDeque::new();
    decoder
      .ll_write(&on_wire, &mut |chunk| {
        decoded.extend(chunk);
        chunk.len()
      })
      .unwrap();
    prop_assert_eq!(decoded.into_iter().collect::<Vec<u8>>(), data);
  }

  #[test]
  fn a_filter_backed_up_from_a_short_write_refuses_new_input_until_it_drains(
    first in proptest::collection::vec(any::<u8>(), 1..64),
    second in proptest::collection::vec(any::<u8>(), 1..64),
  ) {
    let mut filter = TransparentFilter::new();
    // Accept nothing at first, forcing every byte of `first` to buffer.
    let mut refuse_ll = |_: &[u8]| -> stratum_core::Result<usize> { Ok(0) };
    let n = filter.ul_write(&first, &mut refuse_ll).unwrap();
    prop_assert_eq!(n, first.len());
    prop_assert!(filter.ll_write_pending());

    // Backed up: a second write is refused outright rather than queued.
    let n2 = filter.ul_write(&second, &mut refuse_ll).unwrap();
    prop_assert_eq!(n2, 0);

    // Once the lower layer drains, the filter accepts new input again.
    let mut accept_all = |bytes: &[u8]| -> stratum_core::Result<usize> { Ok(bytes.len()) };
    let n3 = filter.ul_write(&second, &mut accept_all).unwrap();
    prop_assert_eq!(n3, second.len());
  }
}
