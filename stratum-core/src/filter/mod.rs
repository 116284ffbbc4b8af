//! The protocol filter: a byte transform sitting between the user and
//! the lower layer, with its own independent readiness predicates
//! (spec §4.2), grounded on the `GENSIO_FILTER_FUNC_*` contract in
//! `gensio_base.h`.

mod transparent;
mod xor;

pub use transparent::TransparentFilter;
pub use xor::XorFilter;

use crate::Result;

/// Outcome of [`Filter::try_connect`]/[`Filter::try_disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
  Done,
  /// Retry once more I/O has happened on the lower layer.
  InProgress,
  /// Retry after `timeout` elapses, even with no I/O.
  Retry(std::time::Duration),
}

/// A protocol transform between the user and the lower layer. Unlike
/// [`crate::ll::Ll`], a filter can be stacked on any `Ll` at runtime, so
/// the base stream holds it as `Box<dyn Filter>`.
pub trait Filter: Send {
  /// Data ready to be read out of the top of the filter towards the
  /// user (spec `ul_read_pending`).
  fn ul_read_pending(&self) -> bool;

  /// Data ready to be written out of the bottom of the filter towards
  /// the lower layer (spec `ll_write_pending`).
  fn ll_write_pending(&self) -> bool;

  /// The filter wants the lower layer's read side enabled even though
  /// the user hasn't asked for data yet — e.g. to keep a handshake
  /// moving (spec `ll_read_needed`).
  fn ll_read_needed(&self) -> bool;

  /// Drives the handshake forward. Called repeatedly by the base stream
  /// until it returns [`HandshakeProgress::Done`].
  fn try_connect(&mut self) -> Result<HandshakeProgress> {
    Ok(HandshakeProgress::Done)
  }

  fn try_disconnect(&mut self) -> Result<HandshakeProgress> {
    Ok(HandshakeProgress::Done)
  }

  /// Final gate at the end of a successful `try_connect`: the base
  /// calls this once the handshake loop reports `Done`, and only
  /// transitions to `Open`/fires the user's open continuation if it
  /// returns `Ok`. A filter with no such gate (the common case) accepts
  /// unconditionally.
  fn check_open_done(&mut self) -> Result<()> {
    Ok(())
  }

  /// Transforms user bytes into bytes for the lower layer, handing the
  /// result to `write_ll`. Bytes `write_ll` doesn't accept are the
  /// filter's to keep: the filter always reports every byte of `data`
  /// as consumed (buffering any lower-layer shortfall internally) and
  /// returns `Ok(0)` without transforming anything new if a previously
  /// buffered remainder hasn't drained yet, so the base can apply
  /// backpressure to the user instead of growing the buffer without
  /// bound.
  fn ul_write(&mut self, data: &[u8], write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<usize>;

  /// Pushes whatever the filter is still holding back from a prior
  /// short `write_ll` call (spec §4.3 write pump). Called by the base
  /// on every LL write-ready edge, before the user's own `WriteReady`
  /// event is considered for delivery. A filter with nothing buffered
  /// is a no-op.
  fn ll_write_ready(&mut self, _write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<()> {
    Ok(())
  }

  /// Transforms lower-layer bytes into bytes for the user, handing
  /// decoded output to `deliver_ul`. `data` is empty when called only to
  /// flush buffered output after a prior short delivery.
  fn ll_write(&mut self, data: &[u8], deliver_ul: &mut dyn FnMut(&[u8]) -> usize) -> Result<usize>;

  fn timeout(&mut self) {}

  fn control(&mut self, _get: bool, _option: u32, _data: &mut Vec<u8>) -> Result<()> {
    Err(crate::ErrorCode::NotSupported.into())
  }

  fn setup(&mut self) -> Result<()> {
    Ok(())
  }

  fn cleanup(&mut self) {}
}
