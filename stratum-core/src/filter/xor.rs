//! Self-inverse XOR filter: exercises the filter seam with a real,
//! invertible transform without pulling in a cipher dependency. Used by
//! the round-trip loopback tests.

use std::collections::VecDeque;

use super::{Filter, HandshakeProgress};
use crate::Result;

pub struct XorFilter {
  key: u8,
  /// Decoded bytes the user hasn't drained yet (spec `ul_read_pending`).
  pending_ul: VecDeque<u8>,
  /// Transformed bytes accepted from the user but not yet handed to the
  /// lower layer, because a prior `write_ll` call took fewer than
  /// offered (spec §4.3 write pump / scenario S6). Buffered already
  /// transformed, so flushing is a plain passthrough.
  pending_ll: VecDeque<u8>,
}

impl XorFilter {
  pub fn new(key: u8) -> Self {
    Self { key, pending_ul: VecDeque::new(), pending_ll: VecDeque::new() }
  }

  fn transform(&self, data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ self.key).collect()
  }

  fn flush(&mut self, write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<()> {
    if self.pending_ll.is_empty() {
      return Ok(());
    }
    let buf: Vec<u8> = self.pending_ll.iter().copied().collect();
    let n = write_ll(&buf)?;
    self.pending_ll.drain(..n);
    Ok(())
  }
}

impl Filter for XorFilter {
  fn ul_read_pending(&self) -> bool {
    !self.pending_ul.is_empty()
  }

  fn ll_write_pending(&self) -> bool {
    !self.pending_ll.is_empty()
  }

  fn ll_read_needed(&self) -> bool {
    false
  }

  fn try_connect(&mut self) -> Result<HandshakeProgress> {
    Ok(HandshakeProgress::Done)
  }

  fn ul_write(&mut self, data: &[u8], write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<usize> {
    self.flush(write_ll)?;
    if !self.pending_ll.is_empty() || data.is_empty() {
      return Ok(0);
    }
    let transformed = self.transform(data);
    let n = write_ll(&transformed)?;
    if n < transformed.len() {
      self.pending_ll.extend(transformed[n..].iter().copied());
    }
    Ok(data.len())
  }

  fn ll_write_ready(&mut self, write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<()> {
    self.flush(write_ll)
  }

  fn ll_write(&mut self, data: &[u8], deliver_ul: &mut dyn FnMut(&[u8]) -> usize) -> Result<usize> {
    if !data.is_empty() {
      self.pending_ul.extend(self.transform(data));
    }
    if self.pending_ul.is_empty() {
      return Ok(0);
    }
    let buf: Vec<u8> = self.pending_ul.iter().copied().collect();
    let consumed = deliver_ul(&buf);
    self.pending_ul.drain(..consumed);
    Ok(data.len())
  }
}
