//! A pass-through filter: no handshake, bytes in equal bytes out. Used
//! where the base stream's layering is wanted but the protocol itself
//! has no transform (the spec's `GENSIO_FILTER_FUNC_*` contract
//! stripped to its identity element).

use std::collections::VecDeque;

use super::{Filter, HandshakeProgress};
use crate::Result;

#[derive(Default)]
pub struct TransparentFilter {
  /// Bytes accepted from the user but not yet handed to the lower
  /// layer, because a prior `write_ll` call took fewer than offered
  /// (spec §4.3 write pump / scenario S6).
  pending_ll: VecDeque<u8>,
}

impl TransparentFilter {
  pub fn new() -> Self {
    Self::default()
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

impl Filter for TransparentFilter {
  fn ul_read_pending(&self) -> bool {
    false
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
      // Already backed up: refuse new input until the next write-ready
      // edge drains the remainder, rather than growing the buffer
      // without bound.
      return Ok(0);
    }
    let n = write_ll(data)?;
    if n < data.len() {
      self.pending_ll.extend(data[n..].iter().copied());
    }
    Ok(data.len())
  }

  fn ll_write_ready(&mut self, write_ll: &mut dyn FnMut(&[u8]) -> Result<usize>) -> Result<()> {
    self.flush(write_ll)
  }

  fn ll_write(&mut self, data: &[u8], deliver_ul: &mut dyn FnMut(&[u8]) -> usize) -> Result<usize> {
    Ok(deliver_ul(data))
  }
}
