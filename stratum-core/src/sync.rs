//! Lock primitive used by every handle the [`OsServices`](crate::os::OsServices)
//! contract hands out.
//!
//! Wraps either `parking_lot::Mutex` or `std::sync::Mutex` behind one API so
//! the rest of the crate never has to deal with poisoning: a poisoned std
//! lock is just unwrapped, since a panic while holding a stream's lock
//! already violates the lock-discipline invariants this crate depends on,
//! and there is nothing a caller could usefully recover.

#[cfg(feature = "parking_lot")]
pub use parking_lot::{Mutex, MutexGuard};

#[cfg(not(feature = "parking_lot"))]
pub use std_sync::{Mutex, MutexGuard};

#[cfg(not(feature = "parking_lot"))]
mod std_sync {
  use std::sync as stdsync;

  pub struct Mutex<T: ?Sized> {
    inner: stdsync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: stdsync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
    }
  }

  pub struct MutexGuard<'a, T: ?Sized> {
    inner: stdsync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }
}
