//! BSD/macOS backend for [`super::poll::Poller`], grounded on the
//! teacher's `backends/pollingv2/os/kqueue.rs`. Read and write interest
//! are separate filters on kqueue, unlike epoll's single event mask, so
//! `modify` adds/deletes each filter independently to reach the target
//! `Interest`.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::poll::{Interest, Poller, ReadyEvent};

macro_rules! syscall {
  ($fn:ident ( $($arg:expr),* $(,)? )) => {{
    let res = unsafe { libc::$fn($($arg),*) };
    if res == -1 { Err(io::Error::last_os_error()) } else { Ok(res) }
  }};
}

const NOTIFY_IDENT: libc::uintptr_t = 1;

fn kevent_change(ident: libc::uintptr_t, filter: i16, flags: u16, udata: u64) -> libc::kevent {
  libc::kevent {
    ident,
    filter,
    flags,
    fflags: 0,
    data: 0,
    udata: udata as *mut libc::c_void,
  }
}

pub struct KqueuePoller {
  kq: RawFd,
}

impl Poller for KqueuePoller {
  fn new() -> io::Result<Self> {
    let kq = syscall!(kqueue())?;
    let change = kevent_change(NOTIFY_IDENT, libc::EVFILT_USER, libc::EV_ADD | libc::EV_CLEAR, 0);
    syscall!(kevent(kq, &change, 1, std::ptr::null_mut(), 0, std::ptr::null()))?;
    Ok(Self { kq })
  }

  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.modify(fd, key, interest)
  }

  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    let mut changes = Vec::with_capacity(2);
    let read_flags = if interest.read { libc::EV_ADD } else { libc::EV_DELETE };
    changes.push(kevent_change(fd as libc::uintptr_t, libc::EVFILT_READ, read_flags, key));
    let write_flags = if interest.write { libc::EV_ADD } else { libc::EV_DELETE };
    changes.push(kevent_change(fd as libc::uintptr_t, libc::EVFILT_WRITE, write_flags, key));
    for change in &changes {
      let mut change = *change;
      let res = unsafe {
        libc::kevent(self.kq, &change as *const _, 1, std::ptr::null_mut(), 0, std::ptr::null())
      };
      // EV_DELETE on a filter that was never armed returns ENOENT; harmless.
      if res == -1 {
        let e = io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ENOENT) {
          return Err(e);
        }
      }
      let _ = &mut change;
    }
    Ok(())
  }

  fn delete(&self, fd: RawFd) -> io::Result<()> {
    self.modify(fd, 0, Interest::NONE)
  }

  fn wait(&self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<usize> {
    let ts = timeout.map(|d| libc::timespec {
      tv_sec: d.as_secs() as libc::time_t,
      tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let mut buf: [libc::kevent; 256] = unsafe { std::mem::zeroed() };
    let n = loop {
      let ts_ptr = match &ts {
        Some(t) => t as *const libc::timespec,
        None => std::ptr::null(),
      };
      match syscall!(kevent(self.kq, std::ptr::null(), 0, buf.as_mut_ptr(), buf.len() as i32, ts_ptr)) {
        Ok(n) => break n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    };
    let mut by_key: std::collections::HashMap<u64, ReadyEvent> = std::collections::HashMap::new();
    for ev in &buf[..n as usize] {
      if ev.filter == libc::EVFILT_USER {
        continue;
      }
      let key = ev.udata as u64;
      let entry = by_key.entry(key).or_insert(ReadyEvent { key, readable: false, writable: false, error: false });
      if ev.filter == libc::EVFILT_READ {
        entry.readable = true;
      } else if ev.filter == libc::EVFILT_WRITE {
        entry.writable = true;
      }
      if ev.flags & libc::EV_ERROR != 0 || ev.flags & libc::EV_EOF != 0 {
        entry.error = true;
      }
    }
    let drained = by_key.len();
    out.extend(by_key.into_values());
    Ok(drained)
  }

  fn notify(&self) -> io::Result<()> {
    let change = libc::kevent {
      ident: NOTIFY_IDENT,
      filter: libc::EVFILT_USER,
      flags: 0,
      fflags: libc::NOTE_TRIGGER,
      data: 0,
      udata: std::ptr::null_mut(),
    };
    syscall!(kevent(self.kq, &change, 1, std::ptr::null_mut(), 0, std::ptr::null()))?;
    Ok(())
  }
}

impl Drop for KqueuePoller {
  fn drop(&mut self) {
    unsafe {
      libc::close(self.kq);
    }
  }
}

unsafe impl Send for KqueuePoller {}
unsafe impl Sync for KqueuePoller {}
