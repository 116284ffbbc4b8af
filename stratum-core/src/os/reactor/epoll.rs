//! Linux backend for [`super::poll::Poller`], grounded on the teacher's
//! `backends/pollingv2/os/epoll.rs`. Level-triggered: no `EPOLLONESHOT`,
//! since the spec's read/write enables are standing intents rather than
//! one-shot arm requests.

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

fn interest_to_events(interest: Interest) -> u32 {
  let mut events = 0u32;
  if interest.read {
    events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
  }
  if interest.write {
    events |= libc::EPOLLOUT as u32;
  }
  events
}

pub struct EpollPoller {
  epfd: RawFd,
  notify_r: RawFd,
  notify_w: RawFd,
}

impl EpollPoller {
  fn ctl(&self, op: i32, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    let mut ev = libc::epoll_event {
      events: interest_to_events(interest),
      u64: key,
    };
    syscall!(epoll_ctl(self.epfd, op, fd, &mut ev))?;
    Ok(())
  }
}

impl Poller for EpollPoller {
  fn new() -> io::Result<Self> {
    let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
    let mut fds = [0 as RawFd; 2];
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK))?;
    let (notify_r, notify_w) = (fds[0], fds[1]);
    let mut ev = libc::epoll_event { events: libc::EPOLLIN as u32, u64: u64::MAX };
    if let Err(e) = syscall!(epoll_ctl(epfd, libc::EPOLL_CTL_ADD, notify_r, &mut ev)) {
      unsafe {
        libc::close(epfd);
        libc::close(notify_r);
        libc::close(notify_w);
      }
      return Err(e);
    }
    Ok(Self { epfd, notify_r, notify_w })
  }

  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.ctl(libc::EPOLL_CTL_ADD, fd, key, interest)
  }

  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.ctl(libc::EPOLL_CTL_MOD, fd, key, interest)
  }

  fn delete(&self, fd: RawFd) -> io::Result<()> {
    syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()))?;
    Ok(())
  }

  fn wait(&self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = match timeout {
      None => -1,
      Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
    };
    let mut buf: [libc::epoll_event; 256] = unsafe { std::mem::zeroed() };
    let n = loop {
      match syscall!(epoll_wait(self.epfd, buf.as_mut_ptr(), buf.len() as i32, timeout_ms)) {
        Ok(n) => break n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    };
    let mut drained = 0usize;
    for ev in &buf[..n as usize] {
      if ev.u64 == u64::MAX {
        drain_notify_pipe(self.notify_r);
        continue;
      }
      let events = ev.events as i32;
      out.push(ReadyEvent {
        key: ev.u64,
        readable: events & (libc::EPOLLIN | libc::EPOLLRDHUP) != 0,
        writable: events & libc::EPOLLOUT != 0,
        error: events & (libc::EPOLLERR | libc::EPOLLHUP) != 0,
      });
      drained += 1;
    }
    Ok(drained)
  }

  fn notify(&self) -> io::Result<()> {
    let byte = [1u8];
    loop {
      match syscall!(write(self.notify_w, byte.as_ptr() as *const libc::c_void, 1)) {
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }
}

fn drain_notify_pipe(fd: RawFd) {
  let mut buf = [0u8; 64];
  loop {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n <= 0 {
      break;
    }
  }
}

impl Drop for EpollPoller {
  fn drop(&mut self) {
    unsafe {
      libc::close(self.epfd);
      libc::close(self.notify_r);
      libc::close(self.notify_w);
    }
  }
}

unsafe impl Send for EpollPoller {}
unsafe impl Sync for EpollPoller {}
