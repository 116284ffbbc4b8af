//! Callback dispatcher (spec §4.4) plus a representative discovery
//! client built on top of it, grounded on `avahi_watcher.c`'s
//! `AvahiPoll`-over-`gensio_os_funcs` adapter and `gensio_mdns.c`'s
//! watch/callback-queue machinery.
//!
//! There is no real mDNS/DNS-SD binding here (spec Non-goals: no
//! network protocol implementation) — [`sim::SimBackend`] is a
//! deterministic stand-in that drives the same dispatcher path a real
//! Avahi/DNS-SD responder would.

pub mod dispatcher;
pub mod discovery;
pub mod sim;

pub use dispatcher::Context;
pub use discovery::{DiscoveryClient, ServiceHandle, ServiceInfo, WatchEvent, WatchHandle};
pub use sim::SimBackend;
