//! Representative discovery client, shaped after `gensio_alloc_mdns`'s
//! watch/service API in `gensio_mdns.c`. Backed by whatever responder
//! implementation is plugged in — [`crate::sim::SimBackend`] for tests,
//! a real Avahi/DNS-SD binding would be a second implementation of the
//! same calls but is out of scope here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stratum_core::os::OsServices;

use crate::dispatcher::{CallbackEntry, Context};

/// One announced/registered service (spec `gensio_mdns_service`):
/// `interface`/`ip_domain` are the Avahi `AVAHI_IF_UNSPEC`/
/// `AVAHI_PROTO_UNSPEC`-style selectors (`< 0` stands for "any" on a
/// watch), `txt` is empty except when carried by `add_service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
  pub interface: i32,
  pub ip_domain: i32,
  pub name: String,
  pub service_type: String,
  pub domain: String,
  pub host: String,
  pub port: u16,
  pub txt: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  Up(ServiceInfo),
  Down(ServiceInfo),
  /// The initial scan has finished; all services already present at
  /// watch time have been reported (spec `all_for_now`).
  AllForNow,
}

/// Identifies one active watch; dropping it does not remove the watch —
/// call [`DiscoveryClient::remove_watch`] explicitly, matching the
/// explicit-free discipline the rest of this crate uses for OS handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

/// Identifies one registered/advertised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(u64);

struct WatchState {
  interface: i32,
  ip_domain: i32,
  name: String,
  service_type: String,
  domain: String,
  host: String,
  /// Set by `remove_watch` so `deliver`/`deliver_all_for_now` stop
  /// routing to it immediately, ahead of the matching `Remove` marker
  /// actually erasing it from the table once drained.
  removed: bool,
  user_cb: Box<dyn FnMut(WatchEvent) + Send>,
}

fn matches_selector(filter: i32, actual: i32) -> bool {
  filter < 0 || filter == actual
}

fn matches_wildcard(filter: &str, actual: &str) -> bool {
  filter.is_empty() || filter == actual
}

fn watch_matches(w: &WatchState, info: &ServiceInfo) -> bool {
  matches_selector(w.interface, info.interface)
    && matches_selector(w.ip_domain, info.ip_domain)
    && matches_wildcard(&w.name, &info.name)
    && w.service_type == info.service_type
    && matches_wildcard(&w.domain, &info.domain)
    && matches_wildcard(&w.host, &info.host)
}

struct Inner {
  watches: Mutex<HashMap<u64, WatchState>>,
  services: Mutex<HashMap<u64, ServiceInfo>>,
  next_watch_id: AtomicU64,
  next_service_id: AtomicU64,
}

/// Entry routed through the dispatcher: which watch it's for, and what
/// happened.
struct Routed {
  watch_id: u64,
  event: WatchEvent,
}

pub struct DiscoveryClient<O: OsServices> {
  inner: Arc<Inner>,
  ctx: Context<O, Routed>,
}

impl<O: OsServices> DiscoveryClient<O> {
  pub fn new(os: &O) -> stratum_core::Result<Self> {
    let inner = Arc::new(Inner {
      watches: Mutex::new(HashMap::new()),
      services: Mutex::new(HashMap::new()),
      next_watch_id: AtomicU64::new(1),
      next_service_id: AtomicU64::new(1),
    });
    let drain_inner = inner.clone();
    let ctx = Context::new(os, move |entry: CallbackEntry<Routed>| match entry {
      CallbackEntry::Data(routed) => {
        let mut watches = drain_inner.watches.lock().unwrap();
        if let Some(w) = watches.get_mut(&routed.watch_id) {
          (w.user_cb)(routed.event);
        }
      }
      CallbackEntry::AllForNow(id) => {
        let mut watches = drain_inner.watches.lock().unwrap();
        if let Some(w) = watches.get_mut(&id) {
          (w.user_cb)(WatchEvent::AllForNow);
        }
      }
      CallbackEntry::Remove(id) => {
        drain_inner.watches.lock().unwrap().remove(&id);
      }
    })?;
    Ok(Self { inner, ctx })
  }

  /// Registers interest in a service (spec `gensio_mdns_add_watch`).
  /// `interface`/`ip_domain` below zero, and an empty `name`/`domain`/
  /// `host`, act as wildcards; `service_type` is always matched
  /// exactly. `cb` is invoked, via the dispatcher's runner, for every
  /// up/down transition and once the initial scan completes.
  #[allow(clippy::too_many_arguments)]
  pub fn add_watch(
    &self,
    interface: i32,
    ip_domain: i32,
    name: impl Into<String>,
    service_type: impl Into<String>,
    domain: impl Into<String>,
    host: impl Into<String>,
    cb: impl FnMut(WatchEvent) + Send + 'static,
  ) -> WatchHandle {
    let id = self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
    let service_type = service_type.into();
    log::debug!("adding discovery watch {id} for service type {service_type}");
    self.inner.watches.lock().unwrap().insert(
      id,
      WatchState {
        interface,
        ip_domain,
        name: name.into(),
        service_type,
        domain: domain.into(),
        host: host.into(),
        removed: false,
        user_cb: Box::new(cb),
      },
    );
    WatchHandle(id)
  }

  /// Stops routing new events to `handle` immediately, and queues its
  /// removal from the watch table in FIFO order with whatever is
  /// already enqueued for it (spec §4.4 drain rule: "remove ... frees
  /// the watch under the lock").
  pub fn remove_watch(&self, handle: WatchHandle) {
    if let Some(w) = self.inner.watches.lock().unwrap().get_mut(&handle.0) {
      w.removed = true;
    }
    self.ctx.enqueue(CallbackEntry::Remove(handle.0));
  }

  /// Advertises a service (spec `gensio_mdns_add_service`). Out of
  /// scope here is actually announcing it on the wire — a real
  /// Avahi/DNS-SD binding would register `info` with the responder;
  /// this just makes it visible to [`crate::sim::SimBackend`].
  #[allow(clippy::too_many_arguments)]
  pub fn add_service(
    &self,
    interface: i32,
    ip_domain: i32,
    name: impl Into<String>,
    service_type: impl Into<String>,
    domain: impl Into<String>,
    host: impl Into<String>,
    port: u16,
    txt: Vec<(String, String)>,
  ) -> ServiceHandle {
    let id = self.inner.next_service_id.fetch_add(1, Ordering::Relaxed);
    let info = ServiceInfo {
      interface,
      ip_domain,
      name: name.into(),
      service_type: service_type.into(),
      domain: domain.into(),
      host: host.into(),
      port,
      txt,
    };
    log::debug!("registering discovery service {id}: {}/{}", info.service_type, info.name);
    self.inner.services.lock().unwrap().insert(id, info);
    ServiceHandle(id)
  }

  pub fn remove_service(&self, handle: ServiceHandle) {
    self.inner.services.lock().unwrap().remove(&handle.0);
  }

  /// Routes an up/down transition to every watch that matches `info`,
  /// via the dispatcher queue. Called by a responder backend (spec
  /// `mdns_service_resolver_callback`), never directly by a user.
  pub(crate) fn deliver(&self, info: ServiceInfo, up: bool) {
    let ids: Vec<u64> = {
      let watches = self.inner.watches.lock().unwrap();
      watches.iter().filter(|(_, w)| !w.removed && watch_matches(w, &info)).map(|(id, _)| *id).collect()
    };
    let event = if up { WatchEvent::Up(info) } else { WatchEvent::Down(info) };
    for id in ids {
      self.ctx.enqueue(CallbackEntry::Data(Routed { watch_id: id, event: event.clone() }));
    }
  }

  /// Routes the "all for now" sentinel to every watch for
  /// `service_type`, via the dispatcher's dedicated `AllForNow` marker
  /// (spec §4.4 drain rule).
  pub(crate) fn deliver_all_for_now(&self, service_type: &str) {
    let ids: Vec<u64> = {
      let watches = self.inner.watches.lock().unwrap();
      watches.iter().filter(|(_, w)| !w.removed && w.service_type == service_type).map(|(id, _)| *id).collect()
    };
    for id in ids {
      self.ctx.enqueue(CallbackEntry::AllForNow(id));
    }
  }

  /// Tears down the client: removes all watches and services (spec
  /// §4.4 teardown) and stops the dispatcher from accepting new
  /// entries.
  pub fn stop(&self) {
    self.inner.watches.lock().unwrap().clear();
    self.inner.services.lock().unwrap().clear();
    self.ctx.stop();
  }
}
