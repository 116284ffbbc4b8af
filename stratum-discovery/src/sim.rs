//! Deterministic stand-in for a real Avahi/DNS-SD responder. Drives
//! [`DiscoveryClient`] through the same `deliver` path a genuine mDNS
//! binding would, without opening a socket or depending on `libavahi`
//! (spec Non-goals: no real network protocol implementation).

use std::sync::Arc;

use stratum_core::os::OsServices;

use crate::discovery::{DiscoveryClient, ServiceInfo};

pub struct SimBackend<O: OsServices> {
  client: Arc<DiscoveryClient<O>>,
}

impl<O: OsServices> SimBackend<O> {
  pub fn new(client: Arc<DiscoveryClient<O>>) -> Self {
    Self { client }
  }

  /// Simulates a service announcement arriving from the network.
  pub fn announce(&self, service: ServiceInfo) {
    self.client.deliver(service, true);
  }

  /// Simulates a service's TXT/SRV record expiring or being withdrawn.
  pub fn withdraw(&self, service: ServiceInfo) {
    self.client.deliver(service, false);
  }

  /// Simulates the responder reporting that its initial cache dump for
  /// `service_type` is complete.
  pub fn finish_scan(&self, service_type: &str) {
    self.client.deliver_all_for_now(service_type);
  }
}
