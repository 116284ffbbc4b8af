//! Exercises the dispatcher's FIFO ordering and the `AllForNow` marker,
//! against the simulated responder backend.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use stratum_core::os::reactor::ReactorOsServices;
use stratum_discovery::{DiscoveryClient, ServiceInfo, SimBackend, WatchEvent};

fn service(name: &str) -> ServiceInfo {
  ServiceInfo {
    interface: -1,
    ip_domain: -1,
    name: name.to_string(),
    service_type: "_http._tcp".to_string(),
    domain: "local".to_string(),
    host: "host.local".to_string(),
    port: 8080,
    txt: Vec::new(),
  }
}

#[test]
fn events_are_delivered_in_enqueue_order() {
  let os = ReactorOsServices::new().unwrap();
  let client = Arc::new(DiscoveryClient::new(&os).unwrap());
  let backend = SimBackend::new(client.clone());

  let (tx, rx) = channel();
  client.add_watch(-1, -1, "", "_http._tcp", "", "", move |event| tx.send(event).unwrap());

  backend.announce(service("printer"));
  backend.announce(service("scanner"));
  backend.withdraw(service("printer"));
  backend.finish_scan("_http._tcp");

  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::Up(service("printer")));
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::Up(service("scanner")));
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::Down(service("printer")));
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::AllForNow);
}

#[test]
fn only_watches_for_the_matching_service_type_see_events() {
  let os = ReactorOsServices::new().unwrap();
  let client = Arc::new(DiscoveryClient::new(&os).unwrap());
  let backend = SimBackend::new(client.clone());

  let (http_tx, http_rx) = channel();
  let (ssh_tx, ssh_rx) = channel();
  client.add_watch(-1, -1, "", "_http._tcp", "", "", move |event| http_tx.send(event).unwrap());
  client.add_watch(-1, -1, "", "_ssh._tcp", "", "", move |event| ssh_tx.send(event).unwrap());

  backend.announce(service("printer"));

  assert_eq!(http_rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::Up(service("printer")));
  assert!(ssh_rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn removed_watch_stops_receiving_events() {
  let os = ReactorOsServices::new().unwrap();
  let client = Arc::new(DiscoveryClient::new(&os).unwrap());
  let backend = SimBackend::new(client.clone());

  let (tx, rx) = channel();
  let handle = client.add_watch(-1, -1, "", "_http._tcp", "", "", move |event| tx.send(event).unwrap());
  client.remove_watch(handle);

  backend.announce(service("printer"));
  assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn a_watch_scoped_to_one_host_ignores_services_on_another() {
  let os = ReactorOsServices::new().unwrap();
  let client = Arc::new(DiscoveryClient::new(&os).unwrap());
  let backend = SimBackend::new(client.clone());

  let (tx, rx) = channel();
  client.add_watch(-1, -1, "", "_http._tcp", "", "printer.local", move |event| tx.send(event).unwrap());

  backend.announce(service("scanner"));
  assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

  let mut printer = service("printer");
  printer.host = "printer.local".to_string();
  backend.announce(printer.clone());
  assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), WatchEvent::Up(printer));
}

#[test]
fn registered_services_can_be_added_and_removed() {
  let os = ReactorOsServices::new().unwrap();
  let client = Arc::new(DiscoveryClient::new(&os).unwrap());

  let handle = client.add_service(
    -1,
    -1,
    "printer",
    "_http._tcp",
    "local",
    "printer.local",
    8080,
    vec![("path".to_string(), "/".to_string())],
  );
  client.remove_service(handle);
  // No observable state beyond not panicking: the service-registration
  // surface has no read-back API, mirroring `gensio_mdns_add_service`.
}
