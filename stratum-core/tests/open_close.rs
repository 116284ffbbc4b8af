//! Exercises the open/close state machine and its error cases.

use std::sync::mpsc::channel;
use std::time::Duration;

use stratum_core::base::BaseStream;
use stratum_core::filter::TransparentFilter;
use stratum_core::ll::PipeLl;
use stratum_core::os::reactor::ReactorOsServices;
use stratum_core::ErrorCode;

#[test]
fn open_then_close_completes_in_order() {
  let (a, _b) = PipeLl::pair();
  let mut stream =
    BaseStream::new(ReactorOsServices::new().unwrap(), Box::new(a), Box::new(TransparentFilter::new()));
  stream.set_callback(Box::new(|_| 0));

  let (open_tx, open_rx) = channel();
  stream.open(Box::new(move |r| open_tx.send(r.is_ok()).unwrap())).unwrap();
  assert!(open_rx.recv_timeout(Duration::from_secs(5)).unwrap());

  let (close_tx, close_rx) = channel();
  stream.close(Box::new(move || close_tx.send(()).unwrap())).unwrap();
  close_rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn double_open_is_rejected() {
  let (a, _b) = PipeLl::pair();
  let mut stream =
    BaseStream::new(ReactorOsServices::new().unwrap(), Box::new(a), Box::new(TransparentFilter::new()));
  stream.set_callback(Box::new(|_| 0));

  stream.open(Box::new(|r| r.unwrap())).unwrap();
  let err = stream.open(Box::new(|_| {})).unwrap_err();
  assert_eq!(err.code(), ErrorCode::InUse);
}

#[test]
fn write_before_open_is_rejected() {
  let (a, _b) = PipeLl::pair();
  let mut stream =
    BaseStream::new(ReactorOsServices::new().unwrap(), Box::new(a), Box::new(TransparentFilter::new()));
  stream.set_callback(Box::new(|_| 0));

  let err = stream.write(b"too early").unwrap_err();
  assert_eq!(err.code(), ErrorCode::NotReady);
}

#[test]
fn close_before_open_is_rejected() {
  let (a, _b) = PipeLl::pair();
  let mut stream =
    BaseStream::new(ReactorOsServices::new().unwrap(), Box::new(a), Box::new(TransparentFilter::new()));
  stream.set_callback(Box::new(|_| 0));

  let err = stream.close(Box::new(|| {})).unwrap_err();
  assert_eq!(err.code(), ErrorCode::NotReady);
}
