// twsmux/src/error_correlator.rs

//! Routes errors reported by the connection.
//!
//! Every error frame carries either a request id or nothing (connection
//! level). The [`ErrorCorrelator`] keeps a table from request id to the
//! manager that owns it, filled by managers through RAII [`ErrorRoute`]
//! handles. Routing rules:
//!
//! - benign status notices (farm connection OK and friends) go to the
//!   [`DiagnosticSink`] at [`Severity::Info`] and nowhere else;
//! - tagged errors for a live request go to its owner;
//! - tagged errors for an unknown request go to the sink at
//!   [`Severity::Debug`], since the request may simply have finished;
//! - everything else is a connection level fault ([`Severity::Fault`]).

use crate::base::{MuxError, RequestId};

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Status notices that never indicate a problem.
/// See https://interactivebrokers.github.io/tws-api/message_codes.html
pub const DEFAULT_BENIGN_CODES: &[i32] = &[
  1102, // Connectivity restored, data maintained
  2104, // Market data farm connection is OK
  2106, // HMDS data farm connection is OK
  2107, // HMDS data farm connection is inactive but available upon demand
  2108, // Market data farm connection is inactive but available upon demand
  2119, // Market data farm is connecting
  2158, // Sec-def data farm connection is OK
];

/// Codes meaning the link to the service is gone.
const CONNECTIVITY_LOST_CODES: &[i32] = &[1100, 1300, 2110];
/// Codes meaning the link came back.
const CONNECTIVITY_RESTORED_CODES: &[i32] = &[1101, 1102];

/// One error reported by the connection.
#[derive(Clone)]
pub struct ErrorRecord {
  /// `None` for connection level errors.
  pub req_id: Option<RequestId>,
  pub code: i32,
  pub message: String,
  pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ErrorRecord {
  pub fn new(req_id: Option<RequestId>, code: i32, message: &str) -> Self {
    ErrorRecord { req_id, code, message: message.to_string(), cause: None }
  }

  /// Build from the wire form, where ids `<= 0` mean "no request".
  pub fn from_raw(id: i32, code: i32, message: &str) -> Self {
    Self::new(if id > 0 { Some(id) } else { None }, code, message)
  }

  pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
    self.cause = Some(cause);
    self
  }
}

impl PartialEq for ErrorRecord {
  fn eq(&self, other: &Self) -> bool {
    self.req_id == other.req_id && self.code == other.code && self.message == other.message
  }
}

impl fmt::Debug for ErrorRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ErrorRecord")
      .field("req_id", &self.req_id)
      .field("code", &self.code)
      .field("message", &self.message)
      .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
      .finish()
  }
}

impl fmt::Display for ErrorRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.req_id {
      Some(id) => write!(f, "[req {}] code={} {}", id, self.code, self.message)?,
      None => write!(f, "code={} {}", self.code, self.message)?,
    }
    if let Some(cause) = &self.cause {
      write!(f, " (caused by: {})", cause)?;
    }
    Ok(())
  }
}

impl From<ErrorRecord> for MuxError {
  fn from(r: ErrorRecord) -> Self {
    MuxError::ApiError(r.code, r.message)
  }
}

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
  Debug,
  Info,
  Fault,
}

/// Process wide destination for errors no request owns.
pub trait DiagnosticSink: Send + Sync {
  fn report(&self, record: &ErrorRecord, severity: Severity);
}

/// Default sink: writes to the `log` facade and remembers the last fault.
#[derive(Debug, Default)]
pub struct LogDiagnosticSink {
  last_fault: Mutex<Option<ErrorRecord>>,
}

impl LogDiagnosticSink {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn last_fault(&self) -> Option<ErrorRecord> {
    self.last_fault.lock().clone()
  }
}

impl DiagnosticSink for LogDiagnosticSink {
  fn report(&self, record: &ErrorRecord, severity: Severity) {
    match severity {
      Severity::Debug => debug!("Unrouted error: {}", record),
      Severity::Info => info!("TWS notice: {}", record),
      Severity::Fault => {
        error!("TWS error: {}", record);
        *self.last_fault.lock() = Some(record.clone());
      }
    }
  }
}

/// Receiver of errors for the requests it registered.
pub(crate) trait ErrorTarget: Send + Sync {
  fn on_error(&self, record: ErrorRecord);
}

/// Routing table from request id to error target.
pub struct ErrorCorrelator {
  routes: RwLock<HashMap<RequestId, Weak<dyn ErrorTarget>>>,
  sink: Arc<dyn DiagnosticSink>,
  benign_codes: HashSet<i32>,
  connection_ok: AtomicBool,
}

impl ErrorCorrelator {
  pub fn new(sink: Arc<dyn DiagnosticSink>) -> Arc<Self> {
    Self::with_benign_codes(sink, DEFAULT_BENIGN_CODES.iter().copied())
  }

  /// Like [`ErrorCorrelator::new`] with a custom set of benign codes.
  pub fn with_benign_codes(sink: Arc<dyn DiagnosticSink>, codes: impl IntoIterator<Item = i32>) -> Arc<Self> {
    Arc::new(ErrorCorrelator {
      routes: RwLock::new(HashMap::new()),
      sink,
      benign_codes: codes.into_iter().collect(),
      connection_ok: AtomicBool::new(true),
    })
  }

  pub fn is_benign(&self, code: i32) -> bool {
    self.benign_codes.contains(&code)
  }

  /// False after a connectivity-lost notice until a restore notice arrives.
  pub fn connection_ok(&self) -> bool {
    self.connection_ok.load(Ordering::SeqCst)
  }

  /// Number of requests currently routed.
  pub fn registered(&self) -> usize {
    self.routes.read().len()
  }

  pub(crate) fn register(self: &Arc<Self>, req_id: RequestId, target: Weak<dyn ErrorTarget>) -> ErrorRoute {
    if self.routes.write().insert(req_id, target).is_some() {
      warn!("Error route for request {} replaced", req_id);
    }
    ErrorRoute { correlator: Arc::downgrade(self), req_id }
  }

  fn deregister(&self, req_id: RequestId) {
    self.routes.write().remove(&req_id);
  }

  /// Deliver one error frame.
  pub fn route(&self, record: ErrorRecord) {
    if CONNECTIVITY_LOST_CODES.contains(&record.code) {
      warn!("Error code {} indicates the connection to the service is down.", record.code);
      self.connection_ok.store(false, Ordering::SeqCst);
    } else if CONNECTIVITY_RESTORED_CODES.contains(&record.code) {
      self.connection_ok.store(true, Ordering::SeqCst);
    }

    if self.is_benign(record.code) {
      self.sink.report(&record, Severity::Info);
      return;
    }

    let Some(req_id) = record.req_id else {
      self.sink.report(&record, Severity::Fault);
      return;
    };

    // Clone the target out so no lock is held while the owner runs.
    let target = self.routes.read().get(&req_id).and_then(Weak::upgrade);
    match target {
      Some(t) => t.on_error(record),
      None => self.sink.report(&record, Severity::Debug),
    }
  }
}

/// Registration of one request with the [`ErrorCorrelator`]. Dropping it
/// removes the route.
#[must_use]
pub struct ErrorRoute {
  correlator: Weak<ErrorCorrelator>,
  req_id: RequestId,
}

impl Drop for ErrorRoute {
  fn drop(&mut self) {
    if let Some(c) = self.correlator.upgrade() {
      c.deregister(self.req_id);
    }
  }
}

impl fmt::Debug for ErrorRoute {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ErrorRoute({})", self.req_id)
  }
}
