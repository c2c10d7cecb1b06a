// twsmux/src/bus.rs

//! Inbound message bus.
//!
//! The connection pushes every inbound frame onto one queue
//! ([`InboundSender`]). A single dispatcher thread drains it and hands each
//! frame to the managers subscribed to the frame's category band; errors go
//! to the [`ErrorCorrelator`]. Delivery is therefore serialized per
//! connection and keeps the order in which the connection received frames.
//!
//! Managers subscribe with [`MessageBus::subscribe`] and get a
//! [`BusSubscription`] back; dropping it detaches the manager whatever path
//! it leaves by.

use crate::base::{MuxError, RequestId};
use crate::category::RequestCategory;
use crate::contract::{Bar, ContractDetails};
use crate::data::TickByTickData;
use crate::error_correlator::{ErrorCorrelator, ErrorRecord};
use crate::news::{HistoricalNews, NewsProvider, NewsTick};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// Typed body of an inbound data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
  ContractDetails(ContractDetails),
  HistoricalBar(Bar),
  RealTimeBar(Bar),
  NewsProviders(Vec<NewsProvider>),
  HistoricalNews(HistoricalNews),
  NewsTick(NewsTick),
  Tick(TickByTickData),
}

/// One inbound frame, as delivered by the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
  Data { req_id: RequestId, payload: Payload },
  /// No more payloads will follow for `req_id`.
  End { req_id: RequestId },
  Error(ErrorRecord),
}

impl Inbound {
  pub fn req_id(&self) -> Option<RequestId> {
    match self {
      Inbound::Data { req_id, .. } | Inbound::End { req_id } => Some(*req_id),
      Inbound::Error(r) => r.req_id,
    }
  }
}

/// Implemented by managers to receive frames of their category.
pub(crate) trait InboundObserver: Send + Sync {
  fn on_data(&self, req_id: RequestId, payload: &Payload);
  fn on_end(&self, req_id: RequestId);
}

struct Subscriber {
  id: u64,
  category: RequestCategory,
  observer: Weak<dyn InboundObserver>,
}

/// Fans inbound frames out to managers by category band.
pub struct MessageBus {
  subscribers: RwLock<Vec<Subscriber>>,
  next_subscriber_id: AtomicU64,
  correlator: Arc<ErrorCorrelator>,
}

impl MessageBus {
  pub fn new(correlator: Arc<ErrorCorrelator>) -> Arc<Self> {
    Arc::new(MessageBus {
      subscribers: RwLock::new(Vec::new()),
      next_subscriber_id: AtomicU64::new(1),
      correlator,
    })
  }

  pub fn correlator(&self) -> &Arc<ErrorCorrelator> {
    &self.correlator
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscribers.read().len()
  }

  pub(crate) fn subscribe(self: &Arc<Self>, category: RequestCategory, observer: Weak<dyn InboundObserver>) -> BusSubscription {
    let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
    let mut subs = self.subscribers.write();
    // Clean up dead observers before adding a new one
    subs.retain(|s| s.observer.strong_count() > 0);
    subs.push(Subscriber { id, category, observer });
    debug!("Bus subscriber {} added for {}", id, category);
    BusSubscription { bus: Arc::downgrade(self), id }
  }

  fn unsubscribe(&self, id: u64) {
    let mut subs = self.subscribers.write();
    subs.retain(|s| s.id != id);
    debug!("Bus subscriber {} removed", id);
  }

  /// Deliver one frame. Must not be called concurrently for the same
  /// connection; [`MessageBus::start`] guarantees that.
  pub fn dispatch(&self, frame: Inbound) {
    let (req_id, payload) = match frame {
      Inbound::Error(record) => {
        self.correlator.route(record);
        return;
      }
      Inbound::Data { req_id, payload } => (req_id, Some(payload)),
      Inbound::End { req_id } => (req_id, None),
    };

    let Some(category) = RequestCategory::of(req_id) else {
      debug!("Dropping frame for request {} outside every category band", req_id);
      return;
    };

    let targets: Vec<Arc<dyn InboundObserver>> = self.subscribers.read().iter()
      .filter(|s| s.category == category)
      .filter_map(|s| s.observer.upgrade())
      .collect();
    if targets.is_empty() {
      debug!("No {} subscriber for request {}", category, req_id);
      return;
    }

    for t in targets {
      match &payload {
        Some(p) => t.on_data(req_id, p),
        None => t.on_end(req_id),
      }
    }
  }

  /// Spawn the dispatcher thread. It runs until every [`InboundSender`]
  /// clone is dropped.
  pub fn start(self: &Arc<Self>, inbound: Receiver<Inbound>) -> Result<DispatchHandle, MuxError> {
    let bus = Arc::clone(self);
    let handle = thread::Builder::new()
      .name("twsmux-dispatch".to_string())
      .spawn(move || {
        info!("Dispatcher started");
        for frame in inbound.iter() {
          trace!("Dispatching {:?}", frame.req_id());
          bus.dispatch(frame);
        }
        info!("Dispatcher stopped: inbound queue closed");
      })
      .map_err(|e| MuxError::InternalError(format!("Failed to spawn dispatcher: {}", e)))?;
    Ok(DispatchHandle { handle: Some(handle) })
  }
}

/// Registration of one manager on the bus. Dropping it detaches the manager.
#[must_use]
pub struct BusSubscription {
  bus: Weak<MessageBus>,
  id: u64,
}

impl Drop for BusSubscription {
  fn drop(&mut self) {
    if let Some(bus) = self.bus.upgrade() {
      bus.unsubscribe(self.id);
    }
  }
}

/// Create the inbound queue. The sender goes to the connection, the receiver
/// to [`MessageBus::start`].
pub fn inbound_queue() -> (InboundSender, Receiver<Inbound>) {
  let (tx, rx) = crossbeam_channel::unbounded();
  (InboundSender { tx }, rx)
}

/// Handle the connection uses to push inbound frames.
#[derive(Clone, Debug)]
pub struct InboundSender {
  tx: Sender<Inbound>,
}

impl InboundSender {
  pub fn send(&self, frame: Inbound) -> Result<(), MuxError> {
    self.tx.send(frame).map_err(|_| MuxError::NotConnected)
  }

  pub fn data(&self, req_id: RequestId, payload: Payload) -> Result<(), MuxError> {
    self.send(Inbound::Data { req_id, payload })
  }

  pub fn end(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.send(Inbound::End { req_id })
  }

  /// Error frame in wire form: `id <= 0` means connection level.
  pub fn error(&self, id: i32, code: i32, message: &str) -> Result<(), MuxError> {
    self.send(Inbound::Error(ErrorRecord::from_raw(id, code, message)))
  }
}

/// Join handle of the dispatcher thread.
pub struct DispatchHandle {
  handle: Option<thread::JoinHandle<()>>,
}

impl DispatchHandle {
  /// Wait for the dispatcher to drain the queue and exit. Only returns once
  /// every [`InboundSender`] has been dropped.
  pub fn join(mut self) -> Result<(), MuxError> {
    match self.handle.take() {
      Some(h) => h.join().map_err(|_| {
        error!("Dispatcher thread panicked");
        MuxError::InternalError("Dispatcher thread panicked".to_string())
      }),
      None => Ok(()),
    }
  }
}
