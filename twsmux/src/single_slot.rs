// twsmux/src/single_slot.rs

//! Manager allowing one in-flight request at a time.
//!
//! Used for kinds where the service (or the caller) never needs more than one
//! outstanding request per manager: contract lookups, the news provider list,
//! the tick news line and tick-by-tick streams. A second
//! [`SingleSlotManager::construct`] while the first request is still running
//! fails with [`MuxError::AlreadyActive`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use twsmux::{MuxClient, contract::Contract};
//!
//! fn lookup(client: &MuxClient) -> Result<(), twsmux::MuxError> {
//!   let channel = client.contract_details().request(&Contract::stock("AAPL"))?;
//!   for details in channel.collect_until_done(Duration::from_secs(10))? {
//!     println!("{} -> con_id {}", details.long_name, details.contract.con_id);
//!   }
//!   Ok(())
//! }
//! ```

use crate::base::{MuxError, RequestId};
use crate::bus::{BusSubscription, InboundObserver, MessageBus, Payload};
use crate::channel::{ChannelOwner, ChannelShared, ChannelState, RequestChannel};
use crate::conn::Connection;
use crate::error_correlator::{ErrorCorrelator, ErrorRecord, ErrorRoute, ErrorTarget};
use crate::id_alloc::RequestIdAllocator;
use crate::requests::RequestKind;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct Slot<T> {
  shared: Arc<ChannelShared<T>>,
  // Dropping the slot removes the error route.
  _route: ErrorRoute,
}

/// Owns at most one live [`RequestChannel`] for request kind `K`.
pub struct SingleSlotManager<K: RequestKind> {
  conn: Arc<dyn Connection>,
  ids: Arc<RequestIdAllocator>,
  correlator: Arc<ErrorCorrelator>,
  slot: Mutex<Option<Slot<K::Message>>>,
  last_error: Mutex<Option<ErrorRecord>>,
  _subscription: BusSubscription,
  self_weak: Weak<SingleSlotManager<K>>,
}

impl<K: RequestKind> SingleSlotManager<K> {
  pub fn new(bus: &Arc<MessageBus>, conn: Arc<dyn Connection>, ids: Arc<RequestIdAllocator>) -> Arc<Self> {
    Arc::new_cyclic(|weak: &Weak<Self>| {
      let observer: Weak<dyn InboundObserver> = weak.clone();
      SingleSlotManager {
        conn,
        ids,
        correlator: Arc::clone(bus.correlator()),
        slot: Mutex::new(None),
        last_error: Mutex::new(None),
        _subscription: bus.subscribe(K::CATEGORY, observer),
        self_weak: weak.clone(),
      }
    })
  }

  /// Allocate a fresh id and an Idle channel, and route errors for that id
  /// here. Nothing is sent.
  pub fn construct(&self) -> Result<RequestChannel<K::Message>, MuxError> {
    let mut slot = self.slot.lock();
    if let Some(current) = slot.as_ref() {
      if !current.shared.state().is_terminal() {
        debug!("Refusing {} request: {} still in flight", K::NAME, current.shared.req_id());
        return Err(MuxError::AlreadyActive(current.shared.req_id()));
      }
    }

    let req_id = self.ids.next(K::CATEGORY);
    let owner: Weak<dyn ChannelOwner> = self.self_weak.clone();
    let target: Weak<dyn ErrorTarget> = self.self_weak.clone();
    let shared = ChannelShared::new(req_id, owner);
    let route = self.correlator.register(req_id, target);
    // Replacing a terminal slot drops its route.
    *slot = Some(Slot { shared: Arc::clone(&shared), _route: route });
    trace!("Constructed {} request {}", K::NAME, req_id);
    Ok(RequestChannel::new(shared))
  }

  /// Construct, then issue the outbound call.
  ///
  /// The channel is marked Active just before the call goes out. If the call
  /// fails the channel ends Errored, the slot is released and the error is
  /// returned.
  pub fn request(&self, params: &K::Params) -> Result<RequestChannel<K::Message>, MuxError> {
    let channel = self.construct()?;
    let req_id = channel.request_id();
    channel.shared().activate();
    info!("Requesting {} (req_id {})", K::NAME, req_id);
    if let Err(e) = K::issue(self.conn.as_ref(), req_id, params) {
      warn!("Failed to issue {} request {}: {:?}", K::NAME, req_id, e);
      let record = ErrorRecord::new(Some(req_id), 0, &e.to_string()).with_cause(Arc::new(e.clone()));
      *self.last_error.lock() = Some(record.clone());
      channel.shared().push_error(record, true);
      self.release(req_id);
      return Err(e);
    }
    Ok(channel)
  }

  /// Forward one message if `req_id` is the current request.
  pub(crate) fn on_message(&self, req_id: RequestId, msg: K::Message) {
    let Some(shared) = self.current(req_id) else {
      debug!("Dropping {} message for stale request {}", K::NAME, req_id);
      return;
    };
    if !shared.push_message(msg) {
      return;
    }
    if K::SINGLE_SHOT {
      self.on_completed(req_id);
    }
  }

  /// End of data for `req_id`: complete the channel and free the slot.
  pub(crate) fn on_completed(&self, req_id: RequestId) {
    match self.release(req_id) {
      Some(slot) => {
        slot.shared.finish(ChannelState::Completed);
      }
      None => debug!("Ignoring end of {} for stale request {}", K::NAME, req_id),
    }
  }

  /// Cancel the current request, if any. Subscription kinds also send the
  /// outbound stop. Cancelling with nothing in flight is a no-op.
  pub fn cancel(&self) -> Result<(), MuxError> {
    let taken = self.slot.lock().take();
    match taken {
      Some(slot) => self.cancel_slot(slot),
      None => Ok(()),
    }
  }

  /// Stop a request already taken out of the slot.
  fn cancel_slot(&self, slot: Slot<K::Message>) -> Result<(), MuxError> {
    let shared = &slot.shared;
    let req_id = shared.req_id();
    let mut result = Ok(());
    if shared.state() == ChannelState::Active {
      if let Err(e) = K::cancel(self.conn.as_ref(), req_id) {
        warn!("Failed to send cancel for {} request {}: {:?}", K::NAME, req_id, e);
        result = Err(e);
      }
    }
    if shared.finish(ChannelState::Cancelled) {
      info!("Cancelled {} request {}", K::NAME, req_id);
    }
    result
  }

  /// Last error tagged with any request of this manager.
  pub fn last_error(&self) -> Option<ErrorRecord> {
    self.last_error.lock().clone()
  }

  pub fn current_request_id(&self) -> Option<RequestId> {
    self.slot.lock().as_ref().map(|s| s.shared.req_id())
  }

  /// True while a non-terminal request occupies the slot.
  pub fn is_active(&self) -> bool {
    self.slot.lock().as_ref().map_or(false, |s| !s.shared.state().is_terminal())
  }

  fn current(&self, req_id: RequestId) -> Option<Arc<ChannelShared<K::Message>>> {
    self.slot.lock().as_ref()
      .filter(|s| s.shared.req_id() == req_id)
      .map(|s| Arc::clone(&s.shared))
  }

  /// Take the slot out if it holds `req_id`.
  fn release(&self, req_id: RequestId) -> Option<Slot<K::Message>> {
    let mut slot = self.slot.lock();
    if slot.as_ref().map_or(false, |s| s.shared.req_id() == req_id) {
      slot.take()
    } else {
      None
    }
  }
}

impl<K: RequestKind> ChannelOwner for SingleSlotManager<K> {
  fn cancel_request(&self, req_id: RequestId) -> Result<(), MuxError> {
    // Check and take under one lock, so a newer request in the slot is left alone.
    match self.release(req_id) {
      Some(slot) => self.cancel_slot(slot),
      None => Ok(()),
    }
  }
}

impl<K: RequestKind> ErrorTarget for SingleSlotManager<K> {
  fn on_error(&self, record: ErrorRecord) {
    *self.last_error.lock() = Some(record.clone());
    let Some(req_id) = record.req_id else { return };
    let Some(shared) = self.current(req_id) else {
      debug!("{} error for stale request {}: {}", K::NAME, req_id, record);
      return;
    };
    let terminal = K::is_terminal_error(record.code);
    if terminal {
      warn!("{} request {} failed: {}", K::NAME, req_id, record);
    } else {
      info!("{} request {} warning: {}", K::NAME, req_id, record);
    }
    shared.push_error(record, terminal);
    if terminal {
      self.release(req_id);
    }
  }
}

impl<K: RequestKind> InboundObserver for SingleSlotManager<K> {
  fn on_data(&self, req_id: RequestId, payload: &Payload) {
    match K::extract(payload) {
      Some(msg) => self.on_message(req_id, msg),
      None => warn!("Unexpected payload for {} request {}: {:?}", K::NAME, req_id, payload),
    }
  }

  fn on_end(&self, req_id: RequestId) {
    self.on_completed(req_id);
  }
}
