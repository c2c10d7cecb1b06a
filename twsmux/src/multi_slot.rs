// twsmux/src/multi_slot.rs

//! Manager for kinds with many requests in flight at once.
//!
//! Historical bars, real-time bars and historical news are requested per
//! contract and routinely overlap. [`MultiSlotManager`] keeps a registry from
//! request id to channel; every inbound frame is looked up by id, so results of
//! concurrent requests never mix. An entry leaves the registry exactly once:
//! on completion, on a terminal error, or on cancel.

use crate::base::{MuxError, RequestId};
use crate::bus::{BusSubscription, InboundObserver, MessageBus, Payload};
use crate::channel::{ChannelOwner, ChannelShared, ChannelState, RequestChannel};
use crate::conn::Connection;
use crate::error_correlator::{ErrorCorrelator, ErrorRecord, ErrorRoute, ErrorTarget};
use crate::id_alloc::RequestIdAllocator;
use crate::requests::RequestKind;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

struct Slot<T> {
  shared: Arc<ChannelShared<T>>,
  _route: ErrorRoute,
}

/// Registry of in-flight requests of kind `K`, keyed by request id.
pub struct MultiSlotManager<K: RequestKind> {
  conn: Arc<dyn Connection>,
  ids: Arc<RequestIdAllocator>,
  correlator: Arc<ErrorCorrelator>,
  registry: Mutex<HashMap<RequestId, Slot<K::Message>>>,
  last_error: Mutex<Option<ErrorRecord>>,
  _subscription: BusSubscription,
  self_weak: Weak<MultiSlotManager<K>>,
}

impl<K: RequestKind> MultiSlotManager<K> {
  pub fn new(bus: &Arc<MessageBus>, conn: Arc<dyn Connection>, ids: Arc<RequestIdAllocator>) -> Arc<Self> {
    Arc::new_cyclic(|weak: &Weak<Self>| {
      let observer: Weak<dyn InboundObserver> = weak.clone();
      MultiSlotManager {
        conn,
        ids,
        correlator: Arc::clone(bus.correlator()),
        registry: Mutex::new(HashMap::new()),
        last_error: Mutex::new(None),
        _subscription: bus.subscribe(K::CATEGORY, observer),
        self_weak: weak.clone(),
      }
    })
  }

  /// Allocate an id, register the channel and issue the outbound call.
  ///
  /// The entry is registered before the call goes out so that replies racing
  /// back on the dispatcher thread find it.
  pub fn request(&self, params: &K::Params) -> Result<(RequestId, RequestChannel<K::Message>), MuxError> {
    let req_id = self.ids.next(K::CATEGORY);
    let owner: Weak<dyn ChannelOwner> = self.self_weak.clone();
    let target: Weak<dyn ErrorTarget> = self.self_weak.clone();
    let shared = ChannelShared::new(req_id, owner);
    let route = self.correlator.register(req_id, target);
    shared.activate();
    self.registry.lock().insert(req_id, Slot { shared: Arc::clone(&shared), _route: route });

    info!("Requesting {} (req_id {})", K::NAME, req_id);
    if let Err(e) = K::issue(self.conn.as_ref(), req_id, params) {
      warn!("Failed to issue {} request {}: {:?}", K::NAME, req_id, e);
      self.registry.lock().remove(&req_id);
      let record = ErrorRecord::new(Some(req_id), 0, &e.to_string()).with_cause(Arc::new(e.clone()));
      *self.last_error.lock() = Some(record.clone());
      shared.push_error(record, true);
      return Err(e);
    }
    Ok((req_id, RequestChannel::new(shared)))
  }

  pub(crate) fn on_message(&self, req_id: RequestId, msg: K::Message) {
    let shared = self.registry.lock().get(&req_id).map(|s| Arc::clone(&s.shared));
    let Some(shared) = shared else {
      debug!("Dropping {} message for unknown request {}", K::NAME, req_id);
      return;
    };
    if shared.push_message(msg) && K::SINGLE_SHOT {
      self.on_completed(req_id);
    }
  }

  pub(crate) fn on_completed(&self, req_id: RequestId) {
    let removed = self.registry.lock().remove(&req_id);
    match removed {
      Some(slot) => {
        slot.shared.finish(ChannelState::Completed);
        trace!("{} request {} completed, {} in flight", K::NAME, req_id, self.in_flight());
      }
      None => debug!("Ignoring end of {} for unknown request {}", K::NAME, req_id),
    }
  }

  /// Cancel one request: remove it, send the outbound stop if the kind has
  /// one, and end the consumer's stream.
  pub fn cancel(&self, req_id: RequestId) -> Result<(), MuxError> {
    let removed = self.registry.lock().remove(&req_id);
    let Some(slot) = removed else {
      return Err(MuxError::UnknownRequestId(req_id));
    };
    let mut result = Ok(());
    if slot.shared.state() == ChannelState::Active {
      if let Err(e) = K::cancel(self.conn.as_ref(), req_id) {
        warn!("Failed to send cancel for {} request {}: {:?}", K::NAME, req_id, e);
        result = Err(e);
      }
    }
    if slot.shared.finish(ChannelState::Cancelled) {
      info!("Cancelled {} request {}", K::NAME, req_id);
    }
    result
  }

  /// Last error tagged with any request of this manager.
  pub fn last_error(&self) -> Option<ErrorRecord> {
    self.last_error.lock().clone()
  }

  /// Number of requests currently registered.
  pub fn in_flight(&self) -> usize {
    self.registry.lock().len()
  }

  pub fn is_in_flight(&self, req_id: RequestId) -> bool {
    self.registry.lock().contains_key(&req_id)
  }
}

impl<K: RequestKind> ChannelOwner for MultiSlotManager<K> {
  fn cancel_request(&self, req_id: RequestId) -> Result<(), MuxError> {
    match self.cancel(req_id) {
      // Already finished on the dispatcher thread.
      Err(MuxError::UnknownRequestId(_)) => Ok(()),
      other => other,
    }
  }
}

impl<K: RequestKind> ErrorTarget for MultiSlotManager<K> {
  fn on_error(&self, record: ErrorRecord) {
    *self.last_error.lock() = Some(record.clone());
    let Some(req_id) = record.req_id else { return };
    let terminal = K::is_terminal_error(record.code);
    let shared = {
      let mut registry = self.registry.lock();
      if terminal {
        registry.remove(&req_id).map(|s| s.shared)
      } else {
        registry.get(&req_id).map(|s| Arc::clone(&s.shared))
      }
    };
    let Some(shared) = shared else {
      debug!("{} error for unknown request {}: {}", K::NAME, req_id, record);
      return;
    };
    if terminal {
      warn!("{} request {} failed: {}", K::NAME, req_id, record);
    } else {
      info!("{} request {} warning: {}", K::NAME, req_id, record);
    }
    shared.push_error(record, terminal);
  }
}

impl<K: RequestKind> InboundObserver for MultiSlotManager<K> {
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

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::{inbound_queue, Inbound};
  use crate::category::RequestCategory;
  use crate::channel::ChannelEvent;
  use crate::conn::MockConnection;
  use crate::contract::{Bar, BarSize, Contract, WhatToShow};
  use crate::error_correlator::tests::RecordingSink;
  use crate::error_correlator::Severity;
  use crate::requests::{HistoricalDataKind, HistoricalDataParams, RealTimeBarsKind, RealTimeBarsParams};
  use chrono::{Duration as ChronoDuration, TimeZone, Utc};
  use mockall::predicate::*;
  use std::collections::HashSet;
  use std::thread;
  use std::time::Duration;

  fn setup<K: RequestKind>(mock: MockConnection) -> (Arc<RecordingSink>, Arc<MessageBus>, Arc<MultiSlotManager<K>>) {
    let sink = Arc::new(RecordingSink::default());
    let bus = MessageBus::new(ErrorCorrelator::new(sink.clone()));
    let mgr = MultiSlotManager::<K>::new(&bus, Arc::new(mock), Arc::new(RequestIdAllocator::new()));
    (sink, bus, mgr)
  }

  fn bar(day: i64, close: f64) -> Bar {
    Bar {
      time: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap() + ChronoDuration::days(day),
      open: close - 1.0, high: close + 2.0, low: close - 2.0, close,
      volume: 1_000 + day, wap: close, count: 10,
    }
  }

  fn hist_params(symbol: &str) -> HistoricalDataParams {
    HistoricalDataParams::new(Contract::stock(symbol), "5 D", BarSize::OneDay)
  }

  #[test]
  fn test_five_bar_round_trip() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data()
      .with(eq(20_000_001), always())
      .times(1)
      .returning(|_, _| Ok(()));
    let (_sink, bus, mgr) = setup::<HistoricalDataKind>(mock);

    let (id, channel) = mgr.request(&hist_params("IBM")).unwrap();
    let bars: Vec<Bar> = (0..5).map(|d| bar(d, 250.0 + d as f64)).collect();
    for b in &bars {
      bus.dispatch(Inbound::Data { req_id: id, payload: Payload::HistoricalBar(b.clone()) });
    }
    bus.dispatch(Inbound::End { req_id: id });

    assert_eq!(channel.collect_until_done(Duration::from_millis(50)), Ok(bars));
    assert_eq!(channel.state(), ChannelState::Completed);
    assert_eq!(mgr.in_flight(), 0);
    assert_eq!(bus.correlator().registered(), 0);
  }

  #[test]
  fn test_no_cross_delivery() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().times(2).returning(|_, _| Ok(()));
    let (_sink, bus, mgr) = setup::<HistoricalDataKind>(mock);

    let (a, chan_a) = mgr.request(&hist_params("AAPL")).unwrap();
    let (b, chan_b) = mgr.request(&hist_params("MSFT")).unwrap();
    assert_eq!(mgr.in_flight(), 2);

    bus.dispatch(Inbound::Data { req_id: b, payload: Payload::HistoricalBar(bar(0, 400.0)) });
    bus.dispatch(Inbound::Data { req_id: a, payload: Payload::HistoricalBar(bar(0, 230.0)) });
    bus.dispatch(Inbound::Data { req_id: b, payload: Payload::HistoricalBar(bar(1, 401.0)) });
    bus.dispatch(Inbound::End { req_id: a });
    bus.dispatch(Inbound::End { req_id: b });

    let closes = |v: Vec<Bar>| v.iter().map(|b| b.close).collect::<Vec<_>>();
    assert_eq!(chan_a.collect_until_done(Duration::from_millis(50)).map(closes), Ok(vec![230.0]));
    assert_eq!(chan_b.collect_until_done(Duration::from_millis(50)).map(closes), Ok(vec![400.0, 401.0]));
  }

  #[test]
  fn test_message_after_completion_dropped() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Ok(()));
    let (_sink, bus, mgr) = setup::<HistoricalDataKind>(mock);
    let (id, channel) = mgr.request(&hist_params("IBM")).unwrap();

    bus.dispatch(Inbound::End { req_id: id });
    bus.dispatch(Inbound::Data { req_id: id, payload: Payload::HistoricalBar(bar(0, 1.0)) });

    assert_eq!(channel.collect_until_done(Duration::from_millis(10)), Ok(vec![]));
    assert_eq!(mgr.cancel(id), Err(MuxError::UnknownRequestId(id)));
  }

  #[test]
  fn test_cancel_sends_exactly_one_stop() {
    let mut mock = MockConnection::new();
    mock.expect_request_real_time_bars().times(1).returning(|_, _| Ok(()));
    mock.expect_cancel_real_time_bars()
      .with(eq(30_000_001))
      .times(1)
      .returning(|_| Ok(()));
    let (_sink, bus, mgr) = setup::<RealTimeBarsKind>(mock);

    let (id, channel) = mgr.request(&RealTimeBarsParams::new(Contract::stock("SPY"), WhatToShow::Trades)).unwrap();
    assert_eq!(id, 30_000_001);
    bus.dispatch(Inbound::Data { req_id: id, payload: Payload::RealTimeBar(bar(0, 580.0)) });

    channel.cancel().unwrap();
    assert_eq!(mgr.cancel(id), Err(MuxError::UnknownRequestId(id)));
    drop(channel);

    // Late bar after the stop is dropped quietly.
    bus.dispatch(Inbound::Data { req_id: id, payload: Payload::RealTimeBar(bar(1, 581.0)) });
    assert_eq!(mgr.in_flight(), 0);
  }

  #[test]
  fn test_drop_cancels_running_request() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Ok(()));
    mock.expect_cancel_historical_data().with(eq(20_000_001)).times(1).returning(|_| Ok(()));
    let (_sink, _bus, mgr) = setup::<HistoricalDataKind>(mock);

    let (_id, channel) = mgr.request(&hist_params("IBM")).unwrap();
    drop(channel);
    assert_eq!(mgr.in_flight(), 0);
  }

  #[test]
  fn test_terminal_error_removes_entry() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Ok(()));
    let (sink, bus, mgr) = setup::<HistoricalDataKind>(mock);
    let (id, channel) = mgr.request(&hist_params("ZZZZ")).unwrap();

    bus.dispatch(Inbound::Error(ErrorRecord::from_raw(id, 162, "HMDS query returned no data")));
    assert_eq!(channel.state(), ChannelState::Errored);
    assert!(!mgr.is_in_flight(id));
    assert_eq!(mgr.last_error().map(|e| (e.req_id, e.code)), Some((Some(id), 162)));

    // A second error for the same id is now a routing miss.
    bus.dispatch(Inbound::Error(ErrorRecord::from_raw(id, 162, "HMDS query returned no data")));
    assert_eq!(sink.reports.lock().last().map(|r| r.1), Some(Severity::Debug));
  }

  #[test]
  fn test_benign_untagged_error_not_forwarded() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Ok(()));
    mock.expect_cancel_historical_data().with(eq(20_000_001)).times(1).returning(|_| Ok(()));
    let (sink, bus, mgr) = setup::<HistoricalDataKind>(mock);
    let (_id, channel) = mgr.request(&hist_params("IBM")).unwrap();

    bus.dispatch(Inbound::Error(ErrorRecord::from_raw(-1, 2106, "HMDS data farm connection is OK:ushmds")));

    assert!(channel.collect_available().is_empty());
    assert_eq!(channel.state(), ChannelState::Active);
    assert!(mgr.last_error().is_none());
    assert!(sink.reports.lock().iter().all(|(_, s)| *s == Severity::Info));

    // Still running, so dropping the handle sends the stop.
    drop(channel);
    assert_eq!(mgr.in_flight(), 0);
  }

  #[test]
  fn test_delayed_data_notice_keeps_bars_running() {
    let mut mock = MockConnection::new();
    mock.expect_request_real_time_bars().times(1).returning(|_, _| Ok(()));
    mock.expect_cancel_real_time_bars().with(eq(30_000_001)).times(1).returning(|_| Ok(()));
    let (_sink, bus, mgr) = setup::<RealTimeBarsKind>(mock);
    let (id, channel) = mgr.request(&RealTimeBarsParams::new(Contract::stock("SPY"), WhatToShow::Trades)).unwrap();

    bus.dispatch(Inbound::Error(ErrorRecord::from_raw(id, 10167, "Displaying delayed market data")));
    bus.dispatch(Inbound::Data { req_id: id, payload: Payload::RealTimeBar(bar(0, 580.0)) });

    assert_eq!(channel.state(), ChannelState::Active);
    assert!(mgr.is_in_flight(id));
    assert_eq!(mgr.last_error().map(|e| e.code), Some(10167));
    let events = channel.collect_available();
    assert!(matches!(events.as_slice(), [ChannelEvent::Error(e), ChannelEvent::Message(b)] if e.code == 10167 && b.close == 580.0));

    channel.cancel().unwrap();
    assert_eq!(mgr.in_flight(), 0);
  }

  #[test]
  fn test_issue_failure_removes_entry() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Err(MuxError::ConnectionFailed("socket closed".to_string())));
    let (_sink, bus, mgr) = setup::<HistoricalDataKind>(mock);

    assert!(matches!(mgr.request(&hist_params("IBM")), Err(MuxError::ConnectionFailed(_))));
    assert_eq!(mgr.in_flight(), 0);
    assert_eq!(mgr.last_error().map(|e| e.code), Some(0));
    assert_eq!(bus.correlator().registered(), 0);
  }

  #[test]
  fn test_concurrent_requests_get_distinct_ids() {
    let mut mock = MockConnection::new();
    mock.expect_request_historical_data().returning(|_, _| Ok(()));
    mock.expect_cancel_historical_data().returning(|_| Ok(()));
    let (_sink, bus, mgr) = setup::<HistoricalDataKind>(mock);
    let (tx, rx) = inbound_queue();
    let dispatcher = bus.start(rx).unwrap();

    let workers: Vec<_> = (0..8).map(|_| {
      let mgr = Arc::clone(&mgr);
      let tx = tx.clone();
      thread::spawn(move || {
        (0..25).map(|i| {
          let (id, channel) = mgr.request(&hist_params("IBM")).unwrap();
          tx.data(id, Payload::HistoricalBar(bar(i, id as f64))).unwrap();
          tx.end(id).unwrap();
          let got = channel.collect_until_done(Duration::from_secs(5)).unwrap();
          assert_eq!(got.len(), 1);
          assert_eq!(got[0].close, id as f64);
          id
        }).collect::<Vec<_>>()
      })
    }).collect();

    let mut seen = HashSet::new();
    for w in workers {
      for id in w.join().unwrap() {
        assert!(RequestCategory::HistoricalData.contains(id));
        assert!(seen.insert(id), "duplicate id {}", id);
      }
    }
    assert_eq!(seen.len(), 200);

    drop(tx);
    dispatcher.join().unwrap();
    assert_eq!(mgr.in_flight(), 0);
  }
}
