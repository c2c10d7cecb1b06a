// twsmux/src/client.rs

//! Entry point wiring one connection to its managers.
//!
//! [`MuxClient`] owns the inbound bus, the dispatcher thread, the shared id
//! allocator and one manager per request kind. The connection itself is
//! supplied by the caller through [`MuxClient::connect_with`], which hands it
//! the [`InboundSender`] to push replies into.

use crate::base::MuxError;
use crate::bus::{DispatchHandle, InboundSender, MessageBus};
use crate::config::MuxConfig;
use crate::conn::Connection;
use crate::contract::{Bar, Contract, ContractDetails};
use crate::error_correlator::{ErrorCorrelator, ErrorRecord, LogDiagnosticSink};
use crate::id_alloc::RequestIdAllocator;
use crate::multi_slot::MultiSlotManager;
use crate::news::{HistoricalNews, NewsProvider};
use crate::requests::{
  ContractDetailsKind, HistoricalDataKind, HistoricalDataParams, HistoricalNewsKind, HistoricalNewsParams,
  NewsProvidersKind, RealTimeBarsKind, RequestKind, TickNewsKind, TicksKind,
};
use crate::single_slot::SingleSlotManager;

use log::{info, warn};
use std::sync::Arc;

pub struct MuxClient {
  config: MuxConfig,
  conn: Arc<dyn Connection>,
  bus: Arc<MessageBus>,
  ids: Arc<RequestIdAllocator>,
  diagnostics: Arc<LogDiagnosticSink>,
  contract_details: Arc<SingleSlotManager<ContractDetailsKind>>,
  news_providers: Arc<SingleSlotManager<NewsProvidersKind>>,
  tick_news: Arc<SingleSlotManager<TickNewsKind>>,
  ticks: Arc<SingleSlotManager<TicksKind>>,
  historical_data: Arc<MultiSlotManager<HistoricalDataKind>>,
  real_time_bars: Arc<MultiSlotManager<RealTimeBarsKind>>,
  historical_news: Arc<MultiSlotManager<HistoricalNewsKind>>,
  dispatcher: Option<DispatchHandle>,
}

impl MuxClient {
  /// Build the bus, let `connect` open the session on its inbound sender,
  /// then start dispatching.
  ///
  /// Fails with [`MuxError::NotConnected`] if the returned connection is not
  /// up; no request is issued in that case.
  pub fn connect_with<F>(config: MuxConfig, connect: F) -> Result<Self, MuxError>
  where
    F: FnOnce(InboundSender) -> Result<Arc<dyn Connection>, MuxError>,
  {
    let diagnostics = LogDiagnosticSink::new();
    let correlator = ErrorCorrelator::with_benign_codes(diagnostics.clone(), config.benign_codes());
    let bus = MessageBus::new(correlator);
    let (sender, receiver) = crate::bus::inbound_queue();

    let conn = connect(sender)?;
    if !conn.is_connected() {
      warn!("Connection reported not connected after setup");
      return Err(MuxError::NotConnected);
    }
    let dispatcher = bus.start(receiver)?;

    let ids = Arc::new(RequestIdAllocator::new());
    let client = MuxClient {
      contract_details: SingleSlotManager::new(&bus, conn.clone(), ids.clone()),
      news_providers: SingleSlotManager::new(&bus, conn.clone(), ids.clone()),
      tick_news: SingleSlotManager::new(&bus, conn.clone(), ids.clone()),
      ticks: SingleSlotManager::new(&bus, conn.clone(), ids.clone()),
      historical_data: MultiSlotManager::new(&bus, conn.clone(), ids.clone()),
      real_time_bars: MultiSlotManager::new(&bus, conn.clone(), ids.clone()),
      historical_news: MultiSlotManager::new(&bus, conn.clone(), ids.clone()),
      config,
      conn,
      bus,
      ids,
      diagnostics,
      dispatcher: Some(dispatcher),
    };
    info!("Client ready ({} bus subscribers)", client.bus.subscriber_count());
    Ok(client)
  }

  pub fn config(&self) -> &MuxConfig { &self.config }

  pub fn is_connected(&self) -> bool {
    self.conn.is_connected() && self.bus.correlator().connection_ok()
  }

  /// Last connection level fault reported by the service.
  pub fn last_fault(&self) -> Option<ErrorRecord> {
    self.diagnostics.last_fault()
  }

  pub fn contract_details(&self) -> Arc<SingleSlotManager<ContractDetailsKind>> { self.contract_details.clone() }
  pub fn news_providers(&self) -> Arc<SingleSlotManager<NewsProvidersKind>> { self.news_providers.clone() }
  pub fn tick_news(&self) -> Arc<SingleSlotManager<TickNewsKind>> { self.tick_news.clone() }
  pub fn ticks(&self) -> Arc<SingleSlotManager<TicksKind>> { self.ticks.clone() }
  pub fn historical_data(&self) -> Arc<MultiSlotManager<HistoricalDataKind>> { self.historical_data.clone() }
  pub fn real_time_bars(&self) -> Arc<MultiSlotManager<RealTimeBarsKind>> { self.real_time_bars.clone() }
  pub fn historical_news(&self) -> Arc<MultiSlotManager<HistoricalNewsKind>> { self.historical_news.clone() }

  /// An extra single-slot manager on this connection, e.g. a second tick
  /// stream. Ids come from the shared allocator, so they never collide with
  /// the built-in managers.
  pub fn single_slot<K: RequestKind>(&self) -> Arc<SingleSlotManager<K>> {
    SingleSlotManager::new(&self.bus, self.conn.clone(), self.ids.clone())
  }

  pub fn multi_slot<K: RequestKind>(&self) -> Arc<MultiSlotManager<K>> {
    MultiSlotManager::new(&self.bus, self.conn.clone(), self.ids.clone())
  }

  // --- Blocking helpers, bounded by the configured request timeout ---

  pub fn get_contract_details(&self, contract: &Contract) -> Result<Vec<ContractDetails>, MuxError> {
    let channel = self.contract_details.request(contract)?;
    channel.collect_until_done(self.config.request_timeout())
  }

  pub fn get_historical_data(&self, params: &HistoricalDataParams) -> Result<Vec<Bar>, MuxError> {
    let (_id, channel) = self.historical_data.request(params)?;
    channel.collect_until_done(self.config.request_timeout())
  }

  pub fn get_historical_news(&self, params: &HistoricalNewsParams) -> Result<Vec<HistoricalNews>, MuxError> {
    let (_id, channel) = self.historical_news.request(params)?;
    channel.collect_until_done(self.config.request_timeout())
  }

  pub fn get_news_providers(&self) -> Result<Vec<NewsProvider>, MuxError> {
    let channel = self.news_providers.request(&())?;
    let lists = channel.collect_until_done(self.config.request_timeout())?;
    Ok(lists.into_iter().flatten().collect())
  }

  /// Drop the managers and the connection, then wait for the dispatcher to
  /// drain. Blocks while anything else still holds the connection's
  /// [`InboundSender`].
  pub fn shutdown(mut self) -> Result<(), MuxError> {
    let dispatcher = self.dispatcher.take();
    drop(self);
    match dispatcher {
      Some(d) => d.join(),
      None => Ok(()),
    }
  }
}
