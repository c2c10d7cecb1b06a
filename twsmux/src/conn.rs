// twsmux/src/conn.rs

use crate::base::{MuxError, RequestId};
use crate::contract::Contract;
use crate::requests::{HistoricalDataParams, HistoricalNewsParams, RealTimeBarsParams, TickByTickParams, TickNewsParams};

/// Outbound half of a session with the service.
///
/// Every call is fire-and-forget: it carries the request id chosen by the
/// manager, and replies come back later through the inbound
/// [`MessageBus`](crate::bus::MessageBus) tagged with that id. Implementations
/// own the wire encoding and the socket; they must push inbound frames onto
/// the [`InboundSender`](crate::bus::InboundSender) they were given, in the
/// order they were received.
///
/// Replies that the wire protocol does not tag (news providers) must be
/// tagged by the implementation with the id of the outbound call that
/// triggered them.
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send + Sync {
  /// Check if the session is up
  fn is_connected(&self) -> bool;

  fn request_contract_details(&self, req_id: RequestId, contract: &Contract) -> Result<(), MuxError>;

  fn request_historical_data(&self, req_id: RequestId, params: &HistoricalDataParams) -> Result<(), MuxError>;
  fn cancel_historical_data(&self, req_id: RequestId) -> Result<(), MuxError>;

  fn request_real_time_bars(&self, req_id: RequestId, params: &RealTimeBarsParams) -> Result<(), MuxError>;
  fn cancel_real_time_bars(&self, req_id: RequestId) -> Result<(), MuxError>;

  fn request_news_providers(&self, req_id: RequestId) -> Result<(), MuxError>;

  fn request_historical_news(&self, req_id: RequestId, params: &HistoricalNewsParams) -> Result<(), MuxError>;

  /// News headlines as ticks on a market data line (generic tick 292).
  fn request_tick_news(&self, req_id: RequestId, params: &TickNewsParams) -> Result<(), MuxError>;
  fn cancel_tick_news(&self, req_id: RequestId) -> Result<(), MuxError>;

  fn request_tick_by_tick(&self, req_id: RequestId, params: &TickByTickParams) -> Result<(), MuxError>;
  fn cancel_tick_by_tick(&self, req_id: RequestId) -> Result<(), MuxError>;
}
