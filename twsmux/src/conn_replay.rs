// twsmux/src/conn_replay.rs

//! Scripted connection.
//!
//! [`ReplayConnection`] answers each outbound call with replies taken from a
//! [`ReplayScript`], tagged with the request id of the call. It records every
//! outbound call, so it doubles as a test double for end to end runs and lets
//! the `hist_dump` binary work without a live session.
//!
//! Scripts are JSON, keyed by outbound call:
//!
//! ```json
//! {
//!   "replies": {
//!     "contract_details": [{"Data": {"ContractDetails": {"contract": {"con_id": 265598, "symbol": "AAPL", "sec_type": "Stock", "last_trade_date_or_contract_month": null, "exchange": "SMART", "primary_exchange": "NASDAQ", "currency": "USD", "local_symbol": "AAPL"}, "market_name": "NMS", "long_name": "APPLE INC", "min_tick": 0.01, "time_zone_id": "US/Eastern", "trading_hours": "", "liquid_hours": ""}}}, "End"],
//!     "historical_data": [{"Error": {"code": 162, "message": "HMDS query returned no data"}}]
//!   }
//! }
//! ```

use crate::base::{MuxError, RequestId};
use crate::bus::{InboundSender, Payload};
use crate::conn::Connection;
use crate::contract::Contract;
use crate::requests::{HistoricalDataParams, HistoricalNewsParams, RealTimeBarsParams, TickByTickParams, TickNewsParams};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outbound calls a script can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
  ContractDetails,
  HistoricalData,
  CancelHistoricalData,
  RealTimeBars,
  CancelRealTimeBars,
  NewsProviders,
  HistoricalNews,
  TickNews,
  CancelTickNews,
  TickByTick,
  CancelTickByTick,
}

/// One reply frame, tagged with the caller's id when replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptedReply {
  Data(Payload),
  End,
  Error { code: i32, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
  #[serde(default)]
  pub replies: HashMap<OutboundKind, Vec<ScriptedReply>>,
}

impl ReplayScript {
  pub fn from_json(s: &str) -> Result<Self, MuxError> {
    serde_json::from_str(s).map_err(|e| MuxError::ParseError(format!("Invalid replay script: {}", e)))
  }

  pub fn from_file(path: &Path) -> Result<Self, MuxError> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| MuxError::Io(format!("Cannot read replay script {}: {}", path.display(), e)))?;
    Self::from_json(&text)
  }

  /// Answer every `kind` call with `replies`.
  pub fn on(mut self, kind: OutboundKind, replies: Vec<ScriptedReply>) -> Self {
    self.replies.insert(kind, replies);
    self
  }
}

/// [`Connection`] that replays a script instead of talking to the service.
pub struct ReplayConnection {
  script: ReplayScript,
  sender: InboundSender,
  connected: AtomicBool,
  calls: Mutex<Vec<(OutboundKind, RequestId)>>,
}

impl ReplayConnection {
  pub fn new(script: ReplayScript, sender: InboundSender) -> Arc<Self> {
    info!("Replay connection with {} scripted call kinds", script.replies.len());
    Arc::new(ReplayConnection {
      script,
      sender,
      connected: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    })
  }

  /// Outbound calls seen so far, in order.
  pub fn calls(&self) -> Vec<(OutboundKind, RequestId)> {
    self.calls.lock().clone()
  }

  pub fn disconnect(&self) {
    self.connected.store(false, Ordering::SeqCst);
  }

  fn replay(&self, kind: OutboundKind, req_id: RequestId) -> Result<(), MuxError> {
    if !self.connected.load(Ordering::SeqCst) {
      return Err(MuxError::NotConnected);
    }
    self.calls.lock().push((kind, req_id));
    let Some(replies) = self.script.replies.get(&kind) else {
      debug!("No scripted replies for {:?} (req_id {})", kind, req_id);
      return Ok(());
    };
    for reply in replies {
      match reply {
        ScriptedReply::Data(payload) => self.sender.data(req_id, payload.clone())?,
        ScriptedReply::End => self.sender.end(req_id)?,
        ScriptedReply::Error { code, message } => {
          warn!("Replaying error {} for {:?} (req_id {})", code, kind, req_id);
          self.sender.error(req_id, *code, message)?
        }
      }
    }
    Ok(())
  }
}

impl Connection for ReplayConnection {
  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  fn request_contract_details(&self, req_id: RequestId, _contract: &Contract) -> Result<(), MuxError> {
    self.replay(OutboundKind::ContractDetails, req_id)
  }

  fn request_historical_data(&self, req_id: RequestId, _params: &HistoricalDataParams) -> Result<(), MuxError> {
    self.replay(OutboundKind::HistoricalData, req_id)
  }

  fn cancel_historical_data(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.replay(OutboundKind::CancelHistoricalData, req_id)
  }

  fn request_real_time_bars(&self, req_id: RequestId, _params: &RealTimeBarsParams) -> Result<(), MuxError> {
    self.replay(OutboundKind::RealTimeBars, req_id)
  }

  fn cancel_real_time_bars(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.replay(OutboundKind::CancelRealTimeBars, req_id)
  }

  fn request_news_providers(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.replay(OutboundKind::NewsProviders, req_id)
  }

  fn request_historical_news(&self, req_id: RequestId, _params: &HistoricalNewsParams) -> Result<(), MuxError> {
    self.replay(OutboundKind::HistoricalNews, req_id)
  }

  fn request_tick_news(&self, req_id: RequestId, _params: &TickNewsParams) -> Result<(), MuxError> {
    self.replay(OutboundKind::TickNews, req_id)
  }

  fn cancel_tick_news(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.replay(OutboundKind::CancelTickNews, req_id)
  }

  fn request_tick_by_tick(&self, req_id: RequestId, _params: &TickByTickParams) -> Result<(), MuxError> {
    self.replay(OutboundKind::TickByTick, req_id)
  }

  fn cancel_tick_by_tick(&self, req_id: RequestId) -> Result<(), MuxError> {
    self.replay(OutboundKind::CancelTickByTick, req_id)
  }
}
