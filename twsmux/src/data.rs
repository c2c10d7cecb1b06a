// twsmux/src/data.rs
// Tick-by-tick request types and payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::base::MuxError;

/// Enum representing the type of tick-by-tick data being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickByTickRequestType {
  Last,
  AllLast,
  BidAsk,
  MidPoint,
}

impl fmt::Display for TickByTickRequestType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TickByTickRequestType::Last => write!(f, "Last"),
      TickByTickRequestType::AllLast => write!(f, "AllLast"),
      TickByTickRequestType::BidAsk => write!(f, "BidAsk"),
      TickByTickRequestType::MidPoint => write!(f, "MidPoint"),
    }
  }
}

impl FromStr for TickByTickRequestType {
  type Err = MuxError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Last" => Ok(TickByTickRequestType::Last),
      "AllLast" => Ok(TickByTickRequestType::AllLast),
      "BidAsk" => Ok(TickByTickRequestType::BidAsk),
      "MidPoint" => Ok(TickByTickRequestType::MidPoint),
      _ => Err(MuxError::ParseError(format!("Invalid TickByTickRequestType string: {}", s))),
    }
  }
}

/// Tick attributes specific to Last/AllLast ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickAttribLast {
  pub past_limit: bool,
  pub unreported: bool,
}

/// Tick attributes specific to BidAsk ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickAttribBidAsk {
  pub bid_past_low: bool,
  pub ask_past_high: bool,
}

/// One tick-by-tick update. `time` is a unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TickByTickData {
  Last {
    time: i64,
    price: f64,
    size: f64,
    tick_attrib_last: TickAttribLast,
    exchange: String,
    special_conditions: String,
  },
  BidAsk {
    time: i64,
    bid_price: f64,
    ask_price: f64,
    bid_size: f64,
    ask_size: f64,
    tick_attrib_bid_ask: TickAttribBidAsk,
  },
  MidPoint {
    time: i64,
    mid_point: f64,
  },
}

impl TickByTickData {
  pub fn time(&self) -> i64 {
    match self {
      TickByTickData::Last { time, .. } => *time,
      TickByTickData::BidAsk { time, .. } => *time,
      TickByTickData::MidPoint { time, .. } => *time,
    }
  }
}
