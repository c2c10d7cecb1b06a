// twsmux/src/contract.rs
// Contract descriptors and bar data carried by requests and replies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SecType {
  #[default]
  Stock,          // STK
  Option,         // OPT
  Future,         // FUT
  ContinuousFuture, // CONTFUT
  Forex,          // CASH
  Index,          // IND
  Cfd,            // CFD
  Commodity,      // CMDTY
  Crypto,         // CRYPTO
}

impl fmt::Display for SecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SecType::Stock => "STK",
      SecType::Option => "OPT",
      SecType::Future => "FUT",
      SecType::ContinuousFuture => "CONTFUT",
      SecType::Forex => "CASH",
      SecType::Index => "IND",
      SecType::Cfd => "CFD",
      SecType::Commodity => "CMDTY",
      SecType::Crypto => "CRYPTO",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for SecType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "STK" => Ok(SecType::Stock),
      "OPT" => Ok(SecType::Option),
      "FUT" => Ok(SecType::Future),
      "CONTFUT" => Ok(SecType::ContinuousFuture),
      "CASH" => Ok(SecType::Forex),
      "IND" => Ok(SecType::Index),
      "CFD" => Ok(SecType::Cfd),
      "CMDTY" => Ok(SecType::Commodity),
      "CRYPTO" => Ok(SecType::Crypto),
      _ => Err(format!("Unknown security type: {}", s)),
    }
  }
}

/// Contract descriptor sent with every data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: SecType,
  pub last_trade_date_or_contract_month: Option<String>,
  pub exchange: String,
  pub primary_exchange: Option<String>,
  pub currency: String,
  pub local_symbol: Option<String>,
}

impl Default for Contract {
  fn default() -> Self {
    Contract {
      con_id: 0,
      symbol: String::new(),
      sec_type: SecType::Stock,
      last_trade_date_or_contract_month: None,
      exchange: "SMART".to_string(),
      primary_exchange: None,
      currency: "USD".to_string(),
      local_symbol: None,
    }
  }
}

impl Contract {
  /// A SMART-routed USD stock.
  pub fn stock(symbol: &str) -> Self {
    Contract { symbol: symbol.to_string(), ..Default::default() }
  }

  /// A futures contract for a given contract month (`YYYYMM`).
  pub fn future(symbol: &str, contract_month: &str, exchange: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: SecType::Future,
      last_trade_date_or_contract_month: Some(contract_month.to_string()),
      exchange: exchange.to_string(),
      ..Default::default()
    }
  }
}

impl fmt::Display for Contract {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} {} {}", self.symbol, self.sec_type, self.exchange, self.currency)?;
    if let Some(month) = &self.last_trade_date_or_contract_month {
      write!(f, " {}", month)?;
    }
    Ok(())
  }
}

/// Reply to a contract lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
  pub contract: Contract,
  pub market_name: String,
  pub long_name: String,
  pub min_tick: f64,
  pub time_zone_id: String,
  pub trading_hours: String,
  pub liquid_hours: String,
}

/// One OHLCV bar, either historical or a 5-second real-time bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
  pub time: DateTime<Utc>,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: i64,
  pub wap: f64,
  pub count: i32,
}

/// Bar size for historical data requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSize {
  OneSecond,
  FiveSeconds,
  FifteenSeconds,
  ThirtySeconds,
  OneMinute,
  TwoMinutes,
  ThreeMinutes,
  FiveMinutes,
  FifteenMinutes,
  ThirtyMinutes,
  OneHour,
  FourHours,
  OneDay,
  OneWeek,
  OneMonth,
}

impl BarSize {
  const NAMES: [(BarSize, &'static str); 15] = [
    (BarSize::OneSecond, "1 secs"),
    (BarSize::FiveSeconds, "5 secs"),
    (BarSize::FifteenSeconds, "15 secs"),
    (BarSize::ThirtySeconds, "30 secs"),
    (BarSize::OneMinute, "1 min"),
    (BarSize::TwoMinutes, "2 mins"),
    (BarSize::ThreeMinutes, "3 mins"),
    (BarSize::FiveMinutes, "5 mins"),
    (BarSize::FifteenMinutes, "15 mins"),
    (BarSize::ThirtyMinutes, "30 mins"),
    (BarSize::OneHour, "1 hour"),
    (BarSize::FourHours, "4 hours"),
    (BarSize::OneDay, "1 day"),
    (BarSize::OneWeek, "1 week"),
    (BarSize::OneMonth, "1 month"),
  ];
}

impl fmt::Display for BarSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = BarSize::NAMES.iter().find(|(b, _)| b == self).map(|(_, n)| *n).unwrap_or("?");
    write!(f, "{}", name)
  }
}

impl FromStr for BarSize {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BarSize::NAMES.iter()
      .find(|(_, n)| n.eq_ignore_ascii_case(s.trim()))
      .map(|(b, _)| *b)
      .ok_or_else(|| format!("Unknown bar size: {}", s))
  }
}

/// Data type for historical data requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WhatToShow {
  #[default]
  Trades,
  Midpoint,
  Bid,
  Ask,
  BidAsk,
  AdjustedLast,
  HistoricalVolatility,
  ImpliedVolatility,
}

impl fmt::Display for WhatToShow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WhatToShow::Trades => "TRADES",
      WhatToShow::Midpoint => "MIDPOINT",
      WhatToShow::Bid => "BID",
      WhatToShow::Ask => "ASK",
      WhatToShow::BidAsk => "BID_ASK",
      WhatToShow::AdjustedLast => "ADJUSTED_LAST",
      WhatToShow::HistoricalVolatility => "HISTORICAL_VOLATILITY",
      WhatToShow::ImpliedVolatility => "OPTION_IMPLIED_VOLATILITY",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for WhatToShow {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "TRADES" => Ok(WhatToShow::Trades),
      "MIDPOINT" => Ok(WhatToShow::Midpoint),
      "BID" => Ok(WhatToShow::Bid),
      "ASK" => Ok(WhatToShow::Ask),
      "BID_ASK" => Ok(WhatToShow::BidAsk),
      "ADJUSTED_LAST" => Ok(WhatToShow::AdjustedLast),
      "HISTORICAL_VOLATILITY" => Ok(WhatToShow::HistoricalVolatility),
      "OPTION_IMPLIED_VOLATILITY" => Ok(WhatToShow::ImpliedVolatility),
      _ => Err(format!("Unknown what-to-show: {}", s)),
    }
  }
}

/// Free-form `tag=value` option passed through to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValue {
  pub tag: String,
  pub value: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_bar_size_round_trip_names() {
    assert_eq!("1 day".parse::<BarSize>(), Ok(BarSize::OneDay));
    assert_eq!("5 MINS".parse::<BarSize>(), Ok(BarSize::FiveMinutes));
    assert_eq!(BarSize::ThirtySeconds.to_string(), "30 secs");
    assert!("7 mins".parse::<BarSize>().is_err());
  }

  #[test]
  fn test_contract_display() {
    assert_eq!(Contract::stock("AAPL").to_string(), "AAPL STK SMART USD");
    assert_eq!(Contract::future("ES", "202612", "CME").to_string(), "ES FUT CME USD 202612");
  }
}
