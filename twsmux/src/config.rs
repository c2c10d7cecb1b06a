// twsmux/src/config.rs
// Tunables for the multiplexer and the parameters of one bar download.

use crate::base::MuxError;
use crate::contract::{BarSize, Contract, SecType, WhatToShow};
use crate::error_correlator::DEFAULT_BENIGN_CODES;
use crate::requests::HistoricalDataParams;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Multiplexer tunables. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
  /// Deadline used by the blocking helpers on [`crate::MuxClient`].
  pub request_timeout_secs: u64,
  /// Codes treated as benign in addition to the built-in status notices.
  pub extra_benign_codes: Vec<i32>,
}

impl Default for MuxConfig {
  fn default() -> Self {
    MuxConfig { request_timeout_secs: 60, extra_benign_codes: Vec::new() }
  }
}

impl MuxConfig {
  pub fn from_json(s: &str) -> Result<Self, MuxError> {
    serde_json::from_str(s).map_err(|e| MuxError::ConfigurationError(format!("Invalid config: {}", e)))
  }

  pub fn from_file(path: &Path) -> Result<Self, MuxError> {
    let text = std::fs::read_to_string(path)?;
    debug!("Loaded config from {}", path.display());
    Self::from_json(&text)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Built-in benign codes plus the configured extras.
  pub fn benign_codes(&self) -> Vec<i32> {
    let mut codes = DEFAULT_BENIGN_CODES.to_vec();
    for c in &self.extra_benign_codes {
      if !codes.contains(c) {
        codes.push(*c);
      }
    }
    codes
  }
}

/// What to download and where to write it.
///
/// The time window is either an explicit `start`..`end` range or a
/// `duration` looking back from now (e.g. `"30 D"`, `"1 Y"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
  pub symbol: String,
  #[serde(default)]
  pub sec_type: SecType,
  #[serde(default = "default_exchange")]
  pub exchange: String,
  #[serde(default = "default_currency")]
  pub currency: String,
  /// `YYYYMM`, required for futures.
  #[serde(default)]
  pub contract_month: Option<String>,
  #[serde(default)]
  pub start: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end: Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration: Option<String>,
  pub bar_size: BarSize,
  #[serde(default)]
  pub what_to_show: WhatToShow,
  #[serde(default)]
  pub use_rth: bool,
  pub output: PathBuf,
}

fn default_exchange() -> String { "SMART".to_string() }
fn default_currency() -> String { "USD".to_string() }

impl DownloadConfig {
  /// Check that every required field is present and consistent.
  pub fn validate(&self) -> Result<(), MuxError> {
    if self.symbol.trim().is_empty() {
      return Err(MuxError::ConfigurationError("symbol is required".to_string()));
    }
    if self.exchange.trim().is_empty() {
      return Err(MuxError::ConfigurationError("exchange is required".to_string()));
    }
    if self.currency.trim().is_empty() {
      return Err(MuxError::ConfigurationError("currency is required".to_string()));
    }
    if self.sec_type == SecType::Future && self.contract_month.as_deref().map_or(true, |m| m.trim().is_empty()) {
      return Err(MuxError::ConfigurationError(format!("contract month is required for future {}", self.symbol)));
    }
    match (&self.start, &self.end, &self.duration) {
      (Some(start), Some(end), None) => {
        if end <= start {
          return Err(MuxError::ConfigurationError(format!("end {} is not after start {}", end, start)));
        }
      }
      (None, None, Some(d)) if !d.trim().is_empty() => {}
      (None, None, _) => {
        return Err(MuxError::ConfigurationError("either start/end or duration is required".to_string()));
      }
      (Some(_), Some(_), Some(_)) => {
        return Err(MuxError::ConfigurationError("start/end and duration are mutually exclusive".to_string()));
      }
      _ => {
        return Err(MuxError::ConfigurationError("start and end must be given together".to_string()));
      }
    }
    if self.output.as_os_str().is_empty() {
      return Err(MuxError::ConfigurationError("output path is required".to_string()));
    }
    Ok(())
  }

  /// Contract descriptor for the contract details lookup.
  pub fn to_contract(&self) -> Contract {
    Contract {
      symbol: self.symbol.clone(),
      sec_type: self.sec_type,
      last_trade_date_or_contract_month: self.contract_month.clone(),
      exchange: self.exchange.clone(),
      currency: self.currency.clone(),
      ..Default::default()
    }
  }

  /// Historical request for `contract`, normally the one resolved by the
  /// contract details lookup.
  pub fn historical_params(&self, contract: Contract) -> Result<HistoricalDataParams, MuxError> {
    let params = match (self.start, self.end, &self.duration) {
      (Some(start), Some(end), _) => HistoricalDataParams::for_range(contract, start, end, self.bar_size)?,
      (_, _, Some(d)) => HistoricalDataParams::new(contract, d, self.bar_size),
      _ => return Err(MuxError::ConfigurationError("no time window configured".to_string())),
    };
    Ok(params.with_what_to_show(self.what_to_show).with_use_rth(self.use_rth))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn base() -> DownloadConfig {
    DownloadConfig {
      symbol: "ES".to_string(),
      sec_type: SecType::Future,
      exchange: "CME".to_string(),
      currency: "USD".to_string(),
      contract_month: Some("202612".to_string()),
      start: Some(Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()),
      end: Some(Utc.with_ymd_and_hms(2026, 9, 30, 0, 0, 0).unwrap()),
      duration: None,
      bar_size: BarSize::OneDay,
      what_to_show: WhatToShow::Trades,
      use_rth: true,
      output: PathBuf::from("es.csv"),
    }
  }

  #[test]
  fn test_mux_config_defaults() {
    let cfg = MuxConfig::from_json("{}").unwrap();
    assert_eq!(cfg, MuxConfig::default());
    assert_eq!(cfg.request_timeout(), Duration::from_secs(60));

    let cfg = MuxConfig::from_json(r#"{"request_timeout_secs": 5, "extra_benign_codes": [2100, 2104]}"#).unwrap();
    assert_eq!(cfg.request_timeout_secs, 5);
    let codes = cfg.benign_codes();
    assert!(codes.contains(&2100));
    assert_eq!(codes.iter().filter(|c| **c == 2104).count(), 1);

    assert!(matches!(MuxConfig::from_json("{"), Err(MuxError::ConfigurationError(_))));
  }

  #[test]
  fn test_validate() {
    assert_eq!(base().validate(), Ok(()));

    let mut c = base();
    c.symbol = " ".to_string();
    assert!(c.validate().is_err());

    let mut c = base();
    c.contract_month = None;
    assert!(c.validate().is_err());

    let mut c = base();
    c.end = None;
    assert!(c.validate().is_err());

    let mut c = base();
    c.duration = Some("30 D".to_string());
    assert!(c.validate().is_err());

    let mut c = base();
    c.start = None;
    c.end = None;
    assert!(c.validate().is_err());
    c.duration = Some("30 D".to_string());
    assert_eq!(c.validate(), Ok(()));

    let mut c = base();
    std::mem::swap(&mut c.start, &mut c.end);
    assert!(c.validate().is_err());
  }

  #[test]
  fn test_contract_and_params() {
    let cfg = base();
    let contract = cfg.to_contract();
    assert_eq!(contract.sec_type, SecType::Future);
    assert_eq!(contract.last_trade_date_or_contract_month.as_deref(), Some("202612"));

    let p = cfg.historical_params(Contract { con_id: 495512563, ..contract }).unwrap();
    assert_eq!(p.duration, "29 D");
    assert_eq!(p.contract.con_id, 495512563);
    assert!(p.use_rth);
  }

  #[test]
  fn test_deserialize_lookback() {
    let cfg: DownloadConfig = serde_json::from_str(
      r#"{"symbol": "AAPL", "duration": "1 Y", "bar_size": "OneDay", "output": "aapl.csv"}"#).unwrap();
    assert_eq!(cfg.exchange, "SMART");
    assert_eq!(cfg.validate(), Ok(()));
    assert_eq!(cfg.historical_params(cfg.to_contract()).unwrap().end_date_time, None);
  }
}
