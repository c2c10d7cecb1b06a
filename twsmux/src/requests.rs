// twsmux/src/requests.rs

//! Request kinds and their parameters.
//!
//! A [`RequestKind`] ties together everything a manager needs to know about
//! one kind of request: its id band, how to issue and stop it on the
//! [`Connection`], which inbound payload carries its messages, and which
//! error codes end it.

use crate::base::{MuxError, RequestId};
use crate::bus::Payload;
use crate::category::RequestCategory;
use crate::conn::Connection;
use crate::contract::{Bar, BarSize, Contract, ContractDetails, TagValue, WhatToShow};
use crate::data::{TickByTickData, TickByTickRequestType};
use crate::news::{HistoricalNews, NewsProvider, NewsTick};

use chrono::{DateTime, Utc};
use log::warn;

/// Static description of one kind of request.
pub trait RequestKind: Send + Sync + 'static {
  type Params: Send + Sync;
  type Message: Clone + Send + 'static;

  const CATEGORY: RequestCategory;
  const NAME: &'static str;
  /// The first message is also the last; the service sends no end marker.
  const SINGLE_SHOT: bool = false;

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &Self::Params) -> Result<(), MuxError>;

  /// Outbound stop. Only kinds that hold something open on the service
  /// override this.
  fn cancel(_conn: &dyn Connection, _req_id: RequestId) -> Result<(), MuxError> {
    Ok(())
  }

  fn extract(payload: &Payload) -> Option<Self::Message>;

  /// Whether an error tagged with a request of this kind ends it.
  fn is_terminal_error(code: i32) -> bool {
    is_terminal_by_default(code)
  }
}

/// Market data notices that arrive tagged but leave the stream running:
/// partial subscription (10090), delayed data displayed (10167), competing
/// live session (10197).
pub const MARKET_DATA_NOTICE_CODES: [i32; 3] = [10090, 10167, 10197];

/// System notices (1xxx), warnings (2xxx) and market data notices leave a
/// request running; everything else ends it.
pub fn is_terminal_by_default(code: i32) -> bool {
  !(1000..3000).contains(&code) && !MARKET_DATA_NOTICE_CODES.contains(&code)
}

// --- Parameters ---

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDataParams {
  pub contract: Contract,
  /// `None` means "now".
  pub end_date_time: Option<DateTime<Utc>>,
  /// Service duration string, e.g. `"5 D"`, `"1 Y"`.
  pub duration: String,
  pub bar_size: BarSize,
  pub what_to_show: WhatToShow,
  pub use_rth: bool,
  pub keep_up_to_date: bool,
  pub options: Vec<TagValue>,
}

impl HistoricalDataParams {
  pub fn new(contract: Contract, duration: &str, bar_size: BarSize) -> Self {
    HistoricalDataParams {
      contract,
      end_date_time: None,
      duration: duration.to_string(),
      bar_size,
      what_to_show: WhatToShow::Trades,
      use_rth: true,
      keep_up_to_date: false,
      options: Vec::new(),
    }
  }

  /// Parameters covering `[start, end)`. The service only takes an end time
  /// and a duration, so the range is rounded up to whole days (or years
  /// beyond 365 days).
  pub fn for_range(contract: Contract, start: DateTime<Utc>, end: DateTime<Utc>, bar_size: BarSize) -> Result<Self, MuxError> {
    if end <= start {
      return Err(MuxError::InvalidParameter("start must be before end".to_string()));
    }
    let span = end.signed_duration_since(start);
    let mut days = span.num_days();
    if span > chrono::Duration::days(days) {
      days += 1;
    }
    let duration = if days > 365 {
      let years = (days + 364) / 365;
      warn!("Range of {} days requested, asking for {} Y", days, years);
      format!("{} Y", years)
    } else {
      format!("{} D", days.max(1))
    };
    Ok(HistoricalDataParams { end_date_time: Some(end), ..Self::new(contract, &duration, bar_size) })
  }

  pub fn with_end(mut self, end: DateTime<Utc>) -> Self { self.end_date_time = Some(end); self }
  pub fn with_what_to_show(mut self, w: WhatToShow) -> Self { self.what_to_show = w; self }
  pub fn with_use_rth(mut self, use_rth: bool) -> Self { self.use_rth = use_rth; self }
  pub fn with_keep_up_to_date(mut self, keep: bool) -> Self { self.keep_up_to_date = keep; self }
  pub fn with_options(mut self, options: &[TagValue]) -> Self { self.options = options.to_vec(); self }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealTimeBarsParams {
  pub contract: Contract,
  pub what_to_show: WhatToShow,
  pub use_rth: bool,
  pub options: Vec<TagValue>,
}

impl RealTimeBarsParams {
  pub fn new(contract: Contract, what_to_show: WhatToShow) -> Self {
    RealTimeBarsParams { contract, what_to_show, use_rth: true, options: Vec::new() }
  }
  pub fn with_use_rth(mut self, use_rth: bool) -> Self { self.use_rth = use_rth; self }
  pub fn with_options(mut self, options: &[TagValue]) -> Self { self.options = options.to_vec(); self }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalNewsParams {
  pub con_id: i32,
  /// Comma separated provider codes, e.g. `"BRFG,DJNL"`.
  pub provider_codes: String,
  pub start_date_time: Option<DateTime<Utc>>,
  pub end_date_time: Option<DateTime<Utc>>,
  pub total_results: i32,
  pub options: Vec<TagValue>,
}

impl HistoricalNewsParams {
  pub fn new(con_id: i32, provider_codes: &str, total_results: i32) -> Self {
    HistoricalNewsParams {
      con_id,
      provider_codes: provider_codes.to_string(),
      start_date_time: None,
      end_date_time: None,
      total_results,
      options: Vec::new(),
    }
  }
  pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    self.start_date_time = Some(start);
    self.end_date_time = Some(end);
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickNewsParams {
  pub contract: Contract,
  /// Provider codes to filter on; empty means all entitled providers.
  pub provider_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickByTickParams {
  pub contract: Contract,
  pub tick_type: TickByTickRequestType,
  /// Historical ticks to replay first; 0 for live only.
  pub number_of_ticks: i32,
  pub ignore_size: bool,
}

impl TickByTickParams {
  pub fn new(contract: Contract, tick_type: TickByTickRequestType) -> Self {
    TickByTickParams { contract, tick_type, number_of_ticks: 0, ignore_size: false }
  }
}

// --- Kinds ---

/// Contract lookup. One reply per matching contract, then an end marker.
pub struct ContractDetailsKind;

impl RequestKind for ContractDetailsKind {
  type Params = Contract;
  type Message = ContractDetails;
  const CATEGORY: RequestCategory = RequestCategory::ContractDetails;
  const NAME: &'static str = "contract details";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &Contract) -> Result<(), MuxError> {
    conn.request_contract_details(req_id, params)
  }

  fn extract(payload: &Payload) -> Option<ContractDetails> {
    match payload { Payload::ContractDetails(d) => Some(d.clone()), _ => None }
  }
}

/// List of entitled news providers. A single reply, no end marker.
pub struct NewsProvidersKind;

impl RequestKind for NewsProvidersKind {
  type Params = ();
  type Message = Vec<NewsProvider>;
  const CATEGORY: RequestCategory = RequestCategory::NewsProviders;
  const NAME: &'static str = "news providers";
  const SINGLE_SHOT: bool = true;

  fn issue(conn: &dyn Connection, req_id: RequestId, _params: &()) -> Result<(), MuxError> {
    conn.request_news_providers(req_id)
  }

  fn extract(payload: &Payload) -> Option<Vec<NewsProvider>> {
    match payload { Payload::NewsProviders(p) => Some(p.clone()), _ => None }
  }
}

/// Historical bars, ended by an end marker (unless kept up to date).
pub struct HistoricalDataKind;

impl RequestKind for HistoricalDataKind {
  type Params = HistoricalDataParams;
  type Message = Bar;
  const CATEGORY: RequestCategory = RequestCategory::HistoricalData;
  const NAME: &'static str = "historical data";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &HistoricalDataParams) -> Result<(), MuxError> {
    conn.request_historical_data(req_id, params)
  }

  fn cancel(conn: &dyn Connection, req_id: RequestId) -> Result<(), MuxError> {
    conn.cancel_historical_data(req_id)
  }

  fn extract(payload: &Payload) -> Option<Bar> {
    match payload { Payload::HistoricalBar(b) => Some(b.clone()), _ => None }
  }
}

/// Streaming 5-second bars. Runs until cancelled.
pub struct RealTimeBarsKind;

impl RequestKind for RealTimeBarsKind {
  type Params = RealTimeBarsParams;
  type Message = Bar;
  const CATEGORY: RequestCategory = RequestCategory::RealTimeBars;
  const NAME: &'static str = "real-time bars";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &RealTimeBarsParams) -> Result<(), MuxError> {
    conn.request_real_time_bars(req_id, params)
  }

  fn cancel(conn: &dyn Connection, req_id: RequestId) -> Result<(), MuxError> {
    conn.cancel_real_time_bars(req_id)
  }

  fn extract(payload: &Payload) -> Option<Bar> {
    match payload { Payload::RealTimeBar(b) => Some(b.clone()), _ => None }
  }
}

/// Historical headlines, ended by an end marker. The service has no cancel
/// message for these, so cancelling is local only.
pub struct HistoricalNewsKind;

impl RequestKind for HistoricalNewsKind {
  type Params = HistoricalNewsParams;
  type Message = HistoricalNews;
  const CATEGORY: RequestCategory = RequestCategory::HistoricalNews;
  const NAME: &'static str = "historical news";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &HistoricalNewsParams) -> Result<(), MuxError> {
    conn.request_historical_news(req_id, params)
  }

  fn extract(payload: &Payload) -> Option<HistoricalNews> {
    match payload { Payload::HistoricalNews(n) => Some(n.clone()), _ => None }
  }
}

/// Live news ticks for one contract. Runs until cancelled.
pub struct TickNewsKind;

impl RequestKind for TickNewsKind {
  type Params = TickNewsParams;
  type Message = NewsTick;
  const CATEGORY: RequestCategory = RequestCategory::TickNews;
  const NAME: &'static str = "tick news";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &TickNewsParams) -> Result<(), MuxError> {
    conn.request_tick_news(req_id, params)
  }

  fn cancel(conn: &dyn Connection, req_id: RequestId) -> Result<(), MuxError> {
    conn.cancel_tick_news(req_id)
  }

  fn extract(payload: &Payload) -> Option<NewsTick> {
    match payload { Payload::NewsTick(n) => Some(n.clone()), _ => None }
  }
}

/// Live tick-by-tick data. Runs until cancelled.
pub struct TicksKind;

impl RequestKind for TicksKind {
  type Params = TickByTickParams;
  type Message = TickByTickData;
  const CATEGORY: RequestCategory = RequestCategory::Ticks;
  const NAME: &'static str = "tick-by-tick";

  fn issue(conn: &dyn Connection, req_id: RequestId, params: &TickByTickParams) -> Result<(), MuxError> {
    conn.request_tick_by_tick(req_id, params)
  }

  fn cancel(conn: &dyn Connection, req_id: RequestId) -> Result<(), MuxError> {
    conn.cancel_tick_by_tick(req_id)
  }

  fn extract(payload: &Payload) -> Option<TickByTickData> {
    match payload { Payload::Tick(t) => Some(t.clone()), _ => None }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_default_terminal_policy() {
    assert!(is_terminal_by_default(162)); // HMDS query returned no data
    assert!(is_terminal_by_default(200)); // No security definition
    assert!(!is_terminal_by_default(10167)); // Displaying delayed market data
    assert!(is_terminal_by_default(10168)); // Delayed data not enabled
    assert!(!is_terminal_by_default(2176)); // Fractional share warning
    assert!(!is_terminal_by_default(1102));
  }

  #[test]
  fn test_for_range_durations() {
    let c = Contract::stock("SPY");
    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let p = HistoricalDataParams::for_range(c.clone(), start, start + chrono::Duration::days(10), BarSize::OneDay).unwrap();
    assert_eq!(p.duration, "10 D");
    assert_eq!(p.end_date_time, Some(start + chrono::Duration::days(10)));

    let p = HistoricalDataParams::for_range(c.clone(), start, start + chrono::Duration::hours(3), BarSize::OneMinute).unwrap();
    assert_eq!(p.duration, "1 D");

    let p = HistoricalDataParams::for_range(c.clone(), start, start + chrono::Duration::days(400), BarSize::OneDay).unwrap();
    assert_eq!(p.duration, "2 Y");

    assert!(HistoricalDataParams::for_range(c, start, start, BarSize::OneDay).is_err());
  }

  #[test]
  fn test_extract_matches_only_own_payload() {
    let bar = Bar {
      time: Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap(),
      open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10, wap: 1.2, count: 3,
    };
    assert_eq!(HistoricalDataKind::extract(&Payload::HistoricalBar(bar.clone())), Some(bar.clone()));
    assert_eq!(RealTimeBarsKind::extract(&Payload::HistoricalBar(bar.clone())), None);
    assert_eq!(RealTimeBarsKind::extract(&Payload::RealTimeBar(bar.clone())), Some(bar));
  }
}
