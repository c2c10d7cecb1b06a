// twsmux/src/category.rs
// Fixed numeric bands reserved per request category.

//! Request ids share one integer space on the connection. Each category of
//! request owns a disjoint band of that space, so the owner of any inbound id
//! can be found from the id alone:
//!
//! | Category          | Band                          |
//! |-------------------|-------------------------------|
//! | `ContractDetails` | `10_000_000 ..  20_000_000`   |
//! | `HistoricalData`  | `20_000_000 ..  30_000_000`   |
//! | `RealTimeBars`    | `30_000_000 ..  40_000_000`   |
//! | `TickNews`        | `40_000_000 ..  50_000_000`   |
//! | `HistoricalNews`  | `50_000_000 ..  60_000_000`   |
//! | `NewsProviders`   | `60_000_000 ..  70_000_000`   |
//! | `Ticks`           | `70_000_000 ..  80_000_000`   |
//!
//! Ids below the first band (including TWS' `-1` for connection level notices)
//! belong to no category.

use crate::base::RequestId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Width of every category band.
pub const BAND_WIDTH: RequestId = 10_000_000;

/// Kind of request, each with its own reserved id band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum RequestCategory {
  ContractDetails = 1,
  HistoricalData = 2,
  RealTimeBars = 3,
  TickNews = 4,
  HistoricalNews = 5,
  NewsProviders = 6,
  Ticks = 7,
}

impl RequestCategory {
  pub const ALL: [RequestCategory; 7] = [
    RequestCategory::ContractDetails,
    RequestCategory::HistoricalData,
    RequestCategory::RealTimeBars,
    RequestCategory::TickNews,
    RequestCategory::HistoricalNews,
    RequestCategory::NewsProviders,
    RequestCategory::Ticks,
  ];

  /// First id of this category's band.
  pub fn offset(self) -> RequestId {
    i32::from(self) * BAND_WIDTH
  }

  /// True if `id` falls inside this category's band.
  pub fn contains(self, id: RequestId) -> bool {
    let offset = self.offset();
    id >= offset && id < offset + BAND_WIDTH
  }

  /// Category owning `id`, if any.
  pub fn of(id: RequestId) -> Option<RequestCategory> {
    if id < BAND_WIDTH {
      return None;
    }
    RequestCategory::try_from(id / BAND_WIDTH).ok()
  }

  /// Dense index used for per-category tables.
  pub(crate) fn index(self) -> usize {
    (i32::from(self) - 1) as usize
  }
}

impl fmt::Display for RequestCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      RequestCategory::ContractDetails => "contract_details",
      RequestCategory::HistoricalData => "historical_data",
      RequestCategory::RealTimeBars => "real_time_bars",
      RequestCategory::TickNews => "tick_news",
      RequestCategory::HistoricalNews => "historical_news",
      RequestCategory::NewsProviders => "news_providers",
      RequestCategory::Ticks => "ticks",
    };
    write!(f, "{}", s)
  }
}
