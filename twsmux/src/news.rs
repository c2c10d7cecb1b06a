// twsmux/src/news.rs
// News payloads: providers, per-contract news ticks and historical headlines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news source the account is entitled to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsProvider {
  pub code: String,
  pub name: String,
}

/// Headline delivered as a tick on a contract's market data line (generic tick 292).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsTick {
  pub time: DateTime<Utc>,
  pub provider_code: String,
  pub article_id: String,
  pub headline: String,
  pub extra_data: String,
}

/// One headline returned by a historical news query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalNews {
  pub time: DateTime<Utc>,
  pub provider_code: String,
  pub article_id: String,
  pub headline: String,
}
