// twsmux/src/csv_out.rs

//! Bar CSV output.
//!
//! Rows are `date,open,high,low,close,volume`. Before writing, outlier prices
//! are pulled back into range (see [`sanitize_bars`]); the close is trusted.

use crate::base::MuxError;
use crate::contract::Bar;

use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str = "date,open,high,low,close,volume";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Clamp outlier prices, in order:
///
/// - high above `1.5 * close` or below close becomes close;
/// - low below `0.5 * close` or above close becomes close;
/// - open outside the sanitized `[low, high]` becomes the previous bar's
///   close, or the sanitized low for the first bar.
pub fn sanitize_bars(bars: &[Bar]) -> Vec<Bar> {
  let mut out = Vec::with_capacity(bars.len());
  let mut prev_close: Option<f64> = None;
  for bar in bars {
    let mut b = bar.clone();
    if b.high > 1.5 * b.close || b.high < b.close {
      debug!("{}: high {} out of range, using close {}", b.time, b.high, b.close);
      b.high = b.close;
    }
    if b.low < 0.5 * b.close || b.low > b.close {
      debug!("{}: low {} out of range, using close {}", b.time, b.low, b.close);
      b.low = b.close;
    }
    if b.open < b.low || b.open > b.high {
      let replacement = prev_close.unwrap_or(b.low);
      debug!("{}: open {} out of range, using {}", b.time, b.open, replacement);
      b.open = replacement;
    }
    prev_close = Some(b.close);
    out.push(b);
  }
  out
}

/// Writes sanitized bars as CSV.
pub struct BarCsvWriter<W: Write> {
  out: W,
  date_format: String,
}

impl BarCsvWriter<BufWriter<File>> {
  pub fn create(path: &Path) -> Result<Self, MuxError> {
    let file = File::create(path)
      .map_err(|e| MuxError::Io(format!("Cannot create {}: {}", path.display(), e)))?;
    Ok(BarCsvWriter::new(BufWriter::new(file)))
  }
}

impl<W: Write> BarCsvWriter<W> {
  pub fn new(out: W) -> Self {
    BarCsvWriter { out, date_format: DEFAULT_DATE_FORMAT.to_string() }
  }

  /// `chrono` strftime pattern for the date column.
  pub fn with_date_format(mut self, fmt: &str) -> Self {
    self.date_format = fmt.to_string();
    self
  }

  /// Header plus one row per bar. Returns the number of rows written.
  pub fn write_all(&mut self, bars: &[Bar]) -> Result<usize, MuxError> {
    writeln!(self.out, "{}", CSV_HEADER)?;
    let clean = sanitize_bars(bars);
    for b in &clean {
      writeln!(self.out, "{},{},{},{},{},{}",
               b.time.format(&self.date_format), b.open, b.high, b.low, b.close, b.volume)?;
    }
    self.out.flush()?;
    info!("Wrote {} bars", clean.len());
    Ok(clean.len())
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

/// Write `bars` to `path`.
pub fn write_bars_csv(path: &Path, bars: &[Bar], date_format: &str) -> Result<usize, MuxError> {
  BarCsvWriter::create(path)?.with_date_format(date_format).write_all(bars)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
      time: Utc.with_ymd_and_hms(2026, 6, day, 0, 0, 0).unwrap(),
      open, high, low, close, volume: 1200, wap: close, count: 7,
    }
  }

  #[test]
  fn test_high_spike_clamped_to_close() {
    let out = sanitize_bars(&[bar(1, 100.0, 200.0, 50.0, 100.0)]);
    assert_eq!(out[0].high, 100.0);
    assert_eq!(out[0].low, 50.0);
    assert_eq!(out[0].open, 100.0);
  }

  #[test]
  fn test_inverted_high_low() {
    let out = sanitize_bars(&[bar(1, 95.0, 90.0, 100.0, 95.0)]);
    assert_eq!(out[0].high, 95.0);
    assert_eq!(out[0].low, 95.0);
  }

  #[test]
  fn test_open_falls_back() {
    let bars = [
      bar(1, 10.0, 101.0, 99.0, 100.0), // first bar: sanitized low
      bar(2, 500.0, 102.0, 98.0, 101.0), // previous close
    ];
    let out = sanitize_bars(&bars);
    assert_eq!(out[0].open, 99.0);
    assert_eq!(out[1].open, 100.0);
  }

  #[test]
  fn test_write_rows() {
    let mut w = BarCsvWriter::new(Vec::new()).with_date_format("%Y-%m-%d");
    let n = w.write_all(&[bar(1, 100.0, 200.0, 50.0, 100.0), bar(2, 100.5, 101.0, 99.5, 100.25)]).unwrap();
    assert_eq!(n, 2);
    let text = String::from_utf8(w.into_inner()).unwrap();
    assert_eq!(text, "date,open,high,low,close,volume\n\
                      2026-06-01,100,100,50,100,1200\n\
                      2026-06-02,100.5,101,99.5,100.25,1200\n");
  }

  #[test]
  fn test_write_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bars.csv");
    write_bars_csv(&path, &[bar(3, 1.0, 1.2, 0.9, 1.1)], DEFAULT_DATE_FORMAT).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(CSV_HEADER));
    assert!(text.contains("2026-06-03 00:00:00,1,1.2,0.9,1.1,1200"));
  }
}
