// hist_dump.rs
// Download historical bars for one contract and write them as CSV.
//
//   hist_dump --replay session.json --symbol AAPL --duration "30 D" --bar-size "1 day" --output aapl.csv
//   hist_dump --replay session.json --download es.json
//
// The session is replayed from a script (see twsmux::conn_replay).

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use twsmux::{
  config::{DownloadConfig, MuxConfig},
  conn::Connection,
  conn_replay::{ReplayConnection, ReplayScript},
  contract::{BarSize, SecType, WhatToShow},
  csv_out::{write_bars_csv, DEFAULT_DATE_FORMAT},
  MuxClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dump historical bars to CSV", long_about = None)]
struct Args {
  /// Replay script standing in for the live session
  #[arg(long)]
  replay: PathBuf,

  /// Multiplexer tunables (JSON)
  #[arg(long)]
  mux_config: Option<PathBuf>,

  /// Download description (JSON). Overrides the per-field flags below.
  #[arg(long)]
  download: Option<PathBuf>,

  #[arg(long)]
  symbol: Option<String>,

  #[arg(long, default_value = "STK")]
  sec_type: SecType,

  #[arg(long, default_value = "SMART")]
  exchange: String,

  #[arg(long, default_value = "USD")]
  currency: String,

  /// YYYYMM, futures only
  #[arg(long)]
  contract_month: Option<String>,

  /// First day, YYYY-MM-DD
  #[arg(long)]
  start: Option<NaiveDate>,

  /// Last day (exclusive), YYYY-MM-DD
  #[arg(long)]
  end: Option<NaiveDate>,

  /// Lookback from now, e.g. "30 D" or "1 Y"
  #[arg(long)]
  duration: Option<String>,

  #[arg(long, default_value = "1 day")]
  bar_size: BarSize,

  #[arg(long, default_value = "TRADES")]
  what_to_show: WhatToShow,

  /// Regular trading hours only
  #[arg(long)]
  rth: bool,

  #[arg(long)]
  output: Option<PathBuf>,
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
  d.and_hms_opt(0, 0, 0).map(|t| t.and_utc()).unwrap_or_default()
}

fn download_config(args: &Args) -> Result<DownloadConfig> {
  if let Some(path) = &args.download {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    return serde_json::from_str(&text).with_context(|| format!("Invalid download config {}", path.display()));
  }
  Ok(DownloadConfig {
    symbol: args.symbol.clone().unwrap_or_default(),
    sec_type: args.sec_type,
    exchange: args.exchange.clone(),
    currency: args.currency.clone(),
    contract_month: args.contract_month.clone(),
    start: args.start.map(midnight),
    end: args.end.map(midnight),
    duration: args.duration.clone(),
    bar_size: args.bar_size,
    what_to_show: args.what_to_show,
    use_rth: args.rth,
    output: args.output.clone().unwrap_or_default(),
  })
}

fn run(args: &Args) -> Result<usize> {
  let download = download_config(args)?;
  download.validate()?;
  let mux_config = match &args.mux_config {
    Some(p) => MuxConfig::from_file(p).with_context(|| format!("Failed to load {}", p.display()))?,
    None => MuxConfig::default(),
  };
  let script = ReplayScript::from_file(&args.replay).context("Failed to load replay script")?;

  let client = MuxClient::connect_with(mux_config, |tx| Ok(ReplayConnection::new(script, tx) as Arc<dyn Connection>))
    .context("Failed to connect")?;

  let contract = download.to_contract();
  let details = client.get_contract_details(&contract)
    .with_context(|| format!("Contract lookup failed for {}", contract))?;
  let resolved = match details.as_slice() {
    [] => bail!("No contract found for {}", contract),
    [only] => only.contract.clone(),
    [first, ..] => {
      warn!("{} contracts match {}, using con_id {}", details.len(), contract, first.contract.con_id);
      first.contract.clone()
    }
  };
  info!("Resolved {} to con_id {}", contract, resolved.con_id);

  let params = download.historical_params(resolved)?;
  let bars = client.get_historical_data(&params).context("Historical data request failed")?;
  if bars.is_empty() {
    return Err(anyhow!("No bars returned for {}", contract));
  }

  let date_format = match download.bar_size {
    BarSize::OneDay | BarSize::OneWeek | BarSize::OneMonth => "%Y-%m-%d",
    _ => DEFAULT_DATE_FORMAT,
  };
  let rows = write_bars_csv(&download.output, &bars, date_format)
    .with_context(|| format!("Failed to write {}", download.output.display()))?;
  client.shutdown()?;
  Ok(rows)
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();
  match run(&args) {
    Ok(rows) => {
      info!("Done: {} rows", rows);
      Ok(())
    }
    Err(e) => {
      error!("hist_dump failed: {:#}", e);
      Err(e)
    }
  }
}
