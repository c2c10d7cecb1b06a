// twsmux/src/lib.rs
// Main entry point for the request multiplexer

//! # twsmux
//!
//! Request multiplexing and stream correlation over a single TWS style
//! connection:
//!
//! - request ids partitioned into one numeric band per category
//! - serialized inbound dispatch to per-category managers
//! - one [`RequestChannel`](channel::RequestChannel) per request with
//!   completion, cancellation and error signals
//! - tagged errors routed to their request, status notices and connection
//!   faults to a diagnostic sink
//!
//! The wire protocol is not part of this crate: supply a
//! [`Connection`](conn::Connection) to [`MuxClient::connect_with`].

mod base;
mod data;
mod news;
pub mod bus;
pub mod category;
pub mod channel;
pub mod client;
pub mod config;
pub mod conn;
pub mod conn_replay;
pub mod contract;
pub mod csv_out;
pub mod error_correlator;
pub mod id_alloc;
pub mod multi_slot;
pub mod requests;
pub mod single_slot;

pub use base::{MuxError, RequestId};
pub use client::MuxClient;
pub use data::{TickAttribBidAsk, TickAttribLast, TickByTickData, TickByTickRequestType};
pub use news::{HistoricalNews, NewsProvider, NewsTick};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
