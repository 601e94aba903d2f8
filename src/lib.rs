//! Single-instrument directional trading engine.
//!
//! One engine instance trades one symbol on one timeframe and owns only the
//! positions tagged with its magic number.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod daily_risk;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod lifecycle;
pub mod news;
pub mod risk;
pub mod session;
pub mod signal;
pub mod stats;
pub mod status;
pub mod structure;
pub mod telegram;
pub mod types;
pub mod volatility;
