//! Simulated stock market for a chat-bot coin economy.
//!
//! Each configured stock mirrors a real reference ticker: its history is
//! seeded from real daily closes, then extended hourly by a random walk
//! calibrated on its own log returns. Players trade whole shares with coins
//! at the latest simulated price.

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod market;
pub mod model;
pub mod prices;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod simulator;
pub mod trading;
