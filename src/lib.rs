//! Sends one Web Push notification to every browser subscription stored in
//! a MongoDB collection and reports the outcome per subscription.

pub mod adapters;
pub mod config;
pub mod ports;
pub mod push;
pub mod types;
