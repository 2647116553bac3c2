//! Argus Server
//!
//! Real-time anomaly detection for periodic metrics: a TCP line server
//! scores incoming samples against their own history, matches them with
//! wildcard rules and dispatches alert events to notifiers.

pub mod alerter;
pub mod config;
pub mod detector;
pub mod directory;
pub mod filter;
pub mod health;
pub mod models;
pub mod rules;
pub mod storage;
pub mod util;
