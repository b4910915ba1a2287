//! Integration tests for mkr-bot.
//!
//! These tests drive the manager against the paper exchange and the
//! in-memory config store:
//! - step cycles and the no-overlap rule
//! - risk trips, halts and resets
//! - config sync with store failures

pub mod common;
