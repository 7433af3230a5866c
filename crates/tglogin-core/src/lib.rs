//! Core domain + application logic for the Telegram login bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram Bot API and the
//! account-auth bridge live behind ports (traits) implemented in adapter crates.

pub mod animator;
pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod login;
pub mod messaging;
pub mod progress;
pub mod session;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
