//! Core domain + application logic for the Mattermost Trac bot.
//!
//! This crate is intentionally framework-agnostic. Mattermost lives behind the
//! chat ports (traits) implemented in the adapter crate; Trac is reached through
//! the `TrackerTransport` port so the session logic can be driven by fakes.

pub mod bot;
pub mod config;
pub mod domain;
pub mod errors;
pub mod event_loop;
pub mod logging;
pub mod policy;
pub mod ports;
pub mod references;
pub mod router;
pub mod template;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
