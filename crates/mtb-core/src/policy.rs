use std::{collections::HashMap, sync::Arc};

use crate::{config::ChannelConfig, errors::Error, ports::TicketSource, Result};

/// Tracker names are matched case-insensitively everywhere.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Why a reference cannot be served in a channel. Shown to users as-is.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Missing Trac ID for ticket #{ticket}")]
    MissingInstance { ticket: String },

    #[error("Trac ID {instance} not configured for this channel")]
    NotConfigured { instance: String },

    #[error("Unknown Trac ID: {instance}")]
    UnknownInstance { instance: String },
}

/// Immutable map of tracker name → ticket source, built once at startup.
#[derive(Default)]
pub struct TrackerRegistry {
    sources: HashMap<String, Arc<dyn TicketSource>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source; names that only differ by case collide.
    pub fn insert(&mut self, name: &str, source: Arc<dyn TicketSource>) -> Result<()> {
        let key = normalize_name(name);
        if self.sources.contains_key(&key) {
            return Err(Error::Config(format!("Conflicting Trac name for {name}")));
        }
        self.sources.insert(key, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TicketSource>> {
        self.sources.get(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A reference that passed the channel policy.
pub struct Resolved<'a> {
    /// Instance name as typed, or the channel default.
    pub instance: String,
    pub source: &'a Arc<dyn TicketSource>,
}

/// Decide which tracker serves `instance#ticket` in a channel.
pub fn resolve<'a>(
    channel: &ChannelConfig,
    registry: &'a TrackerRegistry,
    instance: Option<&str>,
    ticket: &str,
) -> std::result::Result<Resolved<'a>, PolicyError> {
    let instance = match instance.filter(|s| !s.is_empty()) {
        Some(name) => name,
        None => channel
            .default_instance()
            .ok_or_else(|| PolicyError::MissingInstance {
                ticket: ticket.to_string(),
            })?,
    };

    if !channel.authorizes(instance) {
        return Err(PolicyError::NotConfigured {
            instance: instance.to_string(),
        });
    }

    let source = registry
        .get(instance)
        .ok_or_else(|| PolicyError::UnknownInstance {
            instance: instance.to_string(),
        })?;

    Ok(Resolved {
        instance: instance.to_string(),
        source,
    })
}
