use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;

use crate::{
    errors::Error, policy::normalize_name, template::TicketRenderer, tracker::AuthMechanism,
    tracker::Credentials, Result,
};

/// Used when the configuration does not provide `ticket_template`.
pub const DEFAULT_TICKET_TEMPLATE: &str =
    "[#{{ id }}]({{ _url }}) {{ summary }} ({{ status }}, owner: {{ owner }})";

/// Typed configuration loaded from the YAML file given on the command line.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// URL of the Mattermost server, eg. `https://chat.example.com`.
    #[serde(default)]
    pub server: String,

    /// Login of the bot account on the Mattermost server.
    #[serde(flatten)]
    pub credentials: Credentials,

    /// Team the bot belongs to on the Mattermost server.
    #[serde(default)]
    pub team: String,

    /// Jinja template used to format one ticket. The ticket fields are the
    /// template context.
    #[serde(default = "default_ticket_template")]
    pub ticket_template: String,

    #[serde(default)]
    pub tracs: BTreeMap<String, TracConfig>,

    /// Per-channel configuration, keyed by channel name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

/// A configured Trac server, queried for ticket information.
#[derive(Clone, Debug, Deserialize)]
pub struct TracConfig {
    #[serde(default)]
    pub url: String,

    #[serde(flatten)]
    pub credentials: Credentials,

    /// Accept HTTPS certificates from unknown authorities.
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub auth_type: AuthMechanism,
}

/// Which Trac instances a channel may query.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub trac_instances: Vec<String>,

    /// Instance queried for a bare `#123` reference.
    #[serde(default)]
    pub default_trac_instance: Option<String>,
}

impl ChannelConfig {
    pub fn default_instance(&self) -> Option<&str> {
        self.default_trac_instance
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Case-insensitive membership in `trac_instances`.
    pub fn authorizes(&self, instance: &str) -> bool {
        let needle = normalize_name(instance);
        self.trac_instances
            .iter()
            .any(|name| normalize_name(name) == needle)
    }
}

fn default_ticket_template() -> String {
    DEFAULT_TICKET_TEMPLATE.to_string()
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Error while opening {}: {e}", path.display()))
        })?;

        Self::from_yaml_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Error while loading configuration from {}: {e}",
                path.display()
            ))
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that the configuration is complete and self-consistent.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(config_err("Server field should not be empty"));
        }
        if self.credentials.username.trim().is_empty() {
            return Err(config_err("Username field should not be empty"));
        }
        if self.team.trim().is_empty() {
            return Err(config_err("Team field should not be empty"));
        }

        let mut declared: BTreeMap<String, &str> = BTreeMap::new();
        for (name, trac) in &self.tracs {
            if trac.url.trim().is_empty() {
                return Err(config_err(format!("URL missing for Trac instance {name}")));
            }
            if trac.credentials.username.is_empty() {
                return Err(config_err(format!(
                    "Username missing for Trac instance {name}"
                )));
            }
            if trac.credentials.password.is_empty() {
                return Err(config_err(format!(
                    "Password missing for Trac instance {name}"
                )));
            }
            if let Some(other) = declared.insert(normalize_name(name), name) {
                return Err(config_err(format!(
                    "Conflicting Trac name for {name} (already declared as {other})"
                )));
            }
        }

        for (name, channel) in &self.channels {
            if channel.trac_instances.is_empty() {
                return Err(config_err(format!(
                    "No Trac instances defined for channel {name}"
                )));
            }

            for trac in &channel.trac_instances {
                if !declared.contains_key(&normalize_name(trac)) {
                    return Err(config_err(format!(
                        "Trac instance {trac} referred from channel {name} does not exist"
                    )));
                }
            }

            if let Some(default) = channel.default_instance() {
                if !declared.contains_key(&normalize_name(default)) {
                    return Err(config_err(format!(
                        "Default Trac instance {default} referred from channel {name} does not exist"
                    )));
                }
                if !channel.authorizes(default) {
                    return Err(config_err(format!(
                        "Default Trac instance {default} of channel {name} is not listed in its trac_instances"
                    )));
                }
            }
        }

        TicketRenderer::new(&self.ticket_template).map_err(|e| {
            config_err(format!(
                "Error while compiling ticket formatting template: {e}"
            ))
        })?;

        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}
