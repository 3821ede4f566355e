//! Startup sequence: trackers first, then the chat server, then the event loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config,
    errors::Error,
    event_loop,
    policy::TrackerRegistry,
    ports::ChatPlatform,
    router::MessageRouter,
    template::TicketRenderer,
    tracker::{TrackerError, TrackerSession},
    Result,
};

/// Log into every configured Trac instance and register the sessions.
///
/// Any failure is fatal so bad tracker credentials stop the bot before it
/// joins the chat server.
pub async fn connect_trackers(cfg: &Config) -> Result<TrackerRegistry> {
    let mut registry = TrackerRegistry::new();

    for (name, trac) in &cfg.tracs {
        let auth_err = |source: TrackerError| Error::TrackerAuth {
            instance: name.clone(),
            source,
        };
        let session = TrackerSession::from_config(name, trac).map_err(auth_err)?;
        info!(
            tracker = session.name(),
            url = session.base_url(),
            auth = %session.mechanism(),
            "connecting to Trac"
        );
        session
            .authenticate(&trac.credentials.username, &trac.credentials.password)
            .await
            .map_err(auth_err)?;

        registry.insert(name, Arc::new(session))?;
    }

    Ok(registry)
}

/// A logged-in bot, ready to listen on its channels.
pub struct Bot {
    platform: Arc<dyn ChatPlatform>,
    router: MessageRouter,
}

impl Bot {
    /// Ping, log in, find the team and map the configured channels to ids.
    pub async fn start(
        cfg: &Config,
        registry: Arc<TrackerRegistry>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Result<Self> {
        let renderer = TicketRenderer::new(&cfg.ticket_template)?;

        match platform.ping().await? {
            Some(version) => info!(server = %cfg.server, %version, "chat server is up"),
            None => info!(server = %cfg.server, "chat server is up"),
        }

        let me = platform.login(&cfg.credentials).await.map_err(|e| {
            Error::External(format!(
                "Error while logging in as {}: {e}",
                cfg.credentials.username
            ))
        })?;
        info!(user = %me.username, "logged in");

        let team = platform
            .find_team(&cfg.team)
            .await?
            .ok_or_else(|| Error::Config(format!("Found no team named {}", cfg.team)))?;

        let mut router = MessageRouter::new(registry, renderer, me.id);
        for channel in platform.list_channels(&team.id).await? {
            if let Some(policy) = cfg.channels.get(&channel.name) {
                router.watch_channel(channel.id, channel.name, policy.clone());
            }
        }

        if let Some(missing) = cfg.channels.keys().find(|name| !router.watches_name(name)) {
            return Err(Error::Config(format!("No channel {missing} on server")));
        }

        Ok(Self { platform, router })
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Open the event stream and answer posts until shutdown or disconnect.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut stream = self.platform.connect_events().await?;
        event_loop::run(stream.as_mut(), &self.router, self.platform.as_ref(), shutdown).await
    }
}
