use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    config::ChannelConfig,
    domain::{ChannelId, Post, UserId},
    errors::Error,
    policy::{self, PolicyError, TrackerRegistry},
    ports::ChatPlatform,
    references::{extract_references, ReferenceMatch},
    template::TicketRenderer,
    tracker::{Ticket, TrackerError},
    Result,
};

/// Prefix of a reply line reporting a failed reference.
pub const ERROR_MARKER: &str = ":x:";

/// Why one reference produced an error line instead of a ticket.
#[derive(Debug, thiserror::Error)]
enum ReferenceError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Error while retrieving ticket {instance}#{ticket}: {source}")]
    Fetch {
        instance: String,
        ticket: String,
        #[source]
        source: TrackerError,
    },
}

struct WatchedChannel {
    name: String,
    policy: ChannelConfig,
}

/// Turns a channel post into one reply covering every ticket it mentions.
pub struct MessageRouter {
    registry: Arc<TrackerRegistry>,
    renderer: TicketRenderer,
    bot_user: UserId,
    channels: HashMap<ChannelId, WatchedChannel>,
}

impl MessageRouter {
    pub fn new(registry: Arc<TrackerRegistry>, renderer: TicketRenderer, bot_user: UserId) -> Self {
        Self {
            registry,
            renderer,
            bot_user,
            channels: HashMap::new(),
        }
    }

    /// Start answering in `id` under the given tracker policy.
    pub fn watch_channel(&mut self, id: ChannelId, name: impl Into<String>, policy: ChannelConfig) {
        let name = name.into();
        info!(channel = %name, id = %id, "watching channel");
        self.channels.insert(id, WatchedChannel { name, policy });
    }

    pub fn watches(&self, channel: &ChannelId) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn watches_name(&self, name: &str) -> bool {
        self.channels.values().any(|c| c.name == name)
    }

    pub fn bot_user(&self) -> &UserId {
        &self.bot_user
    }

    /// Build the reply for `post`, or `None` when the bot has nothing to say.
    ///
    /// Policy and fetch failures become `:x:` lines; a template failure aborts
    /// the whole reply.
    pub async fn build_reply(&self, post: &Post) -> Result<Option<String>> {
        if post.user_id == self.bot_user {
            return Ok(None);
        }
        let Some(channel) = self.channels.get(&post.channel_id) else {
            return Ok(None);
        };

        let matches = extract_references(&post.message);
        if matches.is_empty() {
            return Ok(None);
        }
        debug!(channel = %channel.name, references = matches.len(), "ticket references found");

        let mut lines = Vec::with_capacity(matches.len());
        for reference in &matches {
            let line = match self.lookup(&channel.policy, reference).await {
                Ok(ticket) => self.renderer.render(&ticket)?,
                Err(e) => {
                    warn!(
                        channel = %channel.name,
                        tracker = reference.instance.as_deref().unwrap_or(""),
                        ticket = %reference.number,
                        error = %e,
                        "ticket reference failed"
                    );
                    format!("{ERROR_MARKER} {e}")
                }
            };
            lines.push(line);
        }

        Ok(Some(lines.join("\n")))
    }

    /// Answer `post` in its channel. Returns whether a reply was sent.
    pub async fn handle_post(&self, post: &Post, platform: &dyn ChatPlatform) -> Result<bool> {
        let Some(reply) = self.build_reply(post).await? else {
            return Ok(false);
        };

        platform
            .create_post(&post.channel_id, &reply)
            .await
            .map_err(|e| {
                Error::External(format!(
                    "Error while sending message to channel {}: {e}",
                    post.channel_id
                ))
            })?;
        Ok(true)
    }

    async fn lookup(
        &self,
        channel: &ChannelConfig,
        reference: &ReferenceMatch,
    ) -> std::result::Result<Ticket, ReferenceError> {
        let resolved = policy::resolve(
            channel,
            &self.registry,
            reference.instance.as_deref(),
            &reference.number,
        )?;

        resolved
            .source
            .fetch_ticket(&reference.number)
            .await
            .map_err(|source| ReferenceError::Fetch {
                instance: resolved.instance,
                ticket: reference.number.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ports::{HttpReply, TrackerTransport},
        test_support::{post, ticket, FakePlatform, StaticTickets, BOT_ID},
        tracker::{AuthMechanism, Credentials, TrackerSession},
    };
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    /// Serves a fixed CSV export for any ticket page.
    struct CsvExport(&'static str);

    #[async_trait]
    impl TrackerTransport for CsvExport {
        async fn get(
            &self,
            _url: &str,
            _basic_auth: Option<&Credentials>,
        ) -> std::result::Result<HttpReply, TrackerError> {
            Ok(HttpReply::new(200, self.0))
        }

        async fn post_form(
            &self,
            _url: &str,
            _fields: &[(&str, &str)],
        ) -> std::result::Result<HttpReply, TrackerError> {
            Ok(HttpReply::new(303, ""))
        }
    }

    fn channel(instances: &[&str], default: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            trac_instances: instances.iter().map(|s| s.to_string()).collect(),
            default_trac_instance: default.map(str::to_string),
        }
    }

    fn router(registry: TrackerRegistry, template: &str, policy: ChannelConfig) -> MessageRouter {
        let mut r = MessageRouter::new(
            Arc::new(registry),
            TicketRenderer::new(template).unwrap(),
            UserId(BOT_ID.to_string()),
        );
        r.watch_channel(ChannelId("ch-town".to_string()), "town-square", policy);
        r
    }

    fn foo_bar_registry() -> TrackerRegistry {
        let mut reg = TrackerRegistry::new();
        reg.insert(
            "foo",
            Arc::new(StaticTickets::default().with("5", ticket("5", "Five", "https://t/foo/ticket/5"))),
        )
        .unwrap();
        reg.insert(
            "bar",
            Arc::new(StaticTickets::default().with("6", ticket("6", "Six", "https://t/bar/ticket/6"))),
        )
        .unwrap();
        reg
    }

    #[tokio::test]
    async fn renders_ticket_from_default_tracker() {
        let session = TrackerSession::new(
            "bug",
            "https://trac.example.com/bug/",
            AuthMechanism::Basic,
            Box::new(CsvExport("id,summary,status\r\n33,Crash on save,new\r\n")),
        );
        let mut reg = TrackerRegistry::new();
        reg.insert("bug", Arc::new(session)).unwrap();

        let r = router(
            reg,
            "#{{ id }} {{ summary }} ({{ status }}) {{ _url }}",
            channel(&["bug"], Some("bug")),
        );
        let reply = r
            .build_reply(&post("ch-town", "alice", "see BUG#33"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            reply,
            "#33 Crash on save (new) https://trac.example.com/bug/ticket/33"
        );
        assert!(reply.ends_with("/ticket/33"));
    }

    #[tokio::test]
    async fn denied_reference_becomes_error_line() {
        let r = router(foo_bar_registry(), "{{ id }}: {{ summary }}", channel(&["FOO"], None));
        let platform = FakePlatform::default();

        let sent = r
            .handle_post(&post("ch-town", "alice", "FOO#5 and BAR#6"), &platform)
            .await
            .unwrap();
        assert!(sent);

        let posts = platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, ChannelId("ch-town".to_string()));

        let lines: Vec<&str> = posts[0].1.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "5: Five");
        assert!(lines[1].starts_with(ERROR_MARKER));
        assert!(lines[1].contains("not configured for this channel"), "{}", lines[1]);
    }

    #[tokio::test]
    async fn message_without_references_gets_no_reply() {
        let r = router(foo_bar_registry(), "{{ id }}", channel(&["foo"], Some("foo")));
        let platform = FakePlatform::default();

        let sent = r
            .handle_post(&post("ch-town", "alice", "no tickets here, only # and 5"), &platform)
            .await
            .unwrap();
        assert!(!sent);
        assert!(platform.posts().is_empty());
    }

    #[tokio::test]
    async fn ignores_own_posts_and_unwatched_channels() {
        let tickets = Arc::new(StaticTickets::default().with("5", ticket("5", "Five", "u")));
        let mut reg = TrackerRegistry::new();
        reg.insert("foo", tickets.clone()).unwrap();
        let r = router(reg, "{{ id }}", channel(&["foo"], Some("foo")));

        let own = r.build_reply(&post("ch-town", BOT_ID, "#5")).await.unwrap();
        assert!(own.is_none());
        let elsewhere = r.build_reply(&post("ch-random", "alice", "#5")).await.unwrap();
        assert!(elsewhere.is_none());
        assert_eq!(tickets.calls(), 0);
    }

    #[tokio::test]
    async fn fetch_failures_are_reported_with_context() {
        let r = router(foo_bar_registry(), "{{ id }}", channel(&["foo"], Some("foo")));
        let reply = r
            .build_reply(&post("ch-town", "alice", "#404 #5 #5"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            reply,
            ":x: Error while retrieving ticket foo#404: Unexpected HTTP status: 404\n5\n5"
        );
    }

    #[tokio::test]
    async fn bare_reference_without_default_is_reported() {
        let r = router(foo_bar_registry(), "{{ id }}", channel(&["foo"], None));
        let reply = r
            .build_reply(&post("ch-town", "alice", "#5 ghost#1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            reply,
            ":x: Missing Trac ID for ticket #5\n:x: Trac ID ghost not configured for this channel"
        );
    }

    #[tokio::test]
    async fn template_failure_posts_nothing() {
        let r = router(foo_bar_registry(), "{{ summary + 1 }}", channel(&["foo"], Some("foo")));
        let platform = FakePlatform::default();

        let err = r
            .handle_post(&post("ch-town", "alice", "#5"), &platform)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(_)), "{err:?}");
        assert!(platform.posts().is_empty());
    }

    #[tokio::test]
    async fn send_failures_name_the_channel() {
        let r = router(foo_bar_registry(), "{{ id }}", channel(&["foo"], Some("foo")));
        let platform = FakePlatform::default();
        platform.fail_posts.store(true, Ordering::SeqCst);

        let err = r
            .handle_post(&post("ch-town", "alice", "#5"), &platform)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ch-town"), "{err}");
    }

    #[test]
    fn tracks_watched_channels() {
        let r = router(TrackerRegistry::new(), "{{ id }}", channel(&["foo"], None));
        assert!(r.watches(&ChannelId("ch-town".to_string())));
        assert!(!r.watches(&ChannelId("ch-random".to_string())));
        assert!(r.watches_name("town-square"));
        assert_eq!(r.bot_user(), &UserId(BOT_ID.to_string()));
    }
}
