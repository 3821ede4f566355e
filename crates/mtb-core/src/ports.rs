use async_trait::async_trait;

use crate::{
    domain::{Channel, ChannelId, ChatEvent, ChatUser, Team, TeamId},
    tracker::{Credentials, Ticket, TrackerError},
    Result,
};

/// Hexagonal port for the chat server (Mattermost today).
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Health check; returns the server version when it reports one.
    async fn ping(&self) -> Result<Option<String>>;

    async fn login(&self, credentials: &Credentials) -> Result<ChatUser>;

    /// Look up one of the logged-in user's teams by its (URL) name.
    async fn find_team(&self, name: &str) -> Result<Option<Team>>;

    async fn list_channels(&self, team: &TeamId) -> Result<Vec<Channel>>;

    async fn create_post(&self, channel: &ChannelId, message: &str) -> Result<()>;

    async fn connect_events(&self) -> Result<Box<dyn EventStream>>;
}

/// Pull-based chat event stream with explicit close.
#[async_trait]
pub trait EventStream: Send {
    /// Next event, or `None` once the server closed the stream.
    async fn next_event(&mut self) -> Result<Option<ChatEvent>>;

    async fn close(&mut self) -> Result<()>;
}

/// Anything that can produce a ticket by number (a Trac session, or a fake).
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn fetch_ticket(&self, id: &str) -> std::result::Result<Ticket, TrackerError>;
}

/// Status + body of one tracker HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP seam under a tracker session. Implementations own the cookie store.
#[async_trait]
pub trait TrackerTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        basic_auth: Option<&Credentials>,
    ) -> std::result::Result<HttpReply, TrackerError>;

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> std::result::Result<HttpReply, TrackerError>;
}
