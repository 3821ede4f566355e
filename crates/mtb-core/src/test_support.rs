//! Fakes for the ports, shared by the router, event loop and startup tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{Channel, ChannelId, ChatEvent, ChatUser, Post, PostId, Team, TeamId, UserId},
    errors::Error,
    ports::{ChatPlatform, EventStream, TicketSource},
    tracker::{Credentials, Ticket, TrackerError},
    Result,
};

pub const BOT_ID: &str = "bot-user";

pub fn post(channel: &str, user: &str, message: &str) -> Post {
    Post {
        id: PostId(format!("post-{}", message.len())),
        channel_id: ChannelId(channel.to_string()),
        user_id: UserId(user.to_string()),
        message: message.to_string(),
    }
}

pub fn ticket(id: &str, summary: &str, url: &str) -> Ticket {
    [("id", id), ("summary", summary), ("_url", url)]
        .into_iter()
        .collect()
}

/// Ticket source answering from a fixed table; unknown ids are a 404.
#[derive(Default)]
pub struct StaticTickets {
    tickets: HashMap<String, Ticket>,
    calls: AtomicUsize,
}

impl StaticTickets {
    pub fn with(mut self, id: &str, ticket: Ticket) -> Self {
        self.tickets.insert(id.to_string(), ticket);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketSource for StaticTickets {
    async fn fetch_ticket(&self, id: &str) -> std::result::Result<Ticket, TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tickets
            .get(id)
            .cloned()
            .ok_or(TrackerError::UnexpectedStatus(404))
    }
}

/// Event stream replaying a script, then ending (or hanging forever).
pub struct ScriptedStream {
    items: VecDeque<Result<ChatEvent>>,
    hang_when_drained: bool,
    closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    pub fn new(items: Vec<Result<ChatEvent>>) -> Self {
        Self {
            items: items.into(),
            hang_when_drained: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang_when_drained = true;
        self
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<ChatEvent>> {
        match self.items.pop_front() {
            Some(item) => item.map(Some),
            None if self.hang_when_drained => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory chat server recording posts.
pub struct FakePlatform {
    pub user: ChatUser,
    pub teams: Vec<Team>,
    pub channels: Vec<Channel>,
    pub fail_posts: AtomicBool,
    posts: Mutex<Vec<(ChannelId, String)>>,
    logins: Mutex<Vec<String>>,
    stream: Mutex<Option<ScriptedStream>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            user: ChatUser {
                id: UserId(BOT_ID.to_string()),
                username: "tracbot".to_string(),
            },
            teams: vec![Team {
                id: TeamId("team-1".to_string()),
                name: "engineering".to_string(),
            }],
            channels: vec![
                Channel {
                    id: ChannelId("ch-town".to_string()),
                    name: "town-square".to_string(),
                },
                Channel {
                    id: ChannelId("ch-random".to_string()),
                    name: "random".to_string(),
                },
            ],
            fail_posts: AtomicBool::new(false),
            posts: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
        }
    }
}

impl FakePlatform {
    pub fn with_stream(self, stream: ScriptedStream) -> Self {
        *self.stream.lock().unwrap() = Some(stream);
        self
    }

    pub fn posts(&self) -> Vec<(ChannelId, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn ping(&self) -> Result<Option<String>> {
        Ok(Some("9.11.0".to_string()))
    }

    async fn login(&self, credentials: &Credentials) -> Result<ChatUser> {
        self.logins
            .lock()
            .unwrap()
            .push(credentials.username.clone());
        Ok(self.user.clone())
    }

    async fn find_team(&self, name: &str) -> Result<Option<Team>> {
        Ok(self.teams.iter().find(|t| t.name == name).cloned())
    }

    async fn list_channels(&self, _team: &TeamId) -> Result<Vec<Channel>> {
        Ok(self.channels.clone())
    }

    async fn create_post(&self, channel: &ChannelId, message: &str) -> Result<()> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(Error::External("post rejected".to_string()));
        }
        self.posts
            .lock()
            .unwrap()
            .push((channel.clone(), message.to_string()));
        Ok(())
    }

    async fn connect_events(&self) -> Result<Box<dyn EventStream>> {
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::External("no event stream scripted".to_string()))?;
        Ok(Box::new(stream))
    }
}
