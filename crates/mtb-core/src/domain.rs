use std::fmt;

/// Mattermost user id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// Mattermost channel id (not the channel's display or URL name).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

/// Mattermost team id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TeamId(pub String);

/// Mattermost post id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PostId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The bot's own account, as returned by login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
}

/// A message posted in a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Posted,
    Other(String),
}

/// One event received from the chat event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEvent {
    pub kind: EventKind,
    pub channel_id: Option<ChannelId>,
    pub post: Option<Post>,
}

impl ChatEvent {
    pub fn posted(post: Post) -> Self {
        Self {
            kind: EventKind::Posted,
            channel_id: Some(post.channel_id.clone()),
            post: Some(post),
        }
    }
}
