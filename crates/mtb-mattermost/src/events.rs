//! Websocket event stream.

use std::sync::Once;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use mtb_core::{
    domain::{ChannelId, ChatEvent, EventKind, Post, PostId, UserId},
    errors::Error,
    ports::EventStream,
    Result,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct Frame {
    /// Absent on replies to our own requests (`{"status":"OK","seq_reply":1}`).
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    broadcast: Option<Broadcast>,
}

#[derive(Debug, Deserialize)]
struct Broadcast {
    #[serde(default)]
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct PostDto {
    id: String,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    message: String,
}

/// Live Mattermost websocket, authenticated with the session token.
pub struct MattermostEventStream {
    socket: Socket,
}

impl MattermostEventStream {
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        install_crypto_provider();
        let (mut socket, _response) = connect_async(url).await.map_err(map_ws_err)?;

        let challenge = json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": token },
        });
        socket
            .send(WsMessage::Text(challenge.to_string().into()))
            .await
            .map_err(map_ws_err)?;

        info!(url, "event stream connected");
        Ok(Self { socket })
    }
}

#[async_trait]
impl EventStream for MattermostEventStream {
    async fn next_event(&mut self) -> Result<Option<ChatEvent>> {
        while let Some(message) = self.socket.next().await {
            let text = match message.map_err(map_ws_err)? {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("skipping non utf-8 websocket frame");
                        continue;
                    }
                },
                WsMessage::Close(frame) => {
                    debug!(?frame, "server closed event stream");
                    return Ok(None);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            trace!(frame = %text, "websocket frame");
            match parse_event(&text) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping malformed websocket frame"),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        match self.socket.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_err(e)),
        }
    }
}

/// Decode one websocket text frame. Frames that are not events yield `None`.
pub fn parse_event(text: &str) -> Result<Option<ChatEvent>> {
    let frame: Frame = serde_json::from_str(text)?;
    let Some(name) = frame.event else {
        return Ok(None);
    };

    let broadcast_channel = frame
        .broadcast
        .map(|b| b.channel_id)
        .filter(|id| !id.is_empty())
        .map(ChannelId);

    if name != "posted" {
        return Ok(Some(ChatEvent {
            kind: EventKind::Other(name),
            channel_id: broadcast_channel,
            post: None,
        }));
    }

    // The post arrives as a JSON document embedded in a string.
    let raw = frame
        .data
        .get("post")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::External("posted event without post data".to_string()))?;
    let dto: PostDto = serde_json::from_str(raw)?;

    let post = Post {
        id: PostId(dto.id),
        channel_id: ChannelId(dto.channel_id),
        user_id: UserId(dto.user_id),
        message: dto.message,
    };
    Ok(Some(ChatEvent {
        kind: EventKind::Posted,
        channel_id: broadcast_channel.or_else(|| Some(post.channel_id.clone())),
        post: Some(post),
    }))
}

/// `wss://` needs a process-wide rustls provider; install ring once.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

fn map_ws_err(e: tungstenite::Error) -> Error {
    Error::External(format!("mattermost websocket error: {e}"))
}
