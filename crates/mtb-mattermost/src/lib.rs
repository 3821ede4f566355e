//! Mattermost adapter (REST API v4 + websocket events).
//!
//! This crate implements the `mtb-core` ChatPlatform port over a Mattermost server.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

pub mod events;

use mtb_core::{
    domain::{Channel, ChannelId, ChatUser, Team, TeamId, UserId},
    errors::Error,
    ports::{ChatPlatform, EventStream},
    tracker::Credentials,
    Result,
};

pub use events::{parse_event, MattermostEventStream};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest slice of an error response body quoted in error messages.
const ERROR_BODY_LIMIT: usize = 200;

pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct PingReply {
    status: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    login_id: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct UserDto {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct NamedDto {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct NewPost<'a> {
    channel_id: &'a str,
    message: &'a str,
}

impl MattermostClient {
    /// Client for the server at `server` (an `http://` or `https://` URL).
    pub fn new(server: &str) -> Result<Self> {
        let base_url = server.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Server URL must start with http:// or https://: {server}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Self::map_err)?;

        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `ws(s)://host/api/v4/websocket` for the configured server.
    pub fn websocket_url(&self) -> String {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| {
                self.base_url
                    .strip_prefix("http://")
                    .map(|rest| format!("ws://{rest}"))
            })
            .unwrap_or_else(|| self.base_url.clone());
        format!("{rest}/api/v4/websocket")
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    fn map_err(e: reqwest::Error) -> Error {
        Error::External(format!("mattermost error: {e}"))
    }

    async fn token(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::External("mattermost error: not logged in".to_string()))
    }

    async fn authorized(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(req.bearer_auth(self.token().await?))
    }

    /// Send `req`, turning non-2xx replies into errors quoting the body.
    async fn send(&self, what: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req.send().await.map_err(Self::map_err)?;
        let status = resp.status();
        debug!(request = what, status = status.as_u16(), "mattermost response");

        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(Error::External(format!(
            "mattermost error: {what} returned {status}: {body}"
        )))
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T> {
        let req = self.authorized(self.http.get(self.api(path))).await?;
        let resp = self.send(what, req).await?;
        let text = resp.text().await.map_err(Self::map_err)?;
        trace!(request = what, body = %text, "mattermost response body");
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ChatPlatform for MattermostClient {
    async fn ping(&self) -> Result<Option<String>> {
        let resp = self
            .send("ping", self.http.get(self.api("/system/ping")))
            .await?;
        let header_version = resp
            .headers()
            .get("X-Version-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let reply: PingReply = resp.json().await.map_err(Self::map_err)?;
        if !reply.status.eq_ignore_ascii_case("ok") {
            return Err(Error::External(format!(
                "mattermost error: server status is {}",
                reply.status
            )));
        }
        Ok(reply.version.filter(|v| !v.is_empty()).or(header_version))
    }

    async fn login(&self, credentials: &Credentials) -> Result<ChatUser> {
        let req = self.http.post(self.api("/users/login")).json(&LoginRequest {
            login_id: &credentials.username,
            password: &credentials.password,
        });
        let resp = self.send("login", req).await?;

        let token = resp
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::External("mattermost error: login reply carries no session token".to_string())
            })?;
        let user: UserDto = resp.json().await.map_err(Self::map_err)?;

        *self.token.write().await = Some(token);
        Ok(ChatUser {
            id: UserId(user.id),
            username: user.username,
        })
    }

    async fn find_team(&self, name: &str) -> Result<Option<Team>> {
        let teams: Vec<NamedDto> = self.get_json("list teams", "/users/me/teams").await?;
        Ok(teams.into_iter().find(|t| t.name == name).map(|t| Team {
            id: TeamId(t.id),
            name: t.name,
        }))
    }

    async fn list_channels(&self, team: &TeamId) -> Result<Vec<Channel>> {
        let path = format!("/users/me/teams/{}/channels", team.0);
        let channels: Vec<NamedDto> = self.get_json("list channels", &path).await?;
        Ok(channels
            .into_iter()
            .map(|c| Channel {
                id: ChannelId(c.id),
                name: c.name,
            })
            .collect())
    }

    async fn create_post(&self, channel: &ChannelId, message: &str) -> Result<()> {
        let req = self.http.post(self.api("/posts")).json(&NewPost {
            channel_id: &channel.0,
            message,
        });
        let req = self.authorized(req).await?;
        self.send("create post", req).await?;
        Ok(())
    }

    async fn connect_events(&self) -> Result<Box<dyn EventStream>> {
        let token = self.token().await?;
        let stream = MattermostEventStream::connect(&self.websocket_url(), &token).await?;
        Ok(Box::new(stream))
    }
}
