use std::sync::OnceLock;

use async_trait::async_trait;
use regex::bytes::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    parse_ticket_csv, AuthMechanism, Credentials, ReqwestTransport, Ticket, TrackerError,
};
use crate::{
    config::TracConfig,
    ports::{HttpReply, TicketSource, TrackerTransport},
};

/// Where a session stands with respect to its Trac instance.
#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated {
        credentials: Credentials,
    },
    /// Re-authentication failed; credentials are kept so the next fetch can try again.
    Failed {
        credentials: Credentials,
        reason: String,
    },
}

impl SessionState {
    fn credentials(&self) -> Option<&Credentials> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated { credentials } | Self::Failed { credentials, .. } => {
                Some(credentials)
            }
        }
    }
}

/// One authenticated session against one Trac instance.
///
/// The state lock is held for a whole fetch, including the single
/// re-authentication it may trigger.
pub struct TrackerSession {
    name: String,
    base_url: String,
    mechanism: AuthMechanism,
    transport: Box<dyn TrackerTransport>,
    state: Mutex<SessionState>,
}

impl TrackerSession {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        mechanism: AuthMechanism,
        transport: Box<dyn TrackerTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            mechanism,
            transport,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    /// Session over a real HTTP transport, configured from the YAML entry.
    pub fn from_config(name: &str, cfg: &TracConfig) -> Result<Self, TrackerError> {
        let transport = ReqwestTransport::new(cfg.insecure)?;
        Ok(Self::new(name, &cfg.url, cfg.auth_type, Box::new(transport)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mechanism(&self) -> AuthMechanism {
        self.mechanism
    }

    /// Human-readable ticket page.
    pub fn ticket_url(&self, id: &str) -> String {
        format!("{}/ticket/{id}", self.base_url)
    }

    fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(
            *self.state.lock().await,
            SessionState::Authenticated { .. }
        )
    }

    /// Why the last re-authentication failed, while the session is in that state.
    pub async fn last_failure(&self) -> Option<String> {
        match &*self.state.lock().await {
            SessionState::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Log in and remember the credentials for later re-authentication.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), TrackerError> {
        let credentials = Credentials::new(username, password);
        let mut state = self.state.lock().await;

        match self.login(&credentials).await {
            Ok(()) => {
                info!(
                    tracker = %self.name,
                    user = %credentials.username,
                    auth = %self.mechanism,
                    "authenticated"
                );
                *state = SessionState::Authenticated { credentials };
                Ok(())
            }
            Err(e) => {
                if state.credentials().is_some() {
                    *state = SessionState::Failed {
                        credentials,
                        reason: e.to_string(),
                    };
                }
                Err(e)
            }
        }
    }

    /// Fetch and decode one ticket.
    ///
    /// A 401/403 triggers exactly one re-authentication and one retried fetch.
    pub async fn fetch_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
        let ticket_url = self.ticket_url(id);
        let csv_url = format!("{ticket_url}?format=csv");
        let mut state = self.state.lock().await;

        let mut reply = self.transport.get(&csv_url, None).await?;

        if is_auth_failure(reply.status) {
            let Some(credentials) = state.credentials().cloned() else {
                return Err(TrackerError::NotAuthenticated);
            };

            warn!(
                tracker = %self.name,
                ticket = id,
                status = reply.status,
                "session rejected, re-authenticating"
            );

            if let Err(e) = self.login(&credentials).await {
                warn!(tracker = %self.name, error = %e, "re-authentication failed");
                *state = SessionState::Failed {
                    credentials,
                    reason: e.to_string(),
                };
                return Err(TrackerError::Reauthentication(Box::new(e)));
            }
            *state = SessionState::Authenticated { credentials };

            reply = self.transport.get(&csv_url, None).await?;
            if is_auth_failure(reply.status) {
                return Err(TrackerError::SessionRejected(reply.status));
            }
        }

        if reply.status != 200 {
            return Err(TrackerError::UnexpectedStatus(reply.status));
        }

        parse_ticket_csv(&reply.body, &ticket_url)
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), TrackerError> {
        match self.mechanism {
            AuthMechanism::Basic => self.login_basic(credentials).await,
            AuthMechanism::FormLogin => self.login_form(credentials).await,
        }
    }

    async fn login_basic(&self, credentials: &Credentials) -> Result<(), TrackerError> {
        let reply = self
            .transport
            .get(&self.login_url(), Some(credentials))
            .await?;
        login_outcome(reply.status, &[200, 302])
    }

    async fn login_form(&self, credentials: &Credentials) -> Result<(), TrackerError> {
        let login_url = self.login_url();
        let page = self.transport.get(&login_url, None).await?;

        // A still-valid session is redirected away from the form.
        if matches!(page.status, 302 | 303) {
            return Ok(());
        }
        let token = login_page_token(&page)?;

        let reply = self
            .transport
            .post_form(
                &login_url,
                &[
                    ("user", credentials.username.as_str()),
                    ("password", credentials.password.as_str()),
                    ("referer", self.base_url.as_str()),
                    ("__FORM_TOKEN", token.as_str()),
                ],
            )
            .await?;
        login_outcome(reply.status, &[200, 302, 303])
    }
}

#[async_trait]
impl TicketSource for TrackerSession {
    async fn fetch_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
        TrackerSession::fetch_ticket(self, id).await
    }
}

fn is_auth_failure(status: u16) -> bool {
    matches!(status, 401 | 403)
}

fn login_outcome(status: u16, accepted: &[u16]) -> Result<(), TrackerError> {
    if accepted.contains(&status) {
        Ok(())
    } else if is_auth_failure(status) {
        Err(TrackerError::InvalidCredentials)
    } else {
        Err(TrackerError::UnexpectedStatus(status))
    }
}

fn login_page_token(page: &HttpReply) -> Result<String, TrackerError> {
    if is_auth_failure(page.status) {
        return Err(TrackerError::InvalidCredentials);
    }
    if page.status != 200 {
        return Err(TrackerError::UnexpectedStatus(page.status));
    }
    extract_form_token(&page.body).ok_or(TrackerError::FormTokenNotFound)
}

/// Pull the anti-CSRF `__FORM_TOKEN` out of the login page.
pub fn extract_form_token(html: &[u8]) -> Option<String> {
    static FORM_TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = FORM_TOKEN_RE.get_or_init(|| {
        Regex::new(r#"name\s*=\s*"__FORM_TOKEN"\s+value\s*=\s*"([^"]+)""#).expect("valid regex")
    });

    let caps = re.captures(html)?;
    Some(String::from_utf8_lossy(&caps[1]).into_owned())
}
