use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    redirect::Policy,
    Url,
};
use tracing::{debug, trace};

use super::{Credentials, TrackerError};
use crate::ports::{HttpReply, TrackerTransport};

/// Cookie Trac uses for authenticated sessions.
pub const SESSION_COOKIE: &str = "trac_auth";

pub const MAX_REDIRECTS: usize = 10;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed transport with its own cookie jar (one per Trac instance).
///
/// Redirects stop as soon as the jar holds a session cookie for the target, so
/// the login dance never loops through intermediate auth pages.
pub struct ReqwestTransport {
    http: reqwest::Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    pub fn new(insecure: bool) -> Result<Self, TrackerError> {
        let jar = Arc::new(Jar::default());
        let policy_jar = jar.clone();

        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error(TrackerError::TooManyRedirects)
            } else if has_session_cookie(&policy_jar, attempt.url()) {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .redirect(policy)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| TrackerError::Transport(format!("HTTP client setup failed: {e}")))?;

        Ok(Self { http, jar })
    }

    /// Whether the jar currently holds a session cookie valid for `url`.
    pub fn has_session_for(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| has_session_cookie(&self.jar, &u))
            .unwrap_or(false)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<HttpReply, TrackerError> {
        let resp = req.send().await.map_err(map_reqwest_err)?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.bytes().await.map_err(map_reqwest_err)?.to_vec();

        debug!(%url, status, bytes = body.len(), "tracker response");
        trace!(%url, body = %String::from_utf8_lossy(&body), "tracker response body");

        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl TrackerTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        basic_auth: Option<&Credentials>,
    ) -> Result<HttpReply, TrackerError> {
        debug!(method = "GET", url, basic_auth = basic_auth.is_some(), "tracker request");

        let mut req = self.http.get(url);
        if let Some(c) = basic_auth {
            req = req.basic_auth(&c.username, Some(&c.password));
        }
        self.send(req).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<HttpReply, TrackerError> {
        let names = fields.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(",");
        debug!(method = "POST", url, fields = %names, "tracker request");

        self.send(self.http.post(url).form(fields)).await
    }
}

fn has_session_cookie(jar: &Jar, url: &Url) -> bool {
    let Some(header) = jar.cookies(url) else {
        return false;
    };
    let Ok(header) = header.to_str() else {
        return false;
    };

    header.split(';').any(|pair| {
        pair.trim()
            .split_once('=')
            .map(|(name, value)| name == SESSION_COOKIE && !value.is_empty())
            .unwrap_or(false)
    })
}

fn map_reqwest_err(e: reqwest::Error) -> TrackerError {
    if e.is_redirect() {
        TrackerError::TooManyRedirects
    } else if e.is_timeout() {
        TrackerError::Transport(format!("request timed out after {REQUEST_TIMEOUT:?}"))
    } else {
        TrackerError::Transport(e.to_string())
    }
}
