use crate::auth::Credentials;
use crate::session::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// Read/clear access to a session's stored messages.
///
/// This is the boundary to the external message store; the session store
/// hydrates through it and otherwise never touches persistence.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// History collaborator for sessions that have no backing store, used by the
/// scripted client and tests.
pub struct EmptyHistory;

#[async_trait]
impl MessageHistory for EmptyHistory {
    async fn fetch(&self, _session_id: &str) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn clear(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<Message>,
}

/// HTTP-backed message history.
pub struct HttpMessageHistory {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpMessageHistory {
    pub fn new(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    fn messages_url(&self, session_id: &str) -> Result<Url> {
        self.base_url
            .join(&format!("api/v1/chat/messages/{session_id}"))
            .context("invalid message history endpoint")
    }
}

#[async_trait]
impl MessageHistory for HttpMessageHistory {
    async fn fetch(&self, session_id: &str) -> Result<Vec<Message>> {
        let url = self.messages_url(session_id)?;
        let response = self
            .credentials
            .authorize(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        let page: MessagePage = response
            .json()
            .await
            .context("message history body was not valid JSON")?;
        Ok(page.messages)
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let url = self.messages_url(session_id)?;
        self.credentials
            .authorize(self.http.delete(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
