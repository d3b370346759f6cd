//! HTTP access to chat history and read state.

use serde::Deserialize;

use telecare_shared::protocol::ChatMessage;
use telecare_shared::types::UserId;

use crate::error::ClientError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub ws_path: String,
    pub max_frame_bytes: usize,
    pub signaling_ttl_secs: u64,
}

#[derive(Deserialize)]
struct MarkReadResponse {
    updated: usize,
}

#[derive(Deserialize)]
struct UnreadResponse {
    unread: u64,
}

#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HistoryClient {
    /// `base_url` is the relay's HTTP origin, e.g. `http://host:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn server_info(&self) -> Result<ServerInfo, ClientError> {
        self.get_json(&format!("{}/info", self.base_url)).await
    }

    /// Both directions of the conversation, oldest first.
    pub async fn conversation(
        &self,
        user: UserId,
        peer: UserId,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        self.get_json(&format!("{}/api/chat/{user}/{peer}", self.base_url))
            .await
    }

    /// Marks everything `peer` sent to `user` as read.
    pub async fn mark_read(&self, user: UserId, peer: UserId) -> Result<usize, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/chat/{user}/{peer}/read", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status()));
        }
        Ok(resp.json::<MarkReadResponse>().await?.updated)
    }

    pub async fn unread_count(&self, user: UserId) -> Result<u64, ClientError> {
        let resp: UnreadResponse = self
            .get_json(&format!("{}/api/unread/{user}", self.base_url))
            .await?;
        Ok(resp.unread)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }
}
