// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::HashSet, time::Duration};

use anyhow::Context;
use arcade_common::{ChannelId, MessageHandle, MessageId, OutboundMessage, UserId};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        channel_id: ChannelId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageHandle>;
    async fn edit(&self, handle: MessageHandle, message: OutboundMessage) -> anyhow::Result<()>;
    async fn delete(&self, handle: MessageHandle) -> anyhow::Result<()>;
    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Moderators: Send + Sync {
    async fn is_moderator(&self, user_id: UserId) -> bool;
}

/// Talks to the chat gateway that owns the platform connection.
#[derive(Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 5000;

impl HttpChatTransport {
    /// Every gateway call fails after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build chat gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("CHAT_GATEWAY_BASE_URL")
            .ok()
            .unwrap_or_else(|| "http://chat-gateway:8080".to_string());
        let timeout_ms = std::env::var("CHAT_GATEWAY_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_GATEWAY_TIMEOUT_MS)
            .max(1);

        Self::new(base_url, Duration::from_millis(timeout_ms))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn message_path(handle: MessageHandle) -> String {
        format!(
            "v1/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        )
    }

    async fn ensure_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("chat gateway returned {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(
        &self,
        channel_id: ChannelId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageHandle> {
        let response = self
            .client
            .post(self.endpoint(&format!("v1/channels/{channel_id}/messages")))
            .json(&message)
            .send()
            .await
            .context("failed to call chat gateway")?;

        let sent: SentMessage = Self::ensure_success(response)
            .await?
            .json()
            .await
            .context("invalid chat gateway send response")?;

        Ok(MessageHandle {
            channel_id,
            message_id: sent.message_id,
        })
    }

    async fn edit(&self, handle: MessageHandle, message: OutboundMessage) -> anyhow::Result<()> {
        let response = self
            .client
            .patch(self.endpoint(&Self::message_path(handle)))
            .json(&message)
            .send()
            .await
            .context("failed to call chat gateway")?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, handle: MessageHandle) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&Self::message_path(handle)))
            .send()
            .await
            .context("failed to call chat gateway")?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.endpoint(&format!("{}/reactions", Self::message_path(handle))))
            .json(&serde_json::json!({ "emoji": emoji }))
            .send()
            .await
            .context("failed to call chat gateway")?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Sends a message and logs instead of failing; announcements never abort a session.
pub async fn announce(
    transport: &dyn ChatTransport,
    channel_id: ChannelId,
    message: OutboundMessage,
) -> Option<MessageHandle> {
    match transport.send(channel_id, message).await {
        Ok(handle) => Some(handle),
        Err(error) => {
            warn!(channel_id, error = %error, "failed to send announcement");
            None
        }
    }
}

/// Moderator ids and the owner id, read once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticModerators {
    moderator_ids: HashSet<UserId>,
    owner_id: Option<UserId>,
}

impl StaticModerators {
    pub fn new(moderator_ids: impl IntoIterator<Item = UserId>, owner_id: Option<UserId>) -> Self {
        Self {
            moderator_ids: moderator_ids.into_iter().collect(),
            owner_id,
        }
    }

    pub fn from_env() -> Self {
        let moderator_ids = std::env::var("MODERATOR_IDS")
            .ok()
            .map(|raw| parse_id_list(&raw))
            .unwrap_or_default();
        let owner_id = std::env::var("OWNER_ID")
            .ok()
            .and_then(|raw| raw.trim().parse().ok());
        Self::new(moderator_ids, owner_id)
    }
}

#[async_trait]
impl Moderators for StaticModerators {
    async fn is_moderator(&self, user_id: UserId) -> bool {
        self.owner_id == Some(user_id) || self.moderator_ids.contains(&user_id)
    }
}

/// Parses a comma-separated id list, skipping entries that are not numbers.
fn parse_id_list(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_list_skips_garbage() {
        assert_eq!(parse_id_list("1, 2,,abc, 30"), vec![1, 2, 30]);
        assert!(parse_id_list("").is_empty());
    }

    #[tokio::test]
    async fn owner_and_listed_moderators_are_moderators() {
        let moderators = StaticModerators::new([5, 6], Some(1));
        assert!(moderators.is_moderator(1).await);
        assert!(moderators.is_moderator(6).await);
        assert!(!moderators.is_moderator(7).await);
    }

    #[test]
    fn message_paths_address_the_gateway() {
        let transport =
            HttpChatTransport::new("http://gateway:9000/", Duration::from_secs(1)).unwrap();
        let handle = MessageHandle {
            channel_id: 3,
            message_id: 44,
        };
        assert_eq!(
            transport.endpoint(&HttpChatTransport::message_path(handle)),
            "http://gateway:9000/v1/channels/3/messages/44"
        );
    }

    #[tokio::test]
    async fn unresponsive_gateway_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts connections and never answers.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport =
            HttpChatTransport::new(format!("http://{addr}"), Duration::from_millis(100)).unwrap();
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.send(1, OutboundMessage::text("hello")),
        )
        .await
        .expect("transport call should return on its own");

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }
}
