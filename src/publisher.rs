//! Bluesky publisher — posts thread segments over the AT Protocol XRPC API.
//!
//! One session per published thread: login with the alias account's app
//! password, post the first segment as the root, then chain replies. The
//! first segment of each post carries the thread's root reference so every
//! reply lands under the original post.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::PublishError;

/// Reference to a created post, used to chain replies.
#[derive(Debug, Clone, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_jwt: String,
    did: String,
}

/// Destination for formatted threads. The pipeline only sees this seam, so
/// tests substitute a recording double.
#[async_trait]
pub trait ThreadPublisher: Send + Sync {
    /// Publish `segments` as one thread under `account`. Returns the number
    /// of posts created. Partial failures surface as errors; posts already
    /// created are not rolled back.
    async fn publish(
        &self,
        account: &str,
        password: &SecretString,
        segments: &[String],
    ) -> Result<usize, PublishError>;
}

/// XRPC client against one AT Protocol service.
pub struct BskyClient {
    client: reqwest::Client,
    service: String,
}

struct BskySession {
    access_jwt: String,
    did: String,
    account: String,
}

impl BskyClient {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            service: service.into(),
        }
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.service.trim_end_matches('/'))
    }

    async fn login(
        &self,
        account: &str,
        password: &SecretString,
    ) -> Result<BskySession, PublishError> {
        let response = self
            .client
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": account,
                "password": password.expose_secret(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::LoginFailed {
                account: account.to_string(),
                reason: format!("{status}: {body}"),
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;
        Ok(BskySession {
            access_jwt: session.access_jwt,
            did: session.did,
            account: account.to_string(),
        })
    }

    async fn create_post(
        &self,
        session: &BskySession,
        text: &str,
        reply: Option<(&PostRef, &PostRef)>,
    ) -> Result<PostRef, PublishError> {
        let response = self
            .client
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": build_post_record(text, reply),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                account: session.account.clone(),
                reason: format!("{status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))
    }
}

/// Build an `app.bsky.feed.post` record, optionally as a reply.
///
/// `reply` is `(root, parent)`: root stays fixed for the whole thread,
/// parent is the immediately preceding post.
fn build_post_record(text: &str, reply: Option<(&PostRef, &PostRef)>) -> Value {
    let mut record = json!({
        "$type": "app.bsky.feed.post",
        "text": text,
        "createdAt": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    });
    if let Some((root, parent)) = reply {
        record["reply"] = json!({
            "root": { "uri": root.uri, "cid": root.cid },
            "parent": { "uri": parent.uri, "cid": parent.cid },
        });
    }
    record
}

/// Publishes threads to Bluesky, pacing posts to stay under rate limits.
pub struct BskyPublisher {
    client: BskyClient,
    post_delay: std::time::Duration,
}

impl BskyPublisher {
    pub fn new(service: impl Into<String>, post_delay_secs: u64) -> Self {
        Self {
            client: BskyClient::new(service),
            post_delay: std::time::Duration::from_secs(post_delay_secs),
        }
    }
}

#[async_trait]
impl ThreadPublisher for BskyPublisher {
    async fn publish(
        &self,
        account: &str,
        password: &SecretString,
        segments: &[String],
    ) -> Result<usize, PublishError> {
        if segments.is_empty() {
            return Ok(0);
        }

        let session = self.client.login(account, password).await?;
        tracing::debug!(account = %account, segments = segments.len(), "Session created");

        let root = self.client.create_post(&session, &segments[0], None).await?;
        let mut parent = root.clone();
        let mut posted = 1;

        for segment in &segments[1..] {
            tokio::time::sleep(self.post_delay).await;
            parent = self
                .client
                .create_post(&session, segment, Some((&root, &parent)))
                .await?;
            posted += 1;
        }

        Ok(posted)
    }
}
