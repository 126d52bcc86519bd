//! Mailbox access over a Gmail-style REST API.
//!
//! The pipeline consumes three remote operations, expressed by the
//! [`MailboxClient`] trait: paginated message search by query string,
//! message detail fetch (headers plus MIME part tree), and attachment byte
//! fetch. [`HttpMailbox`] implements the trait against a real endpoint with
//! a bearer credential; tests substitute in-memory fakes.
//!
//! # Pagination
//!
//! Message search pages through an opaque continuation token. Each page
//! requests exactly what is still missing from the caller's quota, and a
//! page failure after the first aborts pagination with the partial result:
//! a short list is a success, not an error.
//!
//! # Date bounds
//!
//! The upstream `before:` bound is exclusive, so the end date advances by
//! one day to make the caller's range inclusive.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

use crate::config::MailboxConfig;
use crate::mime::MimePart;
use crate::models::{CandidateMessage, ScanRequest};

/// One page of message search results.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Full detail of one message: identity headers plus the MIME part tree.
#[derive(Debug, Clone)]
pub struct MessageDetail {
    pub message: CandidateMessage,
    pub payload: MimePart,
}

/// Credential-bearing remote mailbox API.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    async fn fetch_message(&self, id: &str) -> Result<MessageDetail>;

    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
}

/// Build the server-side search query for a scan request.
///
/// Undated or malformed messages are excluded upstream by the query itself;
/// no client-side filtering is needed.
pub fn build_search_query(request: &ScanRequest) -> String {
    let mut query = String::from("has:attachment filename:pdf");
    if let Some(start) = request.start_date {
        query.push_str(&format!(" after:{}", start.format("%Y/%m/%d")));
    }
    if let Some(end) = request.end_date {
        // Upstream treats before: as exclusive.
        let exclusive_end = end + chrono::Duration::days(1);
        query.push_str(&format!(" before:{}", exclusive_end.format("%Y/%m/%d")));
    }
    query
}

/// Page through the mailbox until the request's quota is filled or the
/// upstream runs out of pages.
///
/// A failure on the first page means the mailbox is unreachable and is
/// returned as an error; a failure on any later page stops pagination and
/// the accumulated ids proceed as a partial result.
pub async fn fetch_candidate_messages(
    client: &dyn MailboxClient,
    request: &ScanRequest,
    page_size: u32,
) -> Result<Vec<String>> {
    let query = build_search_query(request);
    let mut ids: Vec<String> = Vec::new();
    let mut page_token: Option<String> = None;

    while (ids.len() as u32) < request.max_results {
        let want = (request.max_results - ids.len() as u32).min(page_size);
        let page = match client
            .search_messages(&query, want, page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) if ids.is_empty() => {
                return Err(e).context("mailbox search failed");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fetched = ids.len(),
                    "message page fetch failed; continuing with partial results"
                );
                break;
            }
        };

        ids.extend(page.ids);
        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    ids.truncate(request.max_results as usize);
    Ok(ids)
}

// ============ HTTP implementation ============

pub struct HttpMailbox {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpMailbox {
    pub fn new(config: &MailboxConfig, token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("mailbox credential must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id: String,
    internal_date: Option<String>,
    payload: Option<PartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<HeaderResponse>,
    body: Option<BodyResponse>,
    parts: Option<Vec<PartResponse>>,
}

#[derive(Deserialize)]
struct HeaderResponse {
    name: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BodyResponse {
    attachment_id: Option<String>,
    size: Option<i64>,
}

#[derive(Deserialize)]
struct AttachmentResponse {
    data: String,
}

fn header_value(headers: &[HeaderResponse], name: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

fn part_to_mime(part: PartResponse) -> MimePart {
    let (attachment_id, size) = match part.body {
        Some(body) => (body.attachment_id, body.size.unwrap_or(0)),
        None => (None, 0),
    };
    MimePart {
        mime_type: part.mime_type,
        filename: part.filename,
        attachment_id,
        size,
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(part_to_mime)
            .collect(),
    }
}

#[async_trait]
impl MailboxClient for HttpMailbox {
    async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let max_results = max_results.to_string();
        let mut req = self
            .client
            .get(format!("{}/messages", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("q", query), ("maxResults", max_results.as_str())]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }

        let resp = req.send().await.context("mailbox search request failed")?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            bail!("mailbox credential rejected (HTTP 401)");
        }
        if !resp.status().is_success() {
            bail!("mailbox search failed (HTTP {})", resp.status());
        }

        let list: ListResponse = resp.json().await.context("mailbox search response")?;
        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch_message(&self, id: &str) -> Result<MessageDetail> {
        let resp = self
            .client
            .get(format!("{}/messages/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .query(&[("format", "full")])
            .send()
            .await
            .with_context(|| format!("message fetch failed for {}", id))?;

        if !resp.status().is_success() {
            bail!("message fetch failed for {} (HTTP {})", id, resp.status());
        }

        let message: MessageResponse = resp.json().await.context("message response")?;
        let payload = message
            .payload
            .ok_or_else(|| anyhow::anyhow!("message {} has no payload", id))?;

        let subject = header_value(&payload.headers, "Subject");
        let sender = header_value(&payload.headers, "From");
        // internalDate is epoch milliseconds as a string.
        let date = message
            .internal_date
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .map(|ms| ms / 1000);

        Ok(MessageDetail {
            message: CandidateMessage {
                id: message.id,
                subject,
                sender,
                date,
            },
            payload: part_to_mime(payload),
        })
    }

    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(format!(
                "{}/messages/{}/attachments/{}",
                self.base_url, message_id, attachment_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("attachment fetch failed for {}", attachment_id))?;

        if !resp.status().is_success() {
            bail!(
                "attachment fetch failed for {} (HTTP {})",
                attachment_id,
                resp.status()
            );
        }

        let attachment: AttachmentResponse = resp.json().await.context("attachment response")?;
        // Attachment bodies are URL-safe base64; padding varies by server.
        let data = attachment.data.trim_end_matches('=');
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(data)
            .context("attachment body is not valid base64")
    }
}
