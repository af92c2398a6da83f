//! Orchestrator — one polling pass over the mailbox.
//!
//! Fetch everything new, drop what the ledger already has, route each
//! remaining message to an alias, format and publish, then record. Publish
//! failures are contained per message: the id is not recorded, so the
//! message is retried on the next pass. Ledger write failures abort the
//! pass, since continuing without dedup risks mass duplicate posting.

use crate::error::Error;
use crate::formatter::{self, POST_MAX_CHARS};
use crate::ledger::Ledger;
use crate::mailbox::{MailMessage, MailSource};
use crate::publisher::ThreadPublisher;
use crate::router::AliasRouter;

/// Stand-in for the alias address in published bodies. The inbox address
/// is operational detail, not content.
const ADDRESS_PLACEHOLDER: &str = "[mailcast]";

/// Counters for one pass, logged at the end of each run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub already_published: usize,
    pub skipped_no_alias: usize,
    pub published: usize,
    pub failed: usize,
}

/// One mailbox-to-Bluesky pass, generic over its three seams.
pub struct Pipeline<M, P, L> {
    mailbox: M,
    publisher: P,
    ledger: L,
    router: AliasRouter,
    post_limit: usize,
    include_header: bool,
}

impl<M, P, L> Pipeline<M, P, L>
where
    M: MailSource,
    P: ThreadPublisher,
    L: Ledger,
{
    pub fn new(mailbox: M, publisher: P, ledger: L, router: AliasRouter) -> Self {
        Self {
            mailbox,
            publisher,
            ledger,
            router,
            post_limit: POST_MAX_CHARS,
            include_header: false,
        }
    }

    pub fn with_post_limit(mut self, limit: usize) -> Self {
        self.post_limit = limit;
        self
    }

    /// Prefix each published thread with the sender and date of the mail.
    pub fn with_header(mut self, include_header: bool) -> Self {
        self.include_header = include_header;
        self
    }

    /// Run one pass. A fetch failure aborts immediately; per-message
    /// publish failures are counted and the pass continues.
    pub async fn run(&mut self) -> Result<RunReport, Error> {
        let messages = self.mailbox.fetch_new().await?;
        let mut report = RunReport {
            fetched: messages.len(),
            ..RunReport::default()
        };
        tracing::info!(fetched = messages.len(), "Mailbox fetch complete");

        for message in messages {
            if self.ledger.contains(&message.unique_id) {
                report.already_published += 1;
                tracing::debug!(id = %message.unique_id, "Already published, skipping");
                continue;
            }

            let Some(rule) = self.router.route(&message) else {
                report.skipped_no_alias += 1;
                tracing::info!(
                    id = %message.unique_id,
                    sender = %message.sender,
                    "No alias matched, skipping"
                );
                continue;
            };
            let account = rule.account.clone();
            let password = rule.password.clone();
            let alias_address = rule.address.clone();

            let body = self.compose_body(&message, &alias_address);
            let segments = formatter::format_thread(&message.subject, &body, self.post_limit);

            match self
                .publisher
                .publish(&account, &password, &segments)
                .await
            {
                Ok(posted) => {
                    // Record only after the whole thread is up. A crash
                    // between publish and record re-posts once rather than
                    // silently dropping mail.
                    self.ledger.record(&message.unique_id)?;
                    report.published += 1;
                    tracing::info!(
                        id = %message.unique_id,
                        account = %account,
                        posts = posted,
                        "Thread published"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        id = %message.unique_id,
                        account = %account,
                        error = %e,
                        "Publish failed, will retry next run"
                    );
                }
            }
        }

        tracing::info!(
            fetched = report.fetched,
            published = report.published,
            already_published = report.already_published,
            skipped = report.skipped_no_alias,
            failed = report.failed,
            "Run complete"
        );
        Ok(report)
    }

    /// Body with the alias address redacted and, optionally, a sender
    /// header block prepended.
    fn compose_body(&self, message: &MailMessage, alias_address: &str) -> String {
        let mut body = redact_address(&message.body_text, alias_address);
        if self.include_header {
            body = format!(
                "From: {}\nSent: {}\n\n{body}",
                message.sender,
                message.received_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        body
    }
}

/// Replace every occurrence of the alias address with a placeholder,
/// case-insensitively.
fn redact_address(body: &str, address: &str) -> String {
    if address.is_empty() {
        return body.to_string();
    }
    let mut result = String::with_capacity(body.len());
    let lower_body = body.to_ascii_lowercase();
    let lower_addr = address.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(found) = lower_body[pos..].find(&lower_addr) {
        let start = pos + found;
        result.push_str(&body[pos..start]);
        result.push_str(ADDRESS_PLACEHOLDER);
        pos = start + lower_addr.len();
    }
    result.push_str(&body[pos..]);
    result
}
