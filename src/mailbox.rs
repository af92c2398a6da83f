//! Mailbox client — fetches new messages over IMAP.
//!
//! Raw IMAP over TLS, blocking, run inside `spawn_blocking`. The bot never
//! marks messages `\Seen` and never archives: the dedup ledger is the sole
//! authority on what has been processed, so a skipped message is simply
//! fetched again on the next run.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use regex::Regex;

use crate::config::MailboxConfig;
use crate::error::MailboxError;

/// One fetched message, owned by the orchestrator for a single pass.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Stable identifier: the `Message-ID` header when present, otherwise
    /// `imap-<uid>` (IMAP UIDs are stable within a mailbox).
    pub unique_id: String,
    /// All `To` and `Cc` addresses, as delivered. Alias matching downstream
    /// is case-insensitive.
    pub recipients: Vec<String>,
    pub sender: String,
    pub subject: String,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
}

/// Source of new mailbox messages.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch the currently-visible window of new messages, in arrival order.
    async fn fetch_new(&self) -> Result<Vec<MailMessage>, MailboxError>;
}

/// IMAP mailbox client.
pub struct ImapMailbox {
    config: MailboxConfig,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    async fn fetch_new(&self) -> Result<Vec<MailMessage>, MailboxError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailboxError::TaskPanicked(e.to_string()))?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Fetch unseen messages via raw IMAP over TLS (blocking).
fn fetch_unseen(config: &MailboxConfig) -> Result<Vec<MailMessage>, MailboxError> {
    use secrecy::ExposeSecret;

    let tcp = TcpStream::connect((&*config.server, config.port)).map_err(|e| {
        MailboxError::Connect {
            host: config.server.clone(),
            port: config.port,
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = std::sync::Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.server.clone())
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(MailboxError::LoginRefused {
            username: config.username.clone(),
        });
    }

    let select_resp = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;
    if !select_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(MailboxError::Protocol("SELECT INBOX failed".into()));
    }

    let search_resp = send_cmd(&mut tls, "A3", "UID SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend(parts[2..].iter().map(|s| (*s).to_string()));
            }
        }
    }

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("UID FETCH {uid} RFC822"))?;

        // The message literal sits between the untagged FETCH line and the
        // closing paren + tagged completion.
        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(3))
            .cloned()
            .collect();

        if let Some(message) = message_from_raw(raw.as_bytes(), &format!("imap-{uid}")) {
            results.push(message);
        } else {
            tracing::warn!(uid = %uid, "Unparseable message, skipping");
        }
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

/// Read one CRLF-terminated line from the TLS stream.
fn read_line(tls: &mut TlsStream) -> Result<String, MailboxError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(MailboxError::Protocol("connection closed".into())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Send a tagged command and collect lines up to the tagged completion.
fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, MailboxError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes())?;
    IoWrite::flush(tls)?;

    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

/// Quote a string for IMAP LOGIN.
fn imap_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse a raw RFC822 message into a `MailMessage`.
///
/// `fallback_id` is used when the message carries no `Message-ID` header.
pub fn message_from_raw(raw: &[u8], fallback_id: &str) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let unique_id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| fallback_id.to_string());

    Some(MailMessage {
        unique_id,
        recipients: extract_recipients(&parsed),
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body_text: extract_text(&parsed),
        received_at: extract_received_at(&parsed),
    })
}

/// All `To` and `Cc` addresses of a parsed message.
fn extract_recipients(parsed: &mail_parser::Message) -> Vec<String> {
    let mut recipients = Vec::new();
    for header in [parsed.to(), parsed.cc()] {
        let Some(addresses) = header else { continue };
        for addr in addresses.iter() {
            if let Some(address) = addr.address() {
                recipients.push(address.to_string());
            }
        }
    }
    recipients
}

/// Sender address of a parsed message.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Readable text of a parsed message: the plain-text part when present,
/// otherwise the HTML part with hidden blocks removed and tags stripped.
/// The parser's own HTML-to-text conversion is bypassed so hidden blocks
/// never reach the output.
fn extract_text(parsed: &mail_parser::Message) -> String {
    let plain = parsed
        .text_bodies()
        .find(|part| !part.is_text_html())
        .and_then(|part| part.text_contents());
    if let Some(text) = plain {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(&remove_hidden_blocks(html.as_ref()));
    }
    String::new()
}

/// Date header as UTC, falling back to "now" when absent or unparseable.
fn extract_received_at(parsed: &mail_parser::Message) -> DateTime<Utc> {
    parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now)
}

/// Remove `<div>`/`<span>` blocks styled `display:none` or
/// `visibility:hidden` — preview-text tricks that would otherwise leak
/// into published posts.
pub fn remove_hidden_blocks(html: &str) -> String {
    static HIDDEN: OnceLock<Regex> = OnceLock::new();
    let re = HIDDEN.get_or_init(|| {
        Regex::new(
            r#"(?is)<(?:div|span)[^>]*style=["'][^"'>]*(?:display\s*:\s*none|visibility\s*:\s*hidden)[^"'>]*["'][^>]*>.*?</(?:div|span)>"#,
        )
        .unwrap()
    });
    re.replace_all(html, "").to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
