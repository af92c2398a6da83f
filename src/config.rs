//! Environment-driven configuration.
//!
//! Everything is supplied through environment variables, the way the bot is
//! deployed under cron or a CI scheduler: mailbox connection via `EMAIL_*`,
//! one routing rule per `ALIAS_*` variable (pipe-delimited), and a handful
//! of `MAILCAST_*` knobs with defaults.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::router::AliasRule;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_LEDGER_PATH: &str = "./data/processed.log";
const DEFAULT_POST_DELAY_SECS: u64 = 5;
const DEFAULT_BSKY_SERVICE: &str = "https://bsky.social";

/// IMAP connection parameters.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Full runtime configuration for one pass.
#[derive(Debug, Clone)]
pub struct Config {
    pub mailbox: MailboxConfig,
    /// Routing rules in declaration order (sorted `ALIAS_*` key order, so
    /// the first-rule-wins policy is deterministic for a given environment).
    pub aliases: Vec<AliasRule>,
    pub ledger_path: PathBuf,
    /// Delay between posts of one thread, to stay under publisher rate limits.
    pub post_delay_secs: u64,
    /// AT Protocol service base URL.
    pub bsky_service: String,
    /// Prefix published threads with a `From:`/`Sent:` header block.
    pub include_header: bool,
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from an explicit key/value set.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();

        let required = |key: &str| -> Result<String, ConfigError> {
            vars.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let server = required("EMAIL_SERVER")?;
        let username = required("EMAIL_USERNAME")?;
        let password = SecretString::from(required("EMAIL_PASSWORD")?);
        let port = parse_or_default(&vars, "EMAIL_PORT", DEFAULT_IMAP_PORT)?;

        let ledger_path = vars
            .get("MAILCAST_LEDGER_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH));

        let post_delay_secs =
            parse_or_default(&vars, "MAILCAST_POST_DELAY_SECS", DEFAULT_POST_DELAY_SECS)?;

        let bsky_service = vars
            .get("MAILCAST_BSKY_SERVICE")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_BSKY_SERVICE.to_string());

        let include_header = parse_or_default(&vars, "MAILCAST_INCLUDE_HEADER", false)?;

        // BTreeMap iteration is key-sorted; that order IS declaration order.
        let mut aliases = Vec::new();
        let mut seen_addresses = HashSet::new();
        for (key, value) in &vars {
            if !key.starts_with("ALIAS_") {
                continue;
            }
            let rule = parse_alias(key, value)?;
            if !seen_addresses.insert(rule.address.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateAlias(rule.address));
            }
            aliases.push(rule);
        }
        if aliases.is_empty() {
            return Err(ConfigError::NoAliases);
        }

        Ok(Self {
            mailbox: MailboxConfig {
                server,
                port,
                username,
                password,
            },
            aliases,
            ledger_path,
            post_delay_secs,
            bsky_service,
            include_header,
        })
    }
}

/// Parse an optional variable, falling back to `default` when absent or empty.
fn parse_or_default<T: std::str::FromStr>(
    vars: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{v}'"),
        }),
    }
}

/// Parse one `ALIAS_*` value of the form `address|account|password`.
fn parse_alias(key: &str, value: &str) -> Result<AliasRule, ConfigError> {
    let parts: Vec<&str> = value.split('|').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::MalformedAlias {
            key: key.to_string(),
        });
    }
    Ok(AliasRule {
        address: parts[0].trim().to_string(),
        account: parts[1].trim().to_string(),
        password: SecretString::from(parts[2].trim().to_string()),
    })
}
