//! Alias routing — maps a message's recipients to a target Bluesky account.

use secrecy::SecretString;

use crate::mailbox::MailMessage;

/// A single routing rule: mail addressed to `address` is published under
/// `account` using `password`.
#[derive(Debug, Clone)]
pub struct AliasRule {
    pub address: String,
    pub account: String,
    pub password: SecretString,
}

/// Routes messages to alias rules by exact recipient match.
///
/// Rules are held in declaration order; when a message was sent to more
/// than one configured alias, the first configured rule wins.
#[derive(Debug, Clone)]
pub struct AliasRouter {
    rules: Vec<AliasRule>,
}

impl AliasRouter {
    pub fn new(rules: Vec<AliasRule>) -> Self {
        Self { rules }
    }

    /// Find the rule for a message, or `None` if no recipient matches any
    /// configured alias. A `None` here is not an error: the message is
    /// skipped and stays eligible for a future run.
    pub fn route(&self, message: &MailMessage) -> Option<&AliasRule> {
        self.rules.iter().find(|rule| {
            message
                .recipients
                .iter()
                .any(|recipient| recipient.eq_ignore_ascii_case(&rule.address))
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
