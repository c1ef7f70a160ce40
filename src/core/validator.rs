//! Command safety checks.
//!
//! [`DenylistValidator`] rejects empty commands and commands whose lower-cased
//! text contains a destructive token such as `rm `, `shutdown` or `mkfs`.
//!
//! This is a textual heuristic, not a sandbox. It does not see through
//! quoting, variable expansion, base64 payloads, aliases or chained commands
//! built at runtime, so `r''m -rf /` or `$(printf rm) -rf /` pass.
//!
//! Matching is on plain substrings, so it also rejects harmless commands:
//! `echo model a` contains `del `, `git log --format x` contains `format `
//! and `echo reboot` merely mentions a token. Anything that must be
//! contained needs real isolation around the backend.

use thiserror::Error;

/// Tokens rejected out of the box.
///
/// Matched as plain substrings of the lower-cased command.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rm ",
    "rmdir",
    "del ",
    "erase ",
    "shred",
    "wipefs",
    "mkfs",
    "format ",
    "dd if=",
    "shutdown",
    "reboot",
    "poweroff",
    "halt ",
    "init 0",
];

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The command was empty or whitespace only.
    #[error("empty command")]
    Empty,

    /// The command contains a denylisted token.
    #[error("unsafe command")]
    Unsafe {
        /// The token that matched.
        token: String,
    },
}

/// A pure check run before any backend sees a command.
pub trait CommandValidator: Send + Sync {
    /// Accept or reject `command`.
    fn validate(&self, command: &str) -> Result<(), Rejection>;
}

/// Substring denylist over the lower-cased command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenylistValidator {
    tokens: Vec<String>,
}

impl DenylistValidator {
    /// Build a validator from an explicit token list.
    ///
    /// Tokens are lower-cased and deduplicated; blank tokens are dropped
    /// since they would match everything.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { tokens: Vec::new() }.extend(tokens)
    }

    /// Add more tokens on top of the current set.
    pub fn extend<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let token = token.as_ref().to_lowercase();
            if !token.trim().is_empty() && !self.tokens.contains(&token) {
                self.tokens.push(token);
            }
        }
        self
    }

    /// The active token set.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl Default for DenylistValidator {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}

impl CommandValidator for DenylistValidator {
    fn validate(&self, command: &str) -> Result<(), Rejection> {
        if command.trim().is_empty() {
            return Err(Rejection::Empty);
        }

        let lowered = command.to_lowercase();
        match self.tokens.iter().find(|t| lowered.contains(t.as_str())) {
            Some(token) => Err(Rejection::Unsafe {
                token: token.clone(),
            }),
            None => Ok(()),
        }
    }
}
