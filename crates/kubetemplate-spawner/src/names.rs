//! User and server names as seen by templates
//!
//! Raw names are passed through unchanged; escaped names are safe to use as
//! Kubernetes object names. Escaping keeps valid names as they are and
//! otherwise appends a short hash of the raw name, so distinct raw names
//! never collide.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Result, SpawnerError};

/// Longest escaped name handed to templates
pub const SLUG_MAX_LENGTH: usize = 48;

const HASH_LENGTH: usize = 8;

const ASCII_PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

static SERVER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^[\w {}]*$", regex::escape(ASCII_PUNCTUATION)))
        .unwrap_or_else(|e| panic!("server name pattern is invalid: {e}"))
});

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9]+").unwrap_or_else(|e| panic!("slug pattern is invalid: {e}"))
});

/// Reject server names with characters other than word characters, spaces
/// and ASCII punctuation
pub fn validate_server_name(name: &str) -> Result<()> {
    if SERVER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(SpawnerError::InvalidServerName {
            name: name.to_string(),
        })
    }
}

/// Identity of the user and server a session belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNames {
    pub user_id: u64,
    pub username: String,
    /// Empty for a user's default server
    pub servername: String,
}

impl SessionNames {
    /// Build names, validating the server name
    pub fn new(user_id: u64, username: impl Into<String>, servername: impl Into<String>) -> Result<Self> {
        let servername = servername.into();
        validate_server_name(&servername)?;
        Ok(Self {
            user_id,
            username: username.into(),
            servername,
        })
    }

    pub fn escaped_username(&self) -> String {
        safe_slug(&self.username, SLUG_MAX_LENGTH)
    }

    pub fn escaped_servername(&self) -> String {
        if self.servername.is_empty() {
            String::new()
        } else {
            safe_slug(&self.servername, SLUG_MAX_LENGTH)
        }
    }

    /// `{user}--{server}`, hashed as a pair when that would be too long
    pub fn escaped_user_server(&self) -> String {
        let user = self.escaped_username();
        let server = self.escaped_servername();

        if user.len() + server.len() + 2 > SLUG_MAX_LENGTH {
            multi_slug(&[self.username.as_str(), self.servername.as_str()], SLUG_MAX_LENGTH)
        } else if self.servername.is_empty() {
            user
        } else {
            format!("{}--{}", user, server)
        }
    }

    /// Name values exposed to templates
    pub fn template_values(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("userid".to_string(), Value::from(self.user_id)),
            ("unescaped_username".to_string(), Value::from(self.username.clone())),
            ("unescaped_servername".to_string(), Value::from(self.servername.clone())),
            ("escaped_username".to_string(), Value::from(self.escaped_username())),
            ("escaped_servername".to_string(), Value::from(self.escaped_servername())),
            ("escaped_user_server".to_string(), Value::from(self.escaped_user_server())),
        ])
    }
}

/// Whether `name` can be used as an object name as-is
fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            name.len() <= 63
                && first.is_ascii_lowercase()
                && (last.is_ascii_lowercase() || last.is_ascii_digit())
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

/// Lowercase alphanumeric runs joined by `-`, starting with a letter
fn extract_safe_name(name: &str, max_length: usize) -> String {
    let lowered = name.to_lowercase();
    let dashed = NON_ALPHANUMERIC.replace_all(&lowered, "-");
    let trimmed = dashed.trim_start_matches(|c: char| c == '-' || c.is_ascii_digit());
    let truncated: String = trimmed.chars().take(max_length).collect();
    let safe = truncated.trim_end_matches('-');
    if safe.is_empty() {
        "x".to_string()
    } else {
        safe.to_string()
    }
}

fn short_hash(hasher: Sha256) -> String {
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_LENGTH);
    digest
}

fn strip_and_hash(name: &str, max_length: usize) -> String {
    let name_length = max_length.saturating_sub(HASH_LENGTH + 3).max(1);
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    format!("{}---{}", extract_safe_name(name, name_length), short_hash(hasher))
}

/// Escape a single name
pub fn safe_slug(name: &str, max_length: usize) -> String {
    if !name.contains("--") && is_valid_name(name) && name.len() <= max_length {
        name.to_string()
    } else {
        strip_and_hash(name, max_length)
    }
}

/// Escape several names into one, hashing them together
pub fn multi_slug(names: &[&str], max_length: usize) -> String {
    let mut hasher = Sha256::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            hasher.update([0xFF_u8]);
        }
        hasher.update(name.as_bytes());
    }

    let available = max_length.saturating_sub(HASH_LENGTH + 1);
    let per_name = (available / names.len().max(1)).saturating_sub(2).max(2);
    let parts: Vec<String> = names
        .iter()
        .map(|name| extract_safe_name(name, per_name))
        .collect();

    format!("{}---{}", parts.join("--"), short_hash(hasher))
}
