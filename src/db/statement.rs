//! Statement template handling.
//!
//! Role creation SQL arrives as a list of templates. Each template may hold
//! several `;`-separated statements, may be base64 encoded, or may be a JSON
//! array of statements. Every resulting statement is rendered against a
//! [`StatementContext`] before execution.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Textual form of `{{expiration}}`. Role SQL depends on this exact shape.
pub const EXPIRATION_FORMAT: &str = "%d-%m-%Y %H:%M:%S %p";

/// Trim every entry and drop the blank ones.
pub fn remove_empty(statements: &[String]) -> Vec<String> {
    statements
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Split one statement template into individual queries.
///
/// Accepts plain `sep`-separated text, a JSON array of strings, or either of
/// those base64 encoded. Returned queries are trimmed and never blank.
pub fn split_statements(input: &str, sep: char) -> Vec<String> {
    let mut text = input.trim().to_string();

    if let Ok(decoded) = BASE64.decode(text.as_bytes()) {
        if let Ok(decoded) = String::from_utf8(decoded) {
            if !decoded.is_empty() {
                text = decoded;
            }
        }
    }

    if let Ok(list) = serde_json::from_str::<Vec<String>>(&text) {
        return list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    text.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Render an expiration timestamp for substitution.
pub fn format_expiration(expiration: &DateTime<Utc>) -> String {
    expiration.format(EXPIRATION_FORMAT).to_string()
}

/// Values substituted into each statement.
///
/// `name` is an alias of `username` kept for older role definitions.
#[derive(Clone)]
pub struct StatementContext {
    username: String,
    password: String,
    expiration: String,
}

impl StatementContext {
    pub fn new(username: &str, password: &str, expiration: &DateTime<Utc>) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            expiration: format_expiration(expiration),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("username", &self.username),
            ("name", &self.username),
            ("password", &self.password),
            ("expiration", &self.expiration),
        ]
    }

    /// Substitute every `{{key}}` marker in `query`.
    ///
    /// Values are escaped for use inside single-quoted SQL literals. The query
    /// is scanned once, so markers inside substituted values stay literal.
    pub fn render(&self, query: &str) -> String {
        let pairs = self.pairs();
        let mut rendered = String::with_capacity(query.len());
        let mut rest = query;

        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            let substitution = tail.find("}}").and_then(|end| {
                let key = &tail[..end];
                pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, value)| (escape_literal(value), end + 2))
            });
            match substitution {
                Some((value, consumed)) => {
                    rendered.push_str(&value);
                    rest = &tail[consumed..];
                }
                None => {
                    rendered.push_str("{{");
                    rest = tail;
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }

    /// Substitution values for diagnostics, with the password masked.
    pub fn masked_values(&self) -> BTreeMap<String, String> {
        self.pairs()
            .into_iter()
            .map(|(k, v)| {
                let v = if k == "password" { "[password]" } else { v };
                (k.to_string(), v.to_string())
            })
            .collect()
    }
}

impl std::fmt::Debug for StatementContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementContext")
            .field("username", &self.username)
            .field("password", &"***")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Double single quotes so a value cannot terminate a string literal.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
