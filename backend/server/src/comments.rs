//! # Comments
//!
//! Validation and sanitization of submitted comments.
//!
//! ## Rules
//!
//! - username: string, 2-20 characters as sent
//! - text: string, 5-500 characters as sent
//! - username keeps only `A-Z a-z 0-9 _ - space`, then trimmed, must still be 2+ characters
//! - text has `<`/`>` escaped, then trimmed
use std::{ops::RangeInclusive, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const USERNAME_CHARS: RangeInclusive<usize> = 2..=20;
const TEXT_CHARS: RangeInclusive<usize> = 5..=500;

static USERNAME_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_\- ]").expect("static regex"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommentError {
    #[error("Invalid username (2-20 chars)")]
    InvalidUsername,

    #[error("Invalid comment (5-500 chars)")]
    InvalidText,

    #[error("Username contains invalid characters")]
    UsernameCharacters,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComment {
    pub username: String,
    pub text: String,
}

impl NewComment {
    pub fn validate(username: &Value, text: &Value) -> Result<Self, CommentError> {
        let username = bounded_str(username, USERNAME_CHARS).ok_or(CommentError::InvalidUsername)?;
        let text = bounded_str(text, TEXT_CHARS).ok_or(CommentError::InvalidText)?;

        let username = sanitize_username(username);
        if username.chars().count() < *USERNAME_CHARS.start() {
            return Err(CommentError::UsernameCharacters);
        }

        Ok(Self {
            username,
            text: sanitize_text(text),
        })
    }
}

fn bounded_str(value: &Value, bounds: RangeInclusive<usize>) -> Option<&str> {
    value
        .as_str()
        .filter(|s| bounds.contains(&s.chars().count()))
}

pub fn sanitize_username(input: &str) -> String {
    USERNAME_DISALLOWED
        .replace_all(input, "")
        .trim()
        .to_string()
}

pub fn sanitize_text(input: &str) -> String {
    input
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .trim()
        .to_string()
}
