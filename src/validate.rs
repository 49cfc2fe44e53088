//! Rule evaluation
//!
//! The engine treats validation as a pluggable seam: anything implementing
//! [`RuleValidator`] can judge a raw value against a resolved rule set.
//! [`StandardValidator`] ships in the box and covers the token vocabulary the
//! persisted rule strings use.

use crate::rule::{RuleSet, RuleToken};
use log::debug;
use regex::Regex;
use std::sync::OnceLock;

/// Pass/fail judgment over a raw string value and a resolved rule set.
///
/// Returns `Err(reason)` with a human-readable failure reason; the engine
/// wraps it into [`Error::Validation`](crate::Error::Validation).
pub trait RuleValidator: Send + Sync {
    fn validate(&self, value: &str, rules: &RuleSet) -> Result<(), String>;
}

/// Built-in validator for the standard token vocabulary.
///
/// Supported tokens: `required`, `nullable`, `sometimes`, `string`,
/// `boolean`, `integer`, `numeric`, `email`, `url`, and `regex:/pattern/flags`
/// rules. Unknown tokens pass; configured types supply their enforcement via
/// the per-type `validate` override, which is already expanded by the time a
/// rule set reaches the validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardValidator;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .unwrap_or_else(|e| unreachable!("static email pattern: {e}"))
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s]+$")
            .unwrap_or_else(|e| unreachable!("static url pattern: {e}"))
    })
}

/// Extract `(pattern, case_insensitive)` out of a `regex:/pattern/flags` rule.
///
/// The delimiters are optional; a bare `regex:pattern` is accepted as well.
fn parse_regex_rule(rule: &str) -> (String, bool) {
    let body = rule.trim_start_matches("regex:");
    if let Some(stripped) = body.strip_prefix('/') {
        if let Some(end) = stripped.rfind('/') {
            let pattern = &stripped[..end];
            let flags = &stripped[end + 1..];
            return (pattern.to_string(), flags.contains('i'));
        }
    }
    (body.to_string(), false)
}

impl StandardValidator {
    fn check_token(value: &str, token: &str) -> Result<(), String> {
        match token {
            "required" => {
                if value.is_empty() {
                    Err("value is required".into())
                } else {
                    Ok(())
                }
            }
            // markers, handled at the rule-set level
            "nullable" | "sometimes" | "string" => Ok(()),
            "boolean" => {
                if matches!(value, "true" | "false" | "1" | "0") {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not a boolean"))
                }
            }
            "integer" => value
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{value}' is not an integer")),
            "numeric" => value
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("'{value}' is not numeric")),
            "email" => {
                if email_regex().is_match(value) {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not a valid email address"))
                }
            }
            "url" => {
                if url_regex().is_match(value) {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not a valid url"))
                }
            }
            other => {
                debug!("unknown validation token '{other}', accepting");
                Ok(())
            }
        }
    }

    fn check_regex(value: &str, rule: &str) -> Result<(), String> {
        let (pattern, insensitive) = parse_regex_rule(rule);
        let pattern = if insensitive {
            format!("(?i){pattern}")
        } else {
            pattern
        };
        let re = Regex::new(&pattern).map_err(|e| format!("invalid regex rule: {e}"))?;
        if re.is_match(value) {
            Ok(())
        } else {
            Err(format!("'{value}' does not match {rule}"))
        }
    }
}

impl RuleValidator for StandardValidator {
    fn validate(&self, value: &str, rules: &RuleSet) -> Result<(), String> {
        if rules.is_empty() {
            return Ok(());
        }
        // explicitly optional: an empty value skips the remaining checks
        if value.is_empty() && rules.is_optional() {
            return Ok(());
        }
        for token in rules.iter() {
            match token {
                RuleToken::Plain(t) => Self::check_token(value, t)?,
                RuleToken::Regex(r) => Self::check_regex(value, r)?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
