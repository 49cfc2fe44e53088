//! Validation-rule mini-language
//!
//! A setting's `validation_rules` string is either a pipe-delimited token
//! list (`"nullable|email"`) or a single regex rule (`"regex:/…/"`). This
//! module parses those strings once into tagged values, resolves the semantic
//! type a rule string maps to, and expands raw strings into the concrete rule
//! set handed to the validator (injecting the implicit `required` token and
//! applying per-type configuration overrides).

use crate::config::TypeDef;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Built-in semantic types, in lookup order. Configured types are consulted
/// ahead of these.
pub const BUILTIN_TYPES: [&str; 4] = ["boolean", "integer", "numeric", "string"];

/// Type name assigned to regex rules; cast is string passthrough.
pub const CUSTOM_TYPE: &str = "custom";

/// Well-known regex patterns carried over from the persisted rule vocabulary.
pub mod patterns {
    /// One or more `alias;local@domain` style addresses
    pub const EMAIL_ALIAS: &str =
        r"([a-z0-9\+_\-]+)*;([a-z0-9\+_\-]+)(\.[a-z0-9\+_\-]+)*@([a-z0-9\-]+\.)+[a-z]{2,6}$";
    /// Numeric list separated by semicolons, or empty
    pub const NUMERIC_LIST_SEMICOLON: &str = "(^[0-9;]+$)|(^.{0}$)";
    /// Numeric list separated by commas, or empty
    pub const NUMERIC_LIST_COMMA: &str = "(^[0-9,]+$)|(^.{0}$)";
    /// Numeric list separated by pipes, or empty
    pub const NUMERIC_LIST_PIPE: &str = "(^[0-9|]+$)|(^.{0}$)";
}

// =============================================================================
// Parsed Rules
// =============================================================================

/// A raw rule string parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// A single `regex:/pattern/` rule; never pipe-split.
    Regex(String),
    /// Pipe-delimited tokens.
    Tokens(Vec<String>),
}

impl Rule {
    /// Parse a raw rule string. A string containing `regex:` is one rule;
    /// anything else splits on `|`.
    pub fn parse(raw: &str) -> Rule {
        if raw.contains("regex:") {
            Rule::Regex(raw.to_string())
        } else {
            Rule::Tokens(raw.split('|').map(str::to_string).collect())
        }
    }
}

/// One concrete rule in a resolved rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleToken {
    /// Full `regex:/pattern/flags` rule, prefix included
    Regex(String),
    /// Plain token such as `required`, `integer`, `email`
    Plain(String),
}

/// The concrete rule list produced by [`resolve_rules`], consumed by the
/// validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    tokens: Vec<RuleToken>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleToken> {
        self.tokens.iter()
    }

    /// Whether empty values are explicitly allowed
    pub fn is_optional(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, RuleToken::Plain(p) if p == "nullable" || p == "sometimes"))
    }

    fn push_rule(&mut self, rule: Rule) {
        match rule {
            Rule::Regex(r) => self.tokens.push(RuleToken::Regex(r)),
            Rule::Tokens(ts) => self
                .tokens
                .extend(ts.into_iter().map(RuleToken::Plain)),
        }
    }
}

// =============================================================================
// Type Resolution
// =============================================================================

/// Resolve the semantic type a rule string maps to.
///
/// Regex rules always resolve to [`CUSTOM_TYPE`]. Otherwise the first
/// configured-or-builtin type name found among the pipe-delimited tokens
/// wins, configured types taking priority; unrecognized strings default to
/// `string`.
pub fn resolve_type<'a>(rule_string: &str, types: &'a [TypeDef]) -> &'a str {
    if rule_string.contains("regex") {
        return CUSTOM_TYPE;
    }
    let tokens: Vec<&str> = rule_string.split('|').collect();
    for def in types {
        if tokens.iter().any(|t| *t == def.name) {
            return &def.name;
        }
    }
    for builtin in BUILTIN_TYPES {
        if tokens.iter().any(|t| *t == builtin) {
            return builtin;
        }
    }
    "string"
}

/// Concrete rule string enforced for a type: the configured `validate`
/// override when present, otherwise the raw token itself.
pub fn rule_string_for(type_name: &str, fallback: &str, types: &[TypeDef]) -> String {
    types
        .iter()
        .find(|t| t.name == type_name)
        .and_then(|t| t.validate.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Inject the implicit `required` token.
///
/// Applies when the string is non-empty, carries neither `nullable` nor
/// `sometimes`, and is not a regex rule. Without this, empty values would
/// always pass token validation.
pub fn with_required(rule_string: &str) -> Cow<'_, str> {
    if !rule_string.is_empty()
        && !rule_string.contains("nullable")
        && !rule_string.contains("sometimes")
        && !rule_string.contains("regex:")
    {
        Cow::Owned(format!("required|{rule_string}"))
    } else {
        Cow::Borrowed(rule_string)
    }
}

/// Expand a raw rule string into the concrete [`RuleSet`].
///
/// Every token is resolved individually (its type looked up, the configured
/// `validate` override applied, the result parsed) and the pieces are
/// concatenated, so mixed strings like `nullable|isEmailList` work.
pub fn resolve_rules(rule_string: &str, types: &[TypeDef]) -> RuleSet {
    let raw = with_required(rule_string);
    let parsed = Rule::parse(&raw);

    let mut set = RuleSet::default();
    match parsed {
        Rule::Regex(r) => set.push_rule(Rule::Regex(r)),
        Rule::Tokens(tokens) => {
            for token in tokens {
                let type_name = resolve_type(&token, types);
                let concrete = rule_string_for(type_name, &token, types);
                set.push_rule(Rule::parse(&concrete));
            }
        }
    }
    set
}

// =============================================================================
// Pattern Checks
// =============================================================================

fn pattern_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern).unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

/// Whether the value is an `alias;address` email list entry
pub fn is_email_and_alias(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern_regex(&RE, patterns::EMAIL_ALIAS).is_match(value)
}

/// Whether the value is a semicolon-separated numeric list (or empty)
pub fn is_numeric_list_semicolon(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern_regex(&RE, patterns::NUMERIC_LIST_SEMICOLON).is_match(value)
}

/// Whether the value is a comma-separated numeric list (or empty)
pub fn is_numeric_list_comma(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern_regex(&RE, patterns::NUMERIC_LIST_COMMA).is_match(value)
}

/// Whether the value is a pipe-separated numeric list (or empty)
pub fn is_numeric_list_pipe(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern_regex(&RE, patterns::NUMERIC_LIST_PIPE).is_match(value)
}

// =============================================================================
// Tests
// =============================================================================
