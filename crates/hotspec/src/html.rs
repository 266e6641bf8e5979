//! HTML expectations: normalization and token matching
//!
//! Comparison is string based. Both sides are normalized (comments removed,
//! whitespace collapsed, whitespace next to tag boundaries dropped) before an
//! exact comparison, or before walking a token list of literals and regex
//! matchers with a cursor.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::trace;

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static AFTER_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+").unwrap());
static BEFORE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+<").unwrap());

/// Normalize markup for comparison
pub fn normalize(html: &str) -> String {
    let html = COMMENT.replace_all(html, "");
    let html = WHITESPACE.replace_all(&html, " ");
    let html = AFTER_TAG.replace_all(&html, ">");
    let html = BEFORE_TAG.replace_all(&html, "<");
    html.trim().to_string()
}

/// One token of a mixed literal/matcher expectation
#[derive(Debug, Clone)]
pub enum HtmlToken {
    Literal(String),
    Matcher(Regex),
}

impl PartialEq for HtmlToken {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HtmlToken::Literal(a), HtmlToken::Literal(b)) => a == b,
            (HtmlToken::Matcher(a), HtmlToken::Matcher(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Expected output of an html step
#[derive(Debug, Clone, PartialEq)]
pub enum HtmlExpect {
    Text(String),
    Tokens(Vec<HtmlToken>),
}

impl HtmlExpect {
    /// Build from accumulated tokens, collapsing to plain text when there is no matcher
    pub(crate) fn from_tokens(tokens: Vec<HtmlToken>) -> Self {
        if tokens.iter().all(|t| matches!(t, HtmlToken::Literal(_))) {
            let text = tokens
                .into_iter()
                .filter_map(|t| match t {
                    HtmlToken::Literal(s) => Some(s),
                    HtmlToken::Matcher(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            HtmlExpect::Text(text)
        } else {
            HtmlExpect::Tokens(tokens)
        }
    }

    pub(crate) fn into_tokens(self) -> Vec<HtmlToken> {
        match self {
            HtmlExpect::Text(text) => vec![HtmlToken::Literal(text)],
            HtmlExpect::Tokens(tokens) => tokens,
        }
    }

    /// Check `actual` against this expectation. The error is a short mismatch reason.
    pub fn check(&self, actual: &str) -> Result<(), String> {
        let actual = normalize(actual);
        match self {
            HtmlExpect::Text(expected) => {
                let expected = normalize(expected);
                if expected == actual {
                    Ok(())
                } else {
                    Err("output differs".to_string())
                }
            }
            HtmlExpect::Tokens(tokens) => match_tokens(tokens, &actual),
        }
    }
}

impl fmt::Display for HtmlExpect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtmlExpect::Text(text) => write!(f, "{}", normalize(text)),
            HtmlExpect::Tokens(tokens) => {
                for token in tokens {
                    match token {
                        HtmlToken::Literal(s) => write!(f, "{}", normalize(s))?,
                        HtmlToken::Matcher(re) => write!(f, "/{}/", re.as_str())?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn match_tokens(tokens: &[HtmlToken], actual: &str) -> Result<(), String> {
    let mut rest = actual;
    for token in tokens {
        rest = rest.trim_start();
        match token {
            HtmlToken::Literal(literal) => {
                let literal = normalize(literal);
                match rest.get(..literal.len()) {
                    Some(head) if head == literal => {
                        trace!("literal {:?} matched", literal);
                        rest = &rest[literal.len()..];
                    }
                    _ => return Err(format!("expected {:?} at {:?}", literal, rest)),
                }
            }
            HtmlToken::Matcher(re) => match re.find(rest) {
                Some(m) if m.start() == 0 => {
                    trace!("matcher /{}/ consumed {:?}", re.as_str(), m.as_str());
                    rest = &rest[m.end()..];
                }
                _ => return Err(format!("/{}/ does not match at {:?}", re.as_str(), rest)),
            },
        }
    }

    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(format!("unexpected trailing output {:?}", rest.trim()))
    }
}
