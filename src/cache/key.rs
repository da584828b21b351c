//! Cache key namespaces and identifier derivation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

static URL_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("URL pattern compiles"));

/// Key-space namespaces. The prefix strings are part of the storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Raw,
    Parsed,
    Summarized,
    SuggestionsJson,
    Accounts,
    Quotas,
    Sessions,
}

impl Namespace {
    pub const ALL: [Namespace; 7] = [
        Namespace::Raw,
        Namespace::Parsed,
        Namespace::Summarized,
        Namespace::SuggestionsJson,
        Namespace::Accounts,
        Namespace::Quotas,
        Namespace::Sessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Raw => "raw",
            Namespace::Parsed => "parsed",
            Namespace::Summarized => "summarized",
            Namespace::SuggestionsJson => "suggestions-json",
            Namespace::Accounts => "accounts",
            Namespace::Quotas => "quotas",
            Namespace::Sessions => "sessions",
        }
    }

    /// Key for `id` in this namespace.
    pub fn key(&self, id: &str) -> CacheKey {
        CacheKey::new(*self, id)
    }

    /// Pattern matching every key in this namespace (`<ns>:*`).
    pub fn pattern(&self) -> KeyPattern {
        KeyPattern::prefix(format!("{}:", self.as_str()))
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced key: `<namespace>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    namespace: Namespace,
    id: String,
    rendered: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        let id = id.into();
        let rendered = format!("{}:{}", namespace.as_str(), id);
        Self {
            namespace,
            id,
            rendered,
        }
    }

    /// Parse a rendered key back into namespace and identifier.
    ///
    /// Only the first `:` separates the namespace, so identifiers such as
    /// URLs may themselves contain colons.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, id) = raw.split_once(':')?;
        let namespace = Namespace::ALL.into_iter().find(|ns| ns.as_str() == prefix)?;
        Some(Self::new(namespace, id))
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

/// Key pattern shared by every backend: a literal prefix, optionally followed
/// by a single trailing `*` wildcard. Without the wildcard the pattern matches
/// exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    literal: String,
    wildcard: bool,
}

impl KeyPattern {
    /// Parse caller syntax. Only a trailing `*` is a wildcard; any other `*`
    /// is taken literally.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::prefix(prefix),
            None => Self::exact(pattern),
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            literal: prefix.into(),
            wildcard: true,
        }
    }

    pub fn exact(key: impl Into<String>) -> Self {
        Self {
            literal: key.into(),
            wildcard: false,
        }
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn is_prefix(&self) -> bool {
        self.wildcard
    }

    pub fn matches(&self, key: &str) -> bool {
        if self.wildcard {
            key.starts_with(&self.literal)
        } else {
            key == self.literal
        }
    }

    /// Render as a Redis glob with the literal part escaped, so that `?`, `[`
    /// and friends inside URLs do not widen the match.
    pub fn to_glob(&self) -> String {
        let mut out = String::with_capacity(self.literal.len() + 2);
        for c in self.literal.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        if self.wildcard {
            out.push('*');
        }
        out
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.wildcard {
            write!(f, "{}*", self.literal)
        } else {
            f.write_str(&self.literal)
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// First URL-looking token in `input`, if any.
pub fn find_url(input: &str) -> Option<&str> {
    URL_RX.find(input).map(|m| m.as_str())
}

/// Stable identifier for an input: the recognized URL verbatim, otherwise the
/// content hash of the text with surrounding whitespace removed.
pub fn derive_id(input: &str) -> String {
    let input = input.trim();
    match find_url(input) {
        Some(url) => url.to_string(),
        None => hash_content(input),
    }
}
