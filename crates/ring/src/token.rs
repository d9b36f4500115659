use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A position on the ring. Tokens are Unicode strings ordered
/// lexicographically over their 16-bit code units; the empty string is the
/// minimum token. The first two hex characters, when present, name a
/// "domain" byte (0..=255) used to shard large tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The minimum token; every other token sorts after it.
    pub fn min() -> Self {
        Self(String::new())
    }

    pub fn is_min(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn units(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.encode_utf16()
    }

    /// The domain byte named by the two-hex-character prefix, if present.
    pub fn domain(&self) -> Option<u8> {
        let prefix = self.0.get(0..2)?;
        u8::from_str_radix(prefix, 16).ok()
    }

    /// The token text past the domain prefix.
    pub fn past_domain(&self) -> &str {
        if self.domain().is_some() {
            &self.0[2..]
        } else {
            &self.0
        }
    }

    /// Build a token carrying `domain` as its hex prefix.
    pub fn with_domain(domain: u8, rest: &str) -> Self {
        Self(format!("{domain:02x}{rest}"))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        // 16-bit code unit order, not UTF-8 byte order: the two disagree for
        // supplementary-plane text and the unit order is the persisted one.
        self.0.encode_utf16().cmp(other.0.encode_utf16())
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// A raw key joined with the token it decorates to. Sort order is token
/// first, then raw key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    pub token: Token,
    pub key: Bytes,
}

impl DecoratedKey {
    pub fn new(token: Token, key: impl Into<Bytes>) -> Self {
        Self {
            token,
            key: key.into(),
        }
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.token, String::from_utf8_lossy(&self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_token_sorts_first() {
        let min = Token::min();
        assert!(min.is_min());
        for text in ["\u{0}", "0", "a", "zz"] {
            assert!(min < Token::from(text));
        }
    }

    #[test]
    fn order_follows_code_units() {
        assert!(Token::from("0000") < Token::from("0001"));
        assert!(Token::from("0001") < Token::from("8000"));
        // A supplementary-plane char (surrogate units ~0xd800) sorts below a
        // private-use BMP char (unit 0xe000), unlike UTF-8 byte order.
        assert!(Token::from("\u{10000}") < Token::from("\u{e000}"));
    }

    #[test]
    fn domain_prefix() {
        let token = Token::from("a3rest-of-key");
        assert_eq!(token.domain(), Some(0xa3));
        assert_eq!(token.past_domain(), "rest-of-key");

        assert_eq!(Token::from("zz").domain(), None);
        assert_eq!(Token::from("a").domain(), None);

        let built = Token::with_domain(0x07, "tail");
        assert_eq!(built.as_str(), "07tail");
        assert_eq!(built.domain(), Some(0x07));
    }

    #[test]
    fn decorated_keys_sort_by_token_then_key() {
        let a = DecoratedKey::new(Token::from("11"), "b");
        let b = DecoratedKey::new(Token::from("11"), "c");
        let c = DecoratedKey::new(Token::from("22"), "a");
        assert!(a < b);
        assert!(b < c);
    }
}
