use crate::metadata::first_token_index;
use crate::{DecoratedKey, RingError, Token};
use num_bigint::BigUint;
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Maps keys to ring positions. Two implementations coexist and are selected
/// at configuration time: the plain order-preserving partitioner, and the
/// domain-sharded variant that reserves a two-hex-character token prefix as a
/// shard identifier.
pub trait Partitioner: Send + Sync {
    fn token(&self, key: &str) -> Token;

    fn decorate_key(&self, key: &str) -> DecoratedKey {
        DecoratedKey::new(self.token(key), key.as_bytes().to_vec())
    }

    fn min_token(&self) -> Token {
        Token::min()
    }

    /// A token drawn from a non-cryptographic RNG. Test fixtures only;
    /// production token assignment goes through the balancer.
    fn random_token(&self) -> Token;

    fn preserves_order(&self) -> bool {
        true
    }

    fn validate_token(&self, token: &Token) -> Result<(), RingError>;

    /// The token halfway along the arc (left, right], wrapping through the
    /// minimum token when `left >= right`.
    fn midpoint(&self, left: &Token, right: &Token) -> Token {
        midpoint_units(left, right)
    }

    /// Ownership fraction per ring token, from split-point sampling: each arc
    /// `(sorted[i-1], sorted[i]]` weighs the sampled split points it
    /// contains, normalized to one. Empty ring: ownership is undefined and
    /// the map is empty.
    fn describe_ownership(&self, sorted: &[Token]) -> HashMap<Token, f64>;

    fn token_factory(&self) -> TokenFactory;
}

/// Token (de)serialization for one partitioner's token space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFactory {
    Plain,
    DomainPrefixed,
}

impl TokenFactory {
    pub fn to_text(&self, token: &Token) -> String {
        token.as_str().to_string()
    }

    pub fn from_text(&self, text: &str) -> Result<Token, RingError> {
        let token = Token::new(text);
        self.validate(&token)?;
        Ok(token)
    }

    pub fn to_bytes(&self, token: &Token) -> Vec<u8> {
        token.as_str().as_bytes().to_vec()
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Token, RingError> {
        let text = String::from_utf8(bytes.to_vec())?;
        self.from_text(&text)
    }

    fn validate(&self, token: &Token) -> Result<(), RingError> {
        match self {
            TokenFactory::Plain => Ok(()),
            TokenFactory::DomainPrefixed if token.domain().is_some() => Ok(()),
            TokenFactory::DomainPrefixed => Err(RingError::InvalidToken {
                token: token.as_str().to_string(),
                reason: "missing two-hex-character domain prefix",
            }),
        }
    }
}

/// Token = key, ordered as the key text itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderPreservingPartitioner;

impl Partitioner for OrderPreservingPartitioner {
    fn token(&self, key: &str) -> Token {
        Token::new(key)
    }

    fn random_token(&self) -> Token {
        let mut rng = SmallRng::from_entropy();
        let text: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Token::new(text)
    }

    fn validate_token(&self, _token: &Token) -> Result<(), RingError> {
        Ok(())
    }

    fn describe_ownership(&self, sorted: &[Token]) -> HashMap<Token, f64> {
        // 256 one-unit split points spread evenly over the unit space.
        let samples = (0u16..=255).map(|i| {
            let unit = i << 8;
            Token::new(unit_char(unit).to_string())
        });
        ownership_from_samples(sorted, samples)
    }

    fn token_factory(&self) -> TokenFactory {
        TokenFactory::Plain
    }
}

/// Order-preserving over domain-prefixed keys: the first two hex characters
/// carve the ring into 256 shards.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomainPartitioner;

impl DomainPartitioner {
    /// Prepend a hex-encoded domain byte to the remaining key text.
    pub fn string_token(&self, domain: u8, key: &str) -> Token {
        Token::with_domain(domain, key)
    }
}

impl Partitioner for DomainPartitioner {
    fn token(&self, key: &str) -> Token {
        Token::new(key)
    }

    fn random_token(&self) -> Token {
        let mut rng = SmallRng::from_entropy();
        let domain: u8 = rng.gen();
        let rest: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(14)
            .map(char::from)
            .collect();
        Token::with_domain(domain, &rest)
    }

    fn validate_token(&self, token: &Token) -> Result<(), RingError> {
        self.token_factory().validate(token)
    }

    fn describe_ownership(&self, sorted: &[Token]) -> HashMap<Token, f64> {
        // One split point per domain boundary.
        let samples = (0u16..=255).map(|domain| Token::with_domain(domain as u8, ""));
        ownership_from_samples(sorted, samples)
    }

    fn token_factory(&self) -> TokenFactory {
        TokenFactory::DomainPrefixed
    }
}

fn ownership_from_samples(
    sorted: &[Token],
    samples: impl Iterator<Item = Token>,
) -> HashMap<Token, f64> {
    if sorted.is_empty() {
        return HashMap::new();
    }
    let mut counts = vec![0u64; sorted.len()];
    let mut total = 0u64;
    for sample in samples {
        counts[first_token_index(sorted, &sample)] += 1;
        total += 1;
    }
    sorted
        .iter()
        .cloned()
        .zip(counts)
        .map(|(token, count)| (token, count as f64 / total as f64))
        .collect()
}

fn unit_char(unit: u16) -> char {
    // Rust strings exclude the surrogate gap; clamp to the next valid unit.
    // Hex-prefixed token spaces never reach it.
    char::from_u32(unit as u32).unwrap_or('\u{e000}')
}

fn big_from_units(units: &[u16], width: usize) -> BigUint {
    let mut big = BigUint::default();
    for i in 0..width {
        big <<= 16;
        big += units.get(i).copied().unwrap_or(0) as u32;
    }
    big
}

fn token_from_big(mut big: BigUint, width: usize, remainder: bool) -> Token {
    let mask = BigUint::from(0xffffu32);
    let mut units = vec![0u16; width];
    for slot in units.iter_mut().rev() {
        let low = &big & &mask;
        *slot = low.to_u32_digits().first().copied().unwrap_or(0) as u16;
        big >>= 16;
    }
    if remainder {
        // An odd sum rounds down; the trailing half-unit keeps the midpoint
        // strictly inside the arc.
        units.push(0x8000);
    }
    Token::new(units.into_iter().map(unit_char).collect::<String>())
}

/// Average two tokens as unsigned big integers packed from 16-bit code units
/// at width `max(|a|, |b|)`, wrapping through zero when `left >= right`.
pub(crate) fn midpoint_units(left: &Token, right: &Token) -> Token {
    let left_units: Vec<u16> = left.units().collect();
    let right_units: Vec<u16> = right.units().collect();
    let width = left_units.len().max(right_units.len());

    let left_big = big_from_units(&left_units, width);
    let right_big = big_from_units(&right_units, width);

    let sum = if left_big < right_big {
        left_big + right_big
    } else {
        left_big + right_big + (BigUint::from(1u32) << (16 * width))
    };
    let remainder = sum.bit(0);
    let mid = (sum >> 1) & ((BigUint::from(1u32) << (16 * width)) - 1u32);

    token_from_big(mid, width, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_averages_units() {
        let p = OrderPreservingPartitioner;
        assert_eq!(p.midpoint(&Token::from("a"), &Token::from("c")).as_str(), "b");
        assert_eq!(
            p.midpoint(&Token::from("aa"), &Token::from("cc")).as_str(),
            "bb"
        );
    }

    #[test]
    fn midpoint_odd_sum_appends_half_unit() {
        let p = OrderPreservingPartitioner;
        let mid = p.midpoint(&Token::from("a"), &Token::from("b"));
        assert_eq!(mid.as_str(), "a\u{8000}");
        assert!(Token::from("a") < mid && mid < Token::from("b"));
    }

    #[test]
    fn midpoint_pads_to_wider_token() {
        let p = OrderPreservingPartitioner;
        let mid = p.midpoint(&Token::from("a"), &Token::from("ab"));
        assert!(Token::from("a") < mid && mid < Token::from("ab"), "got {mid:?}");
    }

    #[test]
    fn midpoint_wraps() {
        let p = OrderPreservingPartitioner;
        let mid = p.midpoint(&Token::from("c"), &Token::from("a"));
        // Halfway around the wrap from 0x63 back to 0x61.
        assert!(mid > Token::from("c") || mid <= Token::from("a"), "got {mid:?}");
    }

    #[test]
    fn factories_round_trip() {
        let partitioners: [&dyn Partitioner; 2] =
            [&OrderPreservingPartitioner, &DomainPartitioner];
        for partitioner in partitioners {
            let factory = partitioner.token_factory();
            for _ in 0..32 {
                let token = partitioner.random_token();
                assert_eq!(factory.from_text(&factory.to_text(&token)).unwrap(), token);
                assert_eq!(
                    factory.from_bytes(&factory.to_bytes(&token)).unwrap(),
                    token
                );
            }
        }
    }

    #[test]
    fn domain_tokens_validate() {
        let p = DomainPartitioner;
        assert!(p.validate_token(&Token::from("00key")).is_ok());
        assert!(p.validate_token(&Token::from("xxkey")).is_err());
        assert_eq!(p.string_token(0xa3, "key").as_str(), "a3key");
    }

    #[test]
    fn ownership_sums_to_one() {
        let p = DomainPartitioner;
        let sorted = vec![Token::from("20"), Token::from("80"), Token::from("e0")];
        let ownership = p.describe_ownership(&sorted);

        let total: f64 = ownership.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Arc (20, 80] holds 0x21..=0x80: 96 of 256 samples.
        assert!((ownership[&Token::from("80")] - 96.0 / 256.0).abs() < 1e-9);

        assert!(p.describe_ownership(&[]).is_empty());
    }
}
