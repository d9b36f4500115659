use crate::Token;
use serde::{Deserialize, Serialize};

/// A half-open arc (left, right] of the ring. A range whose left bound is not
/// below its right bound wraps through the minimum token; (t, t] covers the
/// whole ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub left: Token,
    pub right: Token,
}

/// In a non-wrapping part, a right bound of the minimum token stands for the
/// top of the space.
fn below_right(token: &Token, right: &Token) -> bool {
    right.is_min() || token < right
}

fn right_within(right: &Token, outer_right: &Token) -> bool {
    outer_right.is_min() || (!right.is_min() && right <= outer_right)
}

impl Range {
    pub fn new(left: Token, right: Token) -> Self {
        Self { left, right }
    }

    pub fn is_wrapping(&self) -> bool {
        self.left >= self.right
    }

    pub fn contains(&self, token: &Token) -> bool {
        if self.is_wrapping() {
            *token > self.left || *token <= self.right
        } else {
            *token > self.left && *token <= self.right
        }
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains_range(&self, other: &Range) -> bool {
        if self.left == self.right {
            return true;
        }
        if other.left == other.right {
            return false;
        }
        other.unwrapped().into_iter().all(|inner| {
            self.unwrapped()
                .iter()
                .any(|outer| outer.left <= inner.left && right_within(&inner.right, &outer.right))
        })
    }

    pub fn intersects(&self, other: &Range) -> bool {
        for a in self.unwrapped() {
            for b in other.unwrapped() {
                if below_right(&a.left, &b.right) && below_right(&b.left, &a.right) {
                    return true;
                }
            }
        }
        false
    }

    /// Split a wrapping range at the minimum token, yielding one or two
    /// non-wrapping parts covering the same arc.
    pub fn unwrapped(&self) -> Vec<Range> {
        if !self.is_wrapping() || self.right.is_min() {
            return vec![self.clone()];
        }
        let mut parts = Vec::with_capacity(2);
        if !self.left.is_min() {
            parts.push(Range::new(self.left.clone(), Token::min()));
        }
        parts.push(Range::new(Token::min(), self.right.clone()));
        parts
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{}]", self.left, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(left: &str, right: &str) -> Range {
        Range::new(Token::from(left), Token::from(right))
    }

    #[test]
    fn containment_is_half_open() {
        let arc = range("20", "60");
        assert!(!arc.contains(&Token::from("20")));
        assert!(arc.contains(&Token::from("21")));
        assert!(arc.contains(&Token::from("60")));
        assert!(!arc.contains(&Token::from("61")));
    }

    #[test]
    fn wrapping_containment() {
        let arc = range("c0", "20");
        assert!(arc.contains(&Token::from("c1")));
        assert!(arc.contains(&Token::from("ff")));
        assert!(arc.contains(&Token::min()));
        assert!(arc.contains(&Token::from("20")));
        assert!(!arc.contains(&Token::from("21")));
        assert!(!arc.contains(&Token::from("c0")));
    }

    #[test]
    fn full_ring_contains_everything() {
        let arc = range("55", "55");
        for text in ["", "00", "55", "56", "ff"] {
            assert!(arc.contains(&Token::from(text)), "missing {text:?}");
        }
        assert!(arc.contains_range(&range("10", "20")));
        assert!(!range("10", "20").contains_range(&arc));
    }

    #[test]
    fn range_containment() {
        assert!(range("10", "60").contains_range(&range("20", "30")));
        assert!(range("10", "60").contains_range(&range("10", "60")));
        assert!(!range("10", "60").contains_range(&range("05", "30")));
        assert!(!range("10", "60").contains_range(&range("20", "70")));
        assert!(range("c0", "20").contains_range(&range("d0", "10")));
        assert!(range("c0", "20").contains_range(&range("d0", "e0")));
        assert!(!range("c0", "20").contains_range(&range("d0", "30")));
    }

    #[test]
    fn unwrap_splits_at_minimum() {
        assert_eq!(range("20", "60").unwrapped(), vec![range("20", "60")]);
        assert_eq!(
            range("c0", "20").unwrapped(),
            vec![range("c0", ""), range("", "20")]
        );
        // A wrap that ends exactly at the minimum is already flat.
        assert_eq!(range("c0", "").unwrapped(), vec![range("c0", "")]);
    }

    #[test]
    fn intersection() {
        assert!(range("10", "30").intersects(&range("20", "40")));
        assert!(!range("10", "20").intersects(&range("20", "30")));
        assert!(range("c0", "20").intersects(&range("10", "30")));
        assert!(range("c0", "20").intersects(&range("d0", "e0")));
        assert!(!range("c0", "20").intersects(&range("30", "40")));
        assert!(range("55", "55").intersects(&range("10", "11")));
    }
}
