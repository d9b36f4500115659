use crate::calculations::{self, EXCESS};
use crate::murmur::murmur2_64;
use crate::{CodecError, PagedBitSet};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Double-hashing Bloom filter: bucket `i` of a key is `|h1 + i*h2|` modulo
/// the bucket count, with `h2` derived by re-hashing under `h1` as seed.
pub struct BloomFilter {
    hash_count: u32,
    bits: PagedBitSet,
}

/// The byte layout keys hash under: UTF-16 code units in reverse order, each
/// unit low byte first. Preserved from the original on-disk format.
pub fn string_key_bytes(key: &str) -> Vec<u8> {
    let units: Vec<u16> = key.encode_utf16().collect();
    let mut out = Vec::with_capacity(units.len() * 2);
    for unit in units.into_iter().rev() {
        out.push((unit & 0xff) as u8);
        out.push((unit >> 8) as u8);
    }
    out
}

impl BloomFilter {
    /// A filter sized for `elements` keys at `buckets_per_element` bits each,
    /// with the hash count taken from the optimal table.
    pub fn with_buckets(elements: u64, buckets_per_element: u32) -> Self {
        let hash_count = calculations::compute_best_k(buckets_per_element);
        let num_bits = elements * buckets_per_element as u64 + EXCESS;
        Self {
            hash_count,
            bits: PagedBitSet::with_bits(num_bits),
        }
    }

    /// A filter sized for `elements` keys at the cheapest bucket budget whose
    /// table probability is within `max_false_positive`.
    pub fn with_target_fp(elements: u64, max_false_positive: f64) -> Self {
        let spec = calculations::compute_buckets_and_k(max_false_positive);
        let num_bits = elements * spec.buckets_per_element as u64 + EXCESS;
        Self {
            hash_count: spec.k,
            bits: PagedBitSet::with_bits(num_bits),
        }
    }

    /// A one-word filter with every bucket set, so every key reports
    /// present. Test fixture.
    pub fn always_matching() -> Self {
        let mut bits = PagedBitSet::with_bits(1);
        bits.set_range(0, bits.num_bits());
        Self {
            hash_count: 1,
            bits,
        }
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    fn buckets(&self) -> u64 {
        self.bits.num_bits()
    }

    fn hash_buckets(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let h1 = murmur2_64(key, 0);
        let h2 = murmur2_64(key, h1);
        let buckets = self.buckets() as i64;

        (0..self.hash_count as i64).map(move |i| {
            let combined = (h1 as i64).wrapping_add((h2 as i64).wrapping_mul(i));
            let bucket = (combined % buckets).unsigned_abs();
            debug_assert!(bucket < buckets as u64);
            bucket
        })
    }

    pub fn add_bytes(&mut self, key: &[u8]) {
        for bucket in self.hash_buckets(key).collect::<Vec<_>>() {
            self.bits.set(bucket);
        }
    }

    pub fn contains_bytes(&self, key: &[u8]) -> bool {
        self.hash_buckets(key).all(|bucket| self.bits.get(bucket))
    }

    pub fn add(&mut self, key: &str) {
        self.add_bytes(&string_key_bytes(key));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.contains_bytes(&string_key_bytes(key))
    }

    /// Layout: `hash_count: i32 BE | word_len: i32 BE | words as u64 BE`.
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), CodecError> {
        w.write_i32::<BigEndian>(self.hash_count as i32)?;
        w.write_i32::<BigEndian>(self.bits.word_len() as i32)?;
        self.bits.write_words(w)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, CodecError> {
        let hash_count = r.read_i32::<BigEndian>()?;
        if hash_count < 1 {
            return Err(CodecError::InvalidHashCount(hash_count));
        }
        let wlen = r.read_i32::<BigEndian>()?;
        if wlen < 0 {
            return Err(CodecError::InvalidWordLength(wlen));
        }
        let bits = PagedBitSet::read_words(r, wlen as usize)?;
        Ok(Self {
            hash_count: hash_count as u32,
            bits,
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("hash_count", &self.hash_count)
            .field("buckets", &self.buckets())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn added_keys_are_present() {
        let mut filter = BloomFilter::with_buckets(100, 10);
        for key in ["", "a", "key-1", "key-2", "ключ", "鍵"] {
            filter.add(key);
            assert!(filter.contains(key), "lost {key:?}");
        }
        assert!(!filter.contains("never-added-key"));
    }

    #[test]
    fn byte_and_string_layouts_agree() {
        let mut filter = BloomFilter::with_buckets(10, 10);
        filter.add("shared");
        assert!(filter.contains_bytes(&string_key_bytes("shared")));

        // ASCII units emit (low, high) pairs in reverse unit order.
        assert_eq!(string_key_bytes("ab"), vec![b'b', 0, b'a', 0]);
        assert_eq!(string_key_bytes("\u{0416}"), vec![0x16, 0x04]);
    }

    #[test]
    fn always_matching_matches_everything() {
        let filter = BloomFilter::always_matching();
        for key in ["", "x", "anything at all"] {
            assert!(filter.contains(key));
        }
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        const ELEMENTS: u64 = 100_000;
        const LOOKUPS: u64 = 10_000;
        const TARGET: f64 = 0.02;

        let mut filter = BloomFilter::with_target_fp(ELEMENTS, TARGET);
        for i in 0..ELEMENTS {
            filter.add(&format!("present-{i}"));
        }

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut false_positives = 0u64;
        for _ in 0..LOOKUPS {
            let key = format!("absent-{}", rng.gen::<u64>());
            if filter.contains(&key) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / LOOKUPS as f64;
        assert!(rate <= TARGET * 1.1, "observed rate {rate}");
    }

    #[test]
    fn codec_layout_is_frozen() {
        let mut filter = BloomFilter::with_buckets(8, 2);
        filter.add("persisted");

        let mut buf = Vec::new();
        filter.write_to(&mut buf).unwrap();

        // hash_count, then word length, then that many big-endian words.
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
        let wlen = i32::from_be_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(buf.len(), 8 + wlen as usize * 8);

        let read = BloomFilter::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(read.hash_count(), filter.hash_count());
        assert!(read.contains("persisted"));
        assert!(!read.contains("missing"));
    }

    #[test]
    fn rejects_corrupt_headers() {
        let mut buf = Vec::new();
        BloomFilter::with_buckets(8, 2).write_to(&mut buf).unwrap();

        buf[3] = 0; // hash_count := 0
        assert!(matches!(
            BloomFilter::read_from(&mut buf.as_slice()),
            Err(CodecError::InvalidHashCount(0))
        ));
    }
}
