use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Words per page never drops below this, so a page is at least 32KiB.
const MIN_PAGE_SIZE: usize = 4096;

/// A two-dimensional open bitset holding up to 64 * 2^31 - 1 bits.
///
/// Words are spread over `page_size` pages of `page_size` words each, where
/// `page_size` is the next power of two of the square root of the used word
/// count. Equal dimensions keep every allocation the same modest size no
/// matter how large the filter grows. The set is not resizable: the used
/// word length is fixed at construction and bounds every scan.
pub struct PagedBitSet {
    pages: Vec<Vec<u64>>,
    page_size: usize,
    page_shift: u32,
    wlen: usize,
    num_bits: u64,
}

fn words_for(num_bits: u64) -> usize {
    ((num_bits + 63) >> 6) as usize
}

impl PagedBitSet {
    /// Capacity is rounded up to whole words, so the usable bit count of a
    /// reconstructed set matches the word stream it was read from.
    pub fn with_bits(num_bits: u64) -> Self {
        let wlen = words_for(num_bits);
        let page_size = ((wlen as f64).sqrt().ceil() as usize)
            .next_power_of_two()
            .max(MIN_PAGE_SIZE);
        let pages = vec![vec![0u64; page_size]; page_size];

        Self {
            pages,
            page_size,
            page_shift: page_size.trailing_zeros(),
            wlen,
            num_bits: (wlen as u64) << 6,
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn word_len(&self) -> usize {
        self.wlen
    }

    #[inline]
    fn word(&self, word: usize) -> u64 {
        self.pages[word >> self.page_shift][word & (self.page_size - 1)]
    }

    #[inline]
    fn word_mut(&mut self, word: usize) -> &mut u64 {
        &mut self.pages[word >> self.page_shift][word & (self.page_size - 1)]
    }

    pub fn get(&self, index: u64) -> bool {
        debug_assert!(index < self.num_bits);
        let word = (index >> 6) as usize;
        self.word(word) & (1u64 << (index & 63)) != 0
    }

    pub fn set(&mut self, index: u64) {
        debug_assert!(index < self.num_bits);
        let word = (index >> 6) as usize;
        *self.word_mut(word) |= 1u64 << (index & 63);
    }

    pub fn clear(&mut self, index: u64) {
        debug_assert!(index < self.num_bits);
        let word = (index >> 6) as usize;
        *self.word_mut(word) &= !(1u64 << (index & 63));
    }

    pub fn flip(&mut self, index: u64) {
        debug_assert!(index < self.num_bits);
        let word = (index >> 6) as usize;
        *self.word_mut(word) ^= 1u64 << (index & 63);
    }

    /// Set the bits of [lo, hi).
    pub fn set_range(&mut self, lo: u64, hi: u64) {
        self.apply_range(lo, hi, |word, mask| *word |= mask);
    }

    /// Clear the bits of [lo, hi).
    pub fn clear_range(&mut self, lo: u64, hi: u64) {
        self.apply_range(lo, hi, |word, mask| *word &= !mask);
    }

    /// Flip the bits of [lo, hi).
    pub fn flip_range(&mut self, lo: u64, hi: u64) {
        self.apply_range(lo, hi, |word, mask| *word ^= mask);
    }

    fn apply_range(&mut self, lo: u64, hi: u64, op: impl Fn(&mut u64, u64)) {
        if lo >= hi {
            return;
        }
        debug_assert!(hi <= self.num_bits);

        let start_word = (lo >> 6) as usize;
        let end_word = ((hi - 1) >> 6) as usize;
        // Ranges may not span a page boundary.
        debug_assert_eq!(start_word >> self.page_shift, end_word >> self.page_shift);

        let start_mask = u64::MAX << (lo & 63);
        let end_mask = u64::MAX >> (63 - ((hi - 1) & 63));

        if start_word == end_word {
            op(self.word_mut(start_word), start_mask & end_mask);
            return;
        }
        op(self.word_mut(start_word), start_mask);
        for word in start_word + 1..end_word {
            op(self.word_mut(word), u64::MAX);
        }
        op(self.word_mut(end_word), end_mask);
    }

    pub fn cardinality(&self) -> u64 {
        (0..self.wlen).map(|w| self.word(w).count_ones() as u64).sum()
    }

    /// The index of the first set bit at or after `from`, if any.
    pub fn next_set_bit(&self, from: u64) -> Option<u64> {
        if from >= self.num_bits {
            return None;
        }
        let mut word = (from >> 6) as usize;
        let mut current = self.word(word) >> (from & 63);

        if current != 0 {
            return Some(from + current.trailing_zeros() as u64);
        }
        word += 1;
        while word < self.wlen {
            let bits = self.word(word);
            if bits != 0 {
                return Some(((word as u64) << 6) + bits.trailing_zeros() as u64);
            }
            word += 1;
        }
        None
    }

    /// Intersect with `other` in place. Words beyond `other`'s used length
    /// are cleared.
    pub fn intersect(&mut self, other: &PagedBitSet) {
        let shared = self.wlen.min(other.wlen);
        for word in 0..shared {
            *self.word_mut(word) &= other.word(word);
        }
        for word in shared..self.wlen {
            *self.word_mut(word) = 0;
        }
    }

    /// Write the used words, most significant byte first.
    pub fn write_words(&self, w: &mut impl Write) -> std::io::Result<()> {
        for word in 0..self.wlen {
            w.write_u64::<BigEndian>(self.word(word))?;
        }
        Ok(())
    }

    /// Rebuild a bitset of `wlen` words from a big-endian word stream.
    pub fn read_words(r: &mut impl Read, wlen: usize) -> std::io::Result<Self> {
        let mut bits = Self::with_bits((wlen as u64) << 6);
        for word in 0..wlen {
            *bits.word_mut(word) = r.read_u64::<BigEndian>()?;
        }
        Ok(bits)
    }
}

impl PartialEq for PagedBitSet {
    fn eq(&self, other: &Self) -> bool {
        let shared = self.wlen.min(other.wlen);
        for word in 0..shared {
            if self.word(word) != other.word(word) {
                return false;
            }
        }
        // Any trailing words of the longer set must be empty.
        let (longer, from) = if self.wlen > other.wlen {
            (self, other.wlen)
        } else {
            (other, self.wlen)
        };
        (from..longer.wlen).all(|word| longer.word(word) == 0)
    }
}

impl Eq for PagedBitSet {}

impl std::hash::Hash for PagedBitSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Trailing zero words do not participate, so equal sets of unequal
        // lengths hash alike.
        let mut last = self.wlen;
        while last > 0 && self.word(last - 1) == 0 {
            last -= 1;
        }
        for word in 0..last {
            self.word(word).hash(state);
        }
    }
}

impl std::fmt::Debug for PagedBitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedBitSet")
            .field("num_bits", &self.num_bits)
            .field("cardinality", &self.cardinality())
            .finish()
    }
}
