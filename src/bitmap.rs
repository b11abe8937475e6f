//! Defines the [`Bitmap`] struct.

use core::mem::size_of;

use snafu::ensure;

use crate::error::{ArenaTooSmallSnafu, Result};
use crate::region::Region;

/// Number of bits in one storage word.
pub const BITS_PER_WORD: usize = usize::BITS as usize;

const WORD_SIZE: usize = size_of::<usize>();

/// A fixed-capacity bit vector kept in machine words inside a [`Region`].
///
/// Bit `i` lives in word `i / BITS_PER_WORD` at position `i % BITS_PER_WORD`.
/// Bits past [`len`](Bitmap::len) in the last word are padding and never reported.
#[derive(Debug)]
pub struct Bitmap {
    words: Region,
    len: usize,
}

impl Bitmap {
    /// Returns how many words are needed to hold `len` bits.
    #[inline]
    pub const fn word_count(len: usize) -> usize {
        len.div_ceil(BITS_PER_WORD)
    }

    /// Returns how many bytes of storage are needed to hold `len` bits.
    #[inline]
    pub const fn storage_size(len: usize) -> usize {
        Self::word_count(len) * WORD_SIZE
    }

    /// Creates a bitmap of `len` bits at the front of `storage`, with every bit clear
    /// or, if `clear` is false, every bit set.
    pub fn new(storage: Region, len: usize, clear: bool) -> Result<Self> {
        let required = Self::storage_size(len);
        ensure!(
            storage.len() >= required,
            ArenaTooSmallSnafu {
                required,
                available: storage.len(),
            }
        );

        let bitmap = Bitmap {
            words: storage.subregion(0, required),
            len,
        };
        match clear {
            true => bitmap.clear_all(),
            false => bitmap.set_all(),
        }
        Ok(bitmap)
    }

    /// Number of addressable bits.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);
        self.word(word) & mask != 0
    }

    #[inline]
    pub fn is_clear(&self, index: usize) -> bool {
        !self.is_set(index)
    }

    #[inline]
    pub fn set(&self, index: usize) {
        let (word, mask) = self.locate(index);
        self.set_word(word, self.word(word) | mask);
    }

    #[inline]
    pub fn clear(&self, index: usize) {
        let (word, mask) = self.locate(index);
        self.set_word(word, self.word(word) & !mask);
    }

    pub fn set_all(&self) {
        self.words.fill(0, self.words.len(), 0xFF);
    }

    pub fn clear_all(&self) {
        self.words.fill(0, self.words.len(), 0);
    }

    pub fn all_set(&self) -> bool {
        (0..Self::word_count(self.len)).all(|i| {
            let valid = self.valid_bits(i);
            self.word(i) & valid == valid
        })
    }

    pub fn all_clear(&self) -> bool {
        (0..Self::word_count(self.len)).all(|i| self.word(i) & self.valid_bits(i) == 0)
    }

    /// Returns the lowest index whose bit is set.
    pub fn find_first_set(&self) -> Option<usize> {
        self.find(true)
    }

    /// Returns the lowest index whose bit is clear.
    pub fn find_first_clear(&self) -> Option<usize> {
        self.find(false)
    }

    /// Skips whole words that hold only the absent value, then bit-scans the first one
    /// that doesn't. Padding bits are masked so they are never reported.
    fn find(&self, set: bool) -> Option<usize> {
        (0..Self::word_count(self.len)).find_map(|i| {
            let word = match set {
                true => self.word(i),
                false => !self.word(i),
            } & self.valid_bits(i);
            (word != 0).then(|| i * BITS_PER_WORD + word.trailing_zeros() as usize)
        })
    }

    /// Mask of the bits of word `i` that lie below `len`.
    #[inline]
    fn valid_bits(&self, i: usize) -> usize {
        let remaining = self.len - i * BITS_PER_WORD;
        match remaining >= BITS_PER_WORD {
            true => usize::MAX,
            false => (1 << remaining) - 1,
        }
    }

    #[inline(always)]
    fn locate(&self, index: usize) -> (usize, usize) {
        debug_assert!(
            index < self.len,
            "Bit {index} is out of range for a bitmap of {} bits.",
            self.len
        );
        (index / BITS_PER_WORD, 1 << (index % BITS_PER_WORD))
    }

    #[inline(always)]
    fn word(&self, i: usize) -> usize {
        self.words.read(i * WORD_SIZE)
    }

    #[inline(always)]
    fn set_word(&self, i: usize, value: usize) {
        self.words.write(i * WORD_SIZE, value)
    }
}
