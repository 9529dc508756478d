//! Bit-packed 2D buffer for validity masks.
//!
//! Uses 1 bit per element. `true` means the pixel is valid.

use serde::{Deserialize, Serialize};

/// Number of bits per storage word.
const BITS_PER_WORD: usize = 64;

/// A 2D buffer storing boolean values packed as bits.
///
/// Bits past `width * height` in the last word are always zero, so
/// `count_ones` and equality never see padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BitBuffer2Repr")]
pub struct BitBuffer2 {
    width: usize,
    height: usize,
    words: Vec<u64>,
}

#[derive(Deserialize)]
struct BitBuffer2Repr {
    width: usize,
    height: usize,
    words: Vec<u64>,
}

impl TryFrom<BitBuffer2Repr> for BitBuffer2 {
    type Error = String;

    fn try_from(repr: BitBuffer2Repr) -> Result<Self, Self::Error> {
        let len = repr.width * repr.height;
        if repr.words.len() != len.div_ceil(BITS_PER_WORD) {
            return Err(format!(
                "mask has {} words, expected {} for {}x{}",
                repr.words.len(),
                len.div_ceil(BITS_PER_WORD),
                repr.width,
                repr.height
            ));
        }
        let mut buffer = Self {
            width: repr.width,
            height: repr.height,
            words: repr.words,
        };
        buffer.clear_padding();
        Ok(buffer)
    }
}

impl BitBuffer2 {
    /// Create a new bit buffer filled with the given value.
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let len = width * height;
        let fill = if value { !0u64 } else { 0u64 };
        let mut buffer = Self {
            width,
            height,
            words: vec![fill; len.div_ceil(BITS_PER_WORD)],
        };
        buffer.clear_padding();
        buffer
    }

    /// Create a new bit buffer from a slice of booleans in row-major order.
    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );
        let mut buffer = Self::new_filled(width, height, false);
        for (idx, &value) in data.iter().enumerate() {
            if value {
                buffer.set(idx, true);
            }
        }
        buffer
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut buffer = Self::new_filled(width, height, false);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    buffer.set(y * width + x, true);
                }
            }
        }
        buffer
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len());
        (self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < self.len());
        let bit = 1u64 << (idx % BITS_PER_WORD);
        if value {
            self.words[idx / BITS_PER_WORD] |= bit;
        } else {
            self.words[idx / BITS_PER_WORD] &= !bit;
        }
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        self.get(y * self.width + x)
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        self.set(y * self.width + x, value);
    }

    /// Count the number of set bits (valid pixels).
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Count set bits inside the `width x height` rectangle at `(x0, y0)`.
    pub fn count_ones_in(&self, x0: usize, y0: usize, width: usize, height: usize) -> usize {
        debug_assert!(x0 + width <= self.width && y0 + height <= self.height);
        let mut count = 0;
        for y in y0..y0 + height {
            for x in x0..x0 + width {
                count += usize::from(self.get_xy(x, y));
            }
        }
        count
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = bool> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }

    fn clear_padding(&mut self) {
        let used = self.len() % BITS_PER_WORD;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << used) - 1;
            }
        }
    }
}

impl From<&BitBuffer2> for Vec<bool> {
    fn from(buf: &BitBuffer2) -> Self {
        buf.iter().collect()
    }
}
