//! Per-block presence tracking.

/// Growable bitset with one bit per block.
#[derive(Debug, Clone, Default)]
pub struct Bitfield {
    words: Vec<u64>,
}

impl Bitfield {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the persisted byte layout (bit `i` = byte `i / 8`, bit `i % 8`).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = vec![0u64; bytes.len().div_ceil(8)];
        for (i, byte) in bytes.iter().enumerate() {
            words[i / 8] |= (*byte as u64) << ((i % 8) * 8);
        }
        Self { words }
    }

    pub fn get(&self, index: u64) -> bool {
        let word = (index / 64) as usize;
        self.words
            .get(word)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    pub fn set(&mut self, index: u64, value: bool) {
        let word = (index / 64) as usize;
        if word >= self.words.len() {
            if !value {
                return;
            }
            self.words.resize(word + 1, 0);
        }
        if value {
            self.words[word] |= 1 << (index % 64);
        } else {
            self.words[word] &= !(1u64 << (index % 64));
        }
    }

    /// The persisted byte holding `index`.
    pub fn byte_for(&self, index: u64) -> u8 {
        let word = (index / 64) as usize;
        let shift = ((index % 64) / 8) * 8;
        self.words.get(word).map_or(0, |w| (w >> shift) as u8)
    }

    /// Clear every bit at or above `length`.
    pub fn truncate(&mut self, length: u64) {
        let words = length.div_ceil(64) as usize;
        self.words.truncate(words);
        if length % 64 != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << (length % 64)) - 1;
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Indexes in `[start, end)` whose bit is clear.
    pub fn missing(&self, start: u64, end: u64) -> Vec<u64> {
        (start..end).filter(|i| !self.get(*i)).collect()
    }

    /// First clear bit in `[start, end)`.
    pub fn first_missing(&self, start: u64, end: u64) -> Option<u64> {
        (start..end).find(|i| !self.get(*i))
    }

    /// Runs of set bits as `(start, length)` pairs.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        let mut current: Option<(u64, u64)> = None;
        let end = self.words.len() as u64 * 64;

        for i in 0..end {
            if self.get(i) {
                match current.as_mut() {
                    Some((_, len)) => *len += 1,
                    None => current = Some((i, 1)),
                }
            } else if let Some(run) = current.take() {
                ranges.push(run);
            }
        }
        ranges.extend(current);
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let mut bits = Bitfield::new();
        bits.set(3, true);
        bits.set(130, true);
        assert!(bits.get(3));
        assert!(bits.get(130));
        assert!(!bits.get(4));

        bits.set(3, false);
        assert!(!bits.get(3));
        assert_eq!(bits.count(), 1);
    }

    #[test]
    fn test_persisted_bytes_roundtrip() {
        let mut bits = Bitfield::new();
        for i in [0, 9, 17, 70] {
            bits.set(i, true);
        }

        let bytes: Vec<u8> = (0..9).map(|b| bits.byte_for(b * 8)).collect();
        let restored = Bitfield::from_bytes(&bytes);
        for i in 0..80 {
            assert_eq!(restored.get(i), bits.get(i), "bit {i}");
        }
    }

    #[test]
    fn test_ranges_and_missing() {
        let mut bits = Bitfield::new();
        for i in [0, 1, 2, 5, 6, 9] {
            bits.set(i, true);
        }
        assert_eq!(bits.ranges(), vec![(0, 3), (5, 2), (9, 1)]);
        assert_eq!(bits.missing(0, 8), vec![3, 4, 7]);
        assert_eq!(bits.first_missing(5, 10), Some(7));
        assert_eq!(bits.first_missing(0, 3), None);
    }

    #[test]
    fn test_truncate() {
        let mut bits = Bitfield::new();
        for i in 0..100 {
            bits.set(i, true);
        }
        bits.truncate(70);
        assert!(bits.get(69));
        assert!(!bits.get(70));
        assert_eq!(bits.count(), 70);
    }
}
