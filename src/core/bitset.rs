// This module provides the dense bit set used throughout the bridge for liveness sets,
// reachability, reserved variables and visited marks. It grows on insert, and two sets
// compare equal when they hold the same members regardless of their word length.

//! Dense, growable bit set.
//!
//! Used for per-block liveness sets, per-partition live-on-entry sets,
//! reachability and the visited marks of the elimination engine.

use std::fmt;

#[derive(Default, Clone)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set able to hold `bits` bits without growing.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn contains(&self, bit: usize) -> bool {
        let word = bit / 64;
        let mask = 1u64 << (bit % 64);

        (self.words.get(word).copied().unwrap_or(0) & mask) != 0
    }

    /// Set `bit`, returning whether it was newly inserted.
    pub fn insert(&mut self, bit: usize) -> bool {
        self.ensure(bit);

        let word = bit / 64;
        let mask = 1u64 << (bit % 64);

        let was_set = (self.words[word] & mask) != 0;
        self.words[word] |= mask;
        !was_set
    }

    /// Clear `bit`, returning whether it was present.
    pub fn remove(&mut self, bit: usize) -> bool {
        let word = bit / 64;
        let mask = 1u64 << (bit % 64);

        match self.words.get_mut(word) {
            Some(w) => {
                let was_set = (*w & mask) != 0;
                *w &= !mask;
                was_set
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self |= other`, returning whether `self` changed.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (dst, &src) in self.words.iter_mut().zip(&other.words) {
            let merged = *dst | src;
            changed |= merged != *dst;
            *dst = merged;
        }
        changed
    }

    /// `self &= !other`.
    pub fn subtract(&mut self, other: &BitSet) {
        for (dst, &src) in self.words.iter_mut().zip(&other.words) {
            *dst &= !src;
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn ensure(&mut self, bit: usize) {
        let word = bit / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
    }
}

pub struct Iter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = usize;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<usize> for BitSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for bit in iter {
            self.insert(bit);
        }
    }
}

// Sets compare by content; trailing zero words do not count.
impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|&w| w == 0)
    }
}

impl Eq for BitSet {}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = BitSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));
        assert!(set.contains(3));
        assert!(set.contains(130));
        assert!(!set.contains(64));
        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(!set.remove(1000));
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn test_union_and_subtract() {
        let mut a: BitSet = [1, 2, 70].into_iter().collect();
        let b: BitSet = [2, 3, 200].into_iter().collect();

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 3, 70, 200]);

        a.subtract(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 70]);
    }

    #[test]
    fn test_iter_skips_empty_words() {
        let set: BitSet = [0, 63, 64, 500].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 63, 64, 500]);
        assert!(BitSet::with_capacity(300).is_empty());
        assert_eq!(BitSet::with_capacity(300), BitSet::new());
    }
}
