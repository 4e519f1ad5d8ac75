use std::fmt;

use crate::math::{Coord, CoordBBox};

use super::TreeValue;

pub const LOG2DIM: i32 = 3;
pub const DIM: i32 = 1 << LOG2DIM;
pub const SIZE: usize = 1 << (3 * LOG2DIM);

const WORDS: usize = SIZE / 64;

/// Linear voxel offset within a leaf: x-major, z fastest.
pub fn coord_to_offset(c: Coord) -> usize {
    let m = DIM - 1;
    (((c.x & m) << (2 * LOG2DIM)) | ((c.y & m) << LOG2DIM) | (c.z & m)) as usize
}

pub fn offset_to_local_coord(offset: usize) -> Coord {
    let n = offset as i32;
    let m = DIM - 1;
    Coord::new(n >> (2 * LOG2DIM), (n >> LOG2DIM) & m, n & m)
}

pub fn leaf_origin(c: Coord) -> Coord {
    c.align_down(DIM)
}

/// One bit per voxel of a leaf.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ValueMask {
    words: [u64; WORDS],
}

impl fmt::Debug for ValueMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueMask({} on)", self.count_on())
    }
}

impl ValueMask {
    pub fn filled(on: bool) -> Self {
        let mut mask = Self::default();
        mask.fill(on);
        mask
    }

    pub fn is_on(&self, n: usize) -> bool {
        self.words[n >> 6] & (1u64 << (n & 63)) != 0
    }

    pub fn set_on(&mut self, n: usize) {
        self.words[n >> 6] |= 1u64 << (n & 63);
    }

    pub fn set_off(&mut self, n: usize) {
        self.words[n >> 6] &= !(1u64 << (n & 63));
    }

    pub fn set(&mut self, n: usize, on: bool) {
        if on {
            self.set_on(n);
        } else {
            self.set_off(n);
        }
    }

    pub fn fill(&mut self, on: bool) {
        self.words = [if on { u64::MAX } else { 0 }; WORDS];
    }

    pub fn count_on(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_all_on(&self) -> bool {
        self.words.iter().all(|w| *w == u64::MAX)
    }

    pub fn is_all_off(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn union_with(&mut self, other: &ValueMask) {
        for (a, b) in self.words.iter_mut().zip(other.words) {
            *a |= b;
        }
    }

    pub fn difference_with(&mut self, other: &ValueMask) {
        for (a, b) in self.words.iter_mut().zip(other.words) {
            *a &= !b;
        }
    }

    pub fn iter_on(&self) -> OnIter<'_> {
        OnIter {
            words: &self.words,
            word: 0,
            bits: self.words[0],
        }
    }
}

pub struct OnIter<'a> {
    words: &'a [u64; WORDS],
    word: usize,
    bits: u64,
}

impl Iterator for OnIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1;
                return Some((self.word << 6) | bit);
            }
            self.word += 1;
            if self.word >= WORDS {
                return None;
            }
            self.bits = self.words[self.word];
        }
    }
}

/// Dense `DIM`^3 block of values with a per-voxel active mask.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode<T> {
    origin: Coord,
    values: Box<[T]>,
    mask: ValueMask,
}

impl<T: TreeValue> LeafNode<T> {
    pub fn new(origin: Coord, value: T, active: bool) -> Self {
        Self {
            origin: leaf_origin(origin),
            values: vec![value; SIZE].into_boxed_slice(),
            mask: ValueMask::filled(active),
        }
    }

    /// Leaf sharing the active topology of `mask` with all values set to `value`.
    pub fn with_mask(origin: Coord, value: T, mask: ValueMask) -> Self {
        Self {
            origin: leaf_origin(origin),
            values: vec![value; SIZE].into_boxed_slice(),
            mask,
        }
    }

    pub fn origin(&self) -> Coord {
        self.origin
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn mask(&self) -> &ValueMask {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut ValueMask {
        &mut self.mask
    }

    pub fn buffers_mut(&mut self) -> (&mut [T], &mut ValueMask) {
        (&mut self.values, &mut self.mask)
    }

    pub fn get_value(&self, offset: usize) -> T {
        self.values[offset]
    }

    pub fn is_value_on(&self, offset: usize) -> bool {
        self.mask.is_on(offset)
    }

    pub fn set_value_on(&mut self, offset: usize, value: T) {
        self.values[offset] = value;
        self.mask.set_on(offset);
    }

    pub fn set_value_off(&mut self, offset: usize, value: T) {
        self.values[offset] = value;
        self.mask.set_off(offset);
    }

    pub fn set_value_only(&mut self, offset: usize, value: T) {
        self.values[offset] = value;
    }

    pub fn set_active_state(&mut self, offset: usize, on: bool) {
        self.mask.set(offset, on);
    }

    pub fn offset_to_global_coord(&self, offset: usize) -> Coord {
        self.origin + offset_to_local_coord(offset)
    }

    pub fn active_count(&self) -> usize {
        self.mask.count_on()
    }

    pub fn node_bounding_box(&self) -> CoordBBox {
        CoordBBox::cube(self.origin, DIM)
    }

    /// Bounds of the active voxels, empty if none are on.
    pub fn active_bounding_box(&self) -> CoordBBox {
        if self.mask.is_all_on() {
            return self.node_bounding_box();
        }
        let mut bbox = CoordBBox::empty();
        for offset in self.mask.iter_on() {
            bbox.expand_to_include(offset_to_local_coord(offset));
        }
        if !bbox.is_empty() {
            bbox.translate(self.origin);
        }
        bbox
    }
}
