use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

type Page<T> = Box<[T]>;

/// Growable array stored as a table of fixed-size pages.
///
/// Single-writer operations take `&mut self`. Concurrent appends go through
/// [`ValueBuffer`]s, which hand whole or partial pages to the parent under a
/// lock that only guards the page table. Concurrent appends keep every value
/// but do not preserve the order in which values were pushed.
pub struct PagedArray<T, const LOG2_PAGE_SIZE: usize = 10> {
    pages: Mutex<Vec<Page<T>>>,
    size: AtomicUsize,
}

impl<T, const LOG2_PAGE_SIZE: usize> PagedArray<T, LOG2_PAGE_SIZE>
where
    T: Copy + Default + Send + Sync,
{
    pub const PAGE_SIZE: usize = 1 << LOG2_PAGE_SIZE;
    const MASK: usize = Self::PAGE_SIZE - 1;

    pub fn new() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
            size: AtomicUsize::new(0),
        }
    }

    pub fn page_size() -> usize {
        Self::PAGE_SIZE
    }

    pub fn log2_page_size() -> usize {
        LOG2_PAGE_SIZE
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.page_count() * Self::PAGE_SIZE
    }

    pub fn free_count(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn is_partially_full(&self) -> bool {
        self.len() & Self::MASK != 0
    }

    pub fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.page_count() * (Self::PAGE_SIZE * std::mem::size_of::<T>() + std::mem::size_of::<Page<T>>())
    }

    pub fn push(&mut self, value: T) -> usize {
        let index = *self.size.get_mut();
        let pages = self.pages.get_mut();
        if index >= pages.len() * Self::PAGE_SIZE {
            pages.push(Self::new_page());
        }
        pages[index >> LOG2_PAGE_SIZE][index & Self::MASK] = value;
        *self.size.get_mut() = index + 1;
        index
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let pages = self.pages.lock();
        Some(pages[index >> LOG2_PAGE_SIZE][index & Self::MASK])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= *self.size.get_mut() {
            return None;
        }
        let pages = self.pages.get_mut();
        Some(&mut pages[index >> LOG2_PAGE_SIZE][index & Self::MASK])
    }

    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Ensures the page table can hold `index`, allocating whole pages.
    pub fn grow(&self, index: usize) {
        let mut pages = self.pages.lock();
        while index >= pages.len() * Self::PAGE_SIZE {
            pages.push(Self::new_page());
        }
    }

    pub fn resize(&mut self, size: usize) {
        let capacity = self.pages.get_mut().len() * Self::PAGE_SIZE;
        *self.size.get_mut() = size;
        if size > capacity {
            self.grow(size - 1);
        } else {
            self.shrink_to_fit();
        }
    }

    pub fn resize_with_value(&mut self, size: usize, value: T) {
        self.resize(size);
        self.fill(value);
    }

    /// Frees trailing pages that hold no live elements. The page containing
    /// the next push position is kept.
    pub fn shrink_to_fit(&mut self) {
        let keep = (*self.size.get_mut() >> LOG2_PAGE_SIZE) + 1;
        self.pages.get_mut().truncate(keep);
    }

    pub fn clear(&mut self) {
        self.pages.get_mut().clear();
        *self.size.get_mut() = 0;
    }

    /// Sets every allocated slot, live or not, one page per task.
    pub fn fill(&mut self, value: T) {
        self.pages
            .get_mut()
            .par_iter_mut()
            .for_each(|page| page.fill(value));
    }

    /// Copies the live elements into `out`, which must be at least `len()` long.
    pub fn copy_to(&self, out: &mut [T]) -> bool {
        let size = self.len();
        if out.len() < size {
            return false;
        }
        let pages = self.pages.lock();
        out[..size]
            .par_chunks_mut(Self::PAGE_SIZE)
            .zip(pages.par_iter())
            .for_each(|(dst, page)| dst.copy_from_slice(&page[..dst.len()]));
        true
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = vec![T::default(); self.len()];
        self.copy_to(&mut out);
        out
    }

    pub fn iter(&self) -> Iter<'_, T, LOG2_PAGE_SIZE> {
        Iter {
            pages: self.pages.lock(),
            index: 0,
            size: self.len(),
        }
    }

    pub fn sort(&mut self)
    where
        T: Ord,
    {
        self.sort_by(|a, b| a.cmp(b));
    }

    pub fn inv_sort(&mut self)
    where
        T: Ord,
    {
        self.sort_by(|a, b| b.cmp(a));
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: Fn(&T, &T) -> CmpOrdering + Sync,
    {
        let mut values = self.to_vec();
        values.par_sort_by(compare);
        let pages = self.pages.get_mut();
        values
            .par_chunks(Self::PAGE_SIZE)
            .zip(pages.par_iter_mut())
            .for_each(|(src, page)| page[..src.len()].copy_from_slice(src));
    }

    /// Moves every element of `other` into `self`, leaving `other` empty.
    /// A partially filled tail page of `self` is re-appended after the
    /// spliced pages, so order is only kept within each side.
    pub fn merge(&mut self, other: &mut Self) {
        let other_size = *other.size.get_mut();
        if other_size == 0 {
            return;
        }
        let mut size = *self.size.get_mut();
        let pages = self.pages.get_mut();
        Self::trim_unused(pages, size);

        let tail_count = size & Self::MASK;
        let tail = if tail_count > 0 {
            size -= tail_count;
            pages.pop()
        } else {
            None
        };

        let other_pages = other.pages.get_mut();
        Self::trim_unused(other_pages, other_size);
        pages.append(other_pages);
        size += other_size;
        *other.size.get_mut() = 0;

        if let Some(page) = tail {
            Self::add_partially_full(pages, &mut size, page, tail_count);
        }
        *self.size.get_mut() = size;
    }

    pub fn buffer(&self) -> ValueBuffer<'_, T, LOG2_PAGE_SIZE> {
        ValueBuffer {
            parent: self,
            page: Some(Self::new_page()),
            len: 0,
        }
    }

    fn new_page() -> Page<T> {
        vec![T::default(); Self::PAGE_SIZE].into_boxed_slice()
    }

    fn trim_unused(pages: &mut Vec<Page<T>>, size: usize) {
        pages.truncate(size.div_ceil(Self::PAGE_SIZE));
    }

    /// Hands a staged page to the array. Returns the page when its contents
    /// were copied rather than adopted.
    fn add(&self, page: Page<T>, count: usize) -> Option<Page<T>> {
        if count == 0 {
            return Some(page);
        }
        let mut pages = self.pages.lock();
        let mut size = self.size.load(Ordering::Acquire);
        Self::trim_unused(&mut pages, size);
        let returned = if count == Self::PAGE_SIZE {
            Self::add_full(&mut pages, &mut size, page);
            None
        } else {
            Self::add_partially_full(&mut pages, &mut size, page, count)
        };
        self.size.store(size, Ordering::Release);
        returned
    }

    fn add_full(pages: &mut Vec<Page<T>>, size: &mut usize, mut page: Page<T>) {
        if *size & Self::MASK != 0 {
            // keep the partially filled page at the tail
            if let Some(tail) = pages.last_mut() {
                std::mem::swap(tail, &mut page);
            }
        }
        pages.push(page);
        *size += Self::PAGE_SIZE;
    }

    fn add_partially_full(
        pages: &mut Vec<Page<T>>,
        size: &mut usize,
        page: Page<T>,
        count: usize,
    ) -> Option<Page<T>> {
        if *size & Self::MASK == 0 && pages.len() * Self::PAGE_SIZE == *size {
            pages.push(page);
            *size += count;
            return None;
        }
        for (offset, value) in page[..count].iter().enumerate() {
            let index = *size + offset;
            if index >= pages.len() * Self::PAGE_SIZE {
                pages.push(Self::new_page());
            }
            pages[index >> LOG2_PAGE_SIZE][index & Self::MASK] = *value;
        }
        *size += count;
        Some(page)
    }
}

impl<T, const LOG2_PAGE_SIZE: usize> Default for PagedArray<T, LOG2_PAGE_SIZE>
where
    T: Copy + Default + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const LOG2_PAGE_SIZE: usize> fmt::Debug for PagedArray<T, LOG2_PAGE_SIZE>
where
    T: Copy + Default + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedArray")
            .field("len", &self.len())
            .field("page_count", &self.page_count())
            .field("page_size", &Self::PAGE_SIZE)
            .finish()
    }
}

pub struct Iter<'a, T, const LOG2_PAGE_SIZE: usize> {
    pages: MutexGuard<'a, Vec<Page<T>>>,
    index: usize,
    size: usize,
}

impl<T: Copy, const LOG2_PAGE_SIZE: usize> Iterator for Iter<'_, T, LOG2_PAGE_SIZE> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.index >= self.size {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some(self.pages[index >> LOG2_PAGE_SIZE][index & ((1 << LOG2_PAGE_SIZE) - 1)])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.size - self.index;
        (remaining, Some(remaining))
    }
}

/// Thread-local staging page for concurrent appends into a [`PagedArray`].
/// Values reach the parent when the page fills, on [`ValueBuffer::flush`],
/// or when the buffer is dropped.
pub struct ValueBuffer<'a, T, const LOG2_PAGE_SIZE: usize>
where
    T: Copy + Default + Send + Sync,
{
    parent: &'a PagedArray<T, LOG2_PAGE_SIZE>,
    page: Option<Page<T>>,
    len: usize,
}

impl<T, const LOG2_PAGE_SIZE: usize> ValueBuffer<'_, T, LOG2_PAGE_SIZE>
where
    T: Copy + Default + Send + Sync,
{
    pub fn push(&mut self, value: T) {
        let page = self
            .page
            .get_or_insert_with(PagedArray::<T, LOG2_PAGE_SIZE>::new_page);
        page[self.len] = value;
        self.len += 1;
        if self.len == PagedArray::<T, LOG2_PAGE_SIZE>::PAGE_SIZE {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        if let Some(page) = self.page.take() {
            self.page = self.parent.add(page, self.len);
        }
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn page_size() -> usize {
        PagedArray::<T, LOG2_PAGE_SIZE>::PAGE_SIZE
    }
}

impl<T, const LOG2_PAGE_SIZE: usize> Drop for ValueBuffer<'_, T, LOG2_PAGE_SIZE>
where
    T: Copy + Default + Send + Sync,
{
    fn drop(&mut self) {
        self.flush();
    }
}
