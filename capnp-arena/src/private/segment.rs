// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

use core::marker::PhantomData;
use core::ptr;

use crate::private::primitive::Primitive;
use crate::private::units::*;

/// A wrapper around a memory segment used in building a message.
///
/// The memory is owned by the message's `Allocator`; the segment only tracks
/// how much of it has been handed out.
pub struct BuilderSegment {
    /// Pointer to the start of the segment.
    ptr: *mut u8,

    /// Total number of words the segment could potentially use. That is, all
    /// bytes from `ptr` to `ptr + (capacity * 8)` may be used in the segment.
    capacity: WordCount32,

    /// Number of words already used in the segment.
    allocated: WordCount32,
}

impl BuilderSegment {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity * 8` zeroed bytes
    /// for as long as the segment is in use.
    pub unsafe fn new(ptr: *mut u8, capacity: WordCount32) -> Self {
        Self {
            ptr,
            capacity,
            allocated: 0,
        }
    }

    /// Reserves `amount` words at the end of the used region. Returns the
    /// index of the first reserved word, or `None` if the segment is too full.
    pub fn allocate(&mut self, amount: WordCount32) -> Option<WordCount32> {
        if amount > self.capacity - self.allocated {
            None
        } else {
            let result = self.allocated;
            self.allocated += amount;
            Some(result)
        }
    }

    pub fn current_size(&self) -> WordCount32 {
        self.allocated
    }

    pub fn capacity(&self) -> WordCount32 {
        self.capacity
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn get(&self, index: WordCount32) -> u64 {
        assert!(index < self.capacity, "word index out of segment");
        // In bounds per the assert above; reads tolerate any alignment.
        unsafe {
            u64::from_le(ptr::read_unaligned(
                self.ptr.add(index as usize * BYTES_PER_WORD) as *const u64,
            ))
        }
    }

    pub fn put(&self, index: WordCount32, value: u64) {
        assert!(index < self.capacity, "word index out of segment");
        unsafe {
            ptr::write_unaligned(
                self.ptr.add(index as usize * BYTES_PER_WORD) as *mut u64,
                value.to_le(),
            )
        }
    }

    /// A read-only view of the whole capacity. Words allocated after the view
    /// is taken are visible through it.
    pub fn as_reader<'a>(&self) -> SegmentReader<'a> {
        // Valid for `'a` per the contract of `new`.
        unsafe { SegmentReader::from_raw(self.ptr, self.capacity as usize * BYTES_PER_WORD) }
    }

    /// The used part of the segment, for output.
    ///
    /// # Safety
    ///
    /// No write to the segment may happen while the returned slice is alive.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        unsafe {
            core::slice::from_raw_parts(self.ptr, self.allocated as usize * BYTES_PER_WORD)
        }
    }

    /// Zeroes every allocated word and rewinds the cursor, so the memory can
    /// back a new message.
    pub fn clear(&mut self) {
        unsafe { ptr::write_bytes(self.ptr, 0, self.allocated as usize * BYTES_PER_WORD) };
        self.allocated = 0;
    }
}

/// Read-only view of the bytes of one segment.
///
/// Holds a raw pointer rather than a slice, so a view over a message under
/// construction does not alias the memory builders keep writing to. Slices
/// are only formed for text and data handed out to callers.
#[derive(Clone, Copy)]
pub struct SegmentReader<'a> {
    ptr: *const u8,
    len: ByteCount,
    marker: PhantomData<&'a [u8]>,
}

impl<'a> SegmentReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
            marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for all of `'a`.
    pub unsafe fn from_raw(ptr: *const u8, len: ByteCount) -> Self {
        Self {
            ptr,
            len,
            marker: PhantomData,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> ByteCount {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len_in_words(&self) -> usize {
        self.len / BYTES_PER_WORD
    }

    #[inline]
    fn check(&self, offset: ByteCount, len: ByteCount) {
        assert!(
            matches!(offset.checked_add(len), Some(end) if end <= self.len),
            "byte range {offset}+{len} is outside the segment"
        );
    }

    /// The little-endian word at `index`.
    #[inline]
    pub fn get(&self, index: WordCount32) -> u64 {
        self.read(index as usize * BYTES_PER_WORD)
    }

    /// The little-endian value starting at byte `offset`.
    #[inline]
    pub fn read<T: Primitive>(&self, offset: ByteCount) -> T {
        let mut buf = [0u8; BYTES_PER_WORD];
        self.read_bytes(offset, &mut buf[..T::SIZE]);
        T::read_le(&buf[..T::SIZE])
    }

    #[inline]
    pub fn read_bytes(&self, offset: ByteCount, dst: &mut [u8]) {
        self.check(offset, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// `len` bytes starting at byte `offset`.
    pub fn slice(&self, offset: ByteCount, len: ByteCount) -> &'a [u8] {
        self.check(offset, len);
        unsafe { core::slice::from_raw_parts(self.ptr.add(offset), len) }
    }
}

#[cfg(test)]
mod tests {
    use super::{BuilderSegment, SegmentReader};
    use crate::Word;

    #[test]
    fn allocate_until_full() {
        let mut memory = Word::allocate_zeroed_vec(4);
        let mut segment = unsafe { BuilderSegment::new(memory.as_mut_ptr() as *mut u8, 4) };
        assert_eq!(segment.allocate(3), Some(0));
        assert_eq!(segment.allocate(2), None);
        assert_eq!(segment.allocate(1), Some(3));
        assert_eq!(segment.current_size(), 4);
        assert_eq!(segment.allocate(1), None);
        assert_eq!(segment.allocate(0), Some(4));
    }

    #[test]
    fn clear_zeroes_used_words() {
        let mut memory = Word::allocate_zeroed_vec(2);
        let mut segment = unsafe { BuilderSegment::new(memory.as_mut_ptr() as *mut u8, 2) };
        segment.allocate(2).unwrap();
        segment.put(0, 0xdead_beef);
        segment.put(1, u64::MAX);
        assert_eq!(segment.get(1), u64::MAX);
        segment.clear();
        assert_eq!(segment.current_size(), 0);
        assert_eq!(segment.get(0), 0);
        assert_eq!(segment.get(1), 0);
        drop(segment);
        assert!(memory.iter().all(|w| w.to_u64() == 0));
    }

    #[test]
    fn reader_sees_words_allocated_later() {
        let mut memory = Word::allocate_zeroed_vec(3);
        let mut segment = unsafe { BuilderSegment::new(memory.as_mut_ptr() as *mut u8, 3) };
        segment.allocate(1).unwrap();
        let view = segment.as_reader();
        assert_eq!(view.len_in_words(), 3);

        let index = segment.allocate(2).unwrap();
        segment.put(index + 1, 0x0807_0605_0403_0201);
        assert_eq!(view.get(2), 0x0807_0605_0403_0201);
        assert_eq!(view.read::<u16>(17), 0x0302);
        assert_eq!(view.slice(16, 3), &[1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn reader_rejects_reads_past_the_end() {
        let words = [Word::from_u64(1)];
        let view = SegmentReader::new(Word::words_to_bytes(&words));
        view.read::<u32>(6);
    }
}
