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

use core::cell::RefCell;

use crate::message::{self, Allocator, ReaderSegments};
use crate::private::read_limiter::ReadLimiter;
use crate::private::segment::{BuilderSegment, SegmentReader};
use crate::private::units::*;
use crate::private::wire::{SegmentId, WirePointer};
use crate::{Error, ErrorKind, OutputSegments, Result};

/// Read access to the segments of one message.
pub trait ReaderArena {
    /// Returns a view of segment `id`. The length is always a whole number of words.
    fn get_segment(&self, id: SegmentId) -> Result<SegmentReader<'_>>;

    /// Charges `words` against the traversal budget.
    fn check_read_limit(&self, words: u64) -> Result<()>;

    fn nesting_limit(&self) -> i32;
}

/// Arena over segments received from elsewhere. Immutable for its lifetime.
pub struct ReaderArenaImpl<S> {
    segments: S,
    read_limiter: ReadLimiter,
    nesting_limit: i32,
}

impl<S> ReaderArenaImpl<S>
where
    S: ReaderSegments,
{
    pub fn new(segments: S, options: message::ReaderOptions) -> Self {
        Self {
            segments,
            read_limiter: ReadLimiter::new(options.traversal_limit_in_words),
            nesting_limit: options.nesting_limit,
        }
    }

    pub fn into_segments(self) -> S {
        self.segments
    }

    pub fn segments(&self) -> &S {
        &self.segments
    }

    /// Words left in the traversal budget.
    pub fn remaining_read_limit(&self) -> usize {
        self.read_limiter.remaining()
    }
}

impl<S> ReaderArena for ReaderArenaImpl<S>
where
    S: ReaderSegments,
{
    fn get_segment(&self, id: SegmentId) -> Result<SegmentReader<'_>> {
        match self.segments.get_segment(id) {
            Some(seg) if seg.len() % BYTES_PER_WORD != 0 => Err(Error::from_kind(
                ErrorKind::SegmentLengthNotAMultipleOfWordSize,
            )),
            Some(seg) => Ok(SegmentReader::new(seg)),
            None => Err(Error::from_kind(ErrorKind::InvalidSegmentId(id))),
        }
    }

    fn check_read_limit(&self, words: u64) -> Result<()> {
        let words = usize::try_from(words).unwrap_or(usize::MAX);
        self.read_limiter.can_read(words)
    }

    fn nesting_limit(&self) -> i32 {
        self.nesting_limit
    }
}

/// Mutable access to the segments of a message under construction.
///
/// All methods take `&self`: many builders over the same message share the
/// arena, and each call touches the segment table only for its own duration.
pub trait BuilderArena: ReaderArena {
    /// Allocates `amount` words in segment `segment_id`, if it has room.
    fn allocate(&self, segment_id: SegmentId, amount: WordCount32) -> Option<WordCount32>;

    /// Allocates `amount` words in the newest segment, opening a new segment if needed.
    fn allocate_anywhere(&self, amount: WordCount32) -> (SegmentId, WordCount32);

    /// Start and capacity (in words) of segment `id`.
    fn get_segment_mut(&self, id: SegmentId) -> (*mut u8, WordCount32);

    fn as_reader(&self) -> &dyn ReaderArena;

    fn get_word(&self, segment_id: SegmentId, index: WordCount32) -> WirePointer;

    fn set_word(&self, segment_id: SegmentId, index: WordCount32, value: WirePointer);

    /// Zeroes `byte_len` bytes starting at byte `byte_offset` of segment `segment_id`.
    fn zero_bytes(&self, segment_id: SegmentId, byte_offset: usize, byte_len: usize) {
        let (start, capacity) = self.get_segment_mut(segment_id);
        assert!(byte_offset + byte_len <= capacity as usize * BYTES_PER_WORD);
        unsafe { core::ptr::write_bytes(start.add(byte_offset), 0, byte_len) }
    }

    fn zero_words(&self, segment_id: SegmentId, index: WordCount32, count: WordCount32) {
        self.zero_bytes(
            segment_id,
            index as usize * BYTES_PER_WORD,
            count as usize * BYTES_PER_WORD,
        )
    }

    fn write_bytes_at(&self, segment_id: SegmentId, byte_offset: usize, src: &[u8]) {
        let (start, capacity) = self.get_segment_mut(segment_id);
        assert!(byte_offset + src.len() <= capacity as usize * BYTES_PER_WORD);
        // `src` may come from this very arena (a reader over the same message).
        unsafe { core::ptr::copy(src.as_ptr(), start.add(byte_offset), src.len()) }
    }

    fn read_bytes_at(&self, segment_id: SegmentId, byte_offset: usize, dst: &mut [u8]) {
        let (start, capacity) = self.get_segment_mut(segment_id);
        assert!(byte_offset + dst.len() <= capacity as usize * BYTES_PER_WORD);
        unsafe { core::ptr::copy_nonoverlapping(start.add(byte_offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copies `count` words between two positions of the message.
    fn copy_words(
        &self,
        from: (SegmentId, WordCount32),
        to: (SegmentId, WordCount32),
        count: WordCount32,
    ) {
        let (src_start, src_capacity) = self.get_segment_mut(from.0);
        let (dst_start, dst_capacity) = self.get_segment_mut(to.0);
        assert!(from.1 + count <= src_capacity && to.1 + count <= dst_capacity);
        unsafe {
            core::ptr::copy(
                src_start.add(from.1 as usize * BYTES_PER_WORD),
                dst_start.add(to.1 as usize * BYTES_PER_WORD),
                count as usize * BYTES_PER_WORD,
            )
        }
    }
}

pub struct BuilderArenaImplInner<A>
where
    A: Allocator,
{
    allocator: Option<A>, // None if has already be deallocated.

    segments: Vec<BuilderSegment>,
}

/// Arena for building a message, backed by an [`Allocator`].
pub struct BuilderArenaImpl<A>
where
    A: Allocator,
{
    inner: RefCell<BuilderArenaImplInner<A>>,
}

impl<A> BuilderArenaImpl<A>
where
    A: Allocator,
{
    pub fn new(allocator: A) -> Self {
        Self {
            inner: RefCell::new(BuilderArenaImplInner {
                allocator: Some(allocator),
                segments: Vec::new(),
            }),
        }
    }

    /// Allocates a new segment with capacity for at least `minimum_size` words.
    pub fn allocate_segment(&self, minimum_size: WordCount32) {
        self.inner.borrow_mut().allocate_segment(minimum_size)
    }

    pub fn get_segments_for_output(&self) -> OutputSegments<'_> {
        let inner = self.inner.borrow();

        // The caller must mutably borrow the `message::Builder` to modify segment memory.
        // No such borrow is possible while `self` is immutably borrowed here.
        if inner.segments.is_empty() {
            OutputSegments::SingleSegment([&[]])
        } else if inner.segments.len() == 1 {
            OutputSegments::SingleSegment([unsafe { inner.segments[0].as_bytes() }])
        } else {
            OutputSegments::MultiSegment(
                inner
                    .segments
                    .iter()
                    .map(|seg| unsafe { seg.as_bytes() })
                    .collect(),
            )
        }
    }

    /// The allocated words of segment `id`, for output.
    pub fn output_segment(&self, id: SegmentId) -> Option<&[u8]> {
        let inner = self.inner.borrow();
        // Same reasoning as `get_segments_for_output`.
        inner
            .segments
            .get(id as usize)
            .map(|seg| unsafe { seg.as_bytes() })
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total words allocated across all segments.
    pub fn words_allocated(&self) -> u64 {
        self.inner
            .borrow()
            .segments
            .iter()
            .map(|s| u64::from(s.current_size()))
            .sum()
    }

    /// Retrieves the underlying `Allocator`, deallocating all currently-allocated
    /// segments.
    pub fn into_allocator(self) -> A {
        let mut inner = self.inner.into_inner();
        inner.deallocate_all();
        match inner.allocator.take() {
            Some(a) => a,
            None => unreachable!("allocator is only taken here"),
        }
    }
}

impl<A> BuilderArenaImplInner<A>
where
    A: Allocator,
{
    fn allocate_segment(&mut self, minimum_size: WordCount32) {
        let (ptr, capacity) = match &mut self.allocator {
            Some(a) => a.allocate_segment(minimum_size),
            None => unreachable!(),
        };
        assert!(
            capacity >= minimum_size,
            "allocator returned a segment smaller than requested"
        );
        tracing::debug!(
            segment_id = self.segments.len(),
            words = capacity,
            "opened builder segment"
        );
        // The `Allocator` contract guarantees `capacity` zeroed words at `ptr`.
        self.segments.push(unsafe { BuilderSegment::new(ptr, capacity) });
    }

    fn allocate(&mut self, segment_id: SegmentId, amount: WordCount32) -> Option<WordCount32> {
        self.segments[segment_id as usize].allocate(amount)
    }

    fn allocate_anywhere(&mut self, amount: WordCount32) -> (SegmentId, WordCount32) {
        // The newest segment is the only one likely to have room.
        if let Some(last) = self.segments.len().checked_sub(1) {
            if let Some(idx) = self.allocate(last as SegmentId, amount) {
                return (last as SegmentId, idx);
            }
        }

        let new_id = self.segments.len() as SegmentId;
        self.allocate_segment(amount);
        match self.allocate(new_id, amount) {
            Some(idx) => (new_id, idx),
            None => panic!("freshly allocated segment cannot hold {amount} words"),
        }
    }

    /// Hands every segment back to the allocator, zeroed, so memory it
    /// reuses is ready for the next message.
    fn deallocate_all(&mut self) {
        if let Some(a) = &mut self.allocator {
            for mut seg in self.segments.drain(..) {
                let words_used = seg.current_size();
                seg.clear();
                unsafe {
                    a.deallocate_segment(seg.as_ptr(), seg.capacity(), words_used);
                }
            }
        }
    }
}

impl<A> ReaderArena for BuilderArenaImpl<A>
where
    A: Allocator,
{
    fn get_segment(&self, id: SegmentId) -> Result<SegmentReader<'_>> {
        let inner = self.inner.borrow();
        match inner.segments.get(id as usize) {
            // Segment memory outlives `self` and does not move.
            Some(seg) => Ok(seg.as_reader()),
            None => Err(Error::from_kind(ErrorKind::InvalidSegmentId(id))),
        }
    }

    fn check_read_limit(&self, _words: u64) -> Result<()> {
        Ok(())
    }

    fn nesting_limit(&self) -> i32 {
        i32::MAX
    }
}

impl<A> BuilderArena for BuilderArenaImpl<A>
where
    A: Allocator,
{
    fn allocate(&self, segment_id: SegmentId, amount: WordCount32) -> Option<WordCount32> {
        self.inner.borrow_mut().allocate(segment_id, amount)
    }

    fn allocate_anywhere(&self, amount: WordCount32) -> (SegmentId, WordCount32) {
        self.inner.borrow_mut().allocate_anywhere(amount)
    }

    fn get_segment_mut(&self, id: SegmentId) -> (*mut u8, WordCount32) {
        let inner = self.inner.borrow();
        let seg = &inner.segments[id as usize];
        (seg.as_ptr(), seg.capacity())
    }

    fn as_reader(&self) -> &dyn ReaderArena {
        self
    }

    fn get_word(&self, segment_id: SegmentId, index: WordCount32) -> WirePointer {
        WirePointer::from_word(self.inner.borrow().segments[segment_id as usize].get(index))
    }

    fn set_word(&self, segment_id: SegmentId, index: WordCount32, value: WirePointer) {
        self.inner.borrow().segments[segment_id as usize].put(index, value.word())
    }
}

impl<A> Drop for BuilderArenaImplInner<A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        self.deallocate_all()
    }
}

/// Arena for default values, which live outside any message.
pub struct NullArena;

impl ReaderArena for NullArena {
    fn get_segment(&self, id: SegmentId) -> Result<SegmentReader<'_>> {
        Err(Error::from_kind(ErrorKind::InvalidSegmentId(id)))
    }

    fn check_read_limit(&self, _words: u64) -> Result<()> {
        Ok(())
    }

    fn nesting_limit(&self) -> i32 {
        0x7fffffff
    }
}

#[cfg(test)]
mod tests {
    use super::{BuilderArena, BuilderArenaImpl, ReaderArena};
    use crate::message::{AllocationStrategy, HeapAllocator, ScratchSpaceHeapAllocator};
    use crate::private::wire::WirePointer;

    #[test]
    fn allocate_anywhere_opens_segments_on_demand() {
        let arena = BuilderArenaImpl::new(
            HeapAllocator::new()
                .first_segment_words(4)
                .allocation_strategy(AllocationStrategy::FixedSize),
        );
        arena.allocate_segment(4);
        assert_eq!(arena.allocate(0, 3), Some(0));
        assert_eq!(arena.allocate_anywhere(1), (0, 3));
        assert_eq!(arena.allocate_anywhere(2), (1, 0));
        // Bigger than the fixed size: the new segment is sized to fit.
        assert_eq!(arena.allocate_anywhere(10), (2, 0));
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.words_allocated(), 16);

        let out = arena.get_segments_for_output();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), 32);
        assert_eq!(out[1].len(), 16);
        assert_eq!(out[2].len(), 80);
    }

    #[test]
    fn words_round_trip_through_segments() {
        let arena = BuilderArenaImpl::new(HeapAllocator::new().first_segment_words(2));
        arena.allocate_segment(2);
        arena.allocate(0, 2).unwrap();
        arena.set_word(0, 1, WirePointer::from_word(0x0102_0304_0506_0708));
        assert_eq!(arena.get_word(0, 1).word(), 0x0102_0304_0506_0708);
        let segment = arena.get_segment(0).unwrap();
        assert_eq!(segment.slice(8, 8), &[8, 7, 6, 5, 4, 3, 2, 1]);
        arena.zero_words(0, 1, 1);
        assert!(arena.get_word(0, 1).is_null());
    }

    #[test]
    fn segments_go_back_to_the_allocator_zeroed() {
        let mut scratch = [0u8; 32];
        let arena = BuilderArenaImpl::new(ScratchSpaceHeapAllocator::new(&mut scratch));
        arena.allocate_segment(1);
        arena.allocate(0, 3).unwrap();
        arena.set_word(0, 0, WirePointer::from_word(u64::MAX));
        arena.set_word(0, 2, WirePointer::from_word(0x55));
        drop(arena.into_allocator());
        assert_eq!(scratch, [0u8; 32]);
    }

    #[test]
    fn builder_view_covers_whole_capacity() {
        let arena = BuilderArenaImpl::new(HeapAllocator::new().first_segment_words(4));
        arena.allocate_segment(4);
        arena.allocate(0, 1).unwrap();
        let view = arena.get_segment(0).unwrap();
        assert_eq!(view.len_in_words(), 4);
        assert_eq!(arena.output_segment(0).unwrap().len(), 8);

        let index = arena.allocate(0, 2).unwrap();
        arena.set_word(0, index + 1, WirePointer::from_word(42));
        assert_eq!(view.get(2), 42);
        assert_eq!(arena.output_segment(0).unwrap().len(), 24);
        assert!(arena.output_segment(1).is_none());
    }
}
