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

//! Untyped root container for a Cap'n Proto value.
//!
//! A [`Reader`] wraps segments that came from somewhere else (usually the
//! framing layer in [`crate::serialize`]) and checks them lazily as they are
//! traversed. A [`Builder`] owns a growing set of segments obtained from an
//! [`Allocator`].

use crate::any_pointer;
use crate::private::arena::{BuilderArena, BuilderArenaImpl, ReaderArena, ReaderArenaImpl};
use crate::private::layout;
use crate::private::units::BYTES_PER_WORD;
use crate::traits::{FromPointerBuilder, FromPointerReader, SetPointerBuilder};
use crate::{MessageSize, OutputSegments, Result, Word};

/// Options controlling how data is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Limits how many total words of data are allowed to be traversed. Traversal is counted when
    /// a new struct or list reader is obtained, e.g. from a get() accessor. This means that calling
    /// the getter for the same sub-struct multiple times will cause it to be double-counted. Once
    /// the traversal limit is reached, an error will be reported.
    ///
    /// This limit exists for security reasons. It is possible for an attacker to construct a message
    /// in which multiple pointers point at the same location. This is technically invalid, but hard
    /// to detect. Using such a message, an attacker could cause a message which is small on the wire
    /// to appear much larger when actually traversed, possibly exhausting server resources leading to
    /// denial-of-service.
    ///
    /// `None` disables the limit.
    pub traversal_limit_in_words: Option<usize>,

    /// Limits how deeply nested a message structure can be, e.g. structs containing other structs or
    /// lists of structs.
    ///
    /// Like the traversal limit, this limit exists for security reasons. Since it is common to use
    /// recursive code to traverse recursive data structures, an attacker could easily cause a stack
    /// overflow by sending a very-deeply-nested (or even cyclic) message, without the message even
    /// being very large. The default limit of 64 is probably low enough to prevent any chance of
    /// stack overflow, yet high enough that it is never a problem in practice.
    pub nesting_limit: i32,

    /// Largest segment count a framed message may declare. Checked before
    /// anything proportional to the count is allocated.
    pub segment_limit: u32,
}

pub const DEFAULT_READER_OPTIONS: ReaderOptions = ReaderOptions {
    traversal_limit_in_words: Some(8 * 1024 * 1024),
    nesting_limit: 64,
    segment_limit: 512,
};

impl Default for ReaderOptions {
    fn default() -> Self {
        DEFAULT_READER_OPTIONS
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        DEFAULT_READER_OPTIONS
    }

    pub fn nesting_limit(&mut self, value: i32) -> &mut Self {
        self.nesting_limit = value;
        self
    }

    pub fn traversal_limit_in_words(&mut self, value: Option<usize>) -> &mut Self {
        self.traversal_limit_in_words = value;
        self
    }

    pub fn segment_limit(&mut self, value: u32) -> &mut Self {
        self.segment_limit = value;
        self
    }
}

/// An object that manages the buffers underlying a Cap'n Proto message reader.
pub trait ReaderSegments {
    /// Gets the segment with index `idx`. Returns `None` if `idx` is out of range.
    ///
    /// The returned slice should be a whole number of words long.
    fn get_segment(&self, idx: u32) -> Option<&[u8]>;

    /// Gets the number of segments.
    fn len(&self) -> usize {
        for i in 0.. {
            if self.get_segment(i as u32).is_none() {
                return i;
            }
        }
        unreachable!()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> ReaderSegments for &S
where
    S: ReaderSegments + ?Sized,
{
    fn get_segment(&self, idx: u32) -> Option<&[u8]> {
        (**self).get_segment(idx)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// An array of segments.
pub struct SegmentArray<'a> {
    segments: &'a [&'a [u8]],
}

impl<'a> SegmentArray<'a> {
    pub fn new(segments: &'a [&'a [u8]]) -> Self {
        SegmentArray { segments }
    }
}

impl ReaderSegments for SegmentArray<'_> {
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        self.segments.get(id as usize).copied()
    }

    fn len(&self) -> usize {
        self.segments.len()
    }
}

impl<'b> ReaderSegments for [&'b [u8]] {
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        self.get(id as usize).copied()
    }

    fn len(&self) -> usize {
        <[&'b [u8]]>::len(self)
    }
}

/// A container used to read a message.
pub struct Reader<S>
where
    S: ReaderSegments,
{
    arena: ReaderArenaImpl<S>,
    nesting_limit: i32,
}

impl<S> Reader<S>
where
    S: ReaderSegments,
{
    pub fn new(segments: S, options: ReaderOptions) -> Self {
        Reader {
            arena: ReaderArenaImpl::new(segments, options),
            nesting_limit: options.nesting_limit,
        }
    }

    fn get_root_internal(&self) -> Result<any_pointer::Reader<'_>> {
        let pointer_reader = layout::PointerReader::get_root(&self.arena, 0, 0, self.nesting_limit)?;
        Ok(any_pointer::Reader::new(pointer_reader))
    }

    /// Gets the root of the message, interpreting it as the given type.
    pub fn get_root<'a, T: FromPointerReader<'a>>(&'a self) -> Result<T> {
        self.get_root_internal()?.get_as()
    }

    /// Words reachable from the root pointer, the root itself included.
    pub fn total_size(&self) -> Result<MessageSize> {
        let mut size = self.get_root_internal()?.total_size()?;
        size.plus_eq(MessageSize { word_count: 1 });
        Ok(size)
    }

    /// Sum of the segment sizes, in words.
    pub fn size_in_words(&self) -> usize {
        let segments = self.arena.segments();
        (0..segments.len() as u32)
            .filter_map(|id| segments.get_segment(id))
            .map(|seg| seg.len() / BYTES_PER_WORD)
            .sum()
    }

    /// Words left in the traversal budget.
    pub fn remaining_read_limit(&self) -> usize {
        self.arena.remaining_read_limit()
    }

    pub fn into_segments(self) -> S {
        self.arena.into_segments()
    }
}

/// An object that allocates memory for a Cap'n Proto message as it is being built.
///
/// # Safety
///
/// Implementations must return memory that is zeroed, stays valid and does not
/// move until it is handed back through `deallocate_segment`, and does not
/// overlap any other segment.
pub unsafe trait Allocator {
    /// Allocates zeroed memory for a new segment, returning a pointer to the start of the segment
    /// and a u32 indicating the length of the segment in words. The length must be at least
    /// `minimum_size`.
    fn allocate_segment(&mut self, minimum_size: u32) -> (*mut u8, u32);

    /// Indicates that a segment, previously allocated via `allocate_segment()`, is no longer in
    /// use. `word_size` is the length of the segment in words, as returned from
    /// `allocate_segment()`. `words_used` is always less than or equal to `word_size`, and
    /// indicates how many words (contiguous from the start of the segment) were possibly written
    /// with non-zero values. A message zeroes those words before handing the segment back, so
    /// an allocator may reuse the memory as is.
    ///
    /// # Safety
    ///
    /// Must only be called once per segment, with the values `allocate_segment` returned.
    unsafe fn deallocate_segment(&mut self, ptr: *mut u8, word_size: u32, words_used: u32);
}

/// A container used to build a message.
pub struct Builder<A>
where
    A: Allocator,
{
    arena: BuilderArenaImpl<A>,
}

// Segment memory is owned by the allocator and referenced only through the
// arena, so moving the whole message to another thread is sound.
unsafe impl<A> Send for Builder<A> where A: Send + Allocator {}

fn _assert_kinds() {
    fn _assert_send<T: Send>() {}
    fn _assert_reader<S: ReaderSegments + Send>() {
        _assert_send::<Reader<S>>();
    }
    fn _assert_builder<A: Allocator + Send>() {
        _assert_send::<Builder<A>>();
    }
}

impl<A> Builder<A>
where
    A: Allocator,
{
    pub fn new(allocator: A) -> Self {
        Builder {
            arena: BuilderArenaImpl::new(allocator),
        }
    }

    fn get_root_internal(&mut self) -> any_pointer::Builder<'_> {
        if self.arena.is_empty() {
            self.arena.allocate_segment(1);
            if self.arena.allocate(0, 1).is_none() {
                unreachable!("a new segment has room for the root pointer");
            }
        }
        any_pointer::Builder::new(layout::PointerBuilder::get_root(&self.arena, 0, 0))
    }

    /// Initializes the root as a value of the given type.
    pub fn init_root<'a, T: FromPointerBuilder<'a>>(&'a mut self) -> T {
        let root = self.get_root_internal();
        root.init_as()
    }

    /// Initializes the root as a list (or blob) of `length` elements.
    pub fn initn_root<'a, T: FromPointerBuilder<'a>>(&'a mut self, length: u32) -> T {
        let root = self.get_root_internal();
        root.initn_as(length)
    }

    /// Gets the root, interpreting it as the given type.
    pub fn get_root<'a, T: FromPointerBuilder<'a>>(&'a mut self) -> Result<T> {
        let root = self.get_root_internal();
        root.get_as()
    }

    pub fn get_root_as_reader<'a, T: FromPointerReader<'a>>(&'a self) -> Result<T> {
        if self.arena.is_empty() {
            any_pointer::Reader::new(layout::PointerReader::new_default()).get_as()
        } else {
            let pointer_reader = layout::PointerReader::get_root(&self.arena, 0, 0, i32::MAX)?;
            any_pointer::Reader::new(pointer_reader).get_as()
        }
    }

    /// Sets the root to a deep copy of the given value.
    pub fn set_root<From: SetPointerBuilder>(&mut self, value: From) -> Result<()> {
        let mut root = self.get_root_internal();
        root.set_as(value)
    }

    /// The used part of every segment, in order. A builder whose root was
    /// never touched reports a single empty segment.
    pub fn get_segments_for_output(&self) -> OutputSegments<'_> {
        self.arena.get_segments_for_output()
    }

    /// Words allocated so far, across all segments.
    pub fn size_in_words(&self) -> usize {
        self.arena.words_allocated() as usize
    }

    pub fn into_reader(mut self) -> Reader<Builder<A>> {
        let _ = self.get_root_internal();
        Reader::new(
            self,
            ReaderOptions {
                traversal_limit_in_words: None,
                nesting_limit: i32::MAX,
                segment_limit: u32::MAX,
            },
        )
    }

    /// Retrieves the underlying `Allocator`, deallocating all currently-allocated
    /// segments.
    pub fn into_allocator(self) -> A {
        self.arena.into_allocator()
    }
}

impl<A> ReaderSegments for Builder<A>
where
    A: Allocator,
{
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        self.arena.output_segment(id)
    }

    fn len(&self) -> usize {
        self.arena.len()
    }
}

/// Standard segment allocator. Allocates each segment as a zeroed `Vec<Word>`.
#[derive(Debug)]
pub struct HeapAllocator {
    owned_memory: Vec<Vec<Word>>,

    // Minimum number of words in the next allocation.
    next_size: u32,

    // How to update next_size after an allocation.
    allocation_strategy: AllocationStrategy,

    // Maximum number of words to allocate.
    max_segment_words: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Allocates the same number of words for each segment, to the extent possible.
    /// This strategy is primarily useful for testing cross-segment pointers.
    FixedSize,

    /// Increases segment size by a multiplicative factor for each subsequent segment.
    GrowHeuristically,
}

pub const SUGGESTED_FIRST_SEGMENT_WORDS: u32 = 1024;
pub const SUGGESTED_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::GrowHeuristically;

/// Largest segment the heap allocator hands out, in words.
pub const MAX_SEGMENT_WORDS: u32 = 1 << 29;

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        HeapAllocator {
            owned_memory: Vec::new(),
            next_size: SUGGESTED_FIRST_SEGMENT_WORDS,
            allocation_strategy: SUGGESTED_ALLOCATION_STRATEGY,
            max_segment_words: MAX_SEGMENT_WORDS,
        }
    }

    /// Sets the size of the initial segment in words, where 1 word = 8 bytes.
    pub fn first_segment_words(mut self, value: u32) -> Self {
        assert!(value > 0, "segments must hold at least one word");
        assert!(value <= self.max_segment_words);
        self.next_size = value;
        self
    }

    /// Sets the allocation strategy for segments after the first one.
    pub fn allocation_strategy(mut self, value: AllocationStrategy) -> Self {
        self.allocation_strategy = value;
        self
    }

    /// Sets the maximum number of words allowed in a single allocation.
    pub fn max_segment_words(mut self, value: u32) -> Self {
        assert!(self.next_size <= value);
        self.max_segment_words = value;
        self
    }
}

unsafe impl Allocator for HeapAllocator {
    fn allocate_segment(&mut self, minimum_size: u32) -> (*mut u8, u32) {
        let size = core::cmp::max(minimum_size, self.next_size);
        let mut new_words = Word::allocate_zeroed_vec(size as usize);
        let ptr = new_words.as_mut_ptr() as *mut u8;
        self.owned_memory.push(new_words);

        if let AllocationStrategy::GrowHeuristically = self.allocation_strategy {
            if size < self.max_segment_words - self.next_size {
                self.next_size += size;
            } else {
                self.next_size = self.max_segment_words;
            }
        }
        (ptr, size)
    }

    unsafe fn deallocate_segment(&mut self, ptr: *mut u8, _word_size: u32, _words_used: u32) {
        self.owned_memory
            .retain(|words| words.as_ptr() as *const u8 != ptr as *const u8);
    }
}

impl Builder<HeapAllocator> {
    pub fn new_default() -> Self {
        Builder::new(HeapAllocator::new())
    }
}

impl Default for Builder<HeapAllocator> {
    fn default() -> Self {
        Self::new_default()
    }
}

/// An Allocator whose first segment is a caller-provided buffer.
///
/// Later segments come from a [`HeapAllocator`]. The used part of the buffer
/// is zeroed again when the message releases it, so the buffer can back the
/// next message.
pub struct ScratchSpaceHeapAllocator<'a> {
    scratch_space: &'a mut [u8],
    scratch_space_allocated: bool,
    allocator: HeapAllocator,
}

impl<'a> ScratchSpaceHeapAllocator<'a> {
    /// Writes zeroes into the entire buffer and constructs a new allocator from it.
    ///
    /// Only the first `scratch_space.len() / 8` words of the buffer are used.
    pub fn new(scratch_space: &'a mut [u8]) -> Self {
        scratch_space.fill(0);
        ScratchSpaceHeapAllocator {
            scratch_space,
            scratch_space_allocated: false,
            allocator: HeapAllocator::new(),
        }
    }

    /// Sets the size of the second segment in words, where 1 word = 8 bytes.
    /// (The first segment is the scratch space passed to `new()`.)
    pub fn second_segment_words(self, value: u32) -> Self {
        ScratchSpaceHeapAllocator {
            allocator: self.allocator.first_segment_words(value),
            ..self
        }
    }

    /// Sets the allocation strategy for segments after the second one.
    pub fn allocation_strategy(self, value: AllocationStrategy) -> Self {
        ScratchSpaceHeapAllocator {
            allocator: self.allocator.allocation_strategy(value),
            ..self
        }
    }

    fn scratch_words(&self) -> u32 {
        u32::try_from(self.scratch_space.len() / BYTES_PER_WORD).unwrap_or(MAX_SEGMENT_WORDS)
    }
}

unsafe impl Allocator for ScratchSpaceHeapAllocator<'_> {
    fn allocate_segment(&mut self, minimum_size: u32) -> (*mut u8, u32) {
        let words = self.scratch_words();
        if !self.scratch_space_allocated && minimum_size <= words && words > 0 {
            self.scratch_space_allocated = true;
            (self.scratch_space.as_mut_ptr(), words)
        } else {
            self.allocator.allocate_segment(minimum_size)
        }
    }

    unsafe fn deallocate_segment(&mut self, ptr: *mut u8, word_size: u32, words_used: u32) {
        if ptr == self.scratch_space.as_mut_ptr() {
            // Segments come back already zeroed.
            self.scratch_space_allocated = false;
        } else {
            unsafe { self.allocator.deallocate_segment(ptr, word_size, words_used) }
        }
    }
}
