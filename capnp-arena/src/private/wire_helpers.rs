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

//! The pointer engine: reading, writing, following, copying and freeing
//! objects through wire pointers.
//!
//! Reader-side functions work on untrusted bytes and return errors for
//! anything malformed. Builder-side functions work on memory this process
//! wrote itself and treat inconsistencies as bugs.

use crate::private::arena::{BuilderArena, NullArena, ReaderArena};
use crate::private::layout::{ListBuilder, ListReader, PointerType, StructBuilder, StructReader};
use crate::private::segment::SegmentReader;
use crate::private::units::*;
use crate::private::wire::*;
use crate::{text, Error, ErrorKind, MessageSize, Result, Word};

/// Arena that default values are read through.
pub static NULL_ARENA: NullArena = NullArena;

/// A word position inside a message under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordRef {
    pub segment_id: SegmentId,
    pub index: WordCount32,
}

impl WordRef {
    #[inline]
    pub fn new(segment_id: SegmentId, index: WordCount32) -> Self {
        Self { segment_id, index }
    }

    #[inline]
    pub fn offset(self, words: WordCount32) -> Self {
        Self::new(self.segment_id, self.index + words)
    }

    #[inline]
    pub fn byte_offset(self) -> ByteCount {
        self.index as usize * BYTES_PER_WORD
    }

    #[inline]
    fn get(self, arena: &dyn BuilderArena) -> WirePointer {
        arena.get_word(self.segment_id, self.index)
    }

    #[inline]
    fn set(self, arena: &dyn BuilderArena, value: WirePointer) {
        arena.set_word(self.segment_id, self.index, value)
    }
}

#[inline]
fn fail<T>(kind: ErrorKind) -> Result<T> {
    Err(Error::from_kind(kind))
}

#[inline]
pub fn read_word(segment: SegmentReader<'_>, index: WordCount32) -> WirePointer {
    WirePointer::from_word(segment.get(index))
}

#[inline]
fn bounds_check(
    segment: SegmentReader<'_>,
    start: i64,
    size_in_words: u64,
    kind: ErrorKind,
) -> Result<()> {
    let segment_words = segment.len_in_words() as u64;
    if start < 0 || start as u64 + size_in_words > segment_words {
        fail(kind)
    } else {
        Ok(())
    }
}

/// Checks that `[start, start + size)` lies within the segment and charges
/// `size` words to the traversal budget.
#[inline]
fn contains_interval(
    arena: &dyn ReaderArena,
    segment: SegmentReader<'_>,
    start: WordCount32,
    size_in_words: u64,
) -> Result<()> {
    bounds_check(
        segment,
        i64::from(start),
        size_in_words,
        ErrorKind::MessageContainsOutOfBoundsPointer,
    )?;
    arena.check_read_limit(size_in_words)
}

/// Mutable view of `len` bytes of builder memory.
///
/// # Safety
///
/// The caller must not hand out another live mutable view of the same bytes.
pub unsafe fn bytes_mut<'a>(
    arena: &'a dyn BuilderArena,
    segment_id: SegmentId,
    byte_offset: ByteCount,
    len: ByteCount,
) -> &'a mut [u8] {
    let (start, capacity) = arena.get_segment_mut(segment_id);
    assert!(byte_offset + len <= capacity as usize * BYTES_PER_WORD);
    // Segment memory stays put for as long as the arena lives.
    unsafe { core::slice::from_raw_parts_mut(start.add(byte_offset), len) }
}

/// Where a pointer read from a message leads once far pointers are followed.
#[derive(Clone, Copy)]
pub struct Resolved<'a> {
    pub segment_id: SegmentId,
    pub segment: SegmentReader<'a>,
    /// Word index of the object content.
    pub target: WordCount32,
    /// The object's description: the pointer itself, or the tag from a landing pad.
    pub pointer: Pointer,
}

pub fn follow_fars<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
) -> Result<Resolved<'a>> {
    let reff = read_word(segment, ref_index);
    let Pointer::Far {
        is_double_far,
        landing_pad,
        segment_id: pad_segment_id,
    } = reff.decode()
    else {
        let target = reff.target_index(ref_index);
        bounds_check(segment, target, 0, ErrorKind::MessageContainsOutOfBoundsPointer)?;
        return Ok(Resolved {
            segment_id,
            segment,
            target: target as WordCount32,
            pointer: reff.decode_tag(),
        });
    };

    let pad_segment = arena.get_segment(pad_segment_id)?;
    let pad_words = if is_double_far { 2 } else { 1 };
    bounds_check(
        pad_segment,
        i64::from(landing_pad),
        pad_words,
        ErrorKind::MessageContainsOutOfBoundsFarPointer,
    )?;
    tracing::trace!(
        segment_id = pad_segment_id,
        landing_pad,
        is_double_far,
        "following far pointer"
    );

    let pad = read_word(pad_segment, landing_pad);
    if !is_double_far {
        let pointer = pad.decode_tag();
        if let Pointer::Far { .. } = pointer {
            return fail(ErrorKind::UnexpectedFarPointer);
        }
        let target = pad.target_index(landing_pad);
        bounds_check(pad_segment, target, 0, ErrorKind::MessageContainsOutOfBoundsPointer)?;
        return Ok(Resolved {
            segment_id: pad_segment_id,
            segment: pad_segment,
            target: target as WordCount32,
            pointer,
        });
    }

    //# Landing pad is another far pointer. It is followed by a
    //# tag describing the pointed-to object.
    let Pointer::Far {
        is_double_far: false,
        landing_pad: target,
        segment_id: content_segment_id,
    } = pad.decode()
    else {
        return fail(ErrorKind::MalformedDoubleFarPointer);
    };
    let tag = read_word(pad_segment, landing_pad + 1);
    let content_segment = arena.get_segment(content_segment_id)?;
    bounds_check(
        content_segment,
        i64::from(target),
        0,
        ErrorKind::MessageContainsOutOfBoundsPointer,
    )?;
    Ok(Resolved {
        segment_id: content_segment_id,
        segment: content_segment,
        target,
        pointer: tag.decode_tag(),
    })
}

/// Follows the pointer at `reff` through any landing pads. Returns where the
/// object content starts and the word describing the object.
pub fn follow_builder_fars(arena: &dyn BuilderArena, reff: WordRef) -> (WordRef, WirePointer) {
    let ptr = reff.get(arena);
    if ptr.kind() != WirePointerKind::Far {
        let target = ptr.target_index(reff.index) as WordCount32;
        return (WordRef::new(reff.segment_id, target), ptr);
    }

    let pad = WordRef::new(ptr.far_segment_id(), ptr.far_position_in_segment());
    let pad_ptr = pad.get(arena);
    if !ptr.is_double_far() {
        let target = pad_ptr.target_index(pad.index) as WordCount32;
        (WordRef::new(pad.segment_id, target), pad_ptr)
    } else {
        let tag = pad.offset(1).get(arena);
        (
            WordRef::new(pad_ptr.far_segment_id(), pad_ptr.far_position_in_segment()),
            tag,
        )
    }
}

/// Allocates `amount` words for a new object of `kind` and points `reff` at
/// it; `upper` becomes the upper half of the object's describing word. Any
/// object `reff` pointed at before is zeroed first. Returns the location of
/// the object content.
pub fn allocate(
    arena: &dyn BuilderArena,
    reff: WordRef,
    amount: WordCount32,
    kind: WirePointerKind,
    upper: u32,
) -> WordRef {
    if !reff.get(arena).is_null() {
        zero_object(arena, reff);
    }

    if amount == 0 && kind == WirePointerKind::Struct {
        reff.set(arena, WirePointer::empty_struct());
        return reff;
    }

    match arena.allocate(reff.segment_id, amount) {
        Some(index) => {
            reff.set(arena, WirePointer::positional(kind, reff.index, index, upper));
            WordRef::new(reff.segment_id, index)
        }
        None => {
            //# Need to allocate in a different segment. We'll need to
            //# allocate an extra pointer worth of space to act as
            //# the landing pad for a far pointer.
            let (segment_id, pad_index) =
                arena.allocate_anywhere(amount + POINTER_SIZE_IN_WORDS as u32);
            tracing::trace!(segment_id, pad_index, amount, "placing object behind landing pad");
            reff.set(arena, WirePointer::far(false, pad_index, segment_id));
            let pad = WordRef::new(segment_id, pad_index);
            pad.set(arena, WirePointer::positional(kind, pad_index, pad_index + 1, upper));
            pad.offset(1)
        }
    }
}

/// Zeroes the object `reff` points at, recursively. The pointer itself is left alone.
pub fn zero_object(arena: &dyn BuilderArena, reff: WordRef) {
    //# Zero out the pointed-to object. Use when the pointer is
    //# about to be overwritten making the target object no longer
    //# reachable.
    let ptr = reff.get(arena);
    match ptr.decode() {
        Pointer::Struct { .. } | Pointer::List { .. } => {
            let target = ptr.target_index(reff.index) as WordCount32;
            zero_object_helper(arena, ptr, WordRef::new(reff.segment_id, target))
        }
        Pointer::Far {
            is_double_far,
            landing_pad,
            segment_id,
        } => {
            let pad = WordRef::new(segment_id, landing_pad);
            if is_double_far {
                let pad_ptr = pad.get(arena);
                let tag = pad.offset(1).get(arena);
                zero_object_helper(
                    arena,
                    tag,
                    WordRef::new(pad_ptr.far_segment_id(), pad_ptr.far_position_in_segment()),
                );
                arena.zero_words(pad.segment_id, pad.index, 2);
            } else {
                zero_object(arena, pad);
                arena.zero_words(pad.segment_id, pad.index, 1);
            }
        }
        // Capabilities own nothing inside the message.
        Pointer::Null | Pointer::Other { .. } => {}
    }
}

fn zero_object_helper(arena: &dyn BuilderArena, tag: WirePointer, target: WordRef) {
    match tag.decode_tag() {
        Pointer::Struct { size, .. } => {
            let pointers = target.offset(u32::from(size.data));
            for i in 0..u32::from(size.pointers) {
                zero_object(arena, pointers.offset(i));
            }
            arena.zero_words(target.segment_id, target.index, size.total());
        }
        Pointer::List {
            element_size: ElementSize::Void,
            ..
        } => {}
        Pointer::List {
            element_size: ElementSize::Pointer,
            element_count,
            ..
        } => {
            for i in 0..element_count {
                zero_object(arena, target.offset(i));
            }
            arena.zero_words(target.segment_id, target.index, element_count);
        }
        Pointer::List {
            element_size: ElementSize::InlineComposite,
            element_count: word_count,
            ..
        } => {
            let element_tag = target.get(arena);
            let Pointer::Struct { size, .. } = element_tag.decode_tag() else {
                panic!("Don't know how to handle non-STRUCT inline composite.");
            };
            if size.pointers > 0 {
                let mut pos = target.offset(1);
                for _ in 0..element_tag.inline_composite_list_element_count() {
                    pos = pos.offset(u32::from(size.data));
                    for _ in 0..size.pointers {
                        zero_object(arena, pos);
                        pos = pos.offset(1);
                    }
                }
            }
            arena.zero_words(
                target.segment_id,
                target.index,
                word_count + POINTER_SIZE_IN_WORDS as u32,
            );
        }
        Pointer::List {
            element_size,
            element_count,
            ..
        } => {
            let words = round_bits_up_to_words(
                u64::from(element_count) * u64::from(element_size.data_bits_per_element()),
            );
            arena.zero_words(target.segment_id, target.index, words);
        }
        Pointer::Far { .. } => panic!("Unexpected FAR pointer."),
        Pointer::Null | Pointer::Other { .. } => {}
    }
}

/// Zeroes the pointer at `reff` and its landing pad, if any, without
/// touching the object they lead to.
pub fn zero_pointer_and_fars(arena: &dyn BuilderArena, reff: WordRef) {
    let ptr = reff.get(arena);
    if ptr.kind() == WirePointerKind::Far {
        let pad_words = if ptr.is_double_far() { 2 } else { 1 };
        arena.zero_words(ptr.far_segment_id(), ptr.far_position_in_segment(), pad_words);
    }
    reff.set(arena, WirePointer::NULL);
}

/// Makes `reff` null, zeroing whatever it pointed at.
pub fn clear_pointer(arena: &dyn BuilderArena, reff: WordRef) {
    if !reff.get(arena).is_null() {
        zero_object(arena, reff);
        reff.set(arena, WirePointer::NULL);
    }
}

/// Moves the pointer at `src` to `dst`, which must be null. The object is
/// not copied; the caller zeroes `src` afterwards.
pub fn transfer_pointer(arena: &dyn BuilderArena, dst: WordRef, src: WordRef) {
    //# Make *dst point to the same object as *src. Both must
    //# reside in the same message, but can be in different
    //# segments. Not always-inline because this is rarely used.
    //
    //# Caller MUST zero out the source pointer after calling this,
    //# to make sure no later code mistakenly thinks the source
    //# location still owns the object. transferPointer() doesn't
    //# do this zeroing itself because many callers transfer
    //# several pointers in a loop then zero out the whole section.
    debug_assert!(dst.get(arena).is_null());
    let src_ptr = src.get(arena);
    if src_ptr.is_null() {
        dst.set(arena, WirePointer::NULL);
    } else if src_ptr.is_positional() {
        let target = WordRef::new(src.segment_id, src_ptr.target_index(src.index) as WordCount32);
        transfer_pointer_split(arena, dst, src_ptr, target);
    } else {
        //# Far and other pointers are position-independent, so we can just copy.
        dst.set(arena, src_ptr);
    }
}

/// Points `dst` at the object at `target`, described by `tag`.
pub fn transfer_pointer_split(
    arena: &dyn BuilderArena,
    dst: WordRef,
    tag: WirePointer,
    target: WordRef,
) {
    if dst.segment_id == target.segment_id {
        if tag.kind() == WirePointerKind::Struct && tag.struct_word_size() == 0 {
            dst.set(arena, WirePointer::empty_struct());
        } else {
            dst.set(
                arena,
                WirePointer::positional(tag.kind(), dst.index, target.index, tag.upper()),
            );
        }
        return;
    }

    //# Need to create a far pointer. Try to allocate it in the
    //# same segment as the source, so that it doesn't need to
    //# be a double-far.
    match arena.allocate(target.segment_id, 1) {
        Some(pad_index) => {
            let pad = WordRef::new(target.segment_id, pad_index);
            pad.set(
                arena,
                WirePointer::positional(tag.kind(), pad_index, target.index, tag.upper()),
            );
            dst.set(arena, WirePointer::far(false, pad_index, target.segment_id));
        }
        None => {
            //# Darn, need a double-far.
            let (pad_segment_id, pad_index) = arena.allocate_anywhere(2);
            let pad = WordRef::new(pad_segment_id, pad_index);
            pad.set(arena, WirePointer::far(false, target.index, target.segment_id));
            pad.offset(1).set(arena, WirePointer::tag(tag.kind(), tag.upper()));
            tracing::trace!(pad_segment_id, pad_index, "wrote double-far landing pad");
            dst.set(arena, WirePointer::far(true, pad_index, pad_segment_id));
        }
    }
}

fn struct_builder_at(arena: &dyn BuilderArena, target: WordRef, size: StructSize) -> StructBuilder<'_> {
    StructBuilder {
        arena,
        segment_id: target.segment_id,
        data: target.byte_offset(),
        pointers: target.index + u32::from(size.data),
        data_size: u32::from(size.data) * BITS_PER_WORD as u32,
        pointer_count: size.pointers,
    }
}

/// Copies a default value into `reff`. Returns false when there is no default.
fn copy_default(arena: &dyn BuilderArena, reff: WordRef, default: Option<&[Word]>) -> Result<bool> {
    match default {
        Some(words) if !words.is_empty() && words[0].to_u64() != 0 => {
            copy_pointer(
                arena,
                reff,
                &NULL_ARENA,
                0,
                SegmentReader::new(Word::words_to_bytes(words)),
                0,
                i32::MAX,
            )?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn init_struct_pointer(arena: &dyn BuilderArena, reff: WordRef, size: StructSize) -> StructBuilder<'_> {
    let target = allocate(
        arena,
        reff,
        size.total(),
        WirePointerKind::Struct,
        struct_upper(size),
    );
    struct_builder_at(arena, target, size)
}

pub fn get_writable_struct_pointer<'a>(
    arena: &'a dyn BuilderArena,
    reff: WordRef,
    size: StructSize,
    default: Option<&[Word]>,
) -> Result<StructBuilder<'a>> {
    if reff.get(arena).is_null() && !copy_default(arena, reff, default)? {
        return Ok(init_struct_pointer(arena, reff, size));
    }

    let (old, tag) = follow_builder_fars(arena, reff);
    if tag.kind() != WirePointerKind::Struct {
        return fail(ErrorKind::MessageContainsNonStructPointerWhereStructPointerWasExpected);
    }

    let old_size = tag.struct_size();
    if old_size.covers(size) {
        return Ok(struct_builder_at(arena, old, old_size));
    }

    //# The space allocated for this struct is too small.
    //# Unlike with readers, we can't just run with it and do
    //# bounds checks at access time, because how would we
    //# handle writes? Instead, we have to copy the struct to a
    //# new space now.
    let new_size = old_size.union(size);

    //# Don't let allocate() zero out the object just yet.
    zero_pointer_and_fars(arena, reff);

    let new = allocate(
        arena,
        reff,
        new_size.total(),
        WirePointerKind::Struct,
        struct_upper(new_size),
    );

    arena.copy_words(
        (old.segment_id, old.index),
        (new.segment_id, new.index),
        u32::from(old_size.data),
    );

    let old_pointers = old.offset(u32::from(old_size.data));
    let new_pointers = new.offset(u32::from(new_size.data));
    for i in 0..u32::from(old_size.pointers) {
        transfer_pointer(arena, new_pointers.offset(i), old_pointers.offset(i));
    }

    arena.zero_words(old.segment_id, old.index, old_size.total());

    Ok(struct_builder_at(arena, new, new_size))
}

pub fn init_list_pointer(
    arena: &dyn BuilderArena,
    reff: WordRef,
    element_count: ElementCount32,
    element_size: ElementSize,
) -> ListBuilder<'_> {
    assert!(
        element_size != ElementSize::InlineComposite,
        "Should have called init_struct_list_pointer() instead"
    );

    let step = element_size.step_bits();
    let word_count = round_bits_up_to_words(u64::from(element_count) * u64::from(step));
    let target = allocate(
        arena,
        reff,
        word_count,
        WirePointerKind::List,
        list_upper(element_size, element_count),
    );

    ListBuilder {
        arena,
        segment_id: target.segment_id,
        ptr: target.byte_offset(),
        element_count,
        step,
        struct_data_size: element_size.data_bits_per_element(),
        struct_pointer_count: element_size.pointers_per_element() as u16,
        element_size,
    }
}

/// Word count of `element_count` structs of `words_per_element` words each.
fn inline_composite_words(element_count: ElementCount32, words_per_element: WordCount32) -> WordCount32 {
    let words = u64::from(element_count) * u64::from(words_per_element);
    assert!(
        words < u64::from(MAX_LIST_ELEMENTS),
        "Lists are limited to 2**29 words"
    );
    words as WordCount32
}

fn inline_composite_builder_at(
    arena: &dyn BuilderArena,
    tag_location: WordRef,
    element_count: ElementCount32,
    size: StructSize,
) -> ListBuilder<'_> {
    ListBuilder {
        arena,
        segment_id: tag_location.segment_id,
        ptr: tag_location.offset(1).byte_offset(),
        element_count,
        step: size.total() * BITS_PER_WORD as u32,
        struct_data_size: u32::from(size.data) * BITS_PER_WORD as u32,
        struct_pointer_count: size.pointers,
        element_size: ElementSize::InlineComposite,
    }
}

pub fn init_struct_list_pointer(
    arena: &dyn BuilderArena,
    reff: WordRef,
    element_count: ElementCount32,
    element_size: StructSize,
) -> ListBuilder<'_> {
    let word_count = inline_composite_words(element_count, element_size.total());

    //# Allocate the list, prefixed by a single WirePointer.
    let target = allocate(
        arena,
        reff,
        POINTER_SIZE_IN_WORDS as u32 + word_count,
        WirePointerKind::List,
        list_upper(ElementSize::InlineComposite, word_count),
    );

    //# Initialize the pointer.
    target.set(
        arena,
        WirePointer::inline_composite_tag(element_count, element_size),
    );

    inline_composite_builder_at(arena, target, element_count, element_size)
}

pub fn get_writable_list_pointer<'a>(
    arena: &'a dyn BuilderArena,
    orig_ref: WordRef,
    element_size: ElementSize,
    default: Option<&[Word]>,
) -> Result<ListBuilder<'a>> {
    assert!(
        element_size != ElementSize::InlineComposite,
        "Use get_writable_struct_list_pointer() for struct lists"
    );

    if orig_ref.get(arena).is_null() && !copy_default(arena, orig_ref, default)? {
        return Ok(ListBuilder::new_empty(arena, orig_ref.segment_id, element_size));
    }

    //# We must verify that the pointer has the right size. Unlike
    //# in getWritableStructListPointer(), we never need to
    //# "upgrade" the data, because this method is called only for
    //# non-struct lists, and there is no allowed upgrade path *to*
    //# a non-struct list, only *from* them.
    let (target, tag) = follow_builder_fars(arena, orig_ref);
    if tag.kind() != WirePointerKind::List {
        return fail(ErrorKind::MessageContainsNonListPointerWhereListPointerWasExpected);
    }

    let old_size = tag.list_element_size();
    if old_size == ElementSize::InlineComposite {
        //# The existing element size is InlineComposite, which
        //# means that it is at least two words, which makes it
        //# bigger than the expected element size. Since fields can
        //# only grow when upgraded, the existing data must have been
        //# written with a newer version of the protocol. We
        //# therefore never need to upgrade the data in this case,
        //# but we do need to validate that it is a valid upgrade
        //# from what we expected.
        let element_tag = target.get(arena);
        if element_tag.kind() != WirePointerKind::Struct {
            return fail(ErrorKind::InlineCompositeListsOfNonStructTypeAreNotSupported);
        }
        let size = element_tag.struct_size();
        match element_size {
            ElementSize::Void => {}
            ElementSize::Bit => return fail(ErrorKind::FoundStructListWhereBitListWasExpected),
            ElementSize::Pointer => {
                if size.pointers < 1 {
                    return fail(ErrorKind::ExistingListValueIsIncompatibleWithExpectedType);
                }
            }
            _ => {
                if size.data < 1 {
                    return fail(ErrorKind::ExistingListValueIsIncompatibleWithExpectedType);
                }
            }
        }
        Ok(inline_composite_builder_at(
            arena,
            target,
            element_tag.inline_composite_list_element_count(),
            size,
        ))
    } else {
        let data_size = old_size.data_bits_per_element();
        let pointer_count = old_size.pointers_per_element();
        if data_size < element_size.data_bits_per_element()
            || pointer_count < element_size.pointers_per_element()
        {
            return fail(ErrorKind::ExistingListValueIsIncompatibleWithExpectedType);
        }
        Ok(ListBuilder {
            arena,
            segment_id: target.segment_id,
            ptr: target.byte_offset(),
            element_count: tag.list_element_count(),
            step: old_size.step_bits(),
            struct_data_size: data_size,
            struct_pointer_count: pointer_count as u16,
            element_size: old_size,
        })
    }
}

pub fn get_writable_struct_list_pointer<'a>(
    arena: &'a dyn BuilderArena,
    orig_ref: WordRef,
    element_size: StructSize,
    default: Option<&[Word]>,
) -> Result<ListBuilder<'a>> {
    if orig_ref.get(arena).is_null() && !copy_default(arena, orig_ref, default)? {
        return Ok(ListBuilder::new_empty(
            arena,
            orig_ref.segment_id,
            ElementSize::InlineComposite,
        ));
    }

    //# We must verify that the pointer has the right size and potentially upgrade it if not.
    let (old, tag) = follow_builder_fars(arena, orig_ref);
    if tag.kind() != WirePointerKind::List {
        return fail(ErrorKind::MessageContainsNonListPointerWhereListPointerWasExpected);
    }

    let old_element_size = tag.list_element_size();
    if old_element_size == ElementSize::InlineComposite {
        //# Existing list is InlineComposite, but we need to verify that the sizes match.
        let old_tag = old.get(arena);
        if old_tag.kind() != WirePointerKind::Struct {
            return fail(ErrorKind::InlineCompositeListsOfNonStructTypeAreNotSupported);
        }
        let old_size = old_tag.struct_size();
        let element_count = old_tag.inline_composite_list_element_count();

        if old_size.covers(element_size) {
            //# Old size is at least as large as we need. Ship it.
            return Ok(inline_composite_builder_at(arena, old, element_count, old_size));
        }

        //# The structs in this list are smaller than expected,
        //# probably written using an older version of the
        //# protocol. We need to make a copy and expand them.
        let new_size = old_size.union(element_size);
        let old_step = old_size.total();
        let new_step = new_size.total();
        let total_words = inline_composite_words(element_count, new_step);

        //# Don't let allocate() zero out the object just yet.
        zero_pointer_and_fars(arena, orig_ref);

        let new = allocate(
            arena,
            orig_ref,
            total_words + POINTER_SIZE_IN_WORDS as u32,
            WirePointerKind::List,
            list_upper(ElementSize::InlineComposite, total_words),
        );
        new.set(arena, WirePointer::inline_composite_tag(element_count, new_size));

        let mut src = old.offset(1);
        let mut dst = new.offset(1);
        for _ in 0..element_count {
            arena.copy_words(
                (src.segment_id, src.index),
                (dst.segment_id, dst.index),
                u32::from(old_size.data),
            );
            let src_pointers = src.offset(u32::from(old_size.data));
            let dst_pointers = dst.offset(u32::from(new_size.data));
            for j in 0..u32::from(old_size.pointers) {
                transfer_pointer(arena, dst_pointers.offset(j), src_pointers.offset(j));
            }
            src = src.offset(old_step);
            dst = dst.offset(new_step);
        }

        arena.zero_words(
            old.segment_id,
            old.index,
            old_step * element_count + POINTER_SIZE_IN_WORDS as u32,
        );

        return Ok(inline_composite_builder_at(arena, new, element_count, new_size));
    }

    //# We're upgrading from a non-struct list.
    let element_count = tag.list_element_count();
    match old_element_size {
        ElementSize::Void => {
            //# Nothing to copy, just allocate a new list.
            return Ok(init_struct_list_pointer(arena, orig_ref, element_count, element_size));
        }
        ElementSize::Bit => return fail(ErrorKind::FoundBitListWhereStructListWasExpected),
        _ => {}
    }

    let old_step = old_element_size.step_bits();
    let mut new_size = element_size;
    if old_element_size == ElementSize::Pointer {
        new_size.pointers = new_size.pointers.max(1);
    } else {
        new_size.data = new_size.data.max(1);
    }
    let new_step = new_size.total();
    let total_words = inline_composite_words(element_count, new_step);

    //# Don't let allocate() zero out the object just yet.
    zero_pointer_and_fars(arena, orig_ref);

    let new = allocate(
        arena,
        orig_ref,
        total_words + POINTER_SIZE_IN_WORDS as u32,
        WirePointerKind::List,
        list_upper(ElementSize::InlineComposite, total_words),
    );
    new.set(arena, WirePointer::inline_composite_tag(element_count, new_size));

    let first = new.offset(1);
    if old_element_size == ElementSize::Pointer {
        for i in 0..element_count {
            let dst = first.offset(i * new_step + u32::from(new_size.data));
            transfer_pointer(arena, dst, old.offset(i));
        }
    } else {
        let byte_step = (old_step / BITS_PER_BYTE as u32) as usize;
        let mut buf = [0u8; BYTES_PER_WORD];
        for i in 0..element_count {
            let src_byte = old.byte_offset() + i as usize * byte_step;
            arena.read_bytes_at(old.segment_id, src_byte, &mut buf[..byte_step]);
            let dst = first.offset(i * new_step);
            arena.write_bytes_at(dst.segment_id, dst.byte_offset(), &buf[..byte_step]);
        }
    }

    //# Zero out old location.
    arena.zero_words(
        old.segment_id,
        old.index,
        round_bits_up_to_words(u64::from(old_step) * u64::from(element_count)),
    );

    Ok(inline_composite_builder_at(arena, new, element_count, new_size))
}

pub fn init_text_pointer(arena: &dyn BuilderArena, reff: WordRef, size: ByteCount32) -> text::Builder<'_> {
    //# The byte list must include a NUL terminator.
    let byte_size = size + 1;

    //# Allocate the space.
    let target = allocate(
        arena,
        reff,
        round_bytes_up_to_words(byte_size),
        WirePointerKind::List,
        list_upper(ElementSize::Byte, byte_size),
    );

    // Fresh allocation: nothing else refers to these bytes.
    text::Builder::new(unsafe {
        bytes_mut(arena, target.segment_id, target.byte_offset(), size as usize)
    })
}

pub fn set_text_pointer(arena: &dyn BuilderArena, reff: WordRef, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return fail(ErrorKind::TextContainsNulByte);
    }
    let mut builder = init_text_pointer(arena, reff, value.len() as ByteCount32);
    builder.push_str(value)
}

pub fn get_writable_text_pointer<'a>(
    arena: &'a dyn BuilderArena,
    reff: WordRef,
    default: Option<&[Word]>,
) -> Result<text::Builder<'a>> {
    if reff.get(arena).is_null() && !copy_default(arena, reff, default)? {
        return Ok(text::Builder::new(&mut []));
    }

    let (target, tag) = follow_builder_fars(arena, reff);
    if tag.kind() != WirePointerKind::List {
        return fail(ErrorKind::MessageContainsNonListPointerWhereTextWasExpected);
    }
    if tag.list_element_size() != ElementSize::Byte {
        return fail(ErrorKind::MessageContainsListPointerOfNonBytesWhereTextWasExpected);
    }

    let count = tag.list_element_count() as usize;
    if count == 0 {
        return fail(ErrorKind::MessageContainsTextThatIsNotNULTerminated);
    }
    let mut terminator = [0u8; 1];
    arena.read_bytes_at(target.segment_id, target.byte_offset() + count - 1, &mut terminator);
    if terminator[0] != 0 {
        return fail(ErrorKind::MessageContainsTextThatIsNotNULTerminated);
    }

    //# Subtract 1 from the size for the NUL terminator.
    let bytes = unsafe { bytes_mut(arena, target.segment_id, target.byte_offset(), count - 1) };
    text::Builder::with_pos(bytes, count - 1)
}

pub fn init_data_pointer(arena: &dyn BuilderArena, reff: WordRef, size: ByteCount32) -> &mut [u8] {
    //# Allocate the space.
    let target = allocate(
        arena,
        reff,
        round_bytes_up_to_words(size),
        WirePointerKind::List,
        list_upper(ElementSize::Byte, size),
    );
    unsafe { bytes_mut(arena, target.segment_id, target.byte_offset(), size as usize) }
}

pub fn set_data_pointer(arena: &dyn BuilderArena, reff: WordRef, value: &[u8]) {
    let bytes = init_data_pointer(arena, reff, value.len() as ByteCount32);
    bytes.copy_from_slice(value);
}

pub fn get_writable_data_pointer<'a>(
    arena: &'a dyn BuilderArena,
    reff: WordRef,
    default: Option<&[Word]>,
) -> Result<&'a mut [u8]> {
    if reff.get(arena).is_null() && !copy_default(arena, reff, default)? {
        return Ok(&mut []);
    }

    let (target, tag) = follow_builder_fars(arena, reff);
    if tag.kind() != WirePointerKind::List {
        return fail(ErrorKind::MessageContainsNonListPointerWhereDataWasExpected);
    }
    if tag.list_element_size() != ElementSize::Byte {
        return fail(ErrorKind::MessageContainsListPointerOfNonBytesWhereDataWasExpected);
    }

    let count = tag.list_element_count() as usize;
    Ok(unsafe { bytes_mut(arena, target.segment_id, target.byte_offset(), count) })
}

/// Deep-copies the struct `value` into a fresh object behind `reff`.
pub fn set_struct_pointer(arena: &dyn BuilderArena, reff: WordRef, value: &StructReader) -> Result<()> {
    let data_bytes = round_bits_up_to_bytes(u64::from(value.data_size));
    let data_words = round_bytes_up_to_words(data_bytes);
    let size = StructSize::new(data_words as WordCount16, value.pointer_count);

    let target = allocate(
        arena,
        reff,
        size.total(),
        WirePointerKind::Struct,
        struct_upper(size),
    );

    arena.write_bytes_at(
        target.segment_id,
        target.byte_offset(),
        value.segment.slice(value.data, data_bytes as usize),
    );

    let pointers = target.offset(data_words);
    for i in 0..u32::from(value.pointer_count) {
        copy_pointer(
            arena,
            pointers.offset(i),
            value.arena,
            value.segment_id,
            value.segment,
            value.pointers + i,
            value.nesting_limit,
        )?;
    }
    Ok(())
}

/// Deep-copies the list `value` into a fresh object behind `reff`.
pub fn set_list_pointer(arena: &dyn BuilderArena, reff: WordRef, value: &ListReader) -> Result<()> {
    let total_words =
        round_bits_up_to_words(u64::from(value.element_count) * u64::from(value.step));

    if value.element_size != ElementSize::InlineComposite {
        //# List of non-structs.
        let target = allocate(
            arena,
            reff,
            total_words,
            WirePointerKind::List,
            list_upper(value.element_size, value.element_count),
        );

        if value.element_size == ElementSize::Pointer {
            //# List of pointers.
            let first = (value.ptr / BYTES_PER_WORD) as WordCount32;
            for i in 0..value.element_count {
                copy_pointer(
                    arena,
                    target.offset(i),
                    value.arena,
                    value.segment_id,
                    value.segment,
                    first + i,
                    value.nesting_limit,
                )?;
            }
        } else {
            //# List of data.
            let byte_len = round_bits_up_to_bytes(
                u64::from(value.element_count) * u64::from(value.step),
            ) as usize;
            arena.write_bytes_at(
                target.segment_id,
                target.byte_offset(),
                value.segment.slice(value.ptr, byte_len),
            );
        }
        return Ok(());
    }

    //# List of structs.
    let data_words = value.struct_data_size / BITS_PER_WORD as u32;
    let pointer_count = value.struct_pointer_count;
    let size = StructSize::new(data_words as WordCount16, pointer_count);
    let words_per_element = value.step / BITS_PER_WORD as u32;

    let target = allocate(
        arena,
        reff,
        total_words + POINTER_SIZE_IN_WORDS as u32,
        WirePointerKind::List,
        list_upper(ElementSize::InlineComposite, total_words),
    );
    target.set(
        arena,
        WirePointer::inline_composite_tag(value.element_count, size),
    );

    let mut dst = target.offset(1);
    let mut src_word = (value.ptr / BYTES_PER_WORD) as WordCount32;
    for _ in 0..value.element_count {
        let src_byte = src_word as usize * BYTES_PER_WORD;
        arena.write_bytes_at(
            dst.segment_id,
            dst.byte_offset(),
            value.segment.slice(src_byte, data_words as usize * BYTES_PER_WORD),
        );
        dst = dst.offset(data_words);
        for j in 0..u32::from(pointer_count) {
            copy_pointer(
                arena,
                dst,
                value.arena,
                value.segment_id,
                value.segment,
                src_word + data_words + j,
                value.nesting_limit,
            )?;
            dst = dst.offset(1);
        }
        src_word += words_per_element;
    }
    Ok(())
}

/// Deep-copies the object behind the pointer at `src_index` of `src_segment`
/// into `dst`. Works across messages and from default values.
pub fn copy_pointer(
    dst_arena: &dyn BuilderArena,
    dst: WordRef,
    src_arena: &dyn ReaderArena,
    src_segment_id: SegmentId,
    src_segment: SegmentReader<'_>,
    src_index: WordCount32,
    nesting_limit: i32,
) -> Result<()> {
    if read_word(src_segment, src_index).is_null() {
        clear_pointer(dst_arena, dst);
        return Ok(());
    }

    let resolved = follow_fars(src_arena, src_segment_id, src_segment, src_index)?;
    match resolved.pointer {
        Pointer::Struct { size, .. } => {
            if nesting_limit <= 0 {
                return fail(ErrorKind::MessageIsTooDeeplyNested);
            }
            contains_interval(
                src_arena,
                resolved.segment,
                resolved.target,
                u64::from(size.total()),
            )?;
            let value = struct_reader_at(src_arena, &resolved, size, nesting_limit - 1);
            set_struct_pointer(dst_arena, dst, &value)
        }
        Pointer::List {
            element_size,
            element_count,
            ..
        } => {
            if nesting_limit <= 0 {
                return fail(ErrorKind::MessageIsTooDeeplyNested);
            }
            let value = list_reader_at(
                src_arena,
                &resolved,
                element_size,
                element_count,
                None,
                nesting_limit - 1,
            )?;
            set_list_pointer(dst_arena, dst, &value)
        }
        Pointer::Far { .. } => fail(ErrorKind::UnexpectedFarPointer),
        Pointer::Null | Pointer::Other { .. } => fail(ErrorKind::UnknownPointerType),
    }
}

/// The pointer to read: the one in the message, or the default when the
/// message's pointer is null. `None` when both are null.
fn pointer_or_default<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    default: Option<&'a [Word]>,
) -> Option<(&'a dyn ReaderArena, SegmentId, SegmentReader<'a>, WordCount32)> {
    if !read_word(segment, ref_index).is_null() {
        return Some((arena, segment_id, segment, ref_index));
    }
    match default {
        Some(words) if !words.is_empty() && words[0].to_u64() != 0 => Some((
            &NULL_ARENA,
            0,
            SegmentReader::new(Word::words_to_bytes(words)),
            0,
        )),
        _ => None,
    }
}

fn struct_reader_at<'a>(
    arena: &'a dyn ReaderArena,
    resolved: &Resolved<'a>,
    size: StructSize,
    nesting_limit: i32,
) -> StructReader<'a> {
    StructReader {
        arena,
        segment_id: resolved.segment_id,
        segment: resolved.segment,
        data: resolved.target as usize * BYTES_PER_WORD,
        pointers: resolved.target + u32::from(size.data),
        data_size: u32::from(size.data) * BITS_PER_WORD as u32,
        pointer_count: size.pointers,
        nesting_limit,
    }
}

/// A reader over the list `resolved` leads to. `element_count` is the word
/// count when `element_size` is `InlineComposite`.
fn list_reader_at<'a>(
    arena: &'a dyn ReaderArena,
    resolved: &Resolved<'a>,
    element_size: ElementSize,
    element_count: ElementCount32,
    expected: Option<ElementSize>,
    nesting_limit: i32,
) -> Result<ListReader<'a>> {
    let segment = resolved.segment;

    if element_size == ElementSize::InlineComposite {
        let word_count = element_count;

        //# An InlineComposite list is prefixed by a tag word.
        contains_interval(
            arena,
            segment,
            resolved.target,
            u64::from(word_count) + POINTER_SIZE_IN_WORDS as u64,
        )?;

        let element_tag = read_word(segment, resolved.target);
        let Pointer::Struct {
            size: struct_size, ..
        } = element_tag.decode_tag()
        else {
            return fail(ErrorKind::InlineCompositeListsOfNonStructTypeAreNotSupported);
        };

        let size = element_tag.inline_composite_list_element_count();
        let words_per_element = struct_size.total();

        if u64::from(size) * u64::from(words_per_element) > u64::from(word_count) {
            return fail(ErrorKind::InlineCompositeListsElementsOverrunItsWordCount);
        }

        if words_per_element == 0 {
            //# Watch out for lists of zero-sized structs, which can claim to be
            //# arbitrarily large without having sent actual data.
            arena.check_read_limit(u64::from(size))?;
        }

        //# If a struct list was not expected, then presumably a non-struct list was upgraded
        //# to a struct list. We need to manipulate the pointer to point at the first field
        //# of the struct. Together with the `step` field, this will allow the struct list to
        //# be accessed as if it were a primitive list without branching.
        match expected {
            None | Some(ElementSize::Void) | Some(ElementSize::InlineComposite) => {}
            Some(ElementSize::Bit) => {
                return fail(ErrorKind::FoundStructListWhereBitListWasExpected);
            }
            Some(ElementSize::Pointer) => {
                if struct_size.pointers == 0 {
                    return fail(ErrorKind::ExpectedAPointerListButGotAListOfDataOnlyStructs);
                }
            }
            Some(_) => {
                if struct_size.data == 0 {
                    return fail(ErrorKind::ExpectedAPrimitiveListButGotAListOfPointerOnlyStructs);
                }
            }
        }

        return Ok(ListReader {
            arena,
            segment_id: resolved.segment_id,
            segment,
            ptr: (resolved.target as usize + POINTER_SIZE_IN_WORDS) * BYTES_PER_WORD,
            element_count: size,
            step: words_per_element * BITS_PER_WORD as u32,
            struct_data_size: u32::from(struct_size.data) * BITS_PER_WORD as u32,
            struct_pointer_count: struct_size.pointers,
            element_size,
            nesting_limit,
        });
    }

    //# This is a primitive or pointer list, but all such
    //# lists can also be interpreted as struct lists. We
    //# need to compute the data size and pointer count for
    //# such structs.
    let data_size = element_size.data_bits_per_element();
    let pointer_count = element_size.pointers_per_element();
    let step = element_size.step_bits();

    let word_count = round_bits_up_to_words(u64::from(element_count) * u64::from(step));
    contains_interval(arena, segment, resolved.target, u64::from(word_count))?;

    if element_size == ElementSize::Void {
        //# Watch out for lists of void, which can claim to be arbitrarily large
        //# without having sent actual data.
        arena.check_read_limit(u64::from(element_count))?;
    }

    if let Some(expected) = expected {
        //# Verify that the elements are at least as large as
        //# the expected type. Note that if we expected
        //# InlineComposite, the expected sizes here will be
        //# zero, because bounds checking will be performed at
        //# field access time. So this check here is for the
        //# case where we expected a list of some primitive or
        //# pointer type.
        if element_size == ElementSize::Bit && expected != ElementSize::Bit {
            return fail(ErrorKind::FoundBitListWhereStructListWasExpected);
        }
        if expected.data_bits_per_element() > data_size
            || expected.pointers_per_element() > pointer_count
        {
            return fail(ErrorKind::MessageContainsListWithIncompatibleElementType);
        }
    }

    Ok(ListReader {
        arena,
        segment_id: resolved.segment_id,
        segment,
        ptr: resolved.target as usize * BYTES_PER_WORD,
        element_count,
        step,
        struct_data_size: data_size,
        struct_pointer_count: pointer_count as u16,
        element_size,
        nesting_limit,
    })
}

pub fn read_struct_pointer<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    default: Option<&'a [Word]>,
    nesting_limit: i32,
) -> Result<StructReader<'a>> {
    let Some((arena, segment_id, segment, ref_index)) =
        pointer_or_default(arena, segment_id, segment, ref_index, default)
    else {
        return Ok(StructReader::new_default());
    };

    if nesting_limit <= 0 {
        return fail(ErrorKind::MessageIsTooDeeplyNested);
    }

    let resolved = follow_fars(arena, segment_id, segment, ref_index)?;
    let Pointer::Struct { size, .. } = resolved.pointer else {
        return fail(ErrorKind::MessageContainsNonStructPointerWhereStructPointerWasExpected);
    };

    contains_interval(
        arena,
        resolved.segment,
        resolved.target,
        u64::from(size.total()),
    )?;

    Ok(struct_reader_at(arena, &resolved, size, nesting_limit - 1))
}

pub fn read_list_pointer<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    default: Option<&'a [Word]>,
    expected: Option<ElementSize>,
    nesting_limit: i32,
) -> Result<ListReader<'a>> {
    let Some((arena, segment_id, segment, ref_index)) =
        pointer_or_default(arena, segment_id, segment, ref_index, default)
    else {
        return Ok(ListReader::new_default());
    };

    if nesting_limit <= 0 {
        return fail(ErrorKind::MessageIsTooDeeplyNested);
    }

    let resolved = follow_fars(arena, segment_id, segment, ref_index)?;
    let Pointer::List {
        element_size,
        element_count,
        ..
    } = resolved.pointer
    else {
        return fail(ErrorKind::MessageContainsNonListPointerWhereListPointerWasExpected);
    };

    list_reader_at(
        arena,
        &resolved,
        element_size,
        element_count,
        expected,
        nesting_limit - 1,
    )
}

/// The bytes of a byte list, checked against the segment and charged to the budget.
fn read_byte_list<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    non_list: ErrorKind,
    non_bytes: ErrorKind,
) -> Result<&'a [u8]> {
    let resolved = follow_fars(arena, segment_id, segment, ref_index)?;
    let size = match resolved.pointer {
        Pointer::List {
            element_size: ElementSize::Byte,
            element_count,
            ..
        } => element_count,
        Pointer::List { .. } => return fail(non_bytes),
        _ => return fail(non_list),
    };

    contains_interval(
        arena,
        resolved.segment,
        resolved.target,
        u64::from(round_bytes_up_to_words(size)),
    )?;

    Ok(resolved
        .segment
        .slice(resolved.target as usize * BYTES_PER_WORD, size as usize))
}

pub fn read_text_pointer<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    default: Option<&'a [Word]>,
) -> Result<&'a str> {
    let Some((arena, segment_id, segment, ref_index)) =
        pointer_or_default(arena, segment_id, segment, ref_index, default)
    else {
        return Ok("");
    };

    let bytes = read_byte_list(
        arena,
        segment_id,
        segment,
        ref_index,
        ErrorKind::MessageContainsNonListPointerWhereTextWasExpected,
        ErrorKind::MessageContainsListPointerOfNonBytesWhereTextWasExpected,
    )?;

    let Some((&0, content)) = bytes.split_last() else {
        return fail(ErrorKind::MessageContainsTextThatIsNotNULTerminated);
    };
    if content.contains(&0) {
        return fail(ErrorKind::TextContainsNulByte);
    }
    Ok(core::str::from_utf8(content)?)
}

pub fn read_data_pointer<'a>(
    arena: &'a dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'a>,
    ref_index: WordCount32,
    default: Option<&'a [Word]>,
) -> Result<&'a [u8]> {
    let Some((arena, segment_id, segment, ref_index)) =
        pointer_or_default(arena, segment_id, segment, ref_index, default)
    else {
        return Ok(&[]);
    };

    read_byte_list(
        arena,
        segment_id,
        segment,
        ref_index,
        ErrorKind::MessageContainsNonListPointerWhereDataWasExpected,
        ErrorKind::MessageContainsListPointerOfNonBytesWhereDataWasExpected,
    )
}

pub fn get_pointer_type(
    arena: &dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'_>,
    ref_index: WordCount32,
) -> Result<PointerType> {
    if read_word(segment, ref_index).is_null() {
        return Ok(PointerType::Null);
    }
    let resolved = follow_fars(arena, segment_id, segment, ref_index)?;
    match resolved.pointer {
        Pointer::Null => Ok(PointerType::Null),
        Pointer::Struct { .. } => Ok(PointerType::Struct),
        Pointer::List { .. } => Ok(PointerType::List),
        Pointer::Other { .. } => Ok(PointerType::Capability),
        Pointer::Far { .. } => fail(ErrorKind::UnexpectedFarPointer),
    }
}

/// Words reachable from the pointer at `ref_index`, landing pads excluded.
pub fn total_size(
    arena: &dyn ReaderArena,
    segment_id: SegmentId,
    segment: SegmentReader<'_>,
    ref_index: WordCount32,
    nesting_limit: i32,
) -> Result<MessageSize> {
    let mut result = MessageSize { word_count: 0 };

    if read_word(segment, ref_index).is_null() {
        return Ok(result);
    }

    if nesting_limit <= 0 {
        return fail(ErrorKind::MessageIsTooDeeplyNested);
    }
    let nesting_limit = nesting_limit - 1;

    let resolved = follow_fars(arena, segment_id, segment, ref_index)?;
    let (segment_id, segment, target) = (resolved.segment_id, resolved.segment, resolved.target);

    match resolved.pointer {
        Pointer::Struct { size, .. } => {
            contains_interval(arena, segment, target, u64::from(size.total()))?;
            result.word_count += u64::from(size.total());

            let pointers = target + u32::from(size.data);
            for i in 0..u32::from(size.pointers) {
                result.plus_eq(total_size(arena, segment_id, segment, pointers + i, nesting_limit)?);
            }
        }
        Pointer::List {
            element_size: ElementSize::Void,
            ..
        } => {
            //# Nothing.
        }
        Pointer::List {
            element_size: ElementSize::Pointer,
            element_count,
            ..
        } => {
            contains_interval(arena, segment, target, u64::from(element_count))?;
            result.word_count += u64::from(element_count);

            for i in 0..element_count {
                result.plus_eq(total_size(arena, segment_id, segment, target + i, nesting_limit)?);
            }
        }
        Pointer::List {
            element_size: ElementSize::InlineComposite,
            element_count: word_count,
            ..
        } => {
            contains_interval(
                arena,
                segment,
                target,
                u64::from(word_count) + POINTER_SIZE_IN_WORDS as u64,
            )?;

            let element_tag = read_word(segment, target);
            let Pointer::Struct { size, .. } = element_tag.decode_tag() else {
                return fail(ErrorKind::InlineCompositeListsOfNonStructTypeAreNotSupported);
            };

            let count = element_tag.inline_composite_list_element_count();
            let words_per_element = size.total();
            if u64::from(count) * u64::from(words_per_element) > u64::from(word_count) {
                return fail(ErrorKind::InlineCompositeListsElementsOverrunItsWordCount);
            }
            if words_per_element == 0 {
                arena.check_read_limit(u64::from(count))?;
            }

            // Sized from the element tag: that is what a copy would produce.
            result.word_count +=
                u64::from(count) * u64::from(words_per_element) + POINTER_SIZE_IN_WORDS as u64;

            if size.pointers > 0 {
                let mut pos = target + POINTER_SIZE_IN_WORDS as u32;
                for _ in 0..count {
                    pos += u32::from(size.data);
                    for _ in 0..size.pointers {
                        result.plus_eq(total_size(arena, segment_id, segment, pos, nesting_limit)?);
                        pos += 1;
                    }
                }
            }
        }
        Pointer::List {
            element_size,
            element_count,
            ..
        } => {
            let words = round_bits_up_to_words(
                u64::from(element_count) * u64::from(element_size.data_bits_per_element()),
            );
            contains_interval(arena, segment, target, u64::from(words))?;
            result.word_count += u64::from(words);
        }
        Pointer::Far { .. } => return fail(ErrorKind::UnexpectedFarPointer),
        Pointer::Null | Pointer::Other { .. } => return fail(ErrorKind::UnknownPointerType),
    }

    Ok(result)
}
