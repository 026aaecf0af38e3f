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

//! Untyped views over the objects of a message.
//!
//! Readers are cheap `Copy` handles holding a view of the segment they look
//! at, so field access is a bounds-checked read. Builders hold the arena and
//! a word position, and go through the arena for every access.

use crate::data;
use crate::private::arena::{BuilderArena, ReaderArena};
use crate::private::primitive::Primitive;
use crate::private::segment::SegmentReader;
use crate::private::units::*;
use crate::private::wire_helpers::{self, read_word, WordRef, NULL_ARENA};
use crate::text;
use crate::{Error, ErrorKind, MessageSize, Result, Word};

pub use crate::private::wire::{ElementSize, SegmentId, StructSize, WirePointerKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerType {
    Null,
    Struct,
    List,
    Capability,
}

static ZERO: [u8; BYTES_PER_WORD] = [0; BYTES_PER_WORD];

/// View of a builder segment, for handing to readers. It spans the whole
/// capacity, so objects allocated after the reader was made are in bounds.
fn builder_segment(arena: &dyn BuilderArena, segment_id: SegmentId) -> SegmentReader<'_> {
    match arena.as_reader().get_segment(segment_id) {
        Ok(segment) => segment,
        Err(_) => unreachable!("builder views only point into existing segments"),
    }
}

pub trait PrimitiveElement {
    fn get(list_reader: &ListReader, index: ElementCount32) -> Self;
    fn get_from_builder(list_builder: &ListBuilder, index: ElementCount32) -> Self;
    fn set(list_builder: &ListBuilder, index: ElementCount32, value: Self);
    fn element_size() -> ElementSize;
}

macro_rules! primitive_element(
    ($typ:ty, $size:ident) => (
        impl PrimitiveElement for $typ {
            #[inline]
            fn get(list_reader: &ListReader, index: ElementCount32) -> Self {
                list_reader.get_data_element(index)
            }

            #[inline]
            fn get_from_builder(list_builder: &ListBuilder, index: ElementCount32) -> Self {
                list_builder.get_data_element(index)
            }

            #[inline]
            fn set(list_builder: &ListBuilder, index: ElementCount32, value: Self) {
                list_builder.set_data_element(index, value)
            }

            fn element_size() -> ElementSize {
                ElementSize::$size
            }
        }
    );
);

primitive_element!(u8, Byte);
primitive_element!(i8, Byte);
primitive_element!(u16, TwoBytes);
primitive_element!(i16, TwoBytes);
primitive_element!(u32, FourBytes);
primitive_element!(i32, FourBytes);
primitive_element!(u64, EightBytes);
primitive_element!(i64, EightBytes);
primitive_element!(f32, FourBytes);
primitive_element!(f64, EightBytes);

impl PrimitiveElement for bool {
    #[inline]
    fn get(list: &ListReader, index: ElementCount32) -> Self {
        list.get_bool_element(index)
    }

    #[inline]
    fn get_from_builder(list: &ListBuilder, index: ElementCount32) -> Self {
        list.get_bool_element(index)
    }

    #[inline]
    fn set(list: &ListBuilder, index: ElementCount32, value: Self) {
        list.set_bool_element(index, value)
    }

    fn element_size() -> ElementSize {
        ElementSize::Bit
    }
}

impl PrimitiveElement for () {
    #[inline]
    fn get(_list: &ListReader, _index: ElementCount32) {}

    #[inline]
    fn get_from_builder(_list: &ListBuilder, _index: ElementCount32) {}

    #[inline]
    fn set(_list: &ListBuilder, _index: ElementCount32, _value: ()) {}

    fn element_size() -> ElementSize {
        ElementSize::Void
    }
}

/// A pointer slot in a message being read.
#[derive(Clone, Copy)]
pub struct PointerReader<'a> {
    pub(crate) arena: &'a dyn ReaderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) segment: SegmentReader<'a>,
    pub(crate) pointer: WordCount32,
    pub(crate) nesting_limit: i32,
}

impl<'a> PointerReader<'a> {
    /// A null pointer, not attached to any message.
    pub fn new_default<'b>() -> PointerReader<'b> {
        PointerReader {
            arena: &NULL_ARENA,
            segment_id: 0,
            segment: SegmentReader::new(&ZERO),
            pointer: 0,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn get_root(
        arena: &'a dyn ReaderArena,
        segment_id: SegmentId,
        location: WordCount32,
        nesting_limit: i32,
    ) -> Result<Self> {
        let segment = arena.get_segment(segment_id)?;
        if segment.is_empty() && location == 0 {
            // An empty first segment is a message whose root was never set.
            return Ok(PointerReader::new_default());
        }
        if location as usize >= segment.len_in_words() {
            return Err(Error::from_kind(
                ErrorKind::MessageContainsOutOfBoundsPointer,
            ));
        }
        Ok(PointerReader {
            arena,
            segment_id,
            segment,
            pointer: location,
            nesting_limit,
        })
    }

    /// A reader over a flat, trusted value such as a constant or default.
    /// The first word is the pointer; every target must be in `words`.
    pub fn get_root_unchecked(words: &'a [Word]) -> Self {
        if words.is_empty() {
            return PointerReader::new_default();
        }
        PointerReader {
            arena: &NULL_ARENA,
            segment_id: 0,
            segment: SegmentReader::new(Word::words_to_bytes(words)),
            pointer: 0,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn is_null(&self) -> bool {
        read_word(self.segment, self.pointer).is_null()
    }

    pub fn total_size(&self) -> Result<MessageSize> {
        wire_helpers::total_size(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            self.nesting_limit,
        )
    }

    pub fn get_struct(self, default: Option<&'a [Word]>) -> Result<StructReader<'a>> {
        wire_helpers::read_struct_pointer(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            default,
            self.nesting_limit,
        )
    }

    pub fn get_list(
        self,
        expected_element_size: ElementSize,
        default: Option<&'a [Word]>,
    ) -> Result<ListReader<'a>> {
        wire_helpers::read_list_pointer(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            default,
            Some(expected_element_size),
            self.nesting_limit,
        )
    }

    /// Reads a list without checking its element size against anything.
    pub fn get_list_any_size(self, default: Option<&'a [Word]>) -> Result<ListReader<'a>> {
        wire_helpers::read_list_pointer(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            default,
            None,
            self.nesting_limit,
        )
    }

    pub fn get_text(self, default: Option<&'a [Word]>) -> Result<text::Reader<'a>> {
        wire_helpers::read_text_pointer(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            default,
        )
    }

    pub fn get_data(self, default: Option<&'a [Word]>) -> Result<data::Reader<'a>> {
        wire_helpers::read_data_pointer(
            self.arena,
            self.segment_id,
            self.segment,
            self.pointer,
            default,
        )
    }

    pub fn get_pointer_type(&self) -> Result<PointerType> {
        wire_helpers::get_pointer_type(self.arena, self.segment_id, self.segment, self.pointer)
    }
}

/// A pointer slot in a message being built.
pub struct PointerBuilder<'a> {
    pub(crate) arena: &'a dyn BuilderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) pointer: WordCount32,
}

impl<'a> PointerBuilder<'a> {
    #[inline]
    fn location(&self) -> WordRef {
        WordRef::new(self.segment_id, self.pointer)
    }

    pub fn get_root(arena: &'a dyn BuilderArena, segment_id: SegmentId, location: WordCount32) -> Self {
        PointerBuilder {
            arena,
            segment_id,
            pointer: location,
        }
    }

    pub fn reborrow(&mut self) -> PointerBuilder<'_> {
        PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: self.pointer,
        }
    }

    pub fn is_null(&self) -> bool {
        self.arena.get_word(self.segment_id, self.pointer).is_null()
    }

    pub fn get_struct(self, size: StructSize, default: Option<&[Word]>) -> Result<StructBuilder<'a>> {
        wire_helpers::get_writable_struct_pointer(self.arena, self.location(), size, default)
    }

    pub fn get_list(
        self,
        element_size: ElementSize,
        default: Option<&[Word]>,
    ) -> Result<ListBuilder<'a>> {
        wire_helpers::get_writable_list_pointer(self.arena, self.location(), element_size, default)
    }

    pub fn get_struct_list(
        self,
        element_size: StructSize,
        default: Option<&[Word]>,
    ) -> Result<ListBuilder<'a>> {
        wire_helpers::get_writable_struct_list_pointer(
            self.arena,
            self.location(),
            element_size,
            default,
        )
    }

    pub fn get_text(self, default: Option<&[Word]>) -> Result<text::Builder<'a>> {
        wire_helpers::get_writable_text_pointer(self.arena, self.location(), default)
    }

    pub fn get_data(self, default: Option<&[Word]>) -> Result<data::Builder<'a>> {
        wire_helpers::get_writable_data_pointer(self.arena, self.location(), default)
    }

    pub fn init_struct(self, size: StructSize) -> StructBuilder<'a> {
        wire_helpers::init_struct_pointer(self.arena, self.location(), size)
    }

    pub fn init_list(self, element_size: ElementSize, element_count: ElementCount32) -> ListBuilder<'a> {
        wire_helpers::init_list_pointer(self.arena, self.location(), element_count, element_size)
    }

    pub fn init_struct_list(
        self,
        element_count: ElementCount32,
        element_size: StructSize,
    ) -> ListBuilder<'a> {
        wire_helpers::init_struct_list_pointer(
            self.arena,
            self.location(),
            element_count,
            element_size,
        )
    }

    pub fn init_text(self, size: ByteCount32) -> text::Builder<'a> {
        wire_helpers::init_text_pointer(self.arena, self.location(), size)
    }

    pub fn init_data(self, size: ByteCount32) -> data::Builder<'a> {
        wire_helpers::init_data_pointer(self.arena, self.location(), size)
    }

    pub fn set_struct(&mut self, value: &StructReader) -> Result<()> {
        wire_helpers::set_struct_pointer(self.arena, self.location(), value)
    }

    pub fn set_list(&mut self, value: &ListReader) -> Result<()> {
        wire_helpers::set_list_pointer(self.arena, self.location(), value)
    }

    pub fn set_text(&mut self, value: &str) -> Result<()> {
        wire_helpers::set_text_pointer(self.arena, self.location(), value)
    }

    pub fn set_data(&mut self, value: &[u8]) {
        wire_helpers::set_data_pointer(self.arena, self.location(), value)
    }

    /// Deep-copies whatever `other` points at into this slot.
    pub fn copy_from(&mut self, other: PointerReader) -> Result<()> {
        wire_helpers::copy_pointer(
            self.arena,
            self.location(),
            other.arena,
            other.segment_id,
            other.segment,
            other.pointer,
            other.nesting_limit,
        )
    }

    pub fn clear(&mut self) {
        wire_helpers::clear_pointer(self.arena, self.location())
    }

    pub fn into_reader(self) -> PointerReader<'a> {
        PointerReader {
            arena: self.arena.as_reader(),
            segment_id: self.segment_id,
            segment: builder_segment(self.arena, self.segment_id),
            pointer: self.pointer,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn reborrow_as_reader(&self) -> PointerReader<'_> {
        PointerReader {
            arena: self.arena.as_reader(),
            segment_id: self.segment_id,
            segment: builder_segment(self.arena, self.segment_id),
            pointer: self.pointer,
            nesting_limit: 0x7fffffff,
        }
    }
}

#[derive(Clone, Copy)]
pub struct StructReader<'a> {
    pub(crate) arena: &'a dyn ReaderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) segment: SegmentReader<'a>,
    /// Byte offset of the data section.
    pub(crate) data: ByteCount,
    /// Word index of the pointer section.
    pub(crate) pointers: WordCount32,
    pub(crate) data_size: BitCount32,
    pub(crate) pointer_count: WirePointerCount16,
    pub(crate) nesting_limit: i32,
}

impl<'a> StructReader<'a> {
    /// An empty struct: every field reads as its default.
    pub fn new_default<'b>() -> StructReader<'b> {
        StructReader {
            arena: &NULL_ARENA,
            segment_id: 0,
            segment: SegmentReader::new(&ZERO),
            data: 0,
            pointers: 0,
            data_size: 0,
            pointer_count: 0,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn get_data_section_size(&self) -> BitCount32 {
        self.data_size
    }

    pub fn get_pointer_section_size(&self) -> WirePointerCount16 {
        self.pointer_count
    }

    /// Reads the `offset`th `T`-sized field of the data section. Fields past
    /// the end of the section read as zero.
    #[inline]
    pub fn get_data_field<T: Primitive>(&self, offset: ElementCount) -> T {
        //# Prior to release 0.7.0, it was possible for a struct to
        //# be in a default state with no data section and no pointer
        //# section. For backwards compatibility, we need to treat
        //# such a struct as having all its fields be zero.
        if (offset + 1) * T::SIZE * BITS_PER_BYTE <= self.data_size as usize {
            self.segment.read(self.data + offset * T::SIZE)
        } else {
            T::zero()
        }
    }

    #[inline]
    pub fn get_bool_field(&self, offset: ElementCount) -> bool {
        if offset < self.data_size as usize {
            let byte: u8 = self.segment.read(self.data + offset / BITS_PER_BYTE);
            (byte >> (offset % BITS_PER_BYTE)) & 1 != 0
        } else {
            false
        }
    }

    #[inline]
    pub fn get_data_field_mask<T: Primitive>(&self, offset: ElementCount, mask: T::Bits) -> T {
        self.get_data_field::<T>(offset).mask(mask)
    }

    #[inline]
    pub fn get_bool_field_mask(&self, offset: ElementCount, mask: bool) -> bool {
        self.get_bool_field(offset) ^ mask
    }

    /// The `ptr_index`th pointer field. Fields past the end of the section read as null.
    #[inline]
    pub fn get_pointer_field(&self, ptr_index: WirePointerCount) -> PointerReader<'a> {
        if ptr_index < self.pointer_count as WirePointerCount {
            PointerReader {
                arena: self.arena,
                segment_id: self.segment_id,
                segment: self.segment,
                pointer: self.pointers + ptr_index as WordCount32,
                nesting_limit: self.nesting_limit,
            }
        } else {
            PointerReader::new_default()
        }
    }

    pub fn total_size(&self) -> Result<MessageSize> {
        let mut result = MessageSize {
            word_count: u64::from(round_bits_up_to_words(u64::from(self.data_size)))
                + u64::from(self.pointer_count) * WORDS_PER_POINTER as u64,
        };

        for i in 0..self.pointer_count as usize {
            result.plus_eq(self.get_pointer_field(i).total_size()?);
        }

        Ok(result)
    }
}

#[derive(Clone, Copy)]
pub struct StructBuilder<'a> {
    pub(crate) arena: &'a dyn BuilderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) data: ByteCount,
    pub(crate) pointers: WordCount32,
    pub(crate) data_size: BitCount32,
    pub(crate) pointer_count: WirePointerCount16,
}

impl<'a> StructBuilder<'a> {
    pub fn into_reader(self) -> StructReader<'a> {
        StructReader {
            arena: self.arena.as_reader(),
            segment_id: self.segment_id,
            segment: builder_segment(self.arena, self.segment_id),
            data: self.data,
            pointers: self.pointers,
            data_size: self.data_size,
            pointer_count: self.pointer_count,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn reborrow(&mut self) -> StructBuilder<'_> {
        *self
    }

    pub fn get_data_section_size(&self) -> BitCount32 {
        self.data_size
    }

    pub fn get_pointer_section_size(&self) -> WirePointerCount16 {
        self.pointer_count
    }

    #[inline]
    fn check_data_field(&self, offset: ElementCount, bits: BitCount0) {
        assert!(
            (offset + 1) * bits <= self.data_size as usize,
            "data field {offset} ({bits} bits) is outside the data section"
        );
    }

    #[inline]
    pub fn set_data_field<T: Primitive>(&self, offset: ElementCount, value: T) {
        self.check_data_field(offset, T::SIZE * BITS_PER_BYTE);
        let mut buf = [0u8; BYTES_PER_WORD];
        value.write_le(&mut buf[..T::SIZE]);
        self.arena
            .write_bytes_at(self.segment_id, self.data + offset * T::SIZE, &buf[..T::SIZE]);
    }

    #[inline]
    pub fn set_data_field_mask<T: Primitive>(&self, offset: ElementCount, value: T, mask: T::Bits) {
        self.set_data_field(offset, value.mask(mask));
    }

    #[inline]
    pub fn get_data_field<T: Primitive>(&self, offset: ElementCount) -> T {
        self.check_data_field(offset, T::SIZE * BITS_PER_BYTE);
        let mut buf = [0u8; BYTES_PER_WORD];
        self.arena.read_bytes_at(
            self.segment_id,
            self.data + offset * T::SIZE,
            &mut buf[..T::SIZE],
        );
        T::read_le(&buf[..T::SIZE])
    }

    #[inline]
    pub fn get_data_field_mask<T: Primitive>(&self, offset: ElementCount, mask: T::Bits) -> T {
        self.get_data_field::<T>(offset).mask(mask)
    }

    #[inline]
    pub fn set_bool_field(&self, offset: ElementCount, value: bool) {
        //# This branch should be compiled out whenever this is
        //# inlined with a constant offset.
        self.check_data_field(offset, 1);
        let byte_offset = self.data + offset / BITS_PER_BYTE;
        let bitnum = offset % BITS_PER_BYTE;
        let mut byte = [0u8; 1];
        self.arena.read_bytes_at(self.segment_id, byte_offset, &mut byte);
        byte[0] = (byte[0] & !(1 << bitnum)) | (u8::from(value) << bitnum);
        self.arena.write_bytes_at(self.segment_id, byte_offset, &byte);
    }

    #[inline]
    pub fn set_bool_field_mask(&self, offset: ElementCount, value: bool, mask: bool) {
        self.set_bool_field(offset, value ^ mask);
    }

    #[inline]
    pub fn get_bool_field(&self, offset: ElementCount) -> bool {
        self.check_data_field(offset, 1);
        let mut byte = [0u8; 1];
        self.arena
            .read_bytes_at(self.segment_id, self.data + offset / BITS_PER_BYTE, &mut byte);
        (byte[0] >> (offset % BITS_PER_BYTE)) & 1 != 0
    }

    #[inline]
    pub fn get_bool_field_mask(&self, offset: ElementCount, mask: bool) -> bool {
        self.get_bool_field(offset) ^ mask
    }

    #[inline]
    pub fn get_pointer_field(self, ptr_index: WirePointerCount) -> PointerBuilder<'a> {
        assert!(
            ptr_index < self.pointer_count as WirePointerCount,
            "pointer field {ptr_index} is outside the pointer section"
        );
        PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: self.pointers + ptr_index as WordCount32,
        }
    }

    #[inline]
    pub fn is_pointer_field_null(&self, ptr_index: WirePointerCount) -> bool {
        self.get_pointer_field(ptr_index).is_null()
    }

    /// Replaces this struct's content with a deep copy of `other`'s. Fields
    /// `other` lacks are zeroed; fields this struct lacks are dropped.
    pub fn copy_content_from(&mut self, other: &StructReader) -> Result<()> {
        let shared_data_size = self.data_size.min(other.data_size);
        let shared_pointer_count = self.pointer_count.min(other.pointer_count);

        //# Zero out this struct's data section, then copy over what the two
        //# have in common.
        self.arena.zero_bytes(
            self.segment_id,
            self.data,
            (self.data_size / BITS_PER_BYTE as u32) as usize,
        );
        if shared_data_size == 1 {
            self.set_bool_field(0, other.get_bool_field(0));
        } else {
            let len = (shared_data_size / BITS_PER_BYTE as u32) as usize;
            self.arena
                .write_bytes_at(self.segment_id, self.data, other.segment.slice(other.data, len));
        }

        //# Zero out all pointers in the target.
        for i in 0..u32::from(self.pointer_count) {
            wire_helpers::clear_pointer(self.arena, WordRef::new(self.segment_id, self.pointers + i));
        }

        for i in 0..u32::from(shared_pointer_count) {
            wire_helpers::copy_pointer(
                self.arena,
                WordRef::new(self.segment_id, self.pointers + i),
                other.arena,
                other.segment_id,
                other.segment,
                other.pointers + i,
                other.nesting_limit,
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub struct ListReader<'a> {
    pub(crate) arena: &'a dyn ReaderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) segment: SegmentReader<'a>,
    /// Byte offset of the first element.
    pub(crate) ptr: ByteCount,
    pub(crate) element_count: ElementCount32,
    pub(crate) step: BitCount32,
    pub(crate) struct_data_size: BitCount32,
    pub(crate) struct_pointer_count: WirePointerCount16,
    pub(crate) element_size: ElementSize,
    pub(crate) nesting_limit: i32,
}

impl<'a> ListReader<'a> {
    pub fn new_default<'b>() -> ListReader<'b> {
        ListReader {
            arena: &NULL_ARENA,
            segment_id: 0,
            segment: SegmentReader::new(&ZERO),
            ptr: 0,
            element_count: 0,
            step: 0,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size: ElementSize::Void,
            nesting_limit: 0x7fffffff,
        }
    }

    #[inline]
    pub fn len(&self) -> ElementCount32 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_element_size(&self) -> ElementSize {
        self.element_size
    }

    #[inline]
    fn element_byte(&self, index: ElementCount32) -> ByteCount {
        debug_assert!(index < self.element_count);
        self.ptr + (u64::from(index) * u64::from(self.step) / BITS_PER_BYTE as u64) as usize
    }

    pub fn get_struct_element(&self, index: ElementCount32) -> StructReader<'a> {
        debug_assert!(
            self.element_size != ElementSize::Bit,
            "bit list elements are not structs"
        );
        let data = self.element_byte(index);
        let pointers = (data + (self.struct_data_size / BITS_PER_BYTE as u32) as usize) / BYTES_PER_WORD;

        StructReader {
            arena: self.arena,
            segment_id: self.segment_id,
            segment: self.segment,
            data,
            pointers: pointers as WordCount32,
            data_size: self.struct_data_size,
            pointer_count: self.struct_pointer_count,
            nesting_limit: self.nesting_limit - 1,
        }
    }

    pub fn get_pointer_element(self, index: ElementCount32) -> PointerReader<'a> {
        let offset = self.element_byte(index) + (self.struct_data_size / BITS_PER_BYTE as u32) as usize;
        PointerReader {
            arena: self.arena,
            segment_id: self.segment_id,
            segment: self.segment,
            pointer: (offset / BYTES_PER_WORD) as WordCount32,
            nesting_limit: self.nesting_limit,
        }
    }

    #[inline]
    pub fn get_data_element<T: Primitive>(&self, index: ElementCount32) -> T {
        self.segment.read(self.element_byte(index))
    }

    #[inline]
    pub fn get_bool_element(&self, index: ElementCount32) -> bool {
        //# Ignore step for bit lists because bit lists cannot be upgraded to struct lists.
        let bindex = u64::from(index) * u64::from(self.step);
        let byte: u8 = self
            .segment
            .read(self.ptr + (bindex / BITS_PER_BYTE as u64) as usize);
        (byte >> (bindex % BITS_PER_BYTE as u64)) & 1 != 0
    }

    /// The list's bytes in wire order. Meaningful for primitive lists.
    pub fn into_raw_bytes(self) -> &'a [u8] {
        let len = round_bits_up_to_bytes(u64::from(self.element_count) * u64::from(self.step));
        self.segment.slice(self.ptr, len as usize)
    }
}

#[derive(Clone, Copy)]
pub struct ListBuilder<'a> {
    pub(crate) arena: &'a dyn BuilderArena,
    pub(crate) segment_id: SegmentId,
    pub(crate) ptr: ByteCount,
    pub(crate) element_count: ElementCount32,
    pub(crate) step: BitCount32,
    pub(crate) struct_data_size: BitCount32,
    pub(crate) struct_pointer_count: WirePointerCount16,
    pub(crate) element_size: ElementSize,
}

impl<'a> ListBuilder<'a> {
    /// A zero-length list that is not written anywhere.
    pub fn new_empty(
        arena: &'a dyn BuilderArena,
        segment_id: SegmentId,
        element_size: ElementSize,
    ) -> Self {
        ListBuilder {
            arena,
            segment_id,
            ptr: 0,
            element_count: 0,
            step: 0,
            struct_data_size: 0,
            struct_pointer_count: 0,
            element_size,
        }
    }

    pub fn into_reader(self) -> ListReader<'a> {
        ListReader {
            arena: self.arena.as_reader(),
            segment_id: self.segment_id,
            segment: builder_segment(self.arena, self.segment_id),
            ptr: self.ptr,
            element_count: self.element_count,
            step: self.step,
            struct_data_size: self.struct_data_size,
            struct_pointer_count: self.struct_pointer_count,
            element_size: self.element_size,
            nesting_limit: 0x7fffffff,
        }
    }

    pub fn reborrow(&mut self) -> ListBuilder<'_> {
        *self
    }

    #[inline]
    pub fn len(&self) -> ElementCount32 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_element_size(&self) -> ElementSize {
        self.element_size
    }

    #[inline]
    fn element_byte(&self, index: ElementCount32) -> ByteCount {
        assert!(index < self.element_count, "list index out of bounds");
        self.ptr + (u64::from(index) * u64::from(self.step) / BITS_PER_BYTE as u64) as usize
    }

    pub fn get_struct_element(self, index: ElementCount32) -> StructBuilder<'a> {
        let data = self.element_byte(index);
        let pointers = (data + (self.struct_data_size / BITS_PER_BYTE as u32) as usize) / BYTES_PER_WORD;
        StructBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            data,
            pointers: pointers as WordCount32,
            data_size: self.struct_data_size,
            pointer_count: self.struct_pointer_count,
        }
    }

    pub fn get_pointer_element(self, index: ElementCount32) -> PointerBuilder<'a> {
        let offset = self.element_byte(index) + (self.struct_data_size / BITS_PER_BYTE as u32) as usize;
        PointerBuilder {
            arena: self.arena,
            segment_id: self.segment_id,
            pointer: (offset / BYTES_PER_WORD) as WordCount32,
        }
    }

    #[inline]
    pub fn get_data_element<T: Primitive>(&self, index: ElementCount32) -> T {
        let mut buf = [0u8; BYTES_PER_WORD];
        self.arena
            .read_bytes_at(self.segment_id, self.element_byte(index), &mut buf[..T::SIZE]);
        T::read_le(&buf[..T::SIZE])
    }

    #[inline]
    pub fn set_data_element<T: Primitive>(&self, index: ElementCount32, value: T) {
        let mut buf = [0u8; BYTES_PER_WORD];
        value.write_le(&mut buf[..T::SIZE]);
        self.arena
            .write_bytes_at(self.segment_id, self.element_byte(index), &buf[..T::SIZE]);
    }

    #[inline]
    pub fn get_bool_element(&self, index: ElementCount32) -> bool {
        assert!(index < self.element_count, "list index out of bounds");
        let bindex = u64::from(index) * u64::from(self.step);
        let mut byte = [0u8; 1];
        self.arena.read_bytes_at(
            self.segment_id,
            self.ptr + (bindex / BITS_PER_BYTE as u64) as usize,
            &mut byte,
        );
        (byte[0] >> (bindex % BITS_PER_BYTE as u64)) & 1 != 0
    }

    #[inline]
    pub fn set_bool_element(&self, index: ElementCount32, value: bool) {
        assert!(index < self.element_count, "list index out of bounds");
        let bindex = u64::from(index) * u64::from(self.step);
        let byte_offset = self.ptr + (bindex / BITS_PER_BYTE as u64) as usize;
        let bitnum = bindex % BITS_PER_BYTE as u64;
        let mut byte = [0u8; 1];
        self.arena.read_bytes_at(self.segment_id, byte_offset, &mut byte);
        byte[0] = (byte[0] & !(1 << bitnum)) | (u8::from(value) << bitnum);
        self.arena.write_bytes_at(self.segment_id, byte_offset, &byte);
    }

    /// The list's bytes in wire order, for bulk writes into a primitive list.
    pub fn into_raw_bytes(self) -> &'a mut [u8] {
        let len = round_bits_up_to_bytes(u64::from(self.element_count) * u64::from(self.step));
        if len == 0 {
            return &mut [];
        }
        // A list builder is the only handle on its elements while it is consumed.
        unsafe { wire_helpers::bytes_mut(self.arena, self.segment_id, self.ptr, len as usize) }
    }
}
