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

//! Bit layout of the one-word pointers that link a message together.
//!
//! ```text
//!  bits [0, 2)   kind: 0 struct, 1 list, 2 far, 3 other
//!  STRUCT  [2, 32) signed offset   [32, 48) data words   [48, 64) pointer count
//!  LIST    [2, 32) signed offset   [32, 35) element size [35, 64) count (or words)
//!  FAR     [2]  double-far flag    [3, 32) landing pad   [32, 64) segment id
//! ```
//!
//! Offsets are in words, relative to the word after the pointer.

use crate::private::units::*;

pub type SegmentId = u32;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WirePointerKind {
    Struct = 0,
    List = 1,
    Far = 2,
    Other = 3,
}

impl WirePointerKind {
    #[inline]
    fn from_bits(val: u32) -> Self {
        match val & 3 {
            0 => Self::Struct,
            1 => Self::List,
            2 => Self::Far,
            _ => Self::Other,
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementSize {
    Void = 0,
    Bit = 1,
    Byte = 2,
    TwoBytes = 3,
    FourBytes = 4,
    EightBytes = 5,
    Pointer = 6,
    InlineComposite = 7,
}

impl ElementSize {
    #[inline]
    pub fn from_bits(val: u32) -> Self {
        match val & 7 {
            0 => Self::Void,
            1 => Self::Bit,
            2 => Self::Byte,
            3 => Self::TwoBytes,
            4 => Self::FourBytes,
            5 => Self::EightBytes,
            6 => Self::Pointer,
            _ => Self::InlineComposite,
        }
    }

    pub fn data_bits_per_element(self) -> BitCount32 {
        match self {
            Self::Void => 0,
            Self::Bit => 1,
            Self::Byte => 8,
            Self::TwoBytes => 16,
            Self::FourBytes => 32,
            Self::EightBytes => 64,
            Self::Pointer => 0,
            Self::InlineComposite => 0,
        }
    }

    pub fn pointers_per_element(self) -> WirePointerCount32 {
        match self {
            Self::Pointer => 1,
            _ => 0,
        }
    }

    /// Bits from the start of one element to the start of the next, for every
    /// size except `InlineComposite` (whose step lives in the list's tag word).
    pub fn step_bits(self) -> BitCount32 {
        self.data_bits_per_element() + self.pointers_per_element() * BITS_PER_POINTER as u32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructSize {
    pub data: WordCount16,
    pub pointers: WirePointerCount16,
}

impl StructSize {
    pub const fn new(data: WordCount16, pointers: WirePointerCount16) -> Self {
        Self { data, pointers }
    }

    pub fn total(&self) -> WordCount32 {
        u32::from(self.data) + u32::from(self.pointers) * WORDS_PER_POINTER as WordCount32
    }

    /// The smallest size holding both `self` and `other`.
    pub fn union(self, other: Self) -> Self {
        Self {
            data: self.data.max(other.data),
            pointers: self.pointers.max(other.pointers),
        }
    }

    /// True when every section of `self` is at least as big as `other`'s.
    pub fn covers(self, other: Self) -> bool {
        self.data >= other.data && self.pointers >= other.pointers
    }
}

/// One pointer word, decoded lazily.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct WirePointer(u64);

impl core::fmt::Debug for WirePointer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WirePointer({:#018x} {:?})", self.0, self.decode())
    }
}

impl WirePointer {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_word(word: u64) -> Self {
        Self(word)
    }

    #[inline]
    pub const fn word(self) -> u64 {
        self.0
    }

    #[inline]
    fn lower(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn upper(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    fn from_halves(lower: u32, upper: u32) -> Self {
        Self(u64::from(lower) | (u64::from(upper) << 32))
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn kind(self) -> WirePointerKind {
        WirePointerKind::from_bits(self.lower())
    }

    /// Matches struct and list pointers but not far and other pointers.
    #[inline]
    pub fn is_positional(self) -> bool {
        (self.lower() & 2) == 0
    }

    /// Signed offset of the target, in words, from the word after the pointer.
    #[inline]
    pub fn offset(self) -> i32 {
        (self.lower() as i32) >> 2
    }

    /// Word index of the target, given the index of the word holding this pointer.
    /// May be negative or past the end for a corrupt pointer; callers check bounds.
    #[inline]
    pub fn target_index(self, pointer_index: u32) -> i64 {
        i64::from(pointer_index) + 1 + i64::from(self.offset())
    }

    /// A struct or list pointer of `kind` at word `from` aiming at word `to`,
    /// both in the same segment, with the given upper half.
    #[inline]
    pub fn positional(kind: WirePointerKind, from: u32, to: u32, upper: u32) -> Self {
        let offset = i64::from(to) - i64::from(from) - 1;
        Self::from_halves(((offset as i32) << 2) as u32 | kind as u32, upper)
    }

    /// A tag with a zero offset; used for landing pads of double-far pointers,
    /// where the object location comes from the far pointer instead.
    #[inline]
    pub fn tag(kind: WirePointerKind, upper: u32) -> Self {
        Self::from_halves(kind as u32, upper)
    }

    /// A pointer at an empty struct. Assuming the pointer itself is in-bounds,
    /// the target may be the pointer itself or the word after it. The latter would
    /// make the pointer null (the upper half is zero for an empty struct), so the
    /// offset is -1, as if the struct were allocated immediately before the pointer.
    #[inline]
    pub fn empty_struct() -> Self {
        Self::from_halves(0xffff_fffc, 0)
    }

    #[inline]
    pub fn far(is_double_far: bool, landing_pad: WordCount32, segment_id: SegmentId) -> Self {
        Self::from_halves(
            (landing_pad << 3) | (u32::from(is_double_far) << 2) | WirePointerKind::Far as u32,
            segment_id,
        )
    }

    /// The tag word at the head of an inline composite list: kind STRUCT, the
    /// element count where the offset would be, and the per-element size.
    #[inline]
    pub fn inline_composite_tag(element_count: ElementCount32, size: StructSize) -> Self {
        assert!(
            element_count < MAX_LIST_ELEMENTS,
            "Lists are limited to 2**29 elements"
        );
        Self::from_halves(
            (element_count << 2) | WirePointerKind::Struct as u32,
            struct_upper(size),
        )
    }

    #[inline]
    pub fn inline_composite_list_element_count(self) -> ElementCount32 {
        self.lower() >> 2
    }

    #[inline]
    pub fn far_position_in_segment(self) -> WordCount32 {
        self.lower() >> 3
    }

    #[inline]
    pub fn is_double_far(self) -> bool {
        ((self.lower() >> 2) & 1) != 0
    }

    #[inline]
    pub fn far_segment_id(self) -> SegmentId {
        self.upper()
    }

    #[inline]
    pub fn struct_data_size(self) -> WordCount16 {
        self.upper() as WordCount16
    }

    #[inline]
    pub fn struct_ptr_count(self) -> WirePointerCount16 {
        (self.upper() >> 16) as WirePointerCount16
    }

    #[inline]
    pub fn struct_size(self) -> StructSize {
        StructSize::new(self.struct_data_size(), self.struct_ptr_count())
    }

    #[inline]
    pub fn struct_word_size(self) -> WordCount32 {
        self.struct_size().total()
    }

    #[inline]
    pub fn list_element_size(self) -> ElementSize {
        ElementSize::from_bits(self.upper())
    }

    #[inline]
    pub fn list_element_count(self) -> ElementCount32 {
        self.upper() >> 3
    }

    #[inline]
    pub fn list_inline_composite_word_count(self) -> WordCount32 {
        self.list_element_count()
    }

    /// Decodes the word into its tagged form.
    pub fn decode(self) -> Pointer {
        if self.is_null() {
            return Pointer::Null;
        }
        match self.kind() {
            WirePointerKind::Struct => Pointer::Struct {
                offset: self.offset(),
                size: self.struct_size(),
            },
            WirePointerKind::List => Pointer::List {
                offset: self.offset(),
                element_size: self.list_element_size(),
                element_count: self.list_element_count(),
            },
            WirePointerKind::Far => Pointer::Far {
                is_double_far: self.is_double_far(),
                landing_pad: self.far_position_in_segment(),
                segment_id: self.far_segment_id(),
            },
            WirePointerKind::Other => Pointer::Other {
                lower: self.lower(),
                upper: self.upper(),
            },
        }
    }

    /// Decodes a word that describes an object rather than pointing at one:
    /// a landing-pad tag or the head of an inline composite list. Zero there
    /// means an empty struct, never null.
    pub fn decode_tag(self) -> Pointer {
        match self.decode() {
            Pointer::Null => Pointer::Struct {
                offset: 0,
                size: StructSize::default(),
            },
            pointer => pointer,
        }
    }
}

/// Upper half of a struct pointer of the given size.
#[inline]
pub fn struct_upper(size: StructSize) -> u32 {
    u32::from(size.data) | (u32::from(size.pointers) << 16)
}

/// Upper half of a list pointer. For `InlineComposite` the count is in words.
#[inline]
pub fn list_upper(element_size: ElementSize, count: ElementCount32) -> u32 {
    assert!(
        count < MAX_LIST_ELEMENTS,
        "Lists are limited to 2**29 elements"
    );
    (count << 3) | element_size as u32
}

/// A pointer word decoded into its tagged form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    Null,
    Struct {
        offset: i32,
        size: StructSize,
    },
    List {
        offset: i32,
        element_size: ElementSize,
        /// Element count, or word count for `InlineComposite`.
        element_count: ElementCount32,
    },
    Far {
        is_double_far: bool,
        landing_pad: WordCount32,
        segment_id: SegmentId,
    },
    Other {
        lower: u32,
        upper: u32,
    },
}

impl Pointer {
    /// Re-encodes into a word. Inverse of [`WirePointer::decode`].
    pub fn encode(self) -> WirePointer {
        match self {
            Self::Null => WirePointer::NULL,
            Self::Struct { offset, size } => WirePointer::from_halves(
                (offset << 2) as u32 | WirePointerKind::Struct as u32,
                struct_upper(size),
            ),
            Self::List {
                offset,
                element_size,
                element_count,
            } => WirePointer::from_halves(
                (offset << 2) as u32 | WirePointerKind::List as u32,
                list_upper(element_size, element_count),
            ),
            Self::Far {
                is_double_far,
                landing_pad,
                segment_id,
            } => WirePointer::far(is_double_far, landing_pad, segment_id),
            Self::Other { lower, upper } => WirePointer::from_halves(lower, upper),
        }
    }
}
