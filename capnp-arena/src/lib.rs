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

//! # capnp-arena
//!
//! The wire-layout and segment-arena engine of the
//! [Cap'n Proto](https://capnproto.org/encoding.html) encoding.
//!
//! Messages are made of one or more segments of little-endian 64-bit words.
//! Readers interpret those bytes in place; builders write them in place,
//! growing the message by appending segments. This crate implements the
//! pointer encoding, far-pointer resolution, struct and list layout,
//! struct/list upgrades, traversal and nesting limits, and stream framing.
//! Generated accessor code sits on top of the types in [`traits`],
//! [`struct_list`], [`primitive_list`], [`text`] and [`data`].

pub mod any_pointer;
pub mod data;
pub mod message;
pub mod primitive_list;
pub mod serialize;
pub mod struct_list;
pub mod text;
pub mod traits;

#[doc(hidden)]
pub mod private;

use std::ops::Deref;

/// Eight bytes of memory with opaque interior. Use [`capnp_word!`] to construct one.
///
/// This type is used to ensure that the data of a message is properly aligned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct Word {
    raw_content: [u8; 8],
}

/// Constructs a word with the given bytes.
#[macro_export]
macro_rules! capnp_word {
    ($b0:expr, $b1:expr, $b2:expr, $b3:expr, $b4:expr, $b5:expr, $b6:expr, $b7:expr) => {
        $crate::Word::from_bytes([$b0, $b1, $b2, $b3, $b4, $b5, $b6, $b7])
    };
}

impl Word {
    pub const fn from_bytes(raw_content: [u8; 8]) -> Self {
        Self { raw_content }
    }

    /// Builds a word holding `value` in little-endian byte order.
    pub const fn from_u64(value: u64) -> Self {
        Self {
            raw_content: value.to_le_bytes(),
        }
    }

    pub const fn to_u64(self) -> u64 {
        u64::from_le_bytes(self.raw_content)
    }

    /// Does this, but faster:
    /// `::std::iter::repeat(Word(0)).take(length).collect()`
    pub fn allocate_zeroed_vec(length: usize) -> Vec<Self> {
        vec![Self::default(); length]
    }

    pub fn words_to_bytes(words: &[Self]) -> &[u8] {
        // A Word is eight plain bytes with no padding.
        unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, words.len() * 8) }
    }

    pub fn words_to_bytes_mut(words: &mut [Self]) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, words.len() * 8) }
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Word {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self::from_u64(u64::arbitrary(g))
    }
}

/// Size of a message. Every generated struct has a method `.total_size()` that returns this.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageSize {
    pub word_count: u64,
}

impl MessageSize {
    pub fn plus_eq(&mut self, other: Self) {
        self.word_count += other.word_count;
    }
}

/// Because messages are lazily validated, the return type of any method that reads a pointer
/// field must be wrapped in a Result.
pub type Result<T> = ::core::result::Result<T, Error>;

/// Describes an arbitrary error that prevented an operation from completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// The general kind of the error.
    pub kind: ErrorKind,

    /// Extra context about the error, if any.
    pub extra: String,
}

impl Error {
    /// Creates a generic `Failed` error carrying `description` as context.
    pub fn failed(description: String) -> Self {
        Self {
            extra: description,
            kind: ErrorKind::Failed,
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            extra: String::new(),
            kind,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        if self.extra.is_empty() {
            write!(fmt, "{}", self.kind)
        } else {
            write!(fmt, "{}: {}", self.kind, self.extra)
        }
    }
}

impl std::error::Error for Error {}

/// The general nature of an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Something went wrong.
    #[error("Failed")]
    Failed,

    #[error("Message ended too soon.")]
    PrematureEndOfFile,

    #[error("Message contains non-struct pointer where struct pointer was expected.")]
    MessageContainsNonStructPointerWhereStructPointerWasExpected,

    #[error("Message contains non-list pointer where list pointer was expected.")]
    MessageContainsNonListPointerWhereListPointerWasExpected,

    #[error("Message contains non-list pointer where text was expected.")]
    MessageContainsNonListPointerWhereTextWasExpected,

    #[error("Message contains non-list pointer where data was expected.")]
    MessageContainsNonListPointerWhereDataWasExpected,

    #[error("Message contains list pointer of non-bytes where text was expected.")]
    MessageContainsListPointerOfNonBytesWhereTextWasExpected,

    #[error("Message contains list pointer of non-bytes where data was expected.")]
    MessageContainsListPointerOfNonBytesWhereDataWasExpected,

    #[error("Message contains text that is not NUL-terminated.")]
    MessageContainsTextThatIsNotNULTerminated,

    #[error("Text contains a NUL byte.")]
    TextContainsNulByte,

    #[error("Text contains non-utf8 data.")]
    TextContainsNonUtf8Data,

    #[error("InlineComposite lists of non-STRUCT type are not supported.")]
    InlineCompositeListsOfNonStructTypeAreNotSupported,

    #[error("InlineComposite list's elements overrun its word count.")]
    InlineCompositeListsElementsOverrunItsWordCount,

    #[error("Found struct list where bit list was expected.")]
    FoundStructListWhereBitListWasExpected,

    #[error(
        "Found bit list where struct list was expected; upgrading boolean lists to structs is no longer supported."
    )]
    FoundBitListWhereStructListWasExpected,

    #[error("Expected a primitive list, but got a list of pointer-only structs.")]
    ExpectedAPrimitiveListButGotAListOfPointerOnlyStructs,

    #[error("Expected a pointer list, but got a list of data-only structs.")]
    ExpectedAPointerListButGotAListOfDataOnlyStructs,

    #[error("Message contains list with incompatible element type.")]
    MessageContainsListWithIncompatibleElementType,

    #[error("Existing list value is incompatible with expected type.")]
    ExistingListValueIsIncompatibleWithExpectedType,

    #[error("Message is too deeply nested or contains cycles. See ReaderOptions.")]
    MessageIsTooDeeplyNested,

    #[error("Read limit exceeded.")]
    ReadLimitExceeded,

    #[error("Message contains out-of-bounds pointer.")]
    MessageContainsOutOfBoundsPointer,

    #[error("Message contains out-of-bounds far pointer.")]
    MessageContainsOutOfBoundsFarPointer,

    #[error("Invalid segment id: {0}")]
    InvalidSegmentId(u32),

    #[error("Malformed double-far pointer.")]
    MalformedDoubleFarPointer,

    #[error("Unexpected FAR pointer.")]
    UnexpectedFarPointer,

    #[error("Unknown pointer type.")]
    UnknownPointerType,

    #[error("Too many segments: {0}")]
    TooManySegments(usize),

    #[error("Too few segments: {0}")]
    TooFewSegments(usize),

    #[error("Message has {0} words, which is too large. To increase the limit on the receiving end, see capnp_arena::message::ReaderOptions.")]
    MessageTooLarge(usize),

    #[error("Message ends prematurely. Header claimed {0} words, but message only has {1} words.")]
    MessageEndsPrematurely(usize, usize),

    #[error("Message is empty.")]
    EmptyMessage,

    #[error("Segment length is not a multiple of eight bytes.")]
    SegmentLengthNotAMultipleOfWordSize,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::from_kind(ErrorKind::PrematureEndOfFile),
            _ => Self::failed(format!("{err}")),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::from_kind(ErrorKind::TextContainsNonUtf8Data).with_extra(format!("{err}"))
    }
}

/// Helper type that allows a builder's segments to be viewed as a single slice of
/// segment byte slices without allocating in the common single-segment case.
pub enum OutputSegments<'a> {
    SingleSegment([&'a [u8]; 1]),
    MultiSegment(Vec<&'a [u8]>),
}

impl<'a> Deref for OutputSegments<'a> {
    type Target = [&'a [u8]];
    fn deref(&self) -> &[&'a [u8]] {
        match self {
            OutputSegments::SingleSegment(s) => s,
            OutputSegments::MultiSegment(v) => v,
        }
    }
}

impl message::ReaderSegments for OutputSegments<'_> {
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        match self {
            OutputSegments::SingleSegment(s) => s.get(id as usize).copied(),
            OutputSegments::MultiSegment(v) => v.get(id as usize).copied(),
        }
    }

    fn len(&self) -> usize {
        self.deref().len()
    }
}
