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

pub type BitCount0 = usize; // `BitCount` clashes with a standard trait
pub type BitCount32 = u32;
pub type BitCount64 = u64;

pub type ByteCount = usize;
pub type ByteCount32 = u32;

pub type WordCount = usize;
pub type WordCount16 = u16;
pub type WordCount32 = u32;

pub type ElementCount = usize;
pub type ElementCount32 = u32;

pub type WirePointerCount = usize;
pub type WirePointerCount16 = u16;
pub type WirePointerCount32 = u32;

pub const BITS_PER_BYTE: BitCount0 = 8;
pub const BITS_PER_WORD: BitCount0 = 64;
pub const BYTES_PER_WORD: ByteCount = 8;

pub const BITS_PER_POINTER: BitCount0 = 64;
pub const WORDS_PER_POINTER: WordCount = 1;

pub const POINTER_SIZE_IN_WORDS: WordCount = 1;

/// Lists and inline-composite word counts are stored in 29 bits.
pub const MAX_LIST_ELEMENTS: ElementCount32 = 1 << 29;

#[inline]
pub fn round_bytes_up_to_words(bytes: ByteCount32) -> WordCount32 {
    //# This code assumes 64-bit words.
    bytes.div_ceil(BYTES_PER_WORD as u32)
}

//# The maximum object size is 4GB - 1 byte. If measured in bits,
//# this would overflow a 32-bit counter, so we need to accept
//# BitCount64. However, 32 bits is enough for the returned
//# ByteCounts and WordCounts.
#[inline]
pub fn round_bits_up_to_words(bits: BitCount64) -> WordCount32 {
    bits.div_ceil(BITS_PER_WORD as u64) as WordCount32
}

#[inline]
pub fn round_bits_up_to_bytes(bits: BitCount64) -> ByteCount32 {
    bits.div_ceil(BITS_PER_BYTE as u64) as ByteCount32
}
