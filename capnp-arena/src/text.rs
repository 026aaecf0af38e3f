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

//! UTF-8 encoded text.
//!
//! On the wire, text is a byte list whose last element is a NUL terminator
//! not counted in the text's length. Interior NUL bytes are not allowed.

use core::str;

use crate::private::layout::{PointerBuilder, PointerReader};
use crate::{Error, ErrorKind, Result};

#[derive(Copy, Clone)]
pub struct Owned(());

impl crate::traits::Owned for Owned {
    type Reader<'a> = Reader<'a>;
    type Builder<'a> = Builder<'a>;
}

pub type Reader<'a> = &'a str;

impl<'a> crate::traits::FromPointerReader<'a> for Reader<'a> {
    fn get_from_pointer(
        reader: &PointerReader<'a>,
        default: Option<&'a [crate::Word]>,
    ) -> Result<Reader<'a>> {
        reader.get_text(default)
    }
}

/// Fixed-capacity text in a message under construction.
pub struct Builder<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> Builder<'a> {
    /// An empty builder over freshly allocated (zeroed) bytes.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// A builder whose first `pos` bytes already hold text.
    pub fn with_pos(bytes: &'a mut [u8], pos: usize) -> Result<Self> {
        str::from_utf8(&bytes[..pos])?;
        Ok(Self { bytes, pos })
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn push_ascii(&mut self, ascii: u8) {
        assert!(ascii < 128 && ascii != 0);
        self.bytes[self.pos] = ascii;
        self.pos += 1;
    }

    /// Appends `string`. Panics if it does not fit in the remaining capacity.
    pub fn push_str(&mut self, string: &str) -> Result<()> {
        let bytes = string.as_bytes();
        if bytes.contains(&0) {
            return Err(Error::from_kind(ErrorKind::TextContainsNulByte));
        }
        self.bytes[self.pos..(self.pos + bytes.len())].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bytes[..self.pos].fill(0);
        self.pos = 0;
    }

    pub fn as_str(&self) -> &str {
        // Only whole `str`s and ASCII bytes are ever pushed, and existing
        // content is validated in `with_pos`.
        unsafe { str::from_utf8_unchecked(&self.bytes[..self.pos]) }
    }

    pub fn into_reader(self) -> Reader<'a> {
        let bytes: &'a [u8] = self.bytes;
        unsafe { str::from_utf8_unchecked(&bytes[..self.pos]) }
    }

    pub fn reborrow(&mut self) -> Builder<'_> {
        Builder {
            bytes: &mut self.bytes[..],
            pos: self.pos,
        }
    }
}

impl core::ops::Deref for Builder<'_> {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Builder<'_> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl core::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("text::Builder").field(&self.as_str()).finish()
    }
}

impl<'a> crate::traits::FromPointerBuilder<'a> for Builder<'a> {
    fn init_pointer(builder: PointerBuilder<'a>, size: u32) -> Builder<'a> {
        builder.init_text(size)
    }
    fn get_from_pointer(
        builder: PointerBuilder<'a>,
        default: Option<&'a [crate::Word]>,
    ) -> Result<Builder<'a>> {
        builder.get_text(default)
    }
}

impl crate::traits::SetPointerBuilder for Reader<'_> {
    fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Self) -> Result<()> {
        pointer.set_text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::ErrorKind;

    #[test]
    fn push_and_clear() {
        let mut bytes = [0u8; 8];
        let mut text = Builder::new(&mut bytes);
        text.push_str("hi ").unwrap();
        text.push_ascii(b'!');
        assert_eq!(&*text, "hi !");
        assert_eq!(text.capacity(), 8);
        text.clear();
        assert!(text.is_empty());
        assert_eq!(bytes, [0; 8]);
    }

    #[test]
    fn nul_is_rejected() {
        let mut bytes = [0u8; 8];
        let mut text = Builder::new(&mut bytes);
        let err = text.push_str("a\0b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TextContainsNulByte);
        assert!(text.is_empty());
    }

    #[test]
    #[should_panic]
    fn overflow_panics() {
        let mut bytes = [0u8; 2];
        let mut text = Builder::new(&mut bytes);
        let _ = text.push_str("abc");
    }

    #[test]
    fn existing_content_must_be_utf8() {
        let mut bytes = [0xff, 0xfe, 0];
        assert_eq!(
            Builder::with_pos(&mut bytes, 2).unwrap_err().kind,
            ErrorKind::TextContainsNonUtf8Data
        );
    }
}
