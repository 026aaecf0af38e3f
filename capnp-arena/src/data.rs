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

//! Arbitrary bytes.
//!
//! On the wire, data is a list of `Byte` elements. Unlike text it carries no
//! terminator, so any byte (NUL included) may appear anywhere.

use crate::private::layout::{PointerBuilder, PointerReader};
use crate::traits::{FromPointerBuilder, FromPointerReader, SetPointerBuilder};
use crate::{Result, Word};

/// Type marker for a data field.
#[derive(Copy, Clone)]
pub struct Owned(());

impl crate::traits::Owned for Owned {
    type Reader<'a> = Reader<'a>;
    type Builder<'a> = Builder<'a>;
}

/// Bytes borrowed straight out of a segment.
pub type Reader<'a> = &'a [u8];

/// Bytes inside a message under construction. The length was fixed when the
/// blob was allocated.
pub type Builder<'a> = &'a mut [u8];

impl<'a> FromPointerReader<'a> for Reader<'a> {
    fn get_from_pointer(reader: &PointerReader<'a>, default: Option<&'a [Word]>) -> Result<Self> {
        reader.get_data(default)
    }
}

impl<'a> FromPointerBuilder<'a> for Builder<'a> {
    fn init_pointer(builder: PointerBuilder<'a>, size: u32) -> Self {
        builder.init_data(size)
    }

    fn get_from_pointer(builder: PointerBuilder<'a>, default: Option<&'a [Word]>) -> Result<Self> {
        builder.get_data(default)
    }
}

impl SetPointerBuilder for Reader<'_> {
    fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Self) -> Result<()> {
        pointer.set_data(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::message;

    #[test]
    fn nul_bytes_are_ordinary_data() {
        let mut message = message::Builder::new_default();
        message.set_root(&b"\0a\0"[..]).unwrap();
        assert_eq!(message.get_root_as_reader::<&[u8]>().unwrap(), b"\0a\0");
        // root pointer plus one padded word
        assert_eq!(message.size_in_words(), 2);
    }

    #[test]
    fn init_then_fill() {
        let mut message = message::Builder::new_default();
        let bytes = message.initn_root::<&mut [u8]>(9);
        assert!(bytes.iter().all(|&b| b == 0));
        bytes.copy_from_slice(b"nine byte");
        assert_eq!(message.size_in_words(), 3);
        assert_eq!(message.get_root::<&mut [u8]>().unwrap(), b"nine byte");
    }
}
