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

//! List of structs.

use core::marker::PhantomData;

use crate::private::layout::{ElementSize, ListBuilder, ListReader, PointerBuilder, PointerReader};
use crate::traits::{
    FromPointerBuilder, FromPointerReader, FromStructBuilder, FromStructReader, HasStructSize,
    IndexMove, IntoInternalStructReader, ListIter, OwnedStruct,
};
use crate::Result;

#[derive(Copy, Clone)]
pub struct Owned<T>
where
    T: OwnedStruct,
{
    marker: PhantomData<T>,
}

impl<T> crate::traits::Owned for Owned<T>
where
    T: OwnedStruct,
{
    type Reader<'a> = Reader<'a, T>;
    type Builder<'a> = Builder<'a, T>;
}

pub struct Reader<'a, T>
where
    T: OwnedStruct,
{
    marker: PhantomData<T>,
    reader: ListReader<'a>,
}

impl<T: OwnedStruct> Clone for Reader<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: OwnedStruct> Copy for Reader<'_, T> {}

impl<'a, T: OwnedStruct> Reader<'a, T> {
    pub fn new(reader: ListReader<'a>) -> Self {
        Reader {
            reader,
            marker: PhantomData,
        }
    }

    pub fn len(&self) -> u32 {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(self) -> ListIter<Reader<'a, T>, T::Reader<'a>> {
        ListIter::new(self, self.len())
    }

    pub fn reborrow(&self) -> Reader<'_, T> {
        Reader {
            reader: self.reader,
            marker: PhantomData,
        }
    }

    /// Gets the struct at position `index`. Panics if `index` is greater than
    /// or equal to `len()`.
    pub fn get(self, index: u32) -> T::Reader<'a> {
        assert!(index < self.len());
        FromStructReader::new(self.reader.get_struct_element(index))
    }

    /// Gets the struct at position `index`. Returns `None` if `index`
    /// is greater than or equal to `len()`.
    pub fn try_get(self, index: u32) -> Option<T::Reader<'a>> {
        if index < self.len() {
            Some(FromStructReader::new(self.reader.get_struct_element(index)))
        } else {
            None
        }
    }
}

impl<'a, T: OwnedStruct> FromPointerReader<'a> for Reader<'a, T> {
    fn get_from_pointer(
        reader: &PointerReader<'a>,
        default: Option<&'a [crate::Word]>,
    ) -> Result<Reader<'a, T>> {
        Ok(Reader {
            reader: reader.get_list(ElementSize::InlineComposite, default)?,
            marker: PhantomData,
        })
    }
}

impl<'a, T: OwnedStruct> IndexMove<u32, T::Reader<'a>> for Reader<'a, T> {
    fn index_move(&self, index: u32) -> T::Reader<'a> {
        self.get(index)
    }
}

impl<T: OwnedStruct> crate::traits::SetPointerBuilder for Reader<'_, T> {
    fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Self) -> Result<()> {
        pointer.set_list(&value.reader)
    }
}

impl<'a, T: OwnedStruct> IntoIterator for Reader<'a, T> {
    type Item = T::Reader<'a>;
    type IntoIter = ListIter<Reader<'a, T>, Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Builder<'a, T>
where
    T: OwnedStruct,
{
    marker: PhantomData<T>,
    builder: ListBuilder<'a>,
}

impl<'a, T: OwnedStruct> Builder<'a, T> {
    pub fn new(builder: ListBuilder<'a>) -> Self {
        Builder {
            builder,
            marker: PhantomData,
        }
    }

    pub fn len(&self) -> u32 {
        self.builder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_reader(self) -> Reader<'a, T> {
        Reader {
            marker: PhantomData,
            reader: self.builder.into_reader(),
        }
    }

    /// Sets the list element, with the following limitation based on the fact that structs in a
    /// struct list are allocated inline: if the source struct is larger than the target struct
    /// (as can happen if it was created with a newer version of the schema), then it will be
    /// truncated, losing fields.
    pub fn set_with_caveats<'b>(&mut self, index: u32, value: T::Reader<'b>) -> Result<()> {
        assert!(index < self.len());
        self.builder
            .get_struct_element(index)
            .copy_content_from(&value.into_internal_struct_reader())
    }

    pub fn reborrow(&mut self) -> Builder<'_, T> {
        Builder {
            builder: self.builder,
            marker: PhantomData,
        }
    }

    /// Gets the struct at position `index`. Panics if `index` is greater than
    /// or equal to `len()`.
    pub fn get(self, index: u32) -> T::Builder<'a> {
        assert!(index < self.len());
        FromStructBuilder::new(self.builder.get_struct_element(index))
    }

    /// Gets the struct at position `index`. Returns `None` if `index`
    /// is greater than or equal to `len()`.
    pub fn try_get(self, index: u32) -> Option<T::Builder<'a>> {
        if index < self.len() {
            Some(FromStructBuilder::new(self.builder.get_struct_element(index)))
        } else {
            None
        }
    }
}

impl<'a, T: OwnedStruct> FromPointerBuilder<'a> for Builder<'a, T> {
    fn init_pointer(builder: PointerBuilder<'a>, size: u32) -> Builder<'a, T> {
        Builder {
            marker: PhantomData,
            builder: builder.init_struct_list(size, <T::Builder<'a> as HasStructSize>::struct_size()),
        }
    }

    fn get_from_pointer(
        builder: PointerBuilder<'a>,
        default: Option<&'a [crate::Word]>,
    ) -> Result<Builder<'a, T>> {
        Ok(Builder {
            marker: PhantomData,
            builder: builder.get_struct_list(
                <T::Builder<'a> as HasStructSize>::struct_size(),
                default,
            )?,
        })
    }
}
