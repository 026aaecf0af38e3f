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

use crate::capnp_word;
use crate::message::{AllocationStrategy, HeapAllocator, ReaderOptions, SegmentArray};
use crate::private::arena::{BuilderArena, BuilderArenaImpl, ReaderArenaImpl};
use crate::private::layout::{ElementSize, PointerBuilder, PointerReader, PointerType, StructSize};
use crate::private::wire::WirePointerKind;
use crate::{ErrorKind, Word};

fn reader_arena<'a>(segments: &'a [&'a [u8]], options: ReaderOptions) -> ReaderArenaImpl<SegmentArray<'a>> {
    ReaderArenaImpl::new(SegmentArray::new(segments), options)
}

fn builder_arena(first_segment_words: u32) -> BuilderArenaImpl<HeapAllocator> {
    let arena = BuilderArenaImpl::new(
        HeapAllocator::new()
            .first_segment_words(first_segment_words)
            .allocation_strategy(AllocationStrategy::FixedSize),
    );
    arena.allocate_segment(1);
    arena.allocate(0, 1).unwrap();
    arena
}

#[test]
fn simple_raw_data_struct() {
    let data: &[Word] = &[
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
        capnp_word!(0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef),
    ];

    let reader = PointerReader::get_root_unchecked(data)
        .get_struct(None)
        .unwrap();

    assert_eq!(0xefcdab8967452301u64, reader.get_data_field::<u64>(0));
    assert_eq!(0, reader.get_data_field::<u64>(1)); // past end of struct --> default value

    assert_eq!(0x67452301u32, reader.get_data_field::<u32>(0));
    assert_eq!(0xefcdab89u32, reader.get_data_field::<u32>(1));
    assert_eq!(0, reader.get_data_field::<u32>(2)); // past end of struct --> default value

    assert_eq!(0x2301u16, reader.get_data_field::<u16>(0));
    assert_eq!(0x6745u16, reader.get_data_field::<u16>(1));
    assert_eq!(0xab89u16, reader.get_data_field::<u16>(2));
    assert_eq!(0xefcdu16, reader.get_data_field::<u16>(3));
    assert_eq!(0u16, reader.get_data_field::<u16>(4)); // past end of struct --> default value

    assert_eq!(0x01u8, reader.get_data_field::<u8>(0));
    assert_eq!(0xefu8, reader.get_data_field::<u8>(7));
    assert_eq!(0u8, reader.get_data_field::<u8>(8));

    // Bits.
    assert!(reader.get_bool_field(0));
    assert!(!reader.get_bool_field(1));
    assert!(!reader.get_bool_field(2));
    assert!(!reader.get_bool_field(3));
    assert!(!reader.get_bool_field(4));
    assert!(!reader.get_bool_field(5));
    assert!(!reader.get_bool_field(6));
    assert!(!reader.get_bool_field(7));

    assert!(reader.get_bool_field(8));
    assert!(reader.get_bool_field(9));
    assert!(!reader.get_bool_field(10));
    assert!(!reader.get_bool_field(11));
    assert!(!reader.get_bool_field(12));
    assert!(reader.get_bool_field(13));
    assert!(!reader.get_bool_field(14));
    assert!(!reader.get_bool_field(15));

    assert!(reader.get_bool_field(63));
    assert!(!reader.get_bool_field(64)); // past end of struct --> default value

    // Masked reads flip the stored bits.
    assert_eq!(0x2300u16, reader.get_data_field_mask::<u16>(0, 0x0001));
    assert!(!reader.get_bool_field_mask(0, true));
    assert!(reader.get_bool_field_mask(64, true));
}

#[test]
fn bool_list() {
    use crate::private::layout::PrimitiveElement;
    use crate::traits::FromPointerReader;

    // [true, false, true, false,
    //  true, true, true, false,
    //  false, true]

    let data: &[Word] = &[
        capnp_word!(0x01, 0x00, 0x00, 0x00, 0x51, 0x00, 0x00, 0x00),
        capnp_word!(0x75, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];

    let pointer_reader = PointerReader::get_root_unchecked(data);

    let reader = pointer_reader.get_list(ElementSize::Bit, None).unwrap();

    assert_eq!(reader.len(), 10);
    assert!(bool::get(&reader, 0));
    assert!(!bool::get(&reader, 1));
    assert!(bool::get(&reader, 2));
    assert!(!bool::get(&reader, 3));
    assert!(bool::get(&reader, 4));
    assert!(bool::get(&reader, 5));
    assert!(bool::get(&reader, 6));
    assert!(!bool::get(&reader, 7));
    assert!(!bool::get(&reader, 8));
    assert!(bool::get(&reader, 9));

    let reader = crate::primitive_list::Reader::<bool>::get_from_pointer(&pointer_reader, None).unwrap();

    assert_eq!(
        reader.iter().collect::<Vec<_>>(),
        [true, false, true, false, true, true, true, false, false, true]
    );

    // A bit list is too small to be read as a list of bytes, let alone structs.
    assert_eq!(
        pointer_reader
            .get_list(ElementSize::Byte, None)
            .err()
            .unwrap()
            .kind,
        ErrorKind::FoundBitListWhereStructListWasExpected
    );
}

#[test]
fn struct_size() {
    let data: &[Word] = &[
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x2, 0x00, 0x01, 0x00),
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];

    let pointer_reader = PointerReader::get_root_unchecked(data);

    assert_eq!(pointer_reader.total_size().unwrap().word_count, 3);
}

#[test]
fn struct_list_size() {
    let data: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x1f, 0, 0, 0), // inline-composite list. 3 words long.
        capnp_word!(0x4, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00), // 1 element long
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
        capnp_word!(0x0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];

    // The list pointer claims that the list consumes three words, but the struct
    // tag says there is only one element and it has a size of one word.
    // So there is an inconsistency! total_size() should report the value computed from
    // the struct tag, because that's what is relevant when the data is copied.

    let pointer_reader = PointerReader::get_root_unchecked(data);

    assert_eq!(pointer_reader.total_size().unwrap().word_count, 2);
}

#[test]
fn empty_struct_list_size() {
    let data: &[Word] = &[
        // Struct, one pointer
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00),
        // Inline-composite list, zero words long
        capnp_word!(0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00),
        // Tag
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];

    let pointer_reader = PointerReader::get_root_unchecked(data);

    assert_eq!(2, pointer_reader.total_size().unwrap().word_count);
}

#[test]
fn overrunning_inline_composite_list() {
    let data: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x0f, 0, 0, 0), // inline-composite list, 1 word long
        capnp_word!(0x08, 0, 0, 0, 0x01, 0, 0, 0), // 2 elements of one word each
        capnp_word!(0, 0, 0, 0, 0, 0, 0, 0),
    ];

    let err = PointerReader::get_root_unchecked(data)
        .get_list(ElementSize::InlineComposite, None)
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::InlineCompositeListsElementsOverrunItsWordCount);
}

#[test]
fn empty_struct_pointer() {
    let data: &[Word] = &[
        // offset -1, no data, no pointers
        capnp_word!(0xfc, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00),
    ];
    let pointer_reader = PointerReader::get_root_unchecked(data);
    assert_eq!(pointer_reader.get_pointer_type().unwrap(), PointerType::Struct);
    let reader = pointer_reader.get_struct(None).unwrap();
    assert_eq!(reader.get_data_section_size(), 0);
    assert_eq!(reader.get_pointer_section_size(), 0);
    assert_eq!(reader.get_data_field::<u32>(0), 0);
    assert!(reader.get_pointer_field(0).is_null());
}

#[test]
fn text_must_be_nul_terminated() {
    let terminated: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x22, 0, 0, 0), // byte list, 4 elements
        capnp_word!(b'a', b'b', b'c', 0, 0, 0, 0, 0),
    ];
    assert_eq!(
        PointerReader::get_root_unchecked(terminated).get_text(None).unwrap(),
        "abc"
    );
    assert_eq!(
        PointerReader::get_root_unchecked(terminated).get_data(None).unwrap(),
        b"abc\0"
    );

    let unterminated: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x1a, 0, 0, 0), // byte list, 3 elements
        capnp_word!(b'a', b'b', b'c', 0, 0, 0, 0, 0),
    ];
    assert_eq!(
        PointerReader::get_root_unchecked(unterminated)
            .get_text(None)
            .err()
            .unwrap()
            .kind,
        ErrorKind::MessageContainsTextThatIsNotNULTerminated
    );

    let interior_nul: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x22, 0, 0, 0),
        capnp_word!(b'a', 0, b'c', 0, 0, 0, 0, 0),
    ];
    assert_eq!(
        PointerReader::get_root_unchecked(interior_nul)
            .get_text(None)
            .err()
            .unwrap()
            .kind,
        ErrorKind::TextContainsNulByte
    );

    let not_utf8: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x1a, 0, 0, 0),
        capnp_word!(0xff, 0xfe, 0, 0, 0, 0, 0, 0),
    ];
    assert_eq!(
        PointerReader::get_root_unchecked(not_utf8)
            .get_text(None)
            .err()
            .unwrap()
            .kind,
        ErrorKind::TextContainsNonUtf8Data
    );
}

#[test]
fn defaults_apply_to_null_pointers() {
    let default_struct: &[Word] = &[
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
        capnp_word!(0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];
    let default_text: &[Word] = &[
        capnp_word!(0x01, 0, 0, 0, 0x1a, 0, 0, 0),
        capnp_word!(b'h', b'i', 0, 0, 0, 0, 0, 0),
    ];
    let null = PointerReader::new_default();

    assert_eq!(null.get_struct(None).unwrap().get_data_field::<u64>(0), 0);
    assert_eq!(
        null.get_struct(Some(default_struct))
            .unwrap()
            .get_data_field::<u64>(0),
        7
    );
    assert_eq!(null.get_text(None).unwrap(), "");
    assert_eq!(null.get_text(Some(default_text)).unwrap(), "hi");
    assert!(null.get_data(None).unwrap().is_empty());
    assert_eq!(null.get_list(ElementSize::Byte, None).unwrap().len(), 0);

    // Builders copy the default into the message before handing it out.
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let builder = root
        .get_struct(StructSize::new(1, 0), Some(default_struct))
        .unwrap();
    assert_eq!(builder.get_data_field::<u64>(0), 7);
    builder.set_data_field::<u64>(0, 8);
    assert_eq!(default_struct[1].to_u64(), 7);

    let mut root = PointerBuilder::get_root(&arena, 0, 0);
    assert!(!root.is_null());
    root.clear();
    let text = PointerBuilder::get_root(&arena, 0, 0)
        .get_text(Some(default_text))
        .unwrap();
    assert_eq!(&*text, "hi");
}

#[test]
fn far_pointer() {
    let segment0: &[Word] = &[
        // far pointer to landing pad at word 0 of segment 1
        capnp_word!(0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
    ];
    let segment1: &[Word] = &[
        // landing pad: struct pointer, one data word
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
        capnp_word!(0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];
    let segments = [Word::words_to_bytes(segment0), Word::words_to_bytes(segment1)];
    let arena = reader_arena(&segments, ReaderOptions::new());

    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(root.get_pointer_type().unwrap(), PointerType::Struct);
    assert_eq!(root.get_struct(None).unwrap().get_data_field::<u64>(0), 42);
    // Landing pads are not part of the object.
    assert_eq!(root.total_size().unwrap().word_count, 1);
}

#[test]
fn double_far_pointer() {
    let segment0: &[Word] = &[
        // double-far pointer to landing pad at word 0 of segment 1
        capnp_word!(0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
    ];
    let segment1: &[Word] = &[
        // far pointer to word 0 of segment 2
        capnp_word!(0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00),
        // tag: struct, one data word
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
    ];
    let segment2: &[Word] = &[capnp_word!(0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00)];
    let segments = [
        Word::words_to_bytes(segment0),
        Word::words_to_bytes(segment1),
        Word::words_to_bytes(segment2),
    ];
    let arena = reader_arena(&segments, ReaderOptions::new());

    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(root.get_struct(None).unwrap().get_data_field::<u64>(0), 42);
}

#[test]
fn double_far_with_zero_tag_is_an_empty_struct() {
    let segment0: &[Word] = &[capnp_word!(0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00)];
    let segment1: &[Word] = &[
        // far pointer to word 0 of segment 2, then an all-zero tag
        capnp_word!(0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00),
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];
    let segment2: &[Word] = &[];
    let segments = [
        Word::words_to_bytes(segment0),
        Word::words_to_bytes(segment1),
        Word::words_to_bytes(segment2),
    ];
    let arena = reader_arena(&segments, ReaderOptions::new());

    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(root.get_pointer_type().unwrap(), PointerType::Struct);
    let empty = root.get_struct(None).unwrap();
    assert_eq!(empty.get_data_section_size(), 0);
    assert_eq!(empty.get_pointer_section_size(), 0);
    assert_eq!(root.total_size().unwrap().word_count, 0);
    assert_eq!(
        root.get_list(ElementSize::Byte, None).err().unwrap().kind,
        ErrorKind::MessageContainsNonListPointerWhereListPointerWasExpected
    );
}

#[test]
fn malformed_far_pointers() {
    let double_far: &[Word] = &[capnp_word!(0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00)];
    let single_far: &[Word] = &[capnp_word!(0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00)];
    let far_to_pad_5: &[Word] = &[capnp_word!(0x2a, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00)];
    let far_to_segment_7: &[Word] = &[capnp_word!(0x02, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00)];

    // The first pad word of a double-far must itself be a (single) far pointer.
    let not_far_pad: &[Word] = &[
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00),
    ];
    // A single-far landing pad must not be another far pointer.
    let far_pad: &[Word] = &[capnp_word!(0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00)];

    let cases: [(&[Word], &[Word], ErrorKind); 4] = [
        (double_far, not_far_pad, ErrorKind::MalformedDoubleFarPointer),
        (single_far, far_pad, ErrorKind::UnexpectedFarPointer),
        (far_to_pad_5, far_pad, ErrorKind::MessageContainsOutOfBoundsFarPointer),
        (far_to_segment_7, far_pad, ErrorKind::InvalidSegmentId(7)),
    ];
    for (segment0, segment1, kind) in cases {
        let segments = [Word::words_to_bytes(segment0), Word::words_to_bytes(segment1)];
        let arena = reader_arena(&segments, ReaderOptions::new());
        let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
        assert_eq!(root.get_struct(None).err().unwrap().kind, kind);
    }
}

#[test]
fn out_of_bounds_struct() {
    let data: &[Word] = &[
        // struct with four data words, in a two-word segment
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00),
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];
    let segments = [Word::words_to_bytes(data)];
    let arena = reader_arena(&segments, ReaderOptions::new());
    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(
        root.get_struct(None).err().unwrap().kind,
        ErrorKind::MessageContainsOutOfBoundsPointer
    );

    let negative: &[Word] = &[
        // offset -5
        capnp_word!(0xec, 0xff, 0xff, 0xff, 0x01, 0x00, 0x00, 0x00),
    ];
    let segments = [Word::words_to_bytes(negative)];
    let arena = reader_arena(&segments, ReaderOptions::new());
    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(
        root.get_struct(None).err().unwrap().kind,
        ErrorKind::MessageContainsOutOfBoundsPointer
    );
}

#[test]
fn cyclic_struct_hits_nesting_limit() {
    let data: &[Word] = &[
        // root: struct with one pointer
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00),
        // the struct's pointer points back at the struct itself
        capnp_word!(0xfc, 0xff, 0xff, 0xff, 0x00, 0x00, 0x01, 0x00),
    ];
    let segments = [Word::words_to_bytes(data)];
    let arena = reader_arena(&segments, ReaderOptions::new());
    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();

    let mut reader = root.get_struct(None).unwrap();
    let mut depth = 1;
    let err = loop {
        match reader.get_pointer_field(0).get_struct(None) {
            Ok(next) => {
                reader = next;
                depth += 1;
            }
            Err(e) => break e,
        }
    };
    assert_eq!(err.kind, ErrorKind::MessageIsTooDeeplyNested);
    assert_eq!(depth, 64);
    assert_eq!(
        root.total_size().err().unwrap().kind,
        ErrorKind::MessageIsTooDeeplyNested
    );
}

#[test]
fn void_list_is_charged_to_read_limit() {
    let data: &[Word] = &[
        // list of 1000 voids
        capnp_word!(0x01, 0x00, 0x00, 0x00, 0x40, 0x1f, 0x00, 0x00),
    ];
    let segments = [Word::words_to_bytes(data)];

    let arena = reader_arena(&segments, *ReaderOptions::new().traversal_limit_in_words(Some(100)));
    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(
        root.get_list(ElementSize::Void, None).err().unwrap().kind,
        ErrorKind::ReadLimitExceeded
    );

    let arena = reader_arena(&segments, ReaderOptions::new());
    let root = PointerReader::get_root(&arena, 0, 0, 64).unwrap();
    assert_eq!(root.get_list(ElementSize::Void, None).unwrap().len(), 1000);
    assert_eq!(arena.remaining_read_limit(), 8 * 1024 * 1024 - 1000);
}

#[test]
fn other_pointers_are_not_dereferenced() {
    let data: &[Word] = &[capnp_word!(0x03, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00)];
    let pointer_reader = PointerReader::get_root_unchecked(data);
    assert_eq!(pointer_reader.get_pointer_type().unwrap(), PointerType::Capability);
    assert_eq!(
        pointer_reader.get_struct(None).err().unwrap().kind,
        ErrorKind::MessageContainsNonStructPointerWhereStructPointerWasExpected
    );
    assert_eq!(
        pointer_reader.total_size().err().unwrap().kind,
        ErrorKind::UnknownPointerType
    );

    let arena = builder_arena(16);
    let mut root = PointerBuilder::get_root(&arena, 0, 0);
    assert_eq!(
        root.copy_from(pointer_reader).unwrap_err().kind,
        ErrorKind::UnknownPointerType
    );
}

#[test]
fn struct_upgrade_moves_and_zeroes() {
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let small = root.init_struct(StructSize::new(1, 0));
    small.set_data_field::<u64>(0, 0x1234);

    let root = PointerBuilder::get_root(&arena, 0, 0);
    let big = root.get_struct(StructSize::new(2, 1), None).unwrap();
    assert_eq!(big.get_data_field::<u64>(0), 0x1234);
    assert_eq!(big.get_data_field::<u64>(1), 0);
    assert!(big.is_pointer_field_null(0));

    // The old copy at word 1 is gone; the new one starts at word 2.
    assert_eq!(arena.get_word(0, 1).word(), 0);
    assert_eq!(arena.get_word(0, 0).word(), 0x0001_0002_0000_0004);

    // Asking for something smaller reuses the bigger struct in place.
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let same = root.get_struct(StructSize::new(1, 0), None).unwrap();
    assert_eq!(same.get_data_section_size(), 128);
    assert_eq!(same.get_pointer_section_size(), 1);
}

#[test]
fn struct_growth_across_segments_keeps_text() {
    // Four-word segments: root, a (1, 1) struct and its text fill segment 0.
    let arena = builder_arena(4);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let small = root.init_struct(StructSize::new(1, 1));
    small.set_data_field::<u64>(0, 5);
    small.get_pointer_field(0).set_text("hi").unwrap();
    assert_eq!(arena.len(), 1);

    let root = PointerBuilder::get_root(&arena, 0, 0);
    let big = root.get_struct(StructSize::new(2, 2), None).unwrap();
    assert_eq!(big.get_data_field::<u64>(0), 5);

    // The root now reaches the grown struct through a pad in segment 1.
    let root_word = arena.get_word(0, 0);
    assert_eq!(root_word.kind(), WirePointerKind::Far);
    assert!(!root_word.is_double_far());
    assert_eq!(root_word.far_segment_id(), 1);

    // The old struct words are zero; the text stays where it was.
    assert_eq!(arena.get_word(0, 1).word(), 0);
    assert_eq!(arena.get_word(0, 2).word(), 0);
    assert_eq!(arena.get_word(0, 3).word(), 0x6968);

    let reader = PointerBuilder::get_root(&arena, 0, 0)
        .into_reader()
        .get_struct(None)
        .unwrap();
    assert_eq!(reader.get_data_section_size(), 128);
    assert_eq!(reader.get_pointer_section_size(), 2);
    assert_eq!(reader.get_data_field::<u64>(0), 5);
    assert_eq!(reader.get_pointer_field(0).get_text(None).unwrap(), "hi");
    assert!(reader.get_pointer_field(1).is_null());
}

#[test]
fn reader_sees_objects_allocated_after_it() {
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let parent = root.init_struct(StructSize::new(0, 2));
    let view = parent.into_reader();
    assert!(view.get_pointer_field(0).is_null());

    parent
        .get_pointer_field(0)
        .init_struct(StructSize::new(1, 0))
        .set_data_field::<u64>(0, 7);
    parent.get_pointer_field(1).set_text("later").unwrap();

    let child = view.get_pointer_field(0).get_struct(None).unwrap();
    assert_eq!(child.get_data_field::<u64>(0), 7);
    assert_eq!(view.get_pointer_field(1).get_text(None).unwrap(), "later");
    // two pointers, the child's data word, one word of text
    assert_eq!(view.total_size().unwrap().word_count, 4);
}

#[test]
fn primitive_list_upgrades_to_struct_list() {
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let list = root.init_list(ElementSize::TwoBytes, 3);
    for i in 0..3 {
        list.set_data_element::<u16>(i, i as u16 + 1);
    }
    // root + one word of u16s
    assert_eq!(arena.words_allocated(), 2);

    let root = PointerBuilder::get_root(&arena, 0, 0);
    let structs = root
        .get_struct_list(StructSize::new(1, 1), None)
        .unwrap();
    assert_eq!(structs.len(), 3);
    assert_eq!(structs.get_element_size(), ElementSize::InlineComposite);
    for i in 0..3 {
        let element = structs.get_struct_element(i);
        assert_eq!(element.get_data_field::<u16>(0), i as u16 + 1);
        assert_eq!(element.get_data_field::<u16>(1), 0);
        assert!(element.is_pointer_field_null(0));
    }
    assert_eq!(arena.get_word(0, 1).word(), 0);

    // The upgraded list still reads as a list of u16.
    let reader = PointerBuilder::get_root(&arena, 0, 0)
        .into_reader()
        .get_list(ElementSize::TwoBytes, None)
        .unwrap();
    assert_eq!(reader.get_data_element::<u16>(2), 3);
}

#[test]
fn pointer_list_upgrades_to_struct_list() {
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let list = root.init_list(ElementSize::Pointer, 2);
    list.get_pointer_element(0).set_text("zero").unwrap();
    list.get_pointer_element(1).set_text("one").unwrap();

    let root = PointerBuilder::get_root(&arena, 0, 0);
    let structs = root
        .get_struct_list(StructSize::new(0, 1), None)
        .unwrap();
    assert_eq!(structs.len(), 2);
    let reader = structs.into_reader();
    assert_eq!(
        reader.get_struct_element(0).get_pointer_field(0).get_text(None).unwrap(),
        "zero"
    );
    assert_eq!(
        reader.get_struct_element(1).get_pointer_field(0).get_text(None).unwrap(),
        "one"
    );
}

#[test]
fn bit_list_cannot_become_struct_list() {
    let arena = builder_arena(16);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let list = root.init_list(ElementSize::Bit, 3);
    list.set_bool_element(1, true);
    assert!(list.get_bool_element(1));
    assert!(!list.get_bool_element(2));

    let root = PointerBuilder::get_root(&arena, 0, 0);
    assert_eq!(
        root.get_struct_list(StructSize::new(1, 0), None)
            .err()
            .unwrap()
            .kind,
        ErrorKind::FoundBitListWhereStructListWasExpected
    );
}

#[test]
fn object_placed_in_next_segment_uses_far_pointer() {
    // Segment 0 only has room for the root pointer.
    let arena = builder_arena(1);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let s = root.init_struct(StructSize::new(1, 0));
    s.set_data_field::<u64>(0, 99);

    let root_word = arena.get_word(0, 0);
    assert_eq!(root_word.kind(), WirePointerKind::Far);
    assert!(!root_word.is_double_far());
    assert_eq!(root_word.far_segment_id(), 1);
    assert_eq!(root_word.far_position_in_segment(), 0);
    assert_eq!(arena.get_word(1, 0).kind(), WirePointerKind::Struct);

    let reader = PointerBuilder::get_root(&arena, 0, 0).into_reader();
    assert_eq!(reader.get_struct(None).unwrap().get_data_field::<u64>(0), 99);
    assert_eq!(reader.total_size().unwrap().word_count, 1);

    // Overwriting the root frees both the pad and the object.
    PointerBuilder::get_root(&arena, 0, 0).clear();
    assert_eq!(arena.get_word(1, 0).word(), 0);
    assert_eq!(arena.get_word(1, 1).word(), 0);
}

#[test]
fn transfer_into_other_segment_writes_double_far() {
    // Three-word segments: root, struct, text fill segment 0.
    let arena = builder_arena(3);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let s = root.init_struct(StructSize::new(0, 1));
    s.get_pointer_field(0).set_text("hi").unwrap();
    assert_eq!(arena.len(), 1);

    // Growing the struct moves it to segment 1. Its text stays in the full
    // segment 0, so the moved pointer needs a double-far.
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let s = root.get_struct(StructSize::new(1, 1), None).unwrap();
    assert_eq!(arena.len(), 3);
    assert_eq!(arena.get_word(0, 1).word(), 0);

    let moved = arena.get_word(1, 2);
    assert_eq!(moved.kind(), WirePointerKind::Far);
    assert!(moved.is_double_far());
    assert_eq!(moved.far_segment_id(), 2);

    let text = s.get_pointer_field(0).into_reader().get_text(None).unwrap();
    assert_eq!(text, "hi");
}

#[test]
fn copy_content_truncates_and_zeroes() {
    let arena = builder_arena(32);
    let root = PointerBuilder::get_root(&arena, 0, 0);
    let list = root.init_struct_list(2, StructSize::new(1, 1));

    let mut first = list.get_struct_element(0);
    first.set_data_field::<u64>(0, 5);
    first.get_pointer_field(0).set_text("kept").unwrap();

    let source: &[Word] = &[
        // struct: two data words, no pointers
        capnp_word!(0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00),
        capnp_word!(0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
        capnp_word!(0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00),
    ];
    let source = PointerReader::get_root_unchecked(source).get_struct(None).unwrap();
    first.copy_content_from(&source).unwrap();
    assert_eq!(first.get_data_field::<u64>(0), 9);
    assert!(first.is_pointer_field_null(0));

    let mut second = list.get_struct_element(1);
    second.copy_content_from(&first.into_reader()).unwrap();
    assert_eq!(second.get_data_field::<u64>(0), 9);
}
