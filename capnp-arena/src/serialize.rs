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

//! Reading and writing of messages using the
//! [standard stream framing](https://capnproto.org/encoding.html#serialization-over-a-stream).
//!
//! A frame is a segment table followed by the segments' bytes. The table is
//! a `u32` segment count minus one, then one `u32` word count per segment,
//! then four bytes of zero padding when needed to reach a word boundary.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::message;
use crate::private::units::BYTES_PER_WORD;
use crate::{Error, ErrorKind, Result, Word};

/// Segments borrowed from a flat byte slice.
pub struct SliceSegments<'a> {
    words: &'a [u8],

    // Word-index bounds of each segment within `words`.
    segment_indices: Vec<(usize, usize)>,
}

impl message::ReaderSegments for SliceSegments<'_> {
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        let (a, b) = *self.segment_indices.get(id as usize)?;
        Some(&self.words[(a * BYTES_PER_WORD)..(b * BYTES_PER_WORD)])
    }

    fn len(&self) -> usize {
        self.segment_indices.len()
    }
}

/// Reads a serialized message (including a segment table) from a flat slice of bytes, without
/// copying. On success, advances `slice` past the end of the message.
///
/// The slice does not need to be word-aligned.
pub fn read_message_from_flat_slice<'a>(
    slice: &mut &'a [u8],
    options: message::ReaderOptions,
) -> Result<message::Reader<SliceSegments<'a>>> {
    let all_bytes = *slice;
    let mut bytes = *slice;
    let (total_words, segment_indices) = match read_segment_table(&mut bytes, options)? {
        Some(table) => table,
        None => return Err(Error::from_kind(ErrorKind::EmptyMessage)),
    };
    let available_words = bytes.len() / BYTES_PER_WORD;
    if total_words > available_words {
        return Err(Error::from_kind(ErrorKind::MessageEndsPrematurely(
            total_words,
            available_words,
        )));
    }
    let message_len = total_words * BYTES_PER_WORD;
    let table_len = all_bytes.len() - bytes.len();
    *slice = &all_bytes[(table_len + message_len)..];
    Ok(message::Reader::new(
        SliceSegments {
            words: &bytes[..message_len],
            segment_indices,
        },
        options,
    ))
}

/// Segments read into a single owned buffer.
pub struct OwnedSegments {
    // Word-index bounds of each segment within `owned_space`.
    segment_indices: Vec<(usize, usize)>,
    owned_space: Vec<Word>,
}

impl message::ReaderSegments for OwnedSegments {
    fn get_segment(&self, id: u32) -> Option<&[u8]> {
        let (a, b) = *self.segment_indices.get(id as usize)?;
        Some(Word::words_to_bytes(&self.owned_space[a..b]))
    }

    fn len(&self) -> usize {
        self.segment_indices.len()
    }
}

/// Reads a serialized message from a stream with the provided options.
///
/// For optimal performance, `read` should be a buffered reader type.
pub fn read_message<R>(
    read: R,
    options: message::ReaderOptions,
) -> Result<message::Reader<OwnedSegments>>
where
    R: Read,
{
    match try_read_message(read, options)? {
        Some(message) => Ok(message),
        None => Err(Error::from_kind(ErrorKind::PrematureEndOfFile)),
    }
}

/// Like `read_message()`, but returns `None` instead of an error if there are zero bytes left in
/// `read`. This is useful for reading a stream of messages: a clean end of stream between two
/// frames is not an error.
pub fn try_read_message<R>(
    mut read: R,
    options: message::ReaderOptions,
) -> Result<Option<message::Reader<OwnedSegments>>>
where
    R: Read,
{
    let Some((total_words, segment_indices)) = read_segment_table(&mut read, options)? else {
        return Ok(None);
    };
    Ok(Some(read_segments(
        &mut read,
        total_words,
        segment_indices,
        options,
    )?))
}

/// Fills `buf`, returning `false` if the stream ended before the first byte.
fn read_exact_or_eof<R>(read: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: Read,
{
    let mut filled = 0;
    while filled < buf.len() {
        match read.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(Error::from_kind(ErrorKind::PrematureEndOfFile)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Reads a segment table from `read` and returns the total number of words across all
/// segments, as well as the segment offsets. Returns `None` if `read` is at a clean end
/// of stream.
///
/// No size is acted on until the count has been checked against the segment limit and
/// the total against the traversal limit.
fn read_segment_table<R>(
    read: &mut R,
    options: message::ReaderOptions,
) -> Result<Option<(usize, Vec<(usize, usize)>)>>
where
    R: Read,
{
    let mut buf: [u8; 8] = [0; 8];

    // read the first Word, which contains segment_count and the 1st segment length
    if !read_exact_or_eof(read, &mut buf)? {
        return Ok(None);
    }
    let segment_count = LittleEndian::read_u32(&buf[0..4]).wrapping_add(1) as usize;

    if segment_count == 0 {
        debug!(segment_count, "rejected segment table");
        return Err(Error::from_kind(ErrorKind::TooFewSegments(segment_count)));
    }
    if segment_count > options.segment_limit as usize {
        debug!(segment_count, "rejected segment table");
        return Err(Error::from_kind(ErrorKind::TooManySegments(segment_count)));
    }

    let mut segment_indices = Vec::with_capacity(segment_count);
    let mut total_words = LittleEndian::read_u32(&buf[4..8]) as usize;
    segment_indices.push((0, total_words));

    if segment_count > 1 {
        let mut segment_sizes = vec![0u8; (segment_count & !1) * 4];
        read.read_exact(&mut segment_sizes[..])?;
        for idx in 0..(segment_count - 1) {
            let segment_len = LittleEndian::read_u32(&segment_sizes[(idx * 4)..(idx + 1) * 4]) as usize;

            segment_indices.push((total_words, total_words + segment_len));
            total_words += segment_len;
        }
    }

    // Don't accept a message which the receiver couldn't possibly traverse without hitting the
    // traversal limit. Without this check, a malicious client could transmit a very large segment
    // size to make the receiver allocate excessive space and possibly crash.
    if let Some(limit) = options.traversal_limit_in_words {
        if total_words > limit {
            debug!(segment_count, total_words, "rejected segment table");
            return Err(Error::from_kind(ErrorKind::MessageTooLarge(total_words)));
        }
    }

    Ok(Some((total_words, segment_indices)))
}

/// Reads segments from `read`.
fn read_segments<R>(
    read: &mut R,
    total_words: usize,
    segment_indices: Vec<(usize, usize)>,
    options: message::ReaderOptions,
) -> Result<message::Reader<OwnedSegments>>
where
    R: Read,
{
    let mut owned_space: Vec<Word> = Word::allocate_zeroed_vec(total_words);
    read.read_exact(Word::words_to_bytes_mut(&mut owned_space[..]))?;
    let segments = OwnedSegments {
        segment_indices,
        owned_space,
    };
    Ok(message::Reader::new(segments, options))
}

fn segments_of<R>(segments: &R) -> impl Iterator<Item = &[u8]>
where
    R: message::ReaderSegments + ?Sized,
{
    (0..segments.len() as u32).map_while(move |id| segments.get_segment(id))
}

/// Constructs a flat vector containing the entire message, including a segment header.
pub fn write_message_to_words<A>(message: &message::Builder<A>) -> Vec<Word>
where
    A: message::Allocator,
{
    flatten_segments(&*message.get_segments_for_output())
}

/// Like `write_message_to_words()`, but takes a `ReaderSegments`, allowing it to be
/// used on `message::Reader` objects (via `into_segments()`).
pub fn write_message_segments_to_words<R>(message: &R) -> Vec<Word>
where
    R: message::ReaderSegments + ?Sized,
{
    flatten_segments(message)
}

fn flatten_segments<R: message::ReaderSegments + ?Sized>(segments: &R) -> Vec<Word> {
    let word_count = compute_serialized_size(segments);
    let mut result = Word::allocate_zeroed_vec(word_count);
    let mut bytes = Word::words_to_bytes_mut(&mut result[..]);
    write_segment_table_internal(&mut bytes, segments);
    for segment in segments_of(segments) {
        let (head, tail) = core::mem::take(&mut bytes).split_at_mut(segment.len());
        head.copy_from_slice(segment);
        bytes = tail;
    }
    result
}

/// Writes the provided message to `write`.
///
/// For optimal performance, `write` should be a buffered writer. `flush` will not be called on
/// the writer.
pub fn write_message<W, A>(mut write: W, message: &message::Builder<A>) -> Result<()>
where
    W: Write,
    A: message::Allocator,
{
    let segments = message.get_segments_for_output();
    write_segment_table(&mut write, &segments)?;
    write_segments(&mut write, &*segments)
}

/// Like `write_message()`, but takes a `ReaderSegments`, allowing it to be
/// used on `message::Reader` objects (via `into_segments()`).
pub fn write_message_segments<W, R>(mut write: W, segments: &R) -> Result<()>
where
    W: Write,
    R: message::ReaderSegments + ?Sized,
{
    let mut table = Vec::new();
    write_segment_table_internal(&mut table, segments);
    write.write_all(&table)?;
    write_segments(&mut write, segments)
}

fn write_segment_table<W>(write: &mut W, segments: &[&[u8]]) -> Result<()>
where
    W: Write,
{
    let mut table = Vec::with_capacity((segments.len() / 2 + 1) * BYTES_PER_WORD);
    write_segment_table_internal(&mut table, segments);
    write.write_all(&table)?;
    Ok(())
}

/// Encodes the segment table into `write`.
///
/// `segments` must contain at least one segment.
fn write_segment_table_internal<W, R>(write: &mut W, segments: &R)
where
    W: TableSink + ?Sized,
    R: message::ReaderSegments + ?Sized,
{
    let segment_count = segments.len();
    assert!(segment_count > 0, "a message has at least one segment");
    let mut table = vec![0u8; (segment_count / 2 + 1) * BYTES_PER_WORD];

    LittleEndian::write_u32(&mut table[0..4], segment_count as u32 - 1);
    for (idx, segment) in segments_of(segments).enumerate() {
        let start = (idx + 1) * 4;
        LittleEndian::write_u32(
            &mut table[start..start + 4],
            (segment.len() / BYTES_PER_WORD) as u32,
        );
    }
    // The padding word, if any, is already zero.
    write.put(&table);
}

/// Destination of an encoded segment table.
trait TableSink {
    fn put(&mut self, table: &[u8]);
}

impl TableSink for Vec<u8> {
    fn put(&mut self, table: &[u8]) {
        self.extend_from_slice(table);
    }
}

impl TableSink for &mut [u8] {
    fn put(&mut self, table: &[u8]) {
        let buf = core::mem::take(self);
        let (head, tail) = buf.split_at_mut(table.len());
        head.copy_from_slice(table);
        *self = tail;
    }
}

/// Writes segments to `write`.
fn write_segments<W, R: message::ReaderSegments + ?Sized>(write: &mut W, segments: &R) -> Result<()>
where
    W: Write,
{
    for segment in segments_of(segments) {
        write.write_all(segment)?;
    }
    Ok(())
}

fn compute_serialized_size<R: message::ReaderSegments + ?Sized>(segments: &R) -> usize {
    // Table size
    let len = segments.len();
    let mut size = (len / 2) + 1;
    for segment in segments_of(segments) {
        size += segment.len() / BYTES_PER_WORD;
    }
    size
}

/// Returns the number of (8-byte) words required to serialize the message (including the
/// segment table).
pub fn compute_serialized_size_in_words<A>(message: &message::Builder<A>) -> usize
where
    A: message::Allocator,
{
    compute_serialized_size(&*message.get_segments_for_output())
}
