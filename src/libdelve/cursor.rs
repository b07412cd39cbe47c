/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
use std::fmt;
use std::rc::Rc;

use bincode_next::{de::Decoder, error::DecodeError, impl_borrow_decode};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::error::{Error, Result};
use super::source::{Source, SourceRef, WindowSource};

/// A 16-byte identifier in its on-disk order.
///
/// Wraps `uuid::Uuid` so that decoding pulls a fixed `[u8; 16]` straight
/// out of the stream; the upstream type insists on deserialising as a
/// slice, which has no place in a fixed-layout structure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Uuid(uuid::Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<Context> bincode_next::Decode<Context> for Uuid {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let bytes = <[u8; 16]>::decode(decoder)?;
        Ok(Uuid::from_bytes(bytes))
    }
}
impl_borrow_decode!(Uuid);

/// Stateful position over a source with typed read primitives.  Reads
/// advance the position by exactly the bytes they return.
pub struct Cursor {
    source: SourceRef,
    position: u64,
}

impl Cursor {
    pub fn new(source: SourceRef) -> Cursor {
        Cursor {
            source,
            position: 0,
        }
    }

    /// Read up to `amount` bytes, truncated at end-of-source.
    pub fn read(&mut self, amount: usize) -> Result<Vec<u8>> {
        let chunk = self.source.read_at(self.position, amount)?;
        self.position += chunk.len() as u64;
        Ok(chunk)
    }

    /// Read exactly `amount` bytes or fail.
    pub fn read_exact(&mut self, amount: usize) -> Result<Vec<u8>> {
        let chunk = self.read(amount)?;
        if chunk.len() != amount {
            return Err(Error::TruncatedSource(format!(
                "wanted {} bytes at offset {} of {}, found {}",
                amount,
                self.position - chunk.len() as u64,
                self.source.label(),
                chunk.len(),
            )));
        }
        Ok(chunk)
    }

    /// Move by a signed delta.  The position may never go below zero.
    pub fn skip(&mut self, delta: i64) -> Result<()> {
        self.position = self.position.checked_add_signed(delta).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "skip by {} from {} moves before the start of {}",
                delta,
                self.position,
                self.source.label(),
            ))
        })?;
        Ok(())
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Jump to end-of-source.
    pub fn end(&mut self) {
        self.position = self.source.size();
    }

    /// A window over the source starting at the current position; with no
    /// size it runs to the source's end.  Always a window, never the
    /// underlying source itself, so the result clamps its own reads.
    pub fn sub(&self, size: Option<u64>) -> SourceRef {
        Rc::new(WindowSource::new(
            "cursor-window",
            self.source.clone(),
            self.position,
            size,
        ))
    }

    /// Read `amount` bytes and keep only those before the first NUL.
    pub fn read_clipped(&mut self, amount: usize) -> Result<String> {
        let raw = self.read(amount)?;
        let clipped = match raw.iter().position(|&b| b == 0) {
            Some(at) => &raw[..at],
            None => &raw[..],
        };
        Ok(String::from_utf8_lossy(clipped).into_owned())
    }

    /// Read up to and including the next LF, or to end-of-source.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let b = self.read(1)?;
            match b.first() {
                None => return Ok(line),
                Some(&c) => {
                    line.push(c);
                    if c == b'\n' {
                        return Ok(line);
                    }
                }
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_exact(1)?[0] as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.read_exact(2)?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(&self.read_exact(2)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.read_exact(4)?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(&self.read_exact(4)?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(&self.read_exact(8)?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(&self.read_exact(8)?))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let raw = self.read_exact(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&raw);
        Ok(Uuid::from_bytes(bytes))
    }
}

#[cfg(test)]
mod t {
    use super::super::source::BlobSource;
    use super::*;

    fn cursor_over(bytes: &[u8]) -> Cursor {
        Cursor::new(Rc::new(BlobSource::new("cursor-test", bytes.to_vec())))
    }

    #[test]
    fn reads_advance_by_what_they_return() {
        let mut c = cursor_over(b"hello");
        assert_eq!(c.read(3).unwrap(), b"hel");
        assert_eq!(c.read(10).unwrap(), b"lo");
        assert_eq!(c.read(1).unwrap(), b"");
        assert_eq!(c.tell(), 5);
    }

    #[test]
    fn read_exact_fails_short() {
        let mut c = cursor_over(b"abc");
        assert_eq!(c.read_exact(3).unwrap(), b"abc");
        c.seek(1);
        assert!(matches!(
            c.read_exact(3),
            Err(Error::TruncatedSource(_))
        ));
    }

    #[test]
    fn skip_guards_the_zero_floor() {
        let mut c = cursor_over(b"abcdef");
        c.skip(4).unwrap();
        c.skip(-4).unwrap();
        assert_eq!(c.tell(), 0);
        c.skip(0).unwrap();
        assert_eq!(c.tell(), 0);
        assert!(matches!(c.skip(-1), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn end_lands_on_the_source_size() {
        let mut c = cursor_over(b"abcdef");
        c.end();
        assert_eq!(c.tell(), 6);
        c.skip(-2).unwrap();
        assert_eq!(c.read(10).unwrap(), b"ef");
    }

    #[test]
    fn typed_reads_cover_both_endiannesses() {
        let mut c = cursor_over(&[0x01, 0x02, 0x03, 0x04, 0xff, 0x80]);
        assert_eq!(c.read_u16_le().unwrap(), 0x0201);
        assert_eq!(c.read_u16_be().unwrap(), 0x0304);
        assert_eq!(c.read_u8().unwrap(), 0xff);
        assert_eq!(c.read_i8().unwrap(), -128);

        let mut c = cursor_over(&[0x78, 0x56, 0x34, 0x12, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(c.read_u32_le().unwrap(), 0x1234_5678);
        assert_eq!(c.read_u32_be().unwrap(), 0x1234_5678);

        let mut c = cursor_over(&[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(c.read_u64_le().unwrap(), 1);
        c.seek(0);
        assert_eq!(c.read_u64_be().unwrap(), 1 << 56);
    }

    #[test]
    fn uuid_renders_canonically() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc,
            0xde, 0xf0,
        ]);
        let mut c = cursor_over(&bytes);
        assert_eq!(
            c.read_uuid().unwrap().to_string(),
            "12345678-9abc-def0-1234-56789abcdef0"
        );
    }

    #[test]
    fn clipped_stops_at_the_first_nul() {
        let mut c = cursor_over(b"volume\0junk\0\0rest");
        assert_eq!(c.read_clipped(13).unwrap(), "volume");
        assert_eq!(c.tell(), 13);
    }

    #[test]
    fn read_line_stops_after_lf_or_eof() {
        let mut c = cursor_over(b"one\ntwo");
        assert_eq!(c.read_line().unwrap(), b"one\n");
        assert_eq!(c.read_line().unwrap(), b"two");
        assert_eq!(c.read_line().unwrap(), b"");
    }

    #[test]
    fn sub_is_a_clamping_window() {
        let mut c = cursor_over(b"0123456789");
        c.seek(3);
        let w = c.sub(Some(4));
        assert_eq!(w.size(), 4);
        assert_eq!(w.read_at(0, 100).unwrap(), b"3456");
        let rest = c.sub(None);
        assert_eq!(rest.size(), 7);
    }
}
