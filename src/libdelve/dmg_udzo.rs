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
//! zlib-compressed disk image runs.
//!
//! A run's plaintext is addressed one 512-byte sector at a time, but the
//! deflate stream underneath has no sector boundaries.  Each decoded sector
//! is represented by a `UdzoSector` carrying the decoder state and the
//! compressed offset consumed so far; advancing forks that state, so a
//! sector reached once can be stepped past without restarting the stream.
use std::rc::Rc;

use super::cursor::Cursor;
use super::error::{Error, Result};
use super::inflate::InflateStream;
use super::source::{BlobSource, SourceRef};

pub(super) const SECTOR_SIZE: usize = 512;

/// A zlib-compressed run of sectors.
pub(super) struct UdzoRun {
    /// First sector this run covers, within the partition.
    pub first: u64,
    pub count: u64,
    /// The compressed bytes, windowed out of the disk.
    pub compressed: SourceRef,
}

impl UdzoRun {
    pub fn contains(&self, sector: u64) -> bool {
        sector >= self.first && sector < self.first + self.count
    }

    /// Decode sector `n` by walking decoder-sectors forward from the start
    /// of the run.
    pub fn sector(&self, n: u64) -> Result<SourceRef> {
        if !self.contains(n) {
            return Err(Error::InvalidArgument(format!(
                "sector {n} is outside the run [{}, {})",
                self.first,
                self.first + self.count,
            )));
        }

        let mut current = UdzoSector::decode(
            &self.compressed,
            self.first,
            InflateStream::new(),
            Vec::new(),
            0,
        )?;
        while current.sector_no < n {
            current = current.next_sector(&self.compressed)?;
        }

        Ok(Rc::new(BlobSource::new("dmg-udzo-sector", current.data)))
    }
}

/// One decoded 512-byte sector plus everything needed to produce the next.
struct UdzoSector {
    sector_no: u64,
    stream: InflateStream,
    /// Compressed bytes read from the run but not yet consumed by the
    /// decoder.
    tail: Vec<u8>,
    /// How far into the run's compressed bytes we have read.
    consumed: u64,
    data: Vec<u8>,
}

impl UdzoSector {
    fn decode(
        compressed: &SourceRef,
        sector_no: u64,
        mut stream: InflateStream,
        mut tail: Vec<u8>,
        mut consumed: u64,
    ) -> Result<UdzoSector> {
        // Asking for as much new compressed input as plaintext we owe
        // guarantees the decoder can normally produce the whole sector in
        // one feeding; deflate only expands on pathological input.
        let want = SECTOR_SIZE.saturating_sub(tail.len());
        if want > 0 {
            let mut cursor = Cursor::new(compressed.clone());
            cursor.seek(consumed);
            let fresh = cursor.read(want)?;
            consumed += fresh.len() as u64;
            tail.extend_from_slice(&fresh);
        }

        let mut data = vec![0u8; SECTOR_SIZE];
        let mut filled = 0;
        loop {
            let (used, wrote) = stream.inflate(&tail, &mut data[filled..])?;
            tail.drain(..used);
            filled += wrote;
            if filled == SECTOR_SIZE {
                break;
            }
            if stream.is_done() {
                return Err(Error::CorruptMetadata(format!(
                    "zlib run ended {} bytes into sector {}",
                    filled, sector_no,
                )));
            }

            let mut cursor = Cursor::new(compressed.clone());
            cursor.seek(consumed);
            let fresh = cursor.read(SECTOR_SIZE - filled)?;
            if fresh.is_empty() && used == 0 && wrote == 0 {
                return Err(Error::TruncatedSource(format!(
                    "compressed run exhausted {} bytes into sector {}",
                    filled, sector_no,
                )));
            }
            consumed += fresh.len() as u64;
            tail.extend_from_slice(&fresh);
        }

        Ok(UdzoSector {
            sector_no,
            stream,
            tail,
            consumed,
            data,
        })
    }

    /// The following sector, produced from a fork of this one's decoder
    /// state.
    fn next_sector(&self, compressed: &SourceRef) -> Result<UdzoSector> {
        UdzoSector::decode(
            compressed,
            self.sector_no + 1,
            self.stream.clone(),
            self.tail.clone(),
            self.consumed,
        )
    }
}
