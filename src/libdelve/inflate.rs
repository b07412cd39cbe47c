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
//! Incremental zlib decompression with copyable state.
//!
//! The stream object owns the inflate state machine and its 32 KiB
//! dictionary window, so a clone can resume decompression from exactly the
//! point the original had reached.  That copyability is what makes random
//! access into a compressed run affordable.
use miniz_oxide::inflate::core::{decompress, inflate_flags, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;

use super::error::{Error, Result};

const DICT_SIZE: usize = 32 * 1024;

pub struct InflateStream {
    decomp: Box<DecompressorOxide>,
    dict: Box<[u8; DICT_SIZE]>,
    /// Where the next decompressed bytes land in the dictionary ring.
    dict_ofs: usize,
    /// Decoded bytes sitting in the ring, not yet handed to a caller.
    dict_avail: usize,
    done: bool,
}

impl Clone for InflateStream {
    fn clone(&self) -> Self {
        InflateStream {
            decomp: self.decomp.clone(),
            dict: self.dict.clone(),
            dict_ofs: self.dict_ofs,
            dict_avail: self.dict_avail,
            done: self.done,
        }
    }
}

impl Default for InflateStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InflateStream {
    pub fn new() -> InflateStream {
        InflateStream {
            decomp: Box::new(DecompressorOxide::new()),
            dict: Box::new([0u8; DICT_SIZE]),
            dict_ofs: 0,
            dict_avail: 0,
            done: false,
        }
    }

    /// The zlib stream has produced its final byte.
    pub fn is_done(&self) -> bool {
        self.done && self.dict_avail == 0
    }

    /// Feed compressed bytes from `input`, writing plaintext into `out`.
    /// Returns (input consumed, output produced); either side may come up
    /// short when the other runs dry, and the remaining input is the
    /// caller's unconsumed tail.
    pub fn inflate(&mut self, input: &[u8], out: &mut [u8]) -> Result<(usize, usize)> {
        let flags =
            inflate_flags::TINFL_FLAG_PARSE_ZLIB_HEADER | inflate_flags::TINFL_FLAG_HAS_MORE_INPUT;
        let mut in_pos = 0;
        let mut out_pos = 0;

        loop {
            if self.dict_avail > 0 {
                let take = self.dict_avail.min(out.len() - out_pos);
                out[out_pos..out_pos + take]
                    .copy_from_slice(&self.dict[self.dict_ofs..self.dict_ofs + take]);
                out_pos += take;
                self.dict_ofs = (self.dict_ofs + take) & (DICT_SIZE - 1);
                self.dict_avail -= take;
                if self.dict_avail > 0 {
                    // The caller's buffer filled first; the rest stays rung
                    // up for the next call.
                    break;
                }
            }
            if out_pos == out.len() || self.done {
                break;
            }

            let (status, consumed, produced) = decompress(
                &mut self.decomp,
                &input[in_pos..],
                &mut self.dict[..],
                self.dict_ofs,
                flags,
            );
            in_pos += consumed;
            self.dict_avail = produced;

            match status {
                TINFLStatus::Done => self.done = true,
                TINFLStatus::NeedsMoreInput | TINFLStatus::HasMoreOutput => {}
                failed => {
                    return Err(Error::CorruptMetadata(format!(
                        "zlib stream failed to decode: {failed:?}"
                    )))
                }
            }

            if consumed == 0 && produced == 0 && !self.done {
                // Starved for input; hand control back to the caller.
                break;
            }
        }

        Ok((in_pos, out_pos))
    }
}
