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
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use super::cache::{self, BlockCache};
use super::error::Result;
use super::source::{BlobSource, FileSource, Source, SourceRef};

/// Fixed-block-size provider mapping block numbers to sources.
///
/// Block `n` covers bytes `[n * block_size, (n + 1) * block_size)`; the last
/// block may come back shorter.
pub trait BlockDevice {
    fn label(&self) -> &str;

    fn block_size(&self) -> u64;

    /// Size in bytes, not blocks.  The final block may be only partially
    /// filled with usable data and reads never go past this.
    fn size(&self) -> u64;

    fn block(&self, n: u64) -> Result<SourceRef>;
}

/// One per-block read of a gathered request.
pub(super) struct BlockSpan {
    pub block: u64,
    pub offset: u64,
    pub amount: usize,
}

/// The per-block reads needed to gather `amount` bytes at `position`
/// without ever crossing a block boundary.  The first span may start
/// mid-block, interior spans are whole blocks, the last may be partial.
pub(super) fn block_spans(block_size: u64, position: u64, amount: usize) -> Vec<BlockSpan> {
    let mut spans = Vec::new();
    let mut amount = amount as u64;
    let mut block = position / block_size;

    let intra = position % block_size;
    if intra != 0 {
        let first = (block_size - intra).min(amount);
        spans.push(BlockSpan {
            block,
            offset: intra,
            amount: first as usize,
        });
        block += 1;
        amount -= first;
    }

    while amount > 0 {
        let take = block_size.min(amount);
        spans.push(BlockSpan {
            block,
            offset: 0,
            amount: take as usize,
        });
        block += 1;
        amount -= take;
    }

    spans
}

pub const FILE_BLOCK_SIZE: u64 = 4096;

/// Block device over an OS file, handing out independently-owned copies of
/// each block so cached blocks never borrow the handle.
pub struct FileBlockDevice {
    source: FileSource,
    cache: RefCell<BlockCache>,
}

impl FileBlockDevice {
    pub fn new(source: FileSource) -> Self {
        FileBlockDevice {
            source,
            cache: RefCell::new(BlockCache::new(cache::FILE_BLOCKS)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(FileSource::open(path)?))
    }
}

impl BlockDevice for FileBlockDevice {
    fn label(&self) -> &str {
        self.source.label()
    }

    fn block_size(&self) -> u64 {
        FILE_BLOCK_SIZE
    }

    fn size(&self) -> u64 {
        self.source.size()
    }

    fn block(&self, n: u64) -> Result<SourceRef> {
        self.cache.borrow_mut().get_or_try_insert(n, || {
            let blob = self
                .source
                .read_at(n * FILE_BLOCK_SIZE, FILE_BLOCK_SIZE as usize)?;
            Ok(Rc::new(BlobSource::new("file-block", blob)) as SourceRef)
        })
    }
}
