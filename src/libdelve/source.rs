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
//! Random-access byte sources.  Sources nest freely: a window over a
//! block-backed source over a file is the normal case, not the exception.
use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::rc::Rc;

use super::blockdev::{block_spans, BlockDevice};
use super::error::{Error, Result};

/// Read-only random-access byte provider with a known size.
pub trait Source {
    /// Identity label for diagnostics.
    fn label(&self) -> &str;

    /// Logical size in bytes.
    fn size(&self) -> u64;

    /// Read up to `amount` bytes at `pos`.  Reads crossing the end of the
    /// source truncate; a read at or past `size()` yields no bytes.
    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>>;
}

pub type SourceRef = Rc<dyn Source>;

impl fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<source {} ({} bytes)>", self.label(), self.size())
    }
}

/// The readable span of a request against a source of `size` bytes.
fn clamp(size: u64, pos: u64, amount: usize) -> usize {
    if pos >= size {
        return 0;
    }
    match usize::try_from(size - pos) {
        Ok(rest) => amount.min(rest),
        Err(_) => amount,
    }
}

/// Source over an immutable in-memory buffer.
pub struct BlobSource {
    label: String,
    blob: Vec<u8>,
}

impl BlobSource {
    pub fn new(label: impl Into<String>, blob: Vec<u8>) -> Self {
        BlobSource {
            label: label.into(),
            blob,
        }
    }
}

impl Source for BlobSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.blob.len() as u64
    }

    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>> {
        let amount = clamp(self.size(), pos, amount);
        if amount == 0 {
            return Ok(Vec::new());
        }
        let start = pos as usize;
        Ok(self.blob[start..start + amount].to_vec())
    }
}

/// Source over an OS file.  The size is fixed at construction; reads are
/// absolute-position reads, so a shared handle needs no seek serialisation.
pub struct FileSource {
    label: String,
    file: File,
    size: u64,
}

impl FileSource {
    pub fn new(label: impl Into<String>, mut file: File) -> Result<Self> {
        let size = file.seek(SeekFrom::End(0))?;
        Ok(FileSource {
            label: label.into(),
            file,
            size,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(false).open(path)?;
        Self::new(path.display().to_string(), file)
    }
}

impl Source for FileSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>> {
        let amount = clamp(self.size, pos, amount);
        let mut buf = vec![0u8; amount];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read_at(&mut buf[filled..], pos + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A slice of another source.  Every inbound request is clamped against the
/// window, which is why all slicing interposes one of these.
pub struct WindowSource {
    label: String,
    parent: SourceRef,
    offset: u64,
    size: u64,
}

impl WindowSource {
    pub fn new(label: impl Into<String>, parent: SourceRef, offset: u64, size: Option<u64>) -> Self {
        let size = size.unwrap_or_else(|| parent.size().saturating_sub(offset));
        WindowSource {
            label: label.into(),
            parent,
            offset,
            size,
        }
    }
}

impl Source for WindowSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>> {
        let amount = clamp(self.size, pos, amount);
        if amount == 0 {
            return Ok(Vec::new());
        }
        self.parent.read_at(self.offset + pos, amount)
    }
}

/// A run of null bytes of a declared size, with no backing buffer.
pub struct ZeroSource {
    label: String,
    size: u64,
}

impl ZeroSource {
    pub fn new(label: impl Into<String>, size: u64) -> Self {
        ZeroSource {
            label: label.into(),
            size,
        }
    }
}

impl Source for ZeroSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>> {
        Ok(vec![0u8; clamp(self.size, pos, amount)])
    }
}

/// Adapts a block device into a flat source by gathering per-block reads.
pub struct BlockSource {
    label: String,
    device: Rc<dyn BlockDevice>,
}

impl BlockSource {
    pub fn new(label: impl Into<String>, device: Rc<dyn BlockDevice>) -> Self {
        BlockSource {
            label: label.into(),
            device,
        }
    }
}

impl Source for BlockSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.device.size()
    }

    fn read_at(&self, pos: u64, amount: usize) -> Result<Vec<u8>> {
        let amount = clamp(self.size(), pos, amount);
        let mut gathered = Vec::with_capacity(amount);
        for span in block_spans(self.device.block_size(), pos, amount) {
            let block = self.device.block(span.block)?;
            let chunk = block.read_at(span.offset, span.amount)?;
            if chunk.len() < span.amount {
                return Err(Error::TruncatedSource(format!(
                    "block {} of {} held {} bytes where {} were mapped",
                    span.block,
                    self.label,
                    chunk.len(),
                    span.amount,
                )));
            }
            gathered.extend_from_slice(&chunk);
        }
        Ok(gathered)
    }
}
