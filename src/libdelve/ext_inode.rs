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
//! Inode descriptors and the mapping from file blocks to disk blocks.
use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tracing::warn;

use super::blockdev::BlockDevice;
use super::cache::{self, BlockCache};
use super::cursor::Cursor;
use super::error::{Error, Result};
use super::ext::{ExtFs, Superblock};
use super::source::{BlobSource, SourceRef, WindowSource};

const EXTENT_MAGIC: u16 = 0xf30a;
const DIRECT_POINTERS: u64 = 11;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const SECRM = 0x0000_0001;
        const UNRM = 0x0000_0002;
        const COMPR = 0x0000_0004;
        const SYNC = 0x0000_0008;
        const IMMUTABLE = 0x0000_0010;
        const APPEND = 0x0000_0020;
        const NODUMP = 0x0000_0040;
        const NOATIME = 0x0000_0080;
        const DIRTY = 0x0000_0100;
        const COMPRBLK = 0x0000_0200;
        const NOCOMPR = 0x0000_0400;
        const ENCRYPT = 0x0000_0800;
        const INDEX = 0x0000_1000;
        const IMAGIC = 0x0000_2000;
        const JOURNAL_DATA = 0x0000_4000;
        const NOTAIL = 0x0000_8000;
        const DIRSYNC = 0x0001_0000;
        const TOPDIR = 0x0002_0000;
        const HUGE_FILE = 0x0004_0000;
        const EXTENTS = 0x0008_0000;
        const EA_INODE = 0x0020_0000;
        const EOFBLOCKS = 0x0040_0000;
        const SNAPFILE = 0x0100_0000;
        const SNAPFILE_DELETED = 0x0400_0000;
        const SNAPFILE_SHRUNK = 0x0800_0000;
        const INLINE_DATA = 0x1000_0000;
        const RESERVED = 0x8000_0000;
    }
}

/// Exactly one of these is selected by mode bits 12..15.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[repr(u16)]
pub enum InodeKind {
    Fifo = 0x1,
    CharDevice = 0x2,
    Directory = 0x4,
    BlockDevice = 0x6,
    Regular = 0x8,
    Symlink = 0xa,
    Socket = 0xc,
}

#[derive(Clone, Copy, Debug)]
pub struct InodeMode {
    pub kind: InodeKind,
    /// The low twelve permission and set-id bits.
    pub permissions: u16,
}

impl InodeMode {
    fn from_raw(raw: u16) -> Result<InodeMode> {
        let kind = InodeKind::from_u16(raw >> 12).ok_or_else(|| {
            Error::CorruptMetadata(format!(
                "inode mode {raw:#06x} selects no file kind"
            ))
        })?;
        Ok(InodeMode {
            kind,
            permissions: raw & 0x0fff,
        })
    }
}

#[derive(Debug)]
pub struct InodeOsd2 {
    pub blocks_high: u16,
    pub file_acl_high: u16,
    pub uid_high: u16,
    pub gid_high: u16,
    pub checksum_lo: u16,
}

/// The fields of the dynamic-revision tail that fit inside `extra_isize`.
#[derive(Debug, Default)]
pub struct InodeExtra {
    pub extra_isize: u16,
    pub checksum_hi: Option<u16>,
    pub ctime_extra: Option<u32>,
    pub mtime_extra: Option<u32>,
    pub atime_extra: Option<u32>,
    pub crtime: Option<u32>,
    pub crtime_extra: Option<u32>,
    pub version_hi: Option<u32>,
}

#[derive(Debug)]
pub struct InodeDescriptor {
    pub mode: InodeMode,
    pub uid: u16,
    pub size_lo: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks_lo: u32,
    pub flags: InodeFlags,
    pub block_map: [u8; 60],
    pub generation: u32,
    pub file_acl_lo: u32,
    pub dir_acl_or_size_hi: u32,
    pub osd2: InodeOsd2,
    pub extra: Option<InodeExtra>,
}

impl InodeDescriptor {
    pub(super) fn read(cursor: &mut Cursor, sb: &Superblock) -> Result<InodeDescriptor> {
        let start = cursor.tell();

        let mode = InodeMode::from_raw(cursor.read_u16_le()?)?;
        let uid = cursor.read_u16_le()?;
        let size_lo = cursor.read_u32_le()?;
        let atime = cursor.read_u32_le()?;
        let ctime = cursor.read_u32_le()?;
        let mtime = cursor.read_u32_le()?;
        let dtime = cursor.read_u32_le()?;
        let gid = cursor.read_u16_le()?;
        let links_count = cursor.read_u16_le()?;
        let blocks_lo = cursor.read_u32_le()?;

        let flags_raw = cursor.read_u32_le()?;
        let flags = InodeFlags::from_bits_retain(flags_raw);
        let unknown = flags_raw & !InodeFlags::all().bits();
        if unknown != 0 {
            warn!(
                unknown = format!("{unknown:#x}"),
                "inode flags carry unknown bits"
            );
        }

        let _os_specific = cursor.read_u32_le()?;
        let mut block_map = [0u8; 60];
        block_map.copy_from_slice(&cursor.read_exact(60)?);
        let generation = cursor.read_u32_le()?;
        let file_acl_lo = cursor.read_u32_le()?;
        let dir_acl_or_size_hi = cursor.read_u32_le()?;
        let _obso_faddr = cursor.read_u32_le()?;

        let osd2 = InodeOsd2 {
            blocks_high: cursor.read_u16_le()?,
            file_acl_high: cursor.read_u16_le()?,
            uid_high: cursor.read_u16_le()?,
            gid_high: cursor.read_u16_le()?,
            checksum_lo: cursor.read_u16_le()?,
        };
        let _osd2_reserved = cursor.read_u16_le()?;

        // The classic revision ends the inode at 128 bytes.
        let extra = if sb.dynamic.is_none() {
            None
        } else {
            let extra_start = cursor.tell();
            let extra_isize = cursor.read_u16_le()?;
            let mut extra = InodeExtra {
                extra_isize,
                ..InodeExtra::default()
            };
            let isize = u64::from(extra_isize);

            if cursor.tell() - extra_start < isize {
                extra.checksum_hi = Some(cursor.read_u16_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.ctime_extra = Some(cursor.read_u32_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.mtime_extra = Some(cursor.read_u32_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.atime_extra = Some(cursor.read_u32_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.crtime = Some(cursor.read_u32_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.crtime_extra = Some(cursor.read_u32_le()?);
            }
            if cursor.tell() - extra_start < isize {
                extra.version_hi = Some(cursor.read_u32_le()?);
            }
            // Whatever future fields remain are skipped with the gap up to
            // the next inode boundary.
            Some(extra)
        };
        cursor.seek(start + sb.inode_size());

        Ok(InodeDescriptor {
            mode,
            uid,
            size_lo,
            atime,
            ctime,
            mtime,
            dtime,
            gid,
            links_count,
            blocks_lo,
            flags,
            block_map,
            generation,
            file_acl_lo,
            dir_acl_or_size_hi,
            osd2,
            extra,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.mode.kind == InodeKind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.mode.kind == InodeKind::Regular
    }

    /// Regular files grow a high size half; for directories the same field
    /// is an unused ACL structure.
    pub fn file_size(&self) -> u64 {
        if self.is_regular() {
            u64::from(self.size_lo) | (u64::from(self.dir_acl_or_size_hi) << 32)
        } else {
            u64::from(self.size_lo)
        }
    }

    pub fn describe(&self) -> super::attrs::Attributes {
        let mut a = super::attrs::Attributes::new();
        a.put("kind", format!("{:?}", self.mode.kind));
        a.put("permissions", u64::from(self.mode.permissions));
        a.put("uid", u32::from(self.uid) | (u32::from(self.osd2.uid_high) << 16));
        a.put("gid", u32::from(self.gid) | (u32::from(self.osd2.gid_high) << 16));
        a.put("size", self.file_size());
        a.put("atime", self.atime);
        a.put("ctime", self.ctime);
        a.put("mtime", self.mtime);
        a.put("dtime", self.dtime);
        a.put("links-count", self.links_count);
        a.put(
            "blocks",
            u64::from(self.blocks_lo) | (u64::from(self.osd2.blocks_high) << 32),
        );
        a.put("flags", format!("{:?}", self.flags));
        a.put("generation", self.generation);
        a.put(
            "file-acl",
            u64::from(self.file_acl_lo) | (u64::from(self.osd2.file_acl_high) << 32),
        );
        if let Some(extra) = &self.extra {
            a.put("extra-isize", extra.extra_isize);
            if let Some(crtime) = extra.crtime {
                a.put("crtime", crtime);
            }
        }
        a
    }
}

/// Block device over one inode's contents.  Blocks resolve through either
/// the extent tree or the classic pointer map; the final block is truncated
/// to the file size.
pub(super) struct ExtInodeDevice {
    fs: Rc<ExtFs>,
    inode: InodeDescriptor,
    cache: RefCell<BlockCache>,
}

impl ExtInodeDevice {
    pub fn new(fs: Rc<ExtFs>, inode: InodeDescriptor) -> ExtInodeDevice {
        ExtInodeDevice {
            fs,
            inode,
            cache: RefCell::new(BlockCache::new(cache::EXT_INODE_CONTENTS_BLOCKS)),
        }
    }

    fn raw_block(&self, n: u64) -> Result<u64> {
        if !(self.inode.is_directory() || self.inode.is_regular()) {
            return Err(Error::Unsupported(format!(
                "reading the contents of a {:?} inode",
                self.inode.mode.kind
            )));
        }
        if self.inode.flags.contains(InodeFlags::INLINE_DATA) {
            return Err(Error::Unsupported("inline inode data".into()));
        }
        if self.inode.flags.contains(InodeFlags::EXTENTS) {
            self.raw_block_via_extents(n)
        } else {
            self.raw_block_via_pointers(n)
        }
    }

    fn raw_block_via_extents(&self, n: u64) -> Result<u64> {
        let map: SourceRef = Rc::new(BlobSource::new(
            "ext-inode-block-map",
            self.inode.block_map.to_vec(),
        ));
        let mut cursor = Cursor::new(map);

        let magic = cursor.read_u16_le()?;
        if magic != EXTENT_MAGIC {
            return Err(Error::CorruptMetadata(format!(
                "extent header magic is {magic:#06x}"
            )));
        }
        let entries = cursor.read_u16_le()?;
        let _max = cursor.read_u16_le()?;
        let depth = cursor.read_u16_le()?;
        let _generation = cursor.read_u32_le()?;

        if depth != 0 {
            return Err(Error::Unsupported(format!(
                "extent tree of depth {depth}"
            )));
        }

        for _ in 0..entries {
            let logical = u64::from(cursor.read_u32_le()?);
            let len = u64::from(cursor.read_u16_le()?);
            let start_hi = u64::from(cursor.read_u16_le()?);
            let start_lo = u64::from(cursor.read_u32_le()?);

            if logical <= n && n <= logical + len {
                let physical = (start_hi << 32) | start_lo;
                return Ok(physical + (n - logical));
            }
        }

        Err(Error::CorruptMetadata(format!(
            "file block {n} is not covered by any extent"
        )))
    }

    fn raw_block_via_pointers(&self, n: u64) -> Result<u64> {
        let map: SourceRef = Rc::new(BlobSource::new(
            "ext-inode-block-map",
            self.inode.block_map.to_vec(),
        ));
        let mut cursor = Cursor::new(map);

        let mut pointers = [0u32; 15];
        for p in pointers.iter_mut() {
            *p = cursor.read_u32_le()?;
        }

        if n < DIRECT_POINTERS {
            let raw = u64::from(pointers[n as usize]);
            if raw == 0 {
                return Err(Error::CorruptMetadata(format!(
                    "file block {n} maps to a null direct pointer"
                )));
            }
            return Ok(raw);
        }
        Err(Error::Unsupported(
            "indirect block pointer lookup".into(),
        ))
    }
}

impl BlockDevice for ExtInodeDevice {
    fn label(&self) -> &str {
        "ext-inode-contents"
    }

    fn block_size(&self) -> u64 {
        self.fs.block_size()
    }

    fn size(&self) -> u64 {
        self.inode.file_size()
    }

    fn block(&self, n: u64) -> Result<SourceRef> {
        self.cache.borrow_mut().get_or_try_insert(n, || {
            let raw = self.raw_block(n)?;
            let block_size = self.fs.block_size();
            let remaining = self.size().saturating_sub(n * block_size);
            Ok(Rc::new(WindowSource::new(
                "ext-inode-block",
                self.fs.disk.clone(),
                raw * block_size,
                Some(remaining.min(block_size)),
            )) as SourceRef)
        })
    }
}
