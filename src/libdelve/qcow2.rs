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
//! qcow2 version 2 images: a virtual disk behind a two-level cluster table,
//! optionally layered over a backing file.
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use bincode_next::Decode;
use tracing::debug;

use super::attrs::Attributes;
use super::blockdev::{BlockDevice, FileBlockDevice};
use super::cache::{self, BlockCache};
use super::cursor::Cursor;
use super::error::{Error, Result};
use super::model::{Child, Handler, Model, Registry};
use super::source::{BlockSource, SourceRef, ZeroSource};
use super::utils::decode_be;

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";
const HEADER_SIZE: usize = 72;
const BLOCK_SIZE: u64 = 512;

const FLAG_COPIED: u64 = 1 << 63;
const FLAG_COMPRESSED: u64 = 1 << 62;
const OFFSET_MASK: u64 = !(FLAG_COPIED | FLAG_COMPRESSED);

#[derive(Clone, Debug, Decode)]
pub struct Qcow2Header {
    magic: [u8; 4],
    version: u32,
    backing_file_offset: u64,
    backing_file_size: u32,
    cluster_bits: u32,
    /// Virtual disk size in bytes.
    size: u64,
    crypt_method: u32,
    l1_size: u32,
    l1_table_offset: u64,
    _refcount_table_offset: u64,
    _refcount_table_clusters: u32,
    nb_snapshots: u32,
    _snapshots_offset: u64,
}

pub struct Qcow2 {
    disk: SourceRef,
    header: Qcow2Header,
}

impl Qcow2 {
    pub(super) fn matches(source: &SourceRef) -> Result<bool> {
        let mut cursor = Cursor::new(source.clone());
        Ok(cursor.read(4)? == QCOW2_MAGIC)
    }

    pub(super) fn open(source: SourceRef) -> Result<Handler> {
        let mut cursor = Cursor::new(source.clone());
        let raw = cursor.read_exact(HEADER_SIZE)?;
        let (header, _) = decode_be::<Qcow2Header>(&raw)?;
        if &header.magic != QCOW2_MAGIC {
            return Err(Error::CorruptMetadata("bad qcow2 magic".into()));
        }
        Ok(Qcow2 {
            disk: source,
            header,
        }
        .into())
    }
}

impl Model for Qcow2 {
    fn name(&self) -> &'static str {
        "qcow2"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        // Snapshot traversal would slot in beside the main image.
        Ok(vec![Child::new(
            "main-image",
            "the primary image in the file, as opposed to any snapshots",
        )])
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        if child == "main-image" {
            return Ok(Some(
                Qcow2MainImage {
                    disk: self.disk.clone(),
                    header: self.header.clone(),
                }
                .into(),
            ));
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("version", self.header.version);
        a.put("cluster-bits", self.header.cluster_bits);
        a.put("size", self.header.size);
        a.put("crypt-method", self.header.crypt_method);
        a.put("l1-size", self.header.l1_size);
        a.put("l1-table-offset", self.header.l1_table_offset);
        a.put("nb-snapshots", self.header.nb_snapshots);
        a.put("has-backing-file", self.header.backing_file_offset != 0);
        a
    }
}

pub struct Qcow2MainImage {
    disk: SourceRef,
    header: Qcow2Header,
}

impl Model for Qcow2MainImage {
    fn name(&self) -> &'static str {
        "qcow2-main-image"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        let device = Qcow2Device::new(self.disk.clone(), self.header.clone())?;
        Ok(Rc::new(BlockSource::new("qcow2-main-image", Rc::new(device))))
    }
}

/// 512-byte block device over the cluster mapping.
struct Qcow2Device {
    disk: SourceRef,
    header: Qcow2Header,
    /// Resolved once at construction and kept for the device's lifetime.
    backing: Option<SourceRef>,
    cache: RefCell<BlockCache>,
}

impl Qcow2Device {
    fn new(disk: SourceRef, header: Qcow2Header) -> Result<Qcow2Device> {
        if header.version != 2 {
            return Err(Error::Unsupported(format!(
                "qcow2 version {} (only version 2 is handled)",
                header.version
            )));
        }
        if header.crypt_method != 0 {
            return Err(Error::Unsupported(format!(
                "qcow2 crypt-method {}",
                header.crypt_method
            )));
        }
        if header.cluster_bits < 9 || header.cluster_bits > 30 {
            return Err(Error::CorruptMetadata(format!(
                "implausible cluster-bits {}",
                header.cluster_bits
            )));
        }

        let backing = if header.backing_file_offset != 0 {
            Some(Self::open_backing(&disk, &header)?)
        } else {
            None
        };

        Ok(Qcow2Device {
            disk,
            header,
            backing,
            cache: RefCell::new(BlockCache::new(cache::QCOW2_BLOCKS)),
        })
    }

    /// Open and recognise the declared backing file.  A listable match is
    /// descended into through its first option, once; a sourceable result
    /// replaces the raw file.
    fn open_backing(disk: &SourceRef, header: &Qcow2Header) -> Result<SourceRef> {
        let mut cursor = Cursor::new(disk.clone());
        cursor.seek(header.backing_file_offset);
        let raw = cursor.read_exact(header.backing_file_size as usize)?;
        let path = String::from_utf8(raw).map_err(|_| {
            Error::CorruptMetadata("backing file path is not valid utf-8".into())
        })?;

        debug!(path = %path, "opening qcow2 backing file");
        let device = FileBlockDevice::open(Path::new(&path))?;
        let raw_source: SourceRef = Rc::new(BlockSource::new(
            format!("qcow2-backing:{path}"),
            Rc::new(device),
        ));

        let registry = Registry::builtin();
        let candidates = registry.matching(&raw_source);
        if candidates.len() > 1 {
            let names: Vec<&str> = candidates.iter().map(|f| f.name()).collect();
            return Err(Error::CorruptMetadata(format!(
                "backing file matches multiple formats: {}",
                names.join(", ")
            )));
        }

        let format = match candidates.first() {
            None => {
                debug!("backing file unrecognised, using it raw");
                return Ok(raw_source);
            }
            Some(format) => format,
        };
        debug!(format = format.name(), "recognised backing file");

        let mut handler = format.instantiate(raw_source.clone())?;
        if handler.is_listable() {
            if let Some(first) = handler.list()?.into_iter().next() {
                debug!(option = %first.name, "descending into backing file's first option");
                if let Some(inner) = handler.select(&first.name)? {
                    handler = inner;
                }
            }
        }

        if handler.is_sourceable() {
            handler.source()
        } else {
            Ok(raw_source)
        }
    }

    /// The unallocated answer for a block: the backing store's bytes when
    /// present, zeros otherwise.
    fn unallocated(&self, n: u64) -> Result<SourceRef> {
        match &self.backing {
            Some(backing) => {
                let mut cursor = Cursor::new(backing.clone());
                cursor.seek(n * BLOCK_SIZE);
                Ok(cursor.sub(Some(BLOCK_SIZE)))
            }
            None => Ok(Rc::new(ZeroSource::new("qcow2-unallocated", BLOCK_SIZE))),
        }
    }

    fn map_block(&self, n: u64) -> Result<SourceRef> {
        let cluster_bits = u64::from(self.header.cluster_bits);
        let l2_bits = cluster_bits - 3;

        let address = n * BLOCK_SIZE;
        let l1_index = address >> (l2_bits + cluster_bits);
        let l2_index = (address >> cluster_bits) & ((1 << l2_bits) - 1);
        let within_cluster = address & ((1 << cluster_bits) - 1);

        if l1_index >= u64::from(self.header.l1_size) {
            return Err(Error::CorruptMetadata(format!(
                "virtual block {n} lands past the L1 table"
            )));
        }

        let mut cursor = Cursor::new(self.disk.clone());
        cursor.seek(self.header.l1_table_offset + l1_index * 8);
        let l1_entry = cursor.read_u64_be()?;

        // COPIED is a refcount shortcut with no meaning for readers.
        if l1_entry & FLAG_COMPRESSED != 0 {
            return Err(Error::Unsupported("qcow2 compressed L2 table".into()));
        }
        let l2_offset = l1_entry & OFFSET_MASK;
        if l2_offset == 0 {
            return self.unallocated(n);
        }

        cursor.seek(l2_offset + l2_index * 8);
        let l2_entry = cursor.read_u64_be()?;

        if l2_entry & FLAG_COMPRESSED != 0 {
            return Err(Error::Unsupported("qcow2 compressed cluster".into()));
        }
        let cluster_offset = l2_entry & OFFSET_MASK;
        if cluster_offset == 0 {
            return self.unallocated(n);
        }

        cursor.seek(cluster_offset + within_cluster);
        Ok(cursor.sub(Some(BLOCK_SIZE)))
    }
}

impl BlockDevice for Qcow2Device {
    fn label(&self) -> &str {
        "qcow2-device"
    }

    fn block_size(&self) -> u64 {
        BLOCK_SIZE
    }

    fn size(&self) -> u64 {
        self.header.size
    }

    fn block(&self, n: u64) -> Result<SourceRef> {
        self.cache
            .borrow_mut()
            .get_or_try_insert(n, || self.map_block(n))
    }
}

#[cfg(test)]
mod t {
    use std::io::Write;

    use super::super::source::{BlobSource, Source};
    use super::*;

    const CLUSTER_BITS: u32 = 12; // 4 KiB clusters

    fn header_bytes(size: u64, l1_offset: u64, l1_size: u32, backing: Option<(u64, u32)>) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(QCOW2_MAGIC);
        h.extend_from_slice(&2u32.to_be_bytes());
        let (bf_off, bf_len) = backing.unwrap_or((0, 0));
        h.extend_from_slice(&bf_off.to_be_bytes());
        h.extend_from_slice(&bf_len.to_be_bytes());
        h.extend_from_slice(&CLUSTER_BITS.to_be_bytes());
        h.extend_from_slice(&size.to_be_bytes());
        h.extend_from_slice(&0u32.to_be_bytes()); // crypt method
        h.extend_from_slice(&l1_size.to_be_bytes());
        h.extend_from_slice(&l1_offset.to_be_bytes());
        h.extend_from_slice(&0u64.to_be_bytes());
        h.extend_from_slice(&0u32.to_be_bytes());
        h.extend_from_slice(&0u32.to_be_bytes());
        h.extend_from_slice(&0u64.to_be_bytes());
        assert_eq!(h.len(), HEADER_SIZE);
        h
    }

    fn image_source(image: Vec<u8>) -> SourceRef {
        Rc::new(BlobSource::new("qcow2-test", image))
    }

    fn main_image(source: SourceRef) -> SourceRef {
        let handler = Qcow2::open(source).unwrap();
        let main = handler.select("main-image").unwrap().unwrap();
        main.source().unwrap()
    }

    #[test]
    fn empty_tables_read_as_zeros() {
        let mut image = vec![0u8; 64 * 1024];
        let header = header_bytes(16 * 512, 4096, 8, None);
        image[..header.len()].copy_from_slice(&header);
        let disk = main_image(image_source(image));
        assert_eq!(disk.size(), 16 * 512);
        assert_eq!(disk.read_at(0, 512).unwrap(), vec![0u8; 512]);
        assert_eq!(disk.read_at(15 * 512, 1024).unwrap(), vec![0u8; 512]);
    }

    #[test]
    fn allocated_clusters_map_through_both_levels() {
        let mut image = vec![0u8; 64 * 1024];
        // L1 at 0x1000, L2 at 0x2000, data cluster at 0x3000.  COPIED set
        // on both entries to prove it is ignored.
        let header = header_bytes(2 * 4096, 0x1000, 1, None);
        image[..header.len()].copy_from_slice(&header);
        image[0x1000..0x1008].copy_from_slice(&(0x2000u64 | FLAG_COPIED).to_be_bytes());
        image[0x2000..0x2008].copy_from_slice(&(0x3000u64 | FLAG_COPIED).to_be_bytes());
        for (i, b) in image[0x3000..0x4000].iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }

        let disk = main_image(image_source(image));
        let first = disk.read_at(0, 512).unwrap();
        assert_eq!(first[0], 0);
        assert_eq!(first[511], 255);
        // Second 512-block of the same cluster.
        let second = disk.read_at(512, 512).unwrap();
        assert_eq!(second[0], 0);
        // Unallocated second cluster still zero.
        assert_eq!(disk.read_at(4096, 512).unwrap(), vec![0u8; 512]);
    }

    #[test]
    fn compressed_clusters_are_fatal() {
        let mut image = vec![0u8; 64 * 1024];
        let header = header_bytes(4096, 0x1000, 1, None);
        image[..header.len()].copy_from_slice(&header);
        image[0x1000..0x1008].copy_from_slice(&(0x2000u64).to_be_bytes());
        image[0x2000..0x2008].copy_from_slice(&(0x3000u64 | FLAG_COMPRESSED).to_be_bytes());

        let disk = main_image(image_source(image));
        assert!(matches!(
            disk.read_at(0, 512),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn version_three_is_unsupported() {
        let mut image = vec![0u8; 8192];
        let mut header = header_bytes(4096, 4096, 1, None);
        header[4..8].copy_from_slice(&3u32.to_be_bytes());
        image[..header.len()].copy_from_slice(&header);
        let handler = Qcow2::open(image_source(image)).unwrap();
        let main = handler.select("main-image").unwrap().unwrap();
        assert!(matches!(main.source(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn unallocated_blocks_defer_to_the_backing_file() {
        let mut backing = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..8192u32).map(|i| (i % 253) as u8).collect();
        backing.write_all(&payload).unwrap();
        let path = backing.path().to_str().unwrap().as_bytes().to_vec();

        let mut image = vec![0u8; 64 * 1024];
        let header = header_bytes(8192, 0x1000, 8, Some((0x800, path.len() as u32)));
        image[..header.len()].copy_from_slice(&header);
        image[0x800..0x800 + path.len()].copy_from_slice(&path);

        let disk = main_image(image_source(image));
        assert_eq!(disk.read_at(0, 512).unwrap(), &payload[..512]);
        assert_eq!(disk.read_at(700, 100).unwrap(), &payload[700..800]);
    }
}
