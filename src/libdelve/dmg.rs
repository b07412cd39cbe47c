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
//! Apple UDIF disk images: a koly trailer, a property list of per-partition
//! block tables, and sector runs in assorted encodings.
use std::cell::RefCell;
use std::rc::Rc;

use bincode_next::Decode;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::attrs::{Attributes, Value};
use super::blockdev::BlockDevice;
use super::cache::{self, BlockCache};
use super::cursor::{Cursor, Uuid};
use super::dmg_plist::parse_plist;
use super::dmg_udzo::{UdzoRun, SECTOR_SIZE};
use super::error::{Error, Result};
use super::model::{Child, Handler, Model, UnknownBlob};
use super::source::{BlobSource, BlockSource, Source, SourceRef, WindowSource};
use super::utils::decode_be;

const KOLY_SIZE: usize = 512;

/// Checksum descriptor carried by the trailer and every block table.
#[derive(Clone, Debug, Decode)]
pub struct UdifChecksum {
    pub kind: u32,
    pub size: u32,
    pub data: [u32; 32],
}

impl UdifChecksum {
    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("type", self.kind);
        a.put("size", self.size);
        a.put(
            "data",
            self.data
                .iter()
                .map(|word| Value::Int(u64::from(*word)))
                .collect::<Vec<Value>>(),
        );
        a
    }
}

/// The 512-byte trailer at the very end of the image.
#[derive(Clone, Debug, Decode)]
pub struct KolyTrailer {
    signature: [u8; 4],
    version: u32,
    header_size: u32,
    flags: u32,
    _running_data_fork_offset: u64,
    data_fork_offset: u64,
    data_fork_length: u64,
    resource_fork_offset: u64,
    resource_fork_length: u64,
    segment_number: u32,
    segment_count: u32,
    segment_id: Uuid,
    data_checksum: UdifChecksum,
    xml_offset: u64,
    xml_length: u64,
    _reserved: [u8; 120],
    main_checksum: UdifChecksum,
    image_variant: u32,
    sector_count: u64,
    _reserved2: [u32; 3],
}

/// Per-partition block table header; chunk entries follow it.
#[derive(Clone, Debug, Decode)]
pub struct BlkxTable {
    signature: [u8; 4],
    version: u32,
    sector_number: u64,
    sector_count: u64,
    data_offset: u64,
    buffers_needed: u32,
    _block_descriptors: u32,
    _reserved: [u32; 6],
    checksum: UdifChecksum,
    number_of_chunks: u32,
}

#[derive(Clone, Debug, Decode)]
pub struct BlkxChunk {
    entry_type: u32,
    _comment: [u8; 4],
    sector_number: u64,
    sector_count: u64,
    compressed_offset: u64,
    compressed_length: u64,
}

#[derive(Debug, FromPrimitive, PartialEq)]
#[repr(u32)]
enum ChunkKind {
    ZeroFill = 0x0000_0000,
    Raw = 0x0000_0001,
    ZeroFillVariant = 0x0000_0002,
    Udco = 0x8000_0004,
    Udzo = 0x8000_0005,
    Udbz = 0x8000_0006,
    Terminator = 0xffff_ffff,
}

pub(super) struct DmgPartitionInfo {
    pub id: String,
    pub name: String,
    pub table: BlkxTable,
    pub chunks: Vec<BlkxChunk>,
}

fn parse_block_table(data: &[u8]) -> Result<(BlkxTable, Vec<BlkxChunk>)> {
    let (table, mut at) = decode_be::<BlkxTable>(data)?;
    if &table.signature != b"mish" {
        return Err(Error::CorruptMetadata(
            "block table lacks its mish signature".into(),
        ));
    }

    let mut chunks = Vec::new();
    loop {
        let (chunk, used) = decode_be::<BlkxChunk>(&data[at..])?;
        at += used;
        if chunk.entry_type == ChunkKind::Terminator as u32 {
            break;
        }
        chunks.push(chunk);
    }
    Ok((table, chunks))
}

pub(super) struct DmgImage {
    disk: SourceRef,
    koly: KolyTrailer,
    partitions: Vec<DmgPartitionInfo>,
}

impl DmgImage {
    fn open(disk: SourceRef) -> Result<DmgImage> {
        let mut cursor = Cursor::new(disk.clone());
        cursor.end();
        cursor.skip(-(KOLY_SIZE as i64))?;
        let raw = cursor.read_exact(KOLY_SIZE)?;
        let (koly, _) = decode_be::<KolyTrailer>(&raw)?;
        if &koly.signature != b"koly" {
            return Err(Error::CorruptMetadata(
                "trailer lacks its koly signature".into(),
            ));
        }

        let plist = {
            let xml = WindowSource::new(
                "dmg-property-list",
                disk.clone(),
                koly.xml_offset,
                Some(koly.xml_length),
            );
            let raw = xml.read_at(0, koly.xml_length as usize)?;
            parse_plist(&raw)?
        };

        let mut partitions = Vec::new();
        for entry in plist.get_table("resource-fork")?.get_list("blkx")? {
            let Value::Table(descriptor) = entry else {
                return Err(Error::CorruptMetadata(
                    "blkx entry is not a dict".into(),
                ));
            };

            let name = match descriptor.get("CFName").or_else(|| descriptor.get("Name")) {
                Some(Value::Text(name)) => name.clone(),
                _ => {
                    return Err(Error::CorruptMetadata(
                        "blkx entry has no Name or CFName".into(),
                    ))
                }
            };
            let id = format!("partition:{}", descriptor.get_text("ID")?);
            let (table, chunks) = parse_block_table(descriptor.get_bytes("Data")?)?;

            partitions.push(DmgPartitionInfo {
                id,
                name,
                table,
                chunks,
            });
        }

        // Surface the filesystem-bearing partitions ahead of the
        // bookkeeping ones so a blind descent lands somewhere useful.
        partitions.sort_by_key(|p| !p.name.contains("Apple_HFS"));

        Ok(DmgImage {
            disk,
            koly,
            partitions,
        })
    }

    fn xml_source(&self) -> SourceRef {
        Rc::new(WindowSource::new(
            "dmg-property-list",
            self.disk.clone(),
            self.koly.xml_offset,
            Some(self.koly.xml_length),
        ))
    }
}

pub struct Dmg {
    image: Rc<DmgImage>,
}

impl Dmg {
    pub(super) fn matches(source: &SourceRef) -> Result<bool> {
        let mut cursor = Cursor::new(source.clone());
        cursor.end();
        cursor.skip(-(KOLY_SIZE as i64))?;
        Ok(cursor.read(4)? == b"koly")
    }

    pub(super) fn open(source: SourceRef) -> Result<Handler> {
        Ok(Dmg {
            image: Rc::new(DmgImage::open(source)?),
        }
        .into())
    }
}

impl Model for Dmg {
    fn name(&self) -> &'static str {
        "apple-disk-image"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        let mut children: Vec<Child> = self
            .image
            .partitions
            .iter()
            .map(|p| Child::new(p.id.clone(), p.name.clone()))
            .collect();
        children.push(Child::new(
            "xml-property-list",
            "disk meta data stored in an interestingly abherent format",
        ));
        Ok(children)
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        for (index, partition) in self.image.partitions.iter().enumerate() {
            if partition.id == child {
                return Ok(Some(
                    DmgPartition {
                        image: self.image.clone(),
                        index,
                    }
                    .into(),
                ));
            }
        }
        if child == "xml-property-list" {
            return Ok(Some(UnknownBlob::new(self.image.xml_source()).into()));
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let koly = &self.image.koly;
        let mut a = Attributes::new();
        a.put("version", koly.version);
        a.put("header-size", koly.header_size);
        a.put("flags", koly.flags);
        a.put("data-fork-offset", koly.data_fork_offset);
        a.put("data-fork-length", koly.data_fork_length);
        a.put("resource-fork-offset", koly.resource_fork_offset);
        a.put("resource-fork-length", koly.resource_fork_length);
        a.put("segment-number", koly.segment_number);
        a.put("segment-count", koly.segment_count);
        a.put("segment-id", koly.segment_id.to_string());
        a.put("data-checksum", koly.data_checksum.describe());
        a.put("xml-offset", koly.xml_offset);
        a.put("xml-length", koly.xml_length);
        a.put("checksum", koly.main_checksum.describe());
        a.put("image-variant", koly.image_variant);
        a.put("sector-count", koly.sector_count);
        a
    }
}

pub struct DmgPartition {
    image: Rc<DmgImage>,
    index: usize,
}

impl DmgPartition {
    fn info(&self) -> &DmgPartitionInfo {
        &self.image.partitions[self.index]
    }
}

impl Model for DmgPartition {
    fn name(&self) -> &'static str {
        "apple-disk-image-partition"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        let device = DmgPartitionDevice::new(&self.image.disk, self.info())?;
        Ok(Rc::new(BlockSource::new(
            format!("dmg-partition:{}", self.info().name),
            Rc::new(device),
        )))
    }

    fn describe(&self) -> Attributes {
        let info = self.info();
        let mut a = Attributes::new();
        a.put("id", info.id.clone());
        a.put("name", info.name.clone());
        a.put("version", info.table.version);
        a.put("sector-number", info.table.sector_number);
        a.put("sector-count", info.table.sector_count);
        a.put("data-offset", info.table.data_offset);
        a.put("buffers-needed", info.table.buffers_needed);
        a.put("checksum", info.table.checksum.describe());
        a.put("number-of-block-chunks", info.table.number_of_chunks);
        a.put("run-count", info.chunks.len() as u64);
        a
    }
}

/// A contiguous range of sectors served by one encoding.
enum Run {
    Zero {
        first: u64,
        count: u64,
        sector: SourceRef,
    },
    Raw {
        first: u64,
        count: u64,
        data: SourceRef,
    },
    Udzo(UdzoRun),
}

impl Run {
    fn contains(&self, sector: u64) -> bool {
        let (first, count) = match self {
            Run::Zero { first, count, .. } => (*first, *count),
            Run::Raw { first, count, .. } => (*first, *count),
            Run::Udzo(run) => (run.first, run.count),
        };
        sector >= first && sector < first + count
    }

    fn sector(&self, n: u64) -> Result<SourceRef> {
        match self {
            Run::Zero { sector, .. } => Ok(sector.clone()),
            Run::Raw { first, data, .. } => Ok(Rc::new(WindowSource::new(
                "dmg-raw-sector",
                data.clone(),
                (n - first) * SECTOR_SIZE as u64,
                Some(SECTOR_SIZE as u64),
            ))),
            Run::Udzo(run) => run.sector(n),
        }
    }
}

/// 512-byte block device over a partition's run map.
struct DmgPartitionDevice {
    runs: Vec<Run>,
    sector_count: u64,
    cache: RefCell<BlockCache>,
}

impl DmgPartitionDevice {
    fn new(disk: &SourceRef, info: &DmgPartitionInfo) -> Result<DmgPartitionDevice> {
        // One immutable zeroed sector shared by every zero-fill run.
        let zero_sector: SourceRef =
            Rc::new(BlobSource::new("dmg-zero-sector", vec![0u8; SECTOR_SIZE]));

        let mut runs = Vec::new();
        for chunk in &info.chunks {
            if chunk.sector_count == 0 {
                continue;
            }

            let data: SourceRef = Rc::new(WindowSource::new(
                "dmg-run-data",
                disk.clone(),
                chunk.compressed_offset,
                Some(chunk.compressed_length),
            ));

            let kind = ChunkKind::from_u32(chunk.entry_type).ok_or_else(|| {
                Error::CorruptMetadata(format!(
                    "unknown chunk type {:#010x}",
                    chunk.entry_type
                ))
            })?;
            let run = match kind {
                ChunkKind::ZeroFill | ChunkKind::ZeroFillVariant => Run::Zero {
                    first: chunk.sector_number,
                    count: chunk.sector_count,
                    sector: zero_sector.clone(),
                },
                ChunkKind::Raw => Run::Raw {
                    first: chunk.sector_number,
                    count: chunk.sector_count,
                    data,
                },
                ChunkKind::Udzo => Run::Udzo(UdzoRun {
                    first: chunk.sector_number,
                    count: chunk.sector_count,
                    compressed: data,
                }),
                ChunkKind::Udco => {
                    return Err(Error::Unsupported("UDCO (ADC) compressed chunk".into()))
                }
                ChunkKind::Udbz => {
                    return Err(Error::Unsupported("UDBZ (bzip2) compressed chunk".into()))
                }
                ChunkKind::Terminator => unreachable!("terminators never leave the table parse"),
            };
            runs.push(run);
        }

        Ok(DmgPartitionDevice {
            runs,
            sector_count: info.table.sector_count,
            cache: RefCell::new(BlockCache::new(cache::DISK_IMAGE_BLOCKS)),
        })
    }
}

impl BlockDevice for DmgPartitionDevice {
    fn label(&self) -> &str {
        "dmg-partition-device"
    }

    fn block_size(&self) -> u64 {
        SECTOR_SIZE as u64
    }

    fn size(&self) -> u64 {
        self.sector_count * SECTOR_SIZE as u64
    }

    fn block(&self, n: u64) -> Result<SourceRef> {
        self.cache.borrow_mut().get_or_try_insert(n, || {
            for run in &self.runs {
                if run.contains(n) {
                    return run.sector(n);
                }
            }
            Err(Error::CorruptMetadata(format!(
                "sector {n} is not covered by any run"
            )))
        })
    }
}

#[cfg(test)]
mod t {
    use miniz_oxide::deflate::compress_to_vec_zlib;

    use super::super::source::Source;
    use super::*;

    struct ChunkSpec {
        entry_type: u32,
        sector_number: u64,
        sector_count: u64,
        compressed_offset: u64,
        compressed_length: u64,
    }

    fn blkx_bytes(sector_count: u64, chunks: &[ChunkSpec]) -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(b"mish");
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&0u64.to_be_bytes()); // sector number
        t.extend_from_slice(&sector_count.to_be_bytes());
        t.extend_from_slice(&0u64.to_be_bytes()); // data offset
        t.extend_from_slice(&0x208u32.to_be_bytes()); // buffers needed
        t.extend_from_slice(&0u32.to_be_bytes()); // block descriptors
        for _ in 0..6 {
            t.extend_from_slice(&0u32.to_be_bytes());
        }
        t.extend_from_slice(&0u32.to_be_bytes()); // checksum kind
        t.extend_from_slice(&0u32.to_be_bytes()); // checksum size
        for _ in 0..32 {
            t.extend_from_slice(&0u32.to_be_bytes());
        }
        t.extend_from_slice(&(chunks.len() as u32 + 1).to_be_bytes());
        for c in chunks {
            t.extend_from_slice(&c.entry_type.to_be_bytes());
            t.extend_from_slice(b"none");
            t.extend_from_slice(&c.sector_number.to_be_bytes());
            t.extend_from_slice(&c.sector_count.to_be_bytes());
            t.extend_from_slice(&c.compressed_offset.to_be_bytes());
            t.extend_from_slice(&c.compressed_length.to_be_bytes());
        }
        // Terminator.
        t.extend_from_slice(&0xffff_ffffu32.to_be_bytes());
        t.extend_from_slice(b"none");
        t.extend_from_slice(&[0u8; 32]);
        t
    }

    fn koly_bytes(xml_offset: u64, xml_length: u64, sector_count: u64) -> Vec<u8> {
        let mut k = Vec::new();
        k.extend_from_slice(b"koly");
        k.extend_from_slice(&4u32.to_be_bytes());
        k.extend_from_slice(&512u32.to_be_bytes());
        k.extend_from_slice(&1u32.to_be_bytes()); // flags
        k.extend_from_slice(&0u64.to_be_bytes()); // running data fork offset
        k.extend_from_slice(&0u64.to_be_bytes()); // data fork offset
        k.extend_from_slice(&0u64.to_be_bytes()); // data fork length
        k.extend_from_slice(&0u64.to_be_bytes()); // resource fork offset
        k.extend_from_slice(&0u64.to_be_bytes()); // resource fork length
        k.extend_from_slice(&1u32.to_be_bytes()); // segment number
        k.extend_from_slice(&1u32.to_be_bytes()); // segment count
        k.extend_from_slice(&[0u8; 16]); // segment id
        k.extend_from_slice(&[0u8; 136]); // data checksum
        k.extend_from_slice(&xml_offset.to_be_bytes());
        k.extend_from_slice(&xml_length.to_be_bytes());
        k.extend_from_slice(&[0u8; 120]);
        k.extend_from_slice(&[0u8; 136]); // main checksum
        k.extend_from_slice(&1u32.to_be_bytes()); // image variant
        k.extend_from_slice(&sector_count.to_be_bytes());
        k.extend_from_slice(&[0u8; 12]);
        assert_eq!(k.len(), KOLY_SIZE);
        k
    }

    fn plist_bytes(partitions: &[(&str, &str, &[u8])]) -> Vec<u8> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let mut doc = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\">\n<dict>\n<key>resource-fork</key>\n<dict>\n<key>blkx</key>\n<array>\n",
        );
        for (id, name, data) in partitions {
            doc.push_str("<dict>\n<key>ID</key><string>");
            doc.push_str(id);
            doc.push_str("</string>\n<key>Name</key><string>");
            doc.push_str(name);
            doc.push_str("</string>\n<key>Data</key><data>");
            doc.push_str(&STANDARD.encode(data));
            doc.push_str("</data>\n</dict>\n");
        }
        doc.push_str("</array>\n</dict>\n</dict>\n</plist>\n");
        doc.into_bytes()
    }

    /// Assemble data area + plist + koly into one image.
    fn assemble(data_area: Vec<u8>, partitions: &[(&str, &str, &[u8])], sector_count: u64) -> Vec<u8> {
        let mut image = data_area;
        let xml_offset = image.len() as u64;
        let xml = plist_bytes(partitions);
        let xml_length = xml.len() as u64;
        image.extend_from_slice(&xml);
        image.extend_from_slice(&koly_bytes(xml_offset, xml_length, sector_count));
        image
    }

    fn open(image: Vec<u8>) -> Handler {
        let source: SourceRef = Rc::new(BlobSource::new("dmg-test", image));
        assert!(Dmg::matches(&source).unwrap());
        Dmg::open(source).unwrap()
    }

    #[test]
    fn zero_fill_partition_reads_as_nulls() {
        let blkx = blkx_bytes(
            8,
            &[ChunkSpec {
                entry_type: 0x0000_0000,
                sector_number: 0,
                sector_count: 8,
                compressed_offset: 0,
                compressed_length: 0,
            }],
        );
        let image = assemble(Vec::new(), &[("0", "empty (Apple_Free : 0)", &blkx)], 8);
        let dmg = open(image);

        let partition = dmg.select("partition:0").unwrap().unwrap();
        let source = partition.source().unwrap();
        assert_eq!(source.size(), 8 * 512);
        assert_eq!(source.read_at(0, 4096).unwrap(), vec![0u8; 4096]);
        assert_eq!(source.read_at(4096, 1).unwrap(), b"");
    }

    #[test]
    fn raw_runs_window_straight_into_the_disk() {
        let mut data = vec![0u8; 4 * 512];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let blkx = blkx_bytes(
            4,
            &[ChunkSpec {
                entry_type: 0x0000_0001,
                sector_number: 0,
                sector_count: 4,
                compressed_offset: 0,
                compressed_length: 4 * 512,
            }],
        );
        let expected = data.clone();
        let image = assemble(data, &[("0", "raw (Apple_HFS : 0)", &blkx)], 4);
        let dmg = open(image);
        let source = dmg
            .select("partition:0")
            .unwrap()
            .unwrap()
            .source()
            .unwrap();
        assert_eq!(source.read_at(0, 4 * 512).unwrap(), expected);
        assert_eq!(source.read_at(513, 510).unwrap(), &expected[513..1023]);
    }

    #[test]
    fn udzo_sectors_roundtrip_in_any_order() {
        let mut plain = Vec::new();
        for sector in 0..16u8 {
            plain.extend(std::iter::repeat(sector.wrapping_mul(13) ^ 0xa5).take(512));
        }
        let packed = compress_to_vec_zlib(&plain, 6);
        let blkx = blkx_bytes(
            16,
            &[ChunkSpec {
                entry_type: 0x8000_0005,
                sector_number: 0,
                sector_count: 16,
                compressed_offset: 0,
                compressed_length: packed.len() as u64,
            }],
        );
        let image = assemble(packed, &[("2", "zlibbed (Apple_HFS : 2)", &blkx)], 16);
        let dmg = open(image);
        let source = dmg
            .select("partition:2")
            .unwrap()
            .unwrap()
            .source()
            .unwrap();

        // Random access straight to the back, then the front.
        assert_eq!(source.read_at(15 * 512, 512).unwrap(), &plain[15 * 512..]);
        assert_eq!(source.read_at(0, 512).unwrap(), &plain[..512]);
        assert_eq!(source.read_at(0, 16 * 512).unwrap(), plain);
        // Straddling read across a sector boundary.
        assert_eq!(source.read_at(1000, 100).unwrap(), &plain[1000..1100]);
    }

    #[test]
    fn mixed_runs_compose_one_partition() {
        let mut plain = Vec::new();
        for sector in 0..4u8 {
            plain.extend(std::iter::repeat(sector + 1).take(512));
        }
        let packed = compress_to_vec_zlib(&plain, 6);
        let mut data = vec![0xeeu8; 2 * 512]; // raw sectors first in the fork
        let raw_copy = data.clone();
        let zlib_offset = data.len() as u64;
        data.extend_from_slice(&packed);

        let blkx = blkx_bytes(
            8,
            &[
                ChunkSpec {
                    entry_type: 0x0000_0001,
                    sector_number: 0,
                    sector_count: 2,
                    compressed_offset: 0,
                    compressed_length: 2 * 512,
                },
                ChunkSpec {
                    entry_type: 0x0000_0002,
                    sector_number: 2,
                    sector_count: 2,
                    compressed_offset: 0,
                    compressed_length: 0,
                },
                ChunkSpec {
                    entry_type: 0x8000_0005,
                    sector_number: 4,
                    sector_count: 4,
                    compressed_offset: zlib_offset,
                    compressed_length: packed.len() as u64,
                },
                // Empty chunks never become runs.
                ChunkSpec {
                    entry_type: 0x0000_0000,
                    sector_number: 8,
                    sector_count: 0,
                    compressed_offset: 0,
                    compressed_length: 0,
                },
            ],
        );
        let image = assemble(data, &[("1", "mixed (Apple_HFS : 1)", &blkx)], 8);
        let dmg = open(image);
        let source = dmg
            .select("partition:1")
            .unwrap()
            .unwrap()
            .source()
            .unwrap();

        assert_eq!(source.read_at(0, 1024).unwrap(), raw_copy);
        assert_eq!(source.read_at(1024, 1024).unwrap(), vec![0u8; 1024]);
        assert_eq!(source.read_at(2048, 2048).unwrap(), plain);
    }

    #[test]
    fn hfs_partitions_list_first() {
        let empty = blkx_bytes(
            1,
            &[ChunkSpec {
                entry_type: 0,
                sector_number: 0,
                sector_count: 1,
                compressed_offset: 0,
                compressed_length: 0,
            }],
        );
        let image = assemble(
            Vec::new(),
            &[
                ("0", "Driver Descriptor Map", &empty),
                ("1", "disk image (Apple_HFS : 1)", &empty),
            ],
            1,
        );
        let dmg = open(image);
        let listing = dmg.list().unwrap();
        assert_eq!(listing[0].name, "partition:1");
        assert_eq!(listing[1].name, "partition:0");
        assert_eq!(listing.last().unwrap().name, "xml-property-list");
    }

    #[test]
    fn udco_and_unknown_chunks_fail_loudly() {
        let udco = blkx_bytes(
            1,
            &[ChunkSpec {
                entry_type: 0x8000_0004,
                sector_number: 0,
                sector_count: 1,
                compressed_offset: 0,
                compressed_length: 512,
            }],
        );
        let image = assemble(Vec::new(), &[("0", "adc (Apple_HFS : 0)", &udco)], 1);
        let partition = open(image).select("partition:0").unwrap().unwrap();
        assert!(matches!(partition.source(), Err(Error::Unsupported(_))));

        let junk = blkx_bytes(
            1,
            &[ChunkSpec {
                entry_type: 0x7000_0099,
                sector_number: 0,
                sector_count: 1,
                compressed_offset: 0,
                compressed_length: 512,
            }],
        );
        let image = assemble(Vec::new(), &[("0", "junk (Apple_HFS : 0)", &junk)], 1);
        let partition = open(image).select("partition:0").unwrap().unwrap();
        assert!(matches!(
            partition.source(),
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn the_property_list_itself_is_selectable() {
        let blkx = blkx_bytes(
            1,
            &[ChunkSpec {
                entry_type: 0,
                sector_number: 0,
                sector_count: 1,
                compressed_offset: 0,
                compressed_length: 0,
            }],
        );
        let image = assemble(Vec::new(), &[("0", "p (Apple_HFS : 0)", &blkx)], 1);
        let dmg = open(image);
        let xml = dmg.select("xml-property-list").unwrap().unwrap();
        let source = xml.source().unwrap();
        let head = source.read_at(0, 5).unwrap();
        assert_eq!(head, b"<?xml");
    }
}
