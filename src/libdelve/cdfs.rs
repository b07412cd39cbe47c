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
//! ISO-9660, the cdrom filesystem.
use std::rc::Rc;

use bitflags::bitflags;

use super::attrs::Attributes;
use super::cursor::Cursor;
use super::error::{Error, Result};
use super::model::{Child, Handler, Model};
use super::source::SourceRef;

const SYSTEM_AREA_SIZE: u64 = 32768;
const VOLUME_DESCRIPTOR_SIZE: u64 = 2048;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED_FILE = 0x04;
        const EXTENDED_FORMAT = 0x08;
        const EXTENDED_PERMISSIONS = 0x10;
        const NOT_FINAL_RECORD = 0x80;
        const _ = !0;
    }
}

#[derive(Clone, Debug)]
pub struct RecordedDate {
    pub years_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub gmt_offset: i8,
}

impl RecordedDate {
    fn read(cursor: &mut Cursor) -> Result<RecordedDate> {
        Ok(RecordedDate {
            years_since_1900: cursor.read_u8()?,
            month: cursor.read_u8()?,
            day: cursor.read_u8()?,
            hour: cursor.read_u8()?,
            minute: cursor.read_u8()?,
            second: cursor.read_u8()?,
            gmt_offset: cursor.read_i8()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DirectoryRecord {
    pub record_length: u8,
    pub extended_attribute_length: u8,
    pub extent_lba: u32,
    pub data_length: u32,
    pub recorded: RecordedDate,
    pub flags: RecordFlags,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub volume_sequence_number: u16,
    /// Raw identifier bytes; `\x00` and `\x01` stand for `.` and `..`.
    pub identifier: Vec<u8>,
    pub system_use: String,
}

impl DirectoryRecord {
    pub fn read(cursor: &mut Cursor) -> Result<DirectoryRecord> {
        let start = cursor.tell();

        let record_length = cursor.read_u8()?;
        let extended_attribute_length = cursor.read_u8()?;
        let extent_lba = cursor.read_u32_le()?;
        cursor.skip(4)?;
        let data_length = cursor.read_u32_le()?;
        cursor.skip(4)?;
        let recorded = RecordedDate::read(cursor)?;
        let flags = RecordFlags::from_bits_retain(cursor.read_u8()?);
        let file_unit_size = cursor.read_u8()?;
        let interleave_gap = cursor.read_u8()?;
        let volume_sequence_number = cursor.read_u16_le()?;
        cursor.skip(2)?;
        let name_len = cursor.read_u8()?;
        let identifier = cursor.read_exact(usize::from(name_len))?;

        // An even identifier length leaves the record odd-sized so far; a
        // single zero pad byte restores the alignment.
        if name_len & 1 == 0 {
            let pad = cursor.read_u8()?;
            if pad != 0 {
                return Err(Error::CorruptMetadata(format!(
                    "non-zero padding byte {pad:#x} in directory record"
                )));
            }
        }

        let consumed = cursor.tell() - start;
        let system_use_length =
            u64::from(record_length)
                .checked_sub(consumed)
                .ok_or_else(|| {
                    Error::CorruptMetadata(format!(
                        "directory record declares {record_length} bytes but its fields span {consumed}"
                    ))
                })?;
        let system_use = cursor.read_clipped(system_use_length as usize)?;

        Ok(DirectoryRecord {
            record_length,
            extended_attribute_length,
            extent_lba,
            data_length,
            recorded,
            flags,
            file_unit_size,
            interleave_gap,
            volume_sequence_number,
            identifier,
            system_use,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }

    /// Identifier with the special bytes mapped to dot names.
    pub fn display_name(&self) -> String {
        match self.identifier.as_slice() {
            [0x00] => ".".to_owned(),
            [0x01] => "..".to_owned(),
            other => String::from_utf8_lossy(other).into_owned(),
        }
    }

    /// Name used for matching: dot-mapped and shorn of the `;version`.
    fn match_name(&self) -> String {
        let name = self.display_name();
        match name.split_once(';') {
            Some((base, _)) => base.to_owned(),
            None => name,
        }
    }

    fn describe(&self) -> Attributes {
        let mut recorded = Attributes::new();
        recorded.put("years-since-1900", self.recorded.years_since_1900);
        recorded.put("month", self.recorded.month);
        recorded.put("day", self.recorded.day);
        recorded.put("hour", self.recorded.hour);
        recorded.put("minute", self.recorded.minute);
        recorded.put("second", self.recorded.second);
        recorded.put("offset-from-gmt", self.recorded.gmt_offset);

        let mut a = Attributes::new();
        a.put("directory-record-length", self.record_length);
        a.put(
            "extended-attribute-record-length",
            self.extended_attribute_length,
        );
        a.put("lba-of-extent", self.extent_lba);
        a.put("data-length", self.data_length);
        a.put("date-and-time", recorded);
        a.put("directory", self.is_directory());
        a.put("file-unit-size", self.file_unit_size);
        a.put("interleave-gap-size", self.interleave_gap);
        a.put("volume-sequence-number", self.volume_sequence_number);
        a.put("filename-identifier", self.display_name());
        a.put("system-use", self.system_use.clone());
        a
    }
}

/// Everything remembered from the primary volume descriptor.
pub(super) struct CdfsVolume {
    pub system_identifier: String,
    pub volume_identifier: String,
    pub volume_space_size: u32,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    pub root: DirectoryRecord,
}

impl CdfsVolume {
    fn read(source: &SourceRef) -> Result<CdfsVolume> {
        let mut offset = SYSTEM_AREA_SIZE;
        loop {
            let mut cursor = Cursor::new(source.clone());
            cursor.seek(offset);
            let descriptor = cursor.sub(Some(VOLUME_DESCRIPTOR_SIZE));
            let mut cursor = Cursor::new(descriptor);

            match cursor.read_u8()? {
                0xff => {
                    return Err(Error::CorruptMetadata(
                        "volume descriptor chain has no primary descriptor".into(),
                    ))
                }
                0x01 => return Self::read_primary(&mut cursor),
                _ => offset += VOLUME_DESCRIPTOR_SIZE,
            }
        }
    }

    fn read_primary(cursor: &mut Cursor) -> Result<CdfsVolume> {
        cursor.seek(8);
        let system_identifier = cursor.read_clipped(32)?;
        let volume_identifier = cursor.read_clipped(32)?;

        cursor.seek(80);
        let volume_space_size = cursor.read_u32_le()?;

        cursor.seek(128);
        let logical_block_size = cursor.read_u16_le()?;

        cursor.seek(132);
        let path_table_size = cursor.read_u32_le()?;

        cursor.seek(156);
        let root = DirectoryRecord::read(cursor)?;

        if logical_block_size == 0 {
            return Err(Error::CorruptMetadata(
                "primary volume descriptor declares a zero logical block size".into(),
            ));
        }

        Ok(CdfsVolume {
            system_identifier,
            volume_identifier,
            volume_space_size,
            logical_block_size,
            path_table_size,
            root,
        })
    }
}

pub struct Cdfs {
    disk: SourceRef,
    volume: Rc<CdfsVolume>,
}

impl Cdfs {
    pub(super) fn matches(source: &SourceRef) -> Result<bool> {
        let mut cursor = Cursor::new(source.clone());
        cursor.skip(SYSTEM_AREA_SIZE as i64)?;
        cursor.skip(1)?;
        Ok(cursor.read(5)? == b"CD001")
    }

    pub(super) fn open(source: SourceRef) -> Result<Handler> {
        let volume = Rc::new(CdfsVolume::read(&source)?);
        Ok(Cdfs {
            disk: source,
            volume,
        }
        .into())
    }
}

impl Model for Cdfs {
    fn name(&self) -> &'static str {
        "cdfs"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        Ok(vec![
            Child::new("iso", "root directory of the iso filesystem"),
            Child::new("rock-ridge", "root directory of the rock-ridge filesystem"),
            Child::new("juliet", "root directory of the juliet filesystem"),
        ])
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        if child == "iso" {
            return Ok(Some(
                IsoDirectory {
                    disk: self.disk.clone(),
                    volume: self.volume.clone(),
                    record: self.volume.root.clone(),
                }
                .into(),
            ));
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("system-identifier", self.volume.system_identifier.clone());
        a.put("volume-identifier", self.volume.volume_identifier.clone());
        a.put("volume-space-size", self.volume.volume_space_size);
        a.put("logical-block-size", self.volume.logical_block_size);
        a.put("path-table-size", self.volume.path_table_size);
        a.put("root-directory-record", self.volume.root.describe());
        a
    }
}

pub struct IsoDirectory {
    disk: SourceRef,
    volume: Rc<CdfsVolume>,
    record: DirectoryRecord,
}

impl IsoDirectory {
    fn records(&self) -> Result<Vec<DirectoryRecord>> {
        let extent =
            u64::from(self.record.extent_lba) * u64::from(self.volume.logical_block_size);
        let size = u64::from(self.record.data_length);

        let mut cursor = Cursor::new(self.disk.clone());
        cursor.seek(extent);
        let mut cursor = Cursor::new(cursor.sub(Some(size)));

        let mut records = Vec::new();
        while cursor.tell() < size {
            // Records never span a logical block; the gap up to the next
            // block boundary is zero filled.
            if cursor.read_u8()? == 0 {
                continue;
            }
            cursor.skip(-1)?;
            records.push(DirectoryRecord::read(&mut cursor)?);
        }
        Ok(records)
    }
}

impl Model for IsoDirectory {
    fn name(&self) -> &'static str {
        "cdfs-iso-directory"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        Ok(self
            .records()?
            .iter()
            .map(|record| {
                Child::new(
                    record.display_name(),
                    if record.is_directory() { "directory" } else { "file" },
                )
            })
            .collect())
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        let wanted = match child.split_once(';') {
            Some((base, _)) => base,
            None => child,
        };

        for record in self.records()? {
            if record.match_name() != wanted {
                continue;
            }
            if record.is_directory() {
                return Ok(Some(
                    IsoDirectory {
                        disk: self.disk.clone(),
                        volume: self.volume.clone(),
                        record,
                    }
                    .into(),
                ));
            }
            return Ok(Some(
                IsoFile {
                    disk: self.disk.clone(),
                    volume: self.volume.clone(),
                    record,
                }
                .into(),
            ));
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        self.record.describe()
    }
}

pub struct IsoFile {
    disk: SourceRef,
    volume: Rc<CdfsVolume>,
    record: DirectoryRecord,
}

impl Model for IsoFile {
    fn name(&self) -> &'static str {
        "cdfs-iso-file"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        let mut cursor = Cursor::new(self.disk.clone());
        cursor.seek(
            u64::from(self.record.extent_lba) * u64::from(self.volume.logical_block_size),
        );
        Ok(cursor.sub(Some(u64::from(self.record.data_length))))
    }

    fn describe(&self) -> Attributes {
        self.record.describe()
    }
}
