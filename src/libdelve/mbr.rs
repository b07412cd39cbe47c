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
//! Classic DOS master boot record.
use std::rc::Rc;

use super::attrs::Attributes;
use super::cursor::Cursor;
use super::error::{Error, Result};
use super::model::{Child, Handler, Model};
use super::source::{SourceRef, WindowSource};

const DISK_ID_OFFSET: u64 = 0x01b4;
const MAGIC_OFFSET: u64 = 510;
const SECTOR_SIZE: u64 = 512;

#[derive(Clone, Debug)]
pub struct MbrPartitionEntry {
    pub bootable: u8,
    pub first_chs: [u8; 3],
    pub system_id: u8,
    pub last_chs: [u8; 3],
    pub relative_sector: u32,
    pub total_sectors: u32,
}

impl MbrPartitionEntry {
    fn read(cursor: &mut Cursor) -> Result<MbrPartitionEntry> {
        let bootable = cursor.read_u8()?;
        let mut first_chs = [0u8; 3];
        first_chs.copy_from_slice(&cursor.read_exact(3)?);
        let system_id = cursor.read_u8()?;
        let mut last_chs = [0u8; 3];
        last_chs.copy_from_slice(&cursor.read_exact(3)?);
        let relative_sector = cursor.read_u32_le()?;
        let total_sectors = cursor.read_u32_le()?;
        Ok(MbrPartitionEntry {
            bootable,
            first_chs,
            system_id,
            last_chs,
            relative_sector,
            total_sectors,
        })
    }

    fn hint(&self) -> String {
        format!(
            ":system-id={:#x},bootable={:#x},sectors={}",
            self.system_id, self.bootable, self.total_sectors,
        )
    }
}

pub struct Mbr {
    disk: SourceRef,
    disk_id: Vec<u8>,
    entries: Vec<MbrPartitionEntry>,
}

impl Mbr {
    pub(super) fn matches(source: &SourceRef) -> Result<bool> {
        let mut cursor = Cursor::new(source.clone());
        cursor.seek(MAGIC_OFFSET);
        Ok(cursor.read(2)? == b"\x55\xaa")
    }

    pub(super) fn open(source: SourceRef) -> Result<Handler> {
        let mut cursor = Cursor::new(source.clone());
        cursor.seek(DISK_ID_OFFSET);
        let disk_id = cursor.read_exact(10)?;
        let entries = (0..4)
            .map(|_| MbrPartitionEntry::read(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        let magic = cursor.read_exact(2)?;
        if magic != b"\x55\xaa" {
            return Err(Error::CorruptMetadata(
                "partition table lacks its 55aa signature".into(),
            ));
        }
        Ok(Mbr {
            disk: source,
            disk_id,
            entries,
        }
        .into())
    }

    /// 1-based (number, entry) pairs for the allocated slots.
    fn allocated(&self) -> impl Iterator<Item = (usize, &MbrPartitionEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.total_sectors != 0)
            .map(|(at, e)| (at + 1, e))
    }
}

impl Model for Mbr {
    fn name(&self) -> &'static str {
        "master-boot-record"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        Ok(self
            .allocated()
            .map(|(no, entry)| Child::new(format!("partition-{no}"), entry.hint()))
            .collect())
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        for (no, entry) in self.allocated() {
            if child == format!("partition-{no}") {
                return Ok(Some(
                    MbrPartition {
                        disk: self.disk.clone(),
                        number: no,
                        entry: entry.clone(),
                    }
                    .into(),
                ));
            }
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("unique-disk-id", self.disk_id.clone());
        let mut table = Attributes::new();
        for (no, entry) in self.allocated() {
            let mut p = Attributes::new();
            p.put("bootable-flag", entry.bootable);
            p.put("system-id", entry.system_id);
            p.put("relative-sector", entry.relative_sector);
            p.put("total-sectors", entry.total_sectors);
            table.put(no.to_string(), p);
        }
        a.put("partition-entries", table);
        a
    }
}

pub struct MbrPartition {
    disk: SourceRef,
    number: usize,
    entry: MbrPartitionEntry,
}

impl Model for MbrPartition {
    fn name(&self) -> &'static str {
        "master-boot-record-partition"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        Ok(Rc::new(WindowSource::new(
            format!("mbr-partition-{}", self.number),
            self.disk.clone(),
            u64::from(self.entry.relative_sector) * SECTOR_SIZE,
            Some(u64::from(self.entry.total_sectors) * SECTOR_SIZE),
        )))
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("partition-number", self.number as u64);
        a.put("system-id", self.entry.system_id);
        a.put("bootable-flag", self.entry.bootable);
        a.put("starting-head-sector-cylinder", self.entry.first_chs.to_vec());
        a.put("ending-head-sector-cylinder", self.entry.last_chs.to_vec());
        a.put("relative-sector", self.entry.relative_sector);
        a.put("total-sectors", self.entry.total_sectors);
        a
    }
}
