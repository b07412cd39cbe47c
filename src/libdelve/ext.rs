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
//! The ext2/3/4 family.  The three generations are backwards compatible,
//! so one decoder covers them all, gated by the superblock feature flags.
use std::rc::Rc;

use bitflags::bitflags;
use tracing::warn;

use super::attrs::Attributes;
use super::cursor::{Cursor, Uuid};
use super::error::{Error, Result};
use super::ext_dir::ExtDirectory;
use super::ext_inode::InodeDescriptor;
use super::model::{Child, Handler, Model};
use super::source::SourceRef;

pub(super) const ROOT_DIRECTORY_INODE: u32 = 2;

const SUPERBLOCK_OFFSET: u64 = 1024;
const EXT_MAGIC: u16 = 0xef53;
const GOOD_OLD_REV: u32 = 0;
const GOOD_OLD_INODE_SIZE: u64 = 128;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureCompat: u32 {
        const DIR_PREALLOC = 0x001;
        const IMAGIC_INODES = 0x002;
        const HAS_JOURNAL = 0x004;
        const EXT_ATTR = 0x008;
        const RESIZE_INODE = 0x010;
        const DIR_INDEX = 0x020;
        const LAZY_BG = 0x040;
        const EXCLUDE_INODE = 0x080;
        const EXCLUDE_BITMAP = 0x100;
        const SPARSE_SUPER2 = 0x200;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureIncompat: u32 {
        const COMPRESSION = 0x00001;
        const FILETYPE = 0x00002;
        const RECOVER = 0x00004;
        const JOURNAL_DEV = 0x00008;
        const META_BG = 0x00010;
        const EXTENTS = 0x00040;
        const SIXTY_FOUR_BIT = 0x00080;
        const MMP = 0x00100;
        const FLEX_BG = 0x00200;
        const EA_INODE = 0x00400;
        const DIR_DATA = 0x01000;
        const BG_USE_META_CSUM = 0x02000;
        const LARGEDIR = 0x04000;
        const INLINE_DATA = 0x08000;
        const ENCRYPT = 0x10000;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureRoCompat: u32 {
        const SPARSE_SUPER = 0x0001;
        const LARGE_FILE = 0x0002;
        const BTREE_DIR = 0x0004;
        const HUGE_FILE = 0x0008;
        const GDT_CSUM = 0x0010;
        const DIR_NLINK = 0x0020;
        const EXTRA_ISIZE = 0x0040;
        const HAS_SNAPSHOT = 0x0080;
        const QUOTA = 0x0100;
        const BIGALLOC = 0x0200;
        const METADATA_CSUM = 0x0400;
        const REPLICA = 0x0800;
        const READONLY = 0x1000;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DefaultMountOpts: u32 {
        const DEBUG = 0x0001;
        const BSDGROUPS = 0x0002;
        const XATTR_USER = 0x0004;
        const ACL = 0x0008;
        const UID16 = 0x0010;
        const JMODE_DATA = 0x0020;
        const JMODE_ORDERED = 0x0040;
        const NOBARRIER = 0x0100;
        const BLOCK_VALIDITY = 0x0200;
        const DISCARD = 0x0400;
        const NODELALLOC = 0x0800;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SuperblockFlags: u32 {
        const SIGNED_DIRECTORY_HASH = 0x01;
        const UNSIGNED_DIRECTORY_HASH = 0x02;
        const TEST_FILESYS = 0x04;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupDescFlags: u16 {
        const INODE_UNINIT = 0x1;
        const BLOCK_UNINIT = 0x2;
        const INODE_ZEROED = 0x4;
    }
}

/// Report bits that no named flag accounts for; they are carried, not
/// dropped, so diagnostics can show them.
fn residual_bits(raw: u32, known: u32, what: &str) -> u32 {
    let unknown = raw & !known;
    if unknown != 0 {
        warn!(unknown = format!("{unknown:#x}"), "{} carries unknown bits", what);
    }
    unknown
}

/// The dynamic-revision tail of the superblock, absent on GOOD_OLD_REV
/// filesystems.
#[derive(Debug)]
pub struct DynamicSuperblock {
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: FeatureCompat,
    pub feature_incompat: FeatureIncompat,
    pub feature_ro_compat: FeatureRoCompat,
    pub uuid: Uuid,
    pub volume_name: String,
    pub last_mounted: String,
    pub desc_size: u16,
    pub default_mount_opts: DefaultMountOpts,
    pub flags: SuperblockFlags,
    pub kbytes_written: u64,
}

#[derive(Debug)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count_lo: u32,
    pub r_blocks_count_lo: u32,
    pub free_blocks_count_lo: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_cluster_size: u32,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub dynamic: Option<DynamicSuperblock>,
}

impl Superblock {
    pub(super) fn read(cursor: &mut Cursor) -> Result<Superblock> {
        cursor.seek(SUPERBLOCK_OFFSET);

        let inodes_count = cursor.read_u32_le()?;
        let blocks_count_lo = cursor.read_u32_le()?;
        let r_blocks_count_lo = cursor.read_u32_le()?;
        let free_blocks_count_lo = cursor.read_u32_le()?;
        let free_inodes_count = cursor.read_u32_le()?;
        let first_data_block = cursor.read_u32_le()?;
        let log_block_size = cursor.read_u32_le()?;
        let log_cluster_size = cursor.read_u32_le()?;
        let blocks_per_group = cursor.read_u32_le()?;
        let clusters_per_group = cursor.read_u32_le()?;
        let inodes_per_group = cursor.read_u32_le()?;
        let mtime = cursor.read_u32_le()?;
        let wtime = cursor.read_u32_le()?;
        let mnt_count = cursor.read_u16_le()?;
        let max_mnt_count = cursor.read_u16_le()?;
        let magic = cursor.read_u16_le()?;
        let state = cursor.read_u16_le()?;
        let errors = cursor.read_u16_le()?;
        let minor_rev_level = cursor.read_u16_le()?;
        let lastcheck = cursor.read_u32_le()?;
        let checkinterval = cursor.read_u32_le()?;
        let creator_os = cursor.read_u32_le()?;
        let rev_level = cursor.read_u32_le()?;
        let def_resuid = cursor.read_u16_le()?;
        let def_resgid = cursor.read_u16_le()?;

        if magic != EXT_MAGIC {
            return Err(Error::CorruptMetadata(format!(
                "superblock magic is {magic:#06x}, wanted {EXT_MAGIC:#06x}"
            )));
        }
        if log_block_size > 16 {
            return Err(Error::CorruptMetadata(format!(
                "implausible log-block-size {log_block_size}"
            )));
        }
        if inodes_per_group == 0 {
            return Err(Error::CorruptMetadata(
                "superblock declares zero inodes per group".into(),
            ));
        }

        let dynamic = if rev_level == GOOD_OLD_REV {
            None
        } else {
            Some(Self::read_dynamic(cursor)?)
        };

        Ok(Superblock {
            inodes_count,
            blocks_count_lo,
            r_blocks_count_lo,
            free_blocks_count_lo,
            free_inodes_count,
            first_data_block,
            log_block_size,
            log_cluster_size,
            blocks_per_group,
            clusters_per_group,
            inodes_per_group,
            mtime,
            wtime,
            mnt_count,
            max_mnt_count,
            state,
            errors,
            minor_rev_level,
            lastcheck,
            checkinterval,
            creator_os,
            rev_level,
            def_resuid,
            def_resgid,
            dynamic,
        })
    }

    fn read_dynamic(cursor: &mut Cursor) -> Result<DynamicSuperblock> {
        let first_ino = cursor.read_u32_le()?;
        let inode_size = cursor.read_u16_le()?;
        let block_group_nr = cursor.read_u16_le()?;

        let compat_raw = cursor.read_u32_le()?;
        let feature_compat = FeatureCompat::from_bits_retain(compat_raw);
        residual_bits(compat_raw, FeatureCompat::all().bits(), "feature-compat");

        let incompat_raw = cursor.read_u32_le()?;
        let feature_incompat = FeatureIncompat::from_bits_retain(incompat_raw);
        residual_bits(incompat_raw, FeatureIncompat::all().bits(), "feature-incompat");

        let ro_raw = cursor.read_u32_le()?;
        let feature_ro_compat = FeatureRoCompat::from_bits_retain(ro_raw);
        residual_bits(ro_raw, FeatureRoCompat::all().bits(), "feature-ro-compat");

        let uuid = cursor.read_uuid()?;
        let volume_name = cursor.read_clipped(16)?;
        let last_mounted = cursor.read_clipped(64)?;

        let _algorithm_usage_bitmap = cursor.read_u32_le()?;
        let _prealloc_blocks = cursor.read_u8()?;
        let _prealloc_dir_blocks = cursor.read_u8()?;
        let _reserved_gdt_blocks = cursor.read_u16_le()?;
        let _journal_uuid = cursor.read_uuid()?;
        let _journal_inum = cursor.read_u32_le()?;
        let _journal_dev = cursor.read_u32_le()?;
        let _last_orphan = cursor.read_u32_le()?;
        for _ in 0..4 {
            let _hash_seed = cursor.read_u32_le()?;
        }
        let _def_hash_version = cursor.read_u8()?;
        let _jnl_backup_type = cursor.read_u8()?;
        let desc_size = cursor.read_u16_le()?;

        let mount_raw = cursor.read_u32_le()?;
        let default_mount_opts = DefaultMountOpts::from_bits_retain(mount_raw);
        residual_bits(mount_raw, DefaultMountOpts::all().bits(), "default-mount-opts");

        let _first_meta_bg = cursor.read_u32_le()?;
        let _mkfs_time = cursor.read_u32_le()?;
        for _ in 0..17 {
            let _jnl_block = cursor.read_u32_le()?;
        }
        let _blocks_count_hi = cursor.read_u32_le()?;
        let _r_blocks_count_hi = cursor.read_u32_le()?;
        let _free_blocks_count_hi = cursor.read_u32_le()?;
        let _min_extra_isize = cursor.read_u16_le()?;
        let _want_extra_isize = cursor.read_u16_le()?;

        let flags_raw = cursor.read_u32_le()?;
        let flags = SuperblockFlags::from_bits_retain(flags_raw);
        residual_bits(flags_raw, SuperblockFlags::all().bits(), "superblock flags");

        let _raid_stride = cursor.read_u16_le()?;
        let _mmp_interval = cursor.read_u16_le()?;
        let _mmp_block = cursor.read_u64_le()?;
        let _raid_stripe_width = cursor.read_u32_le()?;
        let _log_groups_per_flex = cursor.read_u8()?;
        let _checksum_type = cursor.read_u8()?;
        let _reserved_pad = cursor.read_exact(2)?;
        let kbytes_written = cursor.read_u64_le()?;

        let _snapshot_inum = cursor.read_u32_le()?;
        let _snapshot_id = cursor.read_u32_le()?;
        let _snapshot_r_block_count = cursor.read_u64_le()?;
        let _snapshot_list = cursor.read_u32_le()?;
        let _errors_count = cursor.read_u32_le()?;
        let _first_error_time = cursor.read_u32_le()?;
        let _first_error_ino = cursor.read_u32_le()?;
        let _first_error_block = cursor.read_u64_le()?;
        let _first_error_func = cursor.read_clipped(32)?;
        let _first_error_line = cursor.read_u32_le()?;
        let _last_error_time = cursor.read_u32_le()?;
        let _last_error_ino = cursor.read_u32_le()?;
        let _last_error_line = cursor.read_u32_le()?;
        let _last_error_block = cursor.read_u64_le()?;
        let _last_error_func = cursor.read_clipped(32)?;
        let _mount_opts = cursor.read_clipped(64)?;
        let _usr_quota_inum = cursor.read_u32_le()?;
        let _grp_quota_inum = cursor.read_u32_le()?;
        let _overhead_blocks = cursor.read_u32_le()?;
        for _ in 0..2 {
            let _backup_bg = cursor.read_u32_le()?;
        }
        for _ in 0..4 {
            let _encrypt_algo = cursor.read_u32_le()?;
        }
        cursor.skip(105)?;
        let _checksum = cursor.read_u32_le()?;

        Ok(DynamicSuperblock {
            first_ino,
            inode_size,
            block_group_nr,
            feature_compat,
            feature_incompat,
            feature_ro_compat,
            uuid,
            volume_name,
            last_mounted,
            desc_size,
            default_mount_opts,
            flags,
            kbytes_written,
        })
    }

    pub fn block_size(&self) -> u64 {
        1 << (10 + self.log_block_size)
    }

    pub fn inode_size(&self) -> u64 {
        match &self.dynamic {
            None => GOOD_OLD_INODE_SIZE,
            Some(d) => u64::from(d.inode_size),
        }
    }

    pub fn feature_incompat(&self) -> FeatureIncompat {
        self.dynamic
            .as_ref()
            .map(|d| d.feature_incompat)
            .unwrap_or_else(FeatureIncompat::empty)
    }

    pub fn has_64bit(&self) -> bool {
        self.feature_incompat()
            .contains(FeatureIncompat::SIXTY_FOUR_BIT)
    }

    /// Group descriptor size; 32 bytes unless the 64-bit feature widens it.
    pub fn desc_size(&self) -> u64 {
        if !self.has_64bit() {
            return 32;
        }
        let declared = self
            .dynamic
            .as_ref()
            .map(|d| u64::from(d.desc_size))
            .unwrap_or(0);
        if declared >= 32 {
            declared
        } else {
            warn!(declared, "bad descriptor size in 64-bit superblock, using 32");
            32
        }
    }

    /// The descriptor table sits in the block after the superblock.
    pub fn group_descriptor_table_offset(&self) -> u64 {
        let bs = self.block_size();
        if bs == 1024 {
            bs * 2
        } else {
            bs
        }
    }
}

/// Per-group record locating that group's bitmaps and inode table.
#[derive(Debug)]
pub struct GroupDescriptor {
    pub block_bitmap_lo: u32,
    pub inode_bitmap_lo: u32,
    pub inode_table_lo: u32,
    pub free_blocks_count_lo: u16,
    pub free_inodes_count_lo: u16,
    pub used_dirs_count_lo: u16,
    pub flags: GroupDescFlags,
    pub exclude_bitmap_lo: u32,
    pub block_bitmap_csum_lo: u16,
    pub inode_bitmap_csum_lo: u16,
    pub itable_unused_lo: u16,
    pub checksum: u16,
    pub block_bitmap_hi: u32,
    pub inode_bitmap_hi: u32,
    pub inode_table_hi: u32,
}

impl GroupDescriptor {
    fn read(cursor: &mut Cursor, sb: &Superblock) -> Result<GroupDescriptor> {
        let start = cursor.tell();
        let desc_size = sb.desc_size();

        let block_bitmap_lo = cursor.read_u32_le()?;
        let inode_bitmap_lo = cursor.read_u32_le()?;
        let inode_table_lo = cursor.read_u32_le()?;
        let free_blocks_count_lo = cursor.read_u16_le()?;
        let free_inodes_count_lo = cursor.read_u16_le()?;
        let used_dirs_count_lo = cursor.read_u16_le()?;
        let flags = GroupDescFlags::from_bits_retain(cursor.read_u16_le()?);
        let exclude_bitmap_lo = cursor.read_u32_le()?;
        let block_bitmap_csum_lo = cursor.read_u16_le()?;
        let inode_bitmap_csum_lo = cursor.read_u16_le()?;
        let itable_unused_lo = cursor.read_u16_le()?;
        let checksum = cursor.read_u16_le()?;

        let mut block_bitmap_hi = 0;
        let mut inode_bitmap_hi = 0;
        let mut inode_table_hi = 0;
        if sb.has_64bit() && desc_size > 32 {
            block_bitmap_hi = cursor.read_u32_le()?;
            inode_bitmap_hi = cursor.read_u32_le()?;
            inode_table_hi = cursor.read_u32_le()?;
            let _free_blocks_count_hi = cursor.read_u16_le()?;
            let _free_inodes_count_hi = cursor.read_u16_le()?;
            let _used_dirs_count_hi = cursor.read_u16_le()?;
            let _itable_unused_hi = cursor.read_u16_le()?;
            let _exclude_bitmap_hi = cursor.read_u32_le()?;
            let _block_bitmap_csum_hi = cursor.read_u16_le()?;
            let _inode_bitmap_csum_hi = cursor.read_u16_le()?;
            cursor.seek(start + desc_size);
        }

        Ok(GroupDescriptor {
            block_bitmap_lo,
            inode_bitmap_lo,
            inode_table_lo,
            free_blocks_count_lo,
            free_inodes_count_lo,
            used_dirs_count_lo,
            flags,
            exclude_bitmap_lo,
            block_bitmap_csum_lo,
            inode_bitmap_csum_lo,
            itable_unused_lo,
            checksum,
            block_bitmap_hi,
            inode_bitmap_hi,
            inode_table_hi,
        })
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("block-bitmap-lo", self.block_bitmap_lo);
        a.put("inode-bitmap-lo", self.inode_bitmap_lo);
        a.put("inode-table-lo", self.inode_table_lo);
        a.put("free-blocks-count-lo", self.free_blocks_count_lo);
        a.put("free-inodes-count-lo", self.free_inodes_count_lo);
        a.put("used-dirs-count-lo", self.used_dirs_count_lo);
        a.put("flags", format!("{:?}", self.flags));
        a.put("exclude-bitmap-lo", self.exclude_bitmap_lo);
        a.put("block-bitmap-csum-lo", self.block_bitmap_csum_lo);
        a.put("inode-bitmap-csum-lo", self.inode_bitmap_csum_lo);
        a.put("itable-unused-lo", self.itable_unused_lo);
        a.put("checksum", self.checksum);
        a
    }
}

/// Shared decoding state for one mounted-for-reading filesystem.
pub(super) struct ExtFs {
    pub disk: SourceRef,
    pub sb: Superblock,
}

impl ExtFs {
    pub fn block_size(&self) -> u64 {
        self.sb.block_size()
    }

    pub fn group_descriptor(&self, group_no: u64) -> Result<GroupDescriptor> {
        let mut cursor = Cursor::new(self.disk.clone());
        cursor.seek(self.sb.group_descriptor_table_offset() + self.sb.desc_size() * group_no);
        GroupDescriptor::read(&mut cursor, &self.sb)
    }

    pub fn inode(&self, inode_no: u32) -> Result<InodeDescriptor> {
        if inode_no == 0 {
            return Err(Error::InvalidArgument(
                "inode numbers start at one".into(),
            ));
        }

        let index = u64::from(inode_no - 1);
        let group_no = index / u64::from(self.sb.inodes_per_group);
        let table_index = index % u64::from(self.sb.inodes_per_group);

        let group = self.group_descriptor(group_no)?;
        if self.sb.has_64bit() {
            return Err(Error::Unsupported("64-bit inode table lookup".into()));
        }

        let offset = u64::from(group.inode_table_lo) * self.sb.block_size()
            + table_index * self.sb.inode_size();
        let mut cursor = Cursor::new(self.disk.clone());
        cursor.seek(offset);
        InodeDescriptor::read(&mut cursor, &self.sb)
    }
}

pub struct Ext {
    fs: Rc<ExtFs>,
}

impl Ext {
    pub(super) fn matches(source: &SourceRef) -> Result<bool> {
        let mut cursor = Cursor::new(source.clone());
        cursor.seek(SUPERBLOCK_OFFSET + 56);
        Ok(cursor.read(2)? == b"\x53\xef")
    }

    pub(super) fn open(source: SourceRef) -> Result<Handler> {
        let mut cursor = Cursor::new(source.clone());
        let sb = Superblock::read(&mut cursor)?;
        Ok(Ext {
            fs: Rc::new(ExtFs { disk: source, sb }),
        }
        .into())
    }
}

impl Model for Ext {
    fn name(&self) -> &'static str {
        "ext"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        Ok(vec![Child::new("root", "the root of the filesystem")])
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        if child == "root" {
            return Ok(Some(
                ExtDirectory::new(self.fs.clone(), ROOT_DIRECTORY_INODE).into(),
            ));
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let sb = &self.fs.sb;
        let mut a = Attributes::new();
        a.put("inodes-count", sb.inodes_count);
        a.put("blocks-count-lo", sb.blocks_count_lo);
        a.put("r-blocks-count-lo", sb.r_blocks_count_lo);
        a.put("free-blocks-count-lo", sb.free_blocks_count_lo);
        a.put("free-inodes-count", sb.free_inodes_count);
        a.put("first-data-block", sb.first_data_block);
        a.put("block-size", sb.block_size());
        a.put("log-cluster-size", sb.log_cluster_size);
        a.put("blocks-per-group", sb.blocks_per_group);
        a.put("clusters-per-group", sb.clusters_per_group);
        a.put("inodes-per-group", sb.inodes_per_group);
        a.put("inode-size", sb.inode_size());
        a.put("mtime", sb.mtime);
        a.put("wtime", sb.wtime);
        a.put("mnt-count", sb.mnt_count);
        a.put("max-mnt-count", sb.max_mnt_count);
        a.put("rev-level", sb.rev_level);
        a.put("minor-rev-level", sb.minor_rev_level);
        a.put("state", sb.state);
        a.put("errors", sb.errors);
        a.put("last-check", sb.lastcheck);
        a.put("check-interval", sb.checkinterval);
        a.put("creator-os", sb.creator_os);
        a.put("def-resuid", sb.def_resuid);
        a.put("def-resgid", sb.def_resgid);
        if let Ok(group) = self.fs.group_descriptor(0) {
            a.put("group-descriptor-0", group.describe());
        }
        if let Some(d) = &sb.dynamic {
            a.put("uuid", d.uuid.to_string());
            a.put("volume-name", d.volume_name.clone());
            a.put("last-mounted", d.last_mounted.clone());
            a.put("first-ino", d.first_ino);
            a.put("kbytes-written", d.kbytes_written);

            let mut features = Attributes::new();
            features.put("compat", format!("{:?}", d.feature_compat));
            features.put("incompat", format!("{:?}", d.feature_incompat));
            features.put("ro-compat", format!("{:?}", d.feature_ro_compat));
            features.put("default-mount-opts", format!("{:?}", d.default_mount_opts));
            features.put("flags", format!("{:?}", d.flags));
            features.put(
                "::unknown",
                u64::from(d.feature_incompat.bits() & !FeatureIncompat::all().bits()),
            );
            a.put("features", features);
        }
        a
    }
}

#[cfg(test)]
pub(crate) mod images {
    //! Synthetic single-group ext4 images for the decoder tests.
    //! 1 KiB blocks, 256-byte inodes, extents + filetype features.

    pub const BS: usize = 1024;
    pub const INODE_SIZE: usize = 256;
    pub const INODE_TABLE_BLOCK: usize = 5;

    pub fn dirent(inode: u32, rec_len: u16, file_type: u8, name: &[u8]) -> Vec<u8> {
        let mut e = Vec::new();
        e.extend_from_slice(&inode.to_le_bytes());
        e.extend_from_slice(&rec_len.to_le_bytes());
        e.push(name.len() as u8);
        e.push(file_type);
        e.extend_from_slice(name);
        while e.len() % 4 != 0 {
            e.push(0);
        }
        e
    }

    /// Close a directory block: the final entry's rec_len stretches to the
    /// block end.
    pub fn dir_block(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut block = Vec::new();
        for (at, entry) in entries.iter().enumerate() {
            if at + 1 == entries.len() {
                let mut stretched = entry.clone();
                let rec_len = (BS - block.len()) as u16;
                stretched[4..6].copy_from_slice(&rec_len.to_le_bytes());
                block.extend_from_slice(&stretched);
            } else {
                block.extend_from_slice(entry);
            }
        }
        block.resize(BS, 0);
        block
    }

    pub fn extent_inode(mode: u16, size: u64, first_block: u32, block_count: u16) -> Vec<u8> {
        let mut inode = vec![0u8; INODE_SIZE];
        inode[0..2].copy_from_slice(&mode.to_le_bytes());
        inode[4..8].copy_from_slice(&(size as u32).to_le_bytes());
        inode[26..28].copy_from_slice(&1u16.to_le_bytes()); // links
        inode[32..36].copy_from_slice(&0x0008_0000u32.to_le_bytes()); // extents
        // Extent tree, depth zero, one leaf record.
        let map = &mut inode[40..100];
        map[0..2].copy_from_slice(&0xf30au16.to_le_bytes());
        map[2..4].copy_from_slice(&1u16.to_le_bytes()); // entries
        map[4..6].copy_from_slice(&4u16.to_le_bytes()); // max
        map[6..8].copy_from_slice(&0u16.to_le_bytes()); // depth
        map[12..16].copy_from_slice(&0u32.to_le_bytes()); // logical block
        map[16..18].copy_from_slice(&block_count.to_le_bytes());
        map[18..20].copy_from_slice(&0u16.to_le_bytes()); // start hi
        map[20..24].copy_from_slice(&first_block.to_le_bytes());
        inode[108..112].copy_from_slice(&((size >> 32) as u32).to_le_bytes());
        inode
    }

    pub fn direct_inode(mode: u16, size: u64, blocks: &[u32]) -> Vec<u8> {
        let mut inode = vec![0u8; INODE_SIZE];
        inode[0..2].copy_from_slice(&mode.to_le_bytes());
        inode[4..8].copy_from_slice(&(size as u32).to_le_bytes());
        inode[26..28].copy_from_slice(&1u16.to_le_bytes());
        for (at, block) in blocks.iter().enumerate() {
            let base = 40 + at * 4;
            inode[base..base + 4].copy_from_slice(&block.to_le_bytes());
        }
        inode[108..112].copy_from_slice(&((size >> 32) as u32).to_le_bytes());
        inode
    }

    pub struct ImageSpec {
        /// (inode number, raw descriptor bytes)
        pub inodes: Vec<(u32, Vec<u8>)>,
        /// (block number, contents)
        pub blocks: Vec<(usize, Vec<u8>)>,
    }

    pub fn build(spec: ImageSpec) -> Vec<u8> {
        let mut image = vec![0u8; 64 * BS];

        // Superblock.
        let sb = 1024;
        let put32 = |image: &mut Vec<u8>, at: usize, v: u32| {
            image[sb + at..sb + at + 4].copy_from_slice(&v.to_le_bytes());
        };
        let put16 = |image: &mut Vec<u8>, at: usize, v: u16| {
            image[sb + at..sb + at + 2].copy_from_slice(&v.to_le_bytes());
        };
        put32(&mut image, 0, 16); // inodes count
        put32(&mut image, 4, 64); // blocks count
        put32(&mut image, 20, 1); // first data block
        put32(&mut image, 24, 0); // log block size
        put32(&mut image, 32, 8192); // blocks per group
        put32(&mut image, 40, 16); // inodes per group
        put16(&mut image, 56, 0xef53);
        put16(&mut image, 58, 1); // state
        put16(&mut image, 60, 1); // errors
        put32(&mut image, 76, 1); // rev level
        put32(&mut image, 84, 11); // first ino
        put16(&mut image, 88, INODE_SIZE as u16);
        put32(&mut image, 96, 0x42); // incompat: filetype | extents
        image[sb + 120..sb + 129].copy_from_slice(b"delvetest");

        // One group descriptor.
        let gdt = 2 * BS;
        image[gdt..gdt + 4].copy_from_slice(&3u32.to_le_bytes());
        image[gdt + 4..gdt + 8].copy_from_slice(&4u32.to_le_bytes());
        image[gdt + 8..gdt + 12].copy_from_slice(&(INODE_TABLE_BLOCK as u32).to_le_bytes());

        for (inode_no, raw) in &spec.inodes {
            let at = INODE_TABLE_BLOCK * BS + (*inode_no as usize - 1) * INODE_SIZE;
            image[at..at + raw.len()].copy_from_slice(raw);
        }
        for (block_no, contents) in &spec.blocks {
            let at = block_no * BS;
            image[at..at + contents.len()].copy_from_slice(contents);
        }
        image
    }

    /// Root (inode 2, block 9) holding `hello.txt` (inode 12, block 10).
    pub fn basic() -> Vec<u8> {
        let root_block = dir_block(&[
            dirent(2, 12, 2, b"."),
            dirent(2, 12, 2, b".."),
            dirent(12, 0, 1, b"hello.txt"),
        ]);
        build(ImageSpec {
            inodes: vec![
                (2, extent_inode(0x41ed, BS as u64, 9, 1)),
                (12, extent_inode(0x81a4, 13, 10, 1)),
            ],
            blocks: vec![(9, root_block), (10, b"hello, world\n".to_vec())],
        })
    }
}
