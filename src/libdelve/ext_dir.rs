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
//! ext directories and regular files as navigable handlers.
use std::rc::Rc;

use tracing::{debug, warn};

use super::attrs::Attributes;
use super::cursor::Cursor;
use super::error::{Error, Result};
use super::ext::ExtFs;
use super::ext_inode::{ExtInodeDevice, InodeFlags};
use super::model::{Child, Handler, Model};
use super::source::{BlockSource, SourceRef};

const FT_REGULAR: u8 = 1;
const FT_DIRECTORY: u8 = 2;

#[derive(Debug)]
struct DirEntry {
    inode: u32,
    file_type: u8,
    name: String,
}

impl DirEntry {
    fn kind_hint(&self) -> String {
        match self.file_type {
            FT_REGULAR => "file".to_owned(),
            FT_DIRECTORY => "directory".to_owned(),
            other => format!("file-type-{other}"),
        }
    }
}

pub struct ExtDirectory {
    fs: Rc<ExtFs>,
    inode_no: u32,
}

impl ExtDirectory {
    pub(super) fn new(fs: Rc<ExtFs>, inode_no: u32) -> ExtDirectory {
        ExtDirectory { fs, inode_no }
    }

    /// Walk the linear record form.  The hash-tree index, when present,
    /// preserves this form, so it is authoritative either way.
    fn entries(&self) -> Result<Vec<DirEntry>> {
        let inode = self.fs.inode(self.inode_no)?;
        if inode.flags.contains(InodeFlags::INDEX) {
            debug!(
                inode = self.inode_no,
                "directory carries a hash index; walking the linear form"
            );
        }

        let contents: SourceRef = Rc::new(BlockSource::new(
            "ext-directory-contents",
            Rc::new(ExtInodeDevice::new(self.fs.clone(), inode)),
        ));
        let size = contents.size();
        let mut cursor = Cursor::new(contents);

        let mut entries = Vec::new();
        while cursor.tell() < size {
            let at = cursor.tell();
            let inode_no = cursor.read_u32_le()?;
            let rec_len = cursor.read_u16_le()?;
            let name_len = cursor.read_u8()?;
            let file_type = cursor.read_u8()?;
            let name = String::from_utf8_lossy(&cursor.read_exact(usize::from(name_len))?)
                .into_owned();

            if rec_len == 0 {
                warn!(offset = at, "zero-length directory record ends the walk");
                break;
            }
            cursor.seek(at + u64::from(rec_len));
            if cursor.tell() > size {
                warn!(offset = at, "directory record overruns its contents");
                break;
            }

            // Records with a zero inode are tombstones.
            if inode_no != 0 {
                entries.push(DirEntry {
                    inode: inode_no,
                    file_type,
                    name,
                });
            }
        }
        Ok(entries)
    }
}

impl Model for ExtDirectory {
    fn name(&self) -> &'static str {
        "ext-directory"
    }

    fn is_listable(&self) -> bool {
        true
    }

    fn list(&self) -> Result<Vec<Child>> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.name != "." && e.name != "..")
            .map(|e| Child::new(e.name.clone(), e.kind_hint()))
            .collect())
    }

    fn select(&self, child: &str) -> Result<Option<Handler>> {
        for entry in self.entries()? {
            if entry.name == "." || entry.name == ".." || entry.name != child {
                continue;
            }
            return match entry.file_type {
                FT_DIRECTORY => Ok(Some(
                    ExtDirectory::new(self.fs.clone(), entry.inode).into(),
                )),
                FT_REGULAR => Ok(Some(
                    ExtRegularFile {
                        fs: self.fs.clone(),
                        inode_no: entry.inode,
                    }
                    .into(),
                )),
                other => Err(Error::Unsupported(format!(
                    "navigating ext directory entries of file type {other}"
                ))),
            };
        }
        Ok(None)
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("inode", self.inode_no);
        if let Ok(inode) = self.fs.inode(self.inode_no) {
            a.put("hash-indexed", inode.flags.contains(InodeFlags::INDEX));
            a.put("descriptor", inode.describe());
        }
        a
    }
}

pub struct ExtRegularFile {
    fs: Rc<ExtFs>,
    inode_no: u32,
}

impl Model for ExtRegularFile {
    fn name(&self) -> &'static str {
        "ext-regular-file"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        let inode = self.fs.inode(self.inode_no)?;
        Ok(Rc::new(BlockSource::new(
            "ext-regular-file",
            Rc::new(ExtInodeDevice::new(self.fs.clone(), inode)),
        )))
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("inode", self.inode_no);
        if let Ok(inode) = self.fs.inode(self.inode_no) {
            a.put("descriptor", inode.describe());
        }
        a
    }
}

#[cfg(test)]
mod t {
    use super::super::ext::images::{self, dir_block, dirent, extent_inode};
    use super::super::ext::{ExtFs, Superblock};
    use super::super::source::{BlobSource, Source};
    use super::*;

    fn fs_over(image: Vec<u8>) -> Rc<ExtFs> {
        let source: SourceRef = Rc::new(BlobSource::new("ext-dir-test", image));
        let mut cursor = Cursor::new(source.clone());
        let sb = Superblock::read(&mut cursor).unwrap();
        Rc::new(ExtFs { disk: source, sb })
    }

    fn image_with_root_block(root_block: Vec<u8>, extra: images::ImageSpec) -> Vec<u8> {
        let mut inodes = vec![(2u32, extent_inode(0x41ed, images::BS as u64, 9, 1))];
        inodes.extend(extra.inodes);
        let mut blocks = vec![(9usize, root_block)];
        blocks.extend(extra.blocks);
        images::build(images::ImageSpec { inodes, blocks })
    }

    #[test]
    fn tombstones_are_skipped() {
        let root = dir_block(&[
            dirent(2, 12, 2, b"."),
            dirent(2, 12, 2, b".."),
            dirent(0, 16, 1, b"deleted"),
            dirent(12, 0, 1, b"kept.txt"),
        ]);
        let image = image_with_root_block(
            root,
            images::ImageSpec {
                inodes: vec![(12, extent_inode(0x81a4, 3, 10, 1))],
                blocks: vec![(10, b"abc".to_vec())],
            },
        );
        let dir = ExtDirectory::new(fs_over(image), 2);
        let names: Vec<String> = dir.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["kept.txt"]);
    }

    #[test]
    fn zero_rec_len_terminates_instead_of_looping() {
        // Built by hand so the dot records keep their short rec_lens and
        // the walk actually reaches the broken record.
        let mut root = Vec::new();
        root.extend(dirent(2, 12, 2, b"."));
        root.extend(dirent(2, 12, 2, b".."));
        root.extend(dirent(5, 0, 1, b"bad"));
        root.resize(images::BS, 0);
        let image = image_with_root_block(root, images::ImageSpec {
            inodes: vec![],
            blocks: vec![],
        });
        let dir = ExtDirectory::new(fs_over(image), 2);
        let names: Vec<String> = dir.list().unwrap().into_iter().map(|c| c.name).collect();
        assert!(names.is_empty());
    }

    #[test]
    fn subdirectories_nest() {
        let root = dir_block(&[
            dirent(2, 12, 2, b"."),
            dirent(2, 12, 2, b".."),
            dirent(13, 0, 2, b"sub"),
        ]);
        let sub = dir_block(&[
            dirent(13, 12, 2, b"."),
            dirent(2, 12, 2, b".."),
            dirent(14, 0, 1, b"inner.txt"),
        ]);
        let image = image_with_root_block(
            root,
            images::ImageSpec {
                inodes: vec![
                    (13, extent_inode(0x41ed, images::BS as u64, 11, 1)),
                    (14, extent_inode(0x81a4, 6, 12, 1)),
                ],
                blocks: vec![(11, sub), (12, b"nested".to_vec())],
            },
        );
        let root = ExtDirectory::new(fs_over(image), 2);
        let sub = root.select("sub").unwrap().unwrap();
        assert!(sub.is_listable());
        let file = sub.select("inner.txt").unwrap().unwrap();
        let source = file.source().unwrap();
        assert_eq!(source.read_at(0, 10).unwrap(), b"nested");
    }

    #[test]
    fn exotic_file_types_refuse_navigation() {
        let root = dir_block(&[
            dirent(2, 12, 2, b"."),
            dirent(2, 12, 2, b".."),
            dirent(12, 0, 7, b"socket"),
        ]);
        let image = image_with_root_block(root, images::ImageSpec {
            inodes: vec![],
            blocks: vec![],
        });
        let dir = ExtDirectory::new(fs_over(image), 2);
        assert_eq!(dir.list().unwrap()[0].hint, "file-type-7");
        assert!(matches!(
            dir.select("socket"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn missing_names_come_back_as_none() {
        let root = dir_block(&[dirent(2, 12, 2, b"."), dirent(2, 12, 2, b"..")]);
        let image = image_with_root_block(root, images::ImageSpec {
            inodes: vec![],
            blocks: vec![],
        });
        let dir = ExtDirectory::new(fs_over(image), 2);
        assert!(dir.select("absent").unwrap().is_none());
        assert!(dir.select(".").unwrap().is_none());
    }
}
