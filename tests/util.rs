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
//! Synthesized disk images for driving the binary end to end.
use std::io::Write;

use tempfile::NamedTempFile;

/// Write `image` to a scratch file the binary can open.
pub fn image_file(image: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(image).unwrap();
    f.flush().unwrap();
    f
}

/// A 1 MiB disk with one MBR partition of 1024 sectors at sector 2048,
/// filled with a recognisable pattern.
pub fn mbr_image() -> Vec<u8> {
    let mut image = vec![0u8; 1 << 21];
    image[0x1fe] = 0x55;
    image[0x1ff] = 0xaa;
    let entry = 0x1be;
    image[entry] = 0x80;
    image[entry + 4] = 0x83;
    image[entry + 8..entry + 12].copy_from_slice(&2048u32.to_le_bytes());
    image[entry + 12..entry + 16].copy_from_slice(&1024u32.to_le_bytes());
    let data = 2048 * 512;
    for (i, b) in image[data..data + 1024 * 512].iter_mut().enumerate() {
        *b = (i % 199) as u8;
    }
    image
}

const BS: usize = 1024;
const INODE_SIZE: usize = 256;
const INODE_TABLE_BLOCK: usize = 5;

fn extent_inode(mode: u16, size: u32, first_block: u32, block_count: u16) -> Vec<u8> {
    let mut inode = vec![0u8; INODE_SIZE];
    inode[0..2].copy_from_slice(&mode.to_le_bytes());
    inode[4..8].copy_from_slice(&size.to_le_bytes());
    inode[26..28].copy_from_slice(&1u16.to_le_bytes());
    inode[32..36].copy_from_slice(&0x0008_0000u32.to_le_bytes());
    let map = &mut inode[40..100];
    map[0..2].copy_from_slice(&0xf30au16.to_le_bytes());
    map[2..4].copy_from_slice(&1u16.to_le_bytes());
    map[4..6].copy_from_slice(&4u16.to_le_bytes());
    map[12..16].copy_from_slice(&0u32.to_le_bytes());
    map[16..18].copy_from_slice(&block_count.to_le_bytes());
    map[20..24].copy_from_slice(&first_block.to_le_bytes());
    inode
}

fn dirent(inode: u32, rec_len: u16, file_type: u8, name: &[u8]) -> Vec<u8> {
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

/// A one-group ext4 image whose root holds `hello.txt` containing
/// `hello, world\n`.
pub fn ext4_image() -> Vec<u8> {
    let mut image = vec![0u8; 64 * BS];

    let sb = 1024;
    image[sb..sb + 4].copy_from_slice(&16u32.to_le_bytes()); // inodes
    image[sb + 4..sb + 8].copy_from_slice(&64u32.to_le_bytes()); // blocks
    image[sb + 20..sb + 24].copy_from_slice(&1u32.to_le_bytes()); // first data block
    image[sb + 32..sb + 36].copy_from_slice(&8192u32.to_le_bytes()); // blocks per group
    image[sb + 40..sb + 44].copy_from_slice(&16u32.to_le_bytes()); // inodes per group
    image[sb + 56..sb + 58].copy_from_slice(&0xef53u16.to_le_bytes());
    image[sb + 58..sb + 60].copy_from_slice(&1u16.to_le_bytes()); // state
    image[sb + 76..sb + 80].copy_from_slice(&1u32.to_le_bytes()); // rev level
    image[sb + 84..sb + 88].copy_from_slice(&11u32.to_le_bytes()); // first ino
    image[sb + 88..sb + 90].copy_from_slice(&(INODE_SIZE as u16).to_le_bytes());
    image[sb + 96..sb + 100].copy_from_slice(&0x42u32.to_le_bytes()); // filetype | extents

    let gdt = 2 * BS;
    image[gdt..gdt + 4].copy_from_slice(&3u32.to_le_bytes());
    image[gdt + 4..gdt + 8].copy_from_slice(&4u32.to_le_bytes());
    image[gdt + 8..gdt + 12].copy_from_slice(&(INODE_TABLE_BLOCK as u32).to_le_bytes());

    let root_inode = extent_inode(0x41ed, BS as u32, 9, 1);
    let at = INODE_TABLE_BLOCK * BS + INODE_SIZE;
    image[at..at + INODE_SIZE].copy_from_slice(&root_inode);

    let file_inode = extent_inode(0x81a4, 13, 10, 1);
    let at = INODE_TABLE_BLOCK * BS + 11 * INODE_SIZE;
    image[at..at + INODE_SIZE].copy_from_slice(&file_inode);

    let dir = 9 * BS;
    let mut at = dir;
    for entry in [
        dirent(2, 12, 2, b"."),
        dirent(2, 12, 2, b".."),
        dirent(12, (BS - 24) as u16, 1, b"hello.txt"),
    ] {
        image[at..at + entry.len()].copy_from_slice(&entry);
        at += entry.len();
    }

    image[10 * BS..10 * BS + 13].copy_from_slice(b"hello, world\n");
    image
}
