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
use assert_cmd::Command;

mod util;

fn delve() -> Command {
    Command::cargo_bin("delve").unwrap()
}

#[test]
fn scan_names_the_matching_format() {
    let img = util::image_file(&util::mbr_image());
    let assert = delve().arg(img.path()).arg("scan").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("== master-boot-record"));
    assert!(stdout.contains("!= ext"));
}

#[test]
fn list_shows_mbr_partitions() {
    let img = util::image_file(&util::mbr_image());
    let assert = delve().arg(img.path()).arg("list").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("partition-1"));
    assert!(stdout.contains("sectors=1024"));
}

#[test]
fn copy_streams_a_whole_partition() {
    let img = util::image_file(&util::mbr_image());
    let assert = delve()
        .arg(img.path())
        .arg("copy")
        .arg("partition-1")
        .assert()
        .success();
    let stdout = &assert.get_output().stdout;
    assert_eq!(stdout.len(), 1024 * 512);
    for (i, b) in stdout.iter().take(1000).enumerate() {
        assert_eq!(*b, (i % 199) as u8);
    }
}

#[test]
fn ext_file_reads_through_the_cli() {
    let img = util::image_file(&util::ext4_image());
    let assert = delve()
        .arg(img.path())
        .arg("copy")
        .arg("root/hello.txt")
        .assert()
        .success();
    assert_eq!(assert.get_output().stdout, b"hello, world\n");
}

#[test]
fn ext_root_lists_its_entries() {
    let img = util::image_file(&util::ext4_image());
    let assert = delve()
        .arg(img.path())
        .arg("list")
        .arg("root")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("hello.txt\tfile"));
}

#[test]
fn info_renders_node_metadata() {
    let img = util::image_file(&util::ext4_image());
    let assert = delve()
        .arg(img.path())
        .arg("info")
        .arg("root")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("# ext-directory"));
    assert!(stdout.contains("inode"));
}

#[test]
fn missing_children_fail_with_a_message() {
    let img = util::image_file(&util::ext4_image());
    delve()
        .arg(img.path())
        .arg("copy")
        .arg("root/absent.txt")
        .assert()
        .failure();
}
