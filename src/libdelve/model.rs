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
//! Format recognition and navigation.
//!
//! A handler is either listable (it names children) or sourceable (it
//! yields a byte source), never both.  Navigation is: recognise, select a
//! child, recognise again.
use tracing::warn;

use super::attrs::Attributes;
use super::cdfs::{Cdfs, IsoDirectory, IsoFile};
use super::dmg::{Dmg, DmgPartition};
use super::error::{Error, Result};
use super::ext::Ext;
use super::ext_dir::{ExtDirectory, ExtRegularFile};
use super::mbr::{Mbr, MbrPartition};
use super::qcow2::{Qcow2, Qcow2MainImage};
use super::source::{Source, SourceRef};

/// One entry of a listing: a selectable child name plus a loose hint about
/// what it is.
#[derive(Clone, Debug, PartialEq)]
pub struct Child {
    pub name: String,
    pub hint: String,
}

impl Child {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Child {
        Child {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

#[enum_dispatch::enum_dispatch]
pub trait Model {
    /// Identifying name of this handler.
    fn name(&self) -> &'static str;

    fn is_listable(&self) -> bool {
        false
    }

    fn is_sourceable(&self) -> bool {
        false
    }

    /// Child entries of a listable handler.
    fn list(&self) -> Result<Vec<Child>> {
        Err(Error::InvalidArgument(format!(
            "{} has no children to list",
            self.name()
        )))
    }

    /// Descend into a named child.  An unknown name is `None`, not an
    /// error.
    fn select(&self, _child: &str) -> Result<Option<Handler>> {
        Err(Error::InvalidArgument(format!(
            "{} has no children to select",
            self.name()
        )))
    }

    /// The byte source of a sourceable handler.
    fn source(&self) -> Result<SourceRef> {
        Err(Error::InvalidArgument(format!(
            "{} does not expose a byte source",
            self.name()
        )))
    }

    /// Decoded metadata for display.
    fn describe(&self) -> Attributes {
        Attributes::new()
    }
}

#[enum_dispatch::enum_dispatch(Model)]
pub enum Handler {
    UnknownBlob,
    Cdfs,
    IsoDirectory,
    IsoFile,
    Dmg,
    DmgPartition,
    Qcow2,
    Qcow2MainImage,
    Mbr,
    MbrPartition,
    Ext,
    ExtDirectory,
    ExtRegularFile,
}

/// Generic wrapper for data nothing has recognised yet; the usual starting
/// point of a navigation.
pub struct UnknownBlob {
    source: SourceRef,
}

impl UnknownBlob {
    pub fn new(source: SourceRef) -> UnknownBlob {
        UnknownBlob { source }
    }
}

impl Model for UnknownBlob {
    fn name(&self) -> &'static str {
        "unknown-blob"
    }

    fn is_sourceable(&self) -> bool {
        true
    }

    fn source(&self) -> Result<SourceRef> {
        Ok(self.source.clone())
    }

    fn describe(&self) -> Attributes {
        let mut a = Attributes::new();
        a.put("label", self.source.label());
        a.put("size", self.source.size());
        a
    }
}

/// A recognisable format: a magic probe plus a constructor.
pub struct Format {
    name: &'static str,
    matches: fn(&SourceRef) -> Result<bool>,
    construct: fn(SourceRef) -> Result<Handler>,
}

impl Format {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the magic probe.  Probe failures count as a non-match so later
    /// formats still get their turn.
    pub fn probe(&self, source: &SourceRef) -> bool {
        match (self.matches)(source) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(format = self.name, error = %e, "format probe failed");
                false
            }
        }
    }

    pub fn instantiate(&self, source: SourceRef) -> Result<Handler> {
        (self.construct)(source)
    }
}

/// The ordered set of recognisable formats.
pub struct Registry {
    formats: Vec<Format>,
}

impl Registry {
    pub fn builtin() -> Registry {
        Registry {
            formats: vec![
                Format {
                    name: "cdfs",
                    matches: Cdfs::matches,
                    construct: Cdfs::open,
                },
                Format {
                    name: "apple-disk-image",
                    matches: Dmg::matches,
                    construct: Dmg::open,
                },
                Format {
                    name: "qcow2",
                    matches: Qcow2::matches,
                    construct: Qcow2::open,
                },
                Format {
                    name: "master-boot-record",
                    matches: Mbr::matches,
                    construct: Mbr::open,
                },
                Format {
                    name: "ext",
                    matches: Ext::matches,
                    construct: Ext::open,
                },
            ],
        }
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Every format whose magic probe accepts the source, in registry
    /// order.
    pub fn matching(&self, source: &SourceRef) -> Vec<&Format> {
        self.formats.iter().filter(|f| f.probe(source)).collect()
    }

    pub fn first_match(&self, source: &SourceRef) -> Option<&Format> {
        self.formats.iter().find(|f| f.probe(source))
    }

    pub fn by_name(&self, name: &str) -> Option<&Format> {
        self.formats.iter().find(|f| f.name == name)
    }
}
