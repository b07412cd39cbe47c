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
//! Insertion-ordered key/value tables carrying decoded metadata.
use std::collections::HashMap;
use std::fmt;

use super::error::{Error, Result};

/// A decoded metadata value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(u64),
    Signed(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Table(Attributes),
}

impl From<i8> for Value {
    fn from(v: i8) -> Value {
        Value::Signed(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Value {
        Value::Int(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Value {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::List(v)
    }
}

impl From<Attributes> for Value {
    fn from(v: Attributes) -> Value {
        Value::Table(v)
    }
}

/// An insertion-ordered mapping from short textual keys to values.  Keys
/// are unique; `put` on an existing key replaces the value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&at) => self.entries[at].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    /// Add under the next positional numeric key, for building numeric
    /// arrays and not much else.
    pub fn append(&mut self, value: impl Into<Value>) {
        let last = self
            .entries
            .last()
            .and_then(|(name, _)| name.parse::<u64>().ok())
            .unwrap_or(0);
        self.put((last + 1).to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&at| &self.entries[at].1)
    }

    pub fn get_text(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(Value::Text(s)) => Ok(s),
            Some(_) => Err(type_mismatch(name, "text")),
            None => Err(missing(name)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<u64> {
        match self.get(name) {
            Some(Value::Int(v)) => Ok(*v),
            Some(_) => Err(type_mismatch(name, "an integer")),
            None => Err(missing(name)),
        }
    }

    pub fn get_bytes(&self, name: &str) -> Result<&[u8]> {
        match self.get(name) {
            Some(Value::Bytes(b)) => Ok(b),
            Some(_) => Err(type_mismatch(name, "bytes")),
            None => Err(missing(name)),
        }
    }

    pub fn get_list(&self, name: &str) -> Result<&[Value]> {
        match self.get(name) {
            Some(Value::List(l)) => Ok(l),
            Some(_) => Err(type_mismatch(name, "a list")),
            None => Err(missing(name)),
        }
    }

    pub fn get_table(&self, name: &str) -> Result<&Attributes> {
        match self.get(name) {
            Some(Value::Table(t)) => Ok(t),
            Some(_) => Err(type_mismatch(name, "a table")),
            None => Err(missing(name)),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = " ".repeat(depth);
        let widest = self.entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

        writeln!(f, "{pad}{{")?;
        for (name, value) in &self.entries {
            match value {
                Value::Table(inner) => {
                    writeln!(f, "{pad}  {name:<widest$} :")?;
                    inner.render(f, depth + 2)?;
                    writeln!(f)?;
                }
                other => writeln!(f, "{pad}  {name:<widest$} : {other}")?,
            }
        }
        write!(f, "{pad}}}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (at, item) in items.iter().enumerate() {
                    if at > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Table(t) => fmt::Display::fmt(t, f),
        }
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

fn missing(name: &str) -> Error {
    Error::CorruptMetadata(format!("no such attribute {name:?}"))
}

fn type_mismatch(name: &str, wanted: &str) -> Error {
    Error::CorruptMetadata(format!("attribute {name:?} is not {wanted}"))
}
