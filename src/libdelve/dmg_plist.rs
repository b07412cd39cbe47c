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
//! Apple XML property lists, as found in disk images.
//!
//! These are positionally-dependent cruft rather than well-formed XML, so
//! the parser is a small handwritten tag scanner over the element subset
//! that actually occurs: dict, array, key, string, and base64 data, inside
//! an xml/DOCTYPE/plist envelope that is skipped.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::attrs::{Attributes, Value};
use super::error::{Error, Result};

enum Token<'a> {
    Text(&'a str),
    Open(&'a str),
    Close(&'a str),
    /// `<?...?>` and `<!...>` declarations.
    Envelope,
}

fn next_token<'a>(text: &'a str, pos: &mut usize) -> Option<Token<'a>> {
    let rest = &text[*pos..];
    if rest.is_empty() {
        return None;
    }

    if let Some(body) = rest.strip_prefix('<') {
        let end = body.find('>')?;
        *pos += end + 2;
        let inner = body[..end].trim();
        if inner.starts_with('?') || inner.starts_with('!') {
            return Some(Token::Envelope);
        }
        if let Some(name) = inner.strip_prefix('/') {
            return Some(Token::Close(name.trim()));
        }
        let name = inner
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");
        Some(Token::Open(name))
    } else {
        let end = rest.find('<').unwrap_or(rest.len());
        *pos += end;
        Some(Token::Text(&rest[..end]))
    }
}

enum Scalar {
    Key,
    Str,
    Data,
}

enum Node {
    Dict {
        table: Attributes,
        pending_key: Option<String>,
    },
    Array {
        items: Vec<Value>,
    },
    Scalar {
        kind: Scalar,
        buf: String,
    },
}

fn attach(stack: &mut [Node], value: Value) -> Result<()> {
    match stack.last_mut() {
        Some(Node::Dict { table, pending_key }) => {
            let key = pending_key.take().ok_or_else(|| {
                Error::CorruptMetadata("property list value arrived with no key pending".into())
            })?;
            table.put(key, value);
            Ok(())
        }
        Some(Node::Array { items }) => {
            items.push(value);
            Ok(())
        }
        _ => Err(Error::CorruptMetadata(
            "property list value has nowhere to land".into(),
        )),
    }
}

/// Parse a property list whose root element is a dict.
pub(super) fn parse_plist(input: &[u8]) -> Result<Attributes> {
    let text = String::from_utf8_lossy(input);
    let mut stack: Vec<Node> = Vec::new();
    let mut pos = 0;

    while let Some(token) = next_token(&text, &mut pos) {
        match token {
            Token::Envelope => {}
            Token::Text(chunk) => match stack.last_mut() {
                Some(Node::Scalar { buf, .. }) => buf.push_str(chunk),
                _ if chunk.trim().is_empty() => {}
                None => {}
                _ => {
                    return Err(Error::CorruptMetadata(
                        "stray character data in property list".into(),
                    ))
                }
            },
            Token::Open(name) => match name {
                "plist" => {}
                "dict" => stack.push(Node::Dict {
                    table: Attributes::new(),
                    pending_key: None,
                }),
                "array" => stack.push(Node::Array { items: Vec::new() }),
                "key" => stack.push(Node::Scalar {
                    kind: Scalar::Key,
                    buf: String::new(),
                }),
                "string" => stack.push(Node::Scalar {
                    kind: Scalar::Str,
                    buf: String::new(),
                }),
                "data" => stack.push(Node::Scalar {
                    kind: Scalar::Data,
                    buf: String::new(),
                }),
                other => {
                    return Err(Error::CorruptMetadata(format!(
                        "unexpected <{other}> in property list"
                    )))
                }
            },
            Token::Close(name) => {
                let node = stack.pop().ok_or_else(|| {
                    Error::CorruptMetadata(format!("closing </{name}> with nothing open"))
                })?;
                match node {
                    Node::Scalar { kind, buf } => {
                        let expected = match kind {
                            Scalar::Key => "key",
                            Scalar::Str => "string",
                            Scalar::Data => "data",
                        };
                        if name != expected {
                            return Err(Error::CorruptMetadata(format!(
                                "</{name}> closes an open <{expected}>"
                            )));
                        }
                        match kind {
                            Scalar::Key => match stack.last_mut() {
                                Some(Node::Dict { pending_key, .. }) => {
                                    if pending_key.is_some() {
                                        return Err(Error::CorruptMetadata(
                                            "two keys in a row in property list dict".into(),
                                        ));
                                    }
                                    *pending_key = Some(buf);
                                }
                                _ => {
                                    return Err(Error::CorruptMetadata(
                                        "property list key outside a dict".into(),
                                    ))
                                }
                            },
                            Scalar::Str => attach(&mut stack, Value::Text(buf))?,
                            Scalar::Data => {
                                let packed: String =
                                    buf.chars().filter(|c| !c.is_whitespace()).collect();
                                let bytes = BASE64.decode(packed.as_bytes()).map_err(|e| {
                                    Error::CorruptMetadata(format!(
                                        "property list data is not base64: {e}"
                                    ))
                                })?;
                                attach(&mut stack, Value::Bytes(bytes))?;
                            }
                        }
                    }
                    Node::Dict { table, pending_key } => {
                        if name != "dict" {
                            return Err(Error::CorruptMetadata(format!(
                                "</{name}> closes an open <dict>"
                            )));
                        }
                        if pending_key.is_some() {
                            return Err(Error::CorruptMetadata(
                                "property list dict closed with a dangling key".into(),
                            ));
                        }
                        if stack.is_empty() {
                            return Ok(table);
                        }
                        attach(&mut stack, Value::Table(table))?;
                    }
                    Node::Array { items } => {
                        if name != "array" {
                            return Err(Error::CorruptMetadata(format!(
                                "</{name}> closes an open <array>"
                            )));
                        }
                        attach(&mut stack, Value::List(items))?;
                    }
                }
            }
        }
    }

    Err(Error::CorruptMetadata(
        "property list ended before its root dict closed".into(),
    ))
}
