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
use bincode_next::error::DecodeError;
use thiserror::Error;

/// Everything that can go wrong while decoding an image.
///
/// Magic probes are not represented here: a failed probe is an `Ok(false)`,
/// never an error.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied offset, length, or navigation request was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A read that required the full amount came up short.
    #[error("source truncated: {0}")]
    TruncatedSource(String),

    /// A recognised structure declares a variant this reader does not implement.
    #[error("unsupported format feature: {0}")]
    Unsupported(String),

    /// The on-disk structures are internally inconsistent.
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::CorruptMetadata(e.to_string())
    }
}
