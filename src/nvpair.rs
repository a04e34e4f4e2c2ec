// Copyright 2022 jmjoy
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Name–Value Codec: encode/decode of the variable-length name/value pair
//! format used in `PARAMS` and management records.
//!
//! Length encoding is ported from the upstream client's `ParamLength`: a
//! length under 128 is one byte with the high bit clear, otherwise four
//! bytes big-endian with the top bit of the first byte set. This module
//! generalizes that one-pair-at-a-time encoder into a decoder over an
//! arbitrary incoming byte stream, which a server (unlike the client this
//! crate started from) must be able to do.

use std::collections::HashMap;

use crate::error::{FcgiError, FcgiResult};

/// Encodes a single length per §4.2: short form under 128, else long form
/// with the high bit of the leading byte set.
fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let len = (len as u32) | 0x8000_0000;
        out.extend_from_slice(&len.to_be_bytes());
    }
}

/// Encodes an ordered list of name/value pairs into the wire format.
pub fn encode_pairs<'a, I>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = Vec::new();
    for (name, value) in pairs {
        encode_length(name.len(), &mut out);
        encode_length(value.len(), &mut out);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

/// Reads one length field, dispatching on the high bit of the first byte.
/// Returns the decoded length and the number of bytes it occupied.
fn read_length(buf: &[u8]) -> FcgiResult<(usize, usize)> {
    let Some(&b0) = buf.first() else {
        return Err(truncated("missing length byte"));
    };
    if b0 & 0x80 == 0 {
        Ok((b0 as usize, 1))
    } else {
        if buf.len() < 4 {
            return Err(truncated("truncated long-form length"));
        }
        let raw = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Ok(((raw & 0x7fff_ffff) as usize, 4))
    }
}

fn truncated(reason: &str) -> FcgiError {
    FcgiError::MalformedParams {
        reason: reason.to_string(),
    }
}

/// Decodes a byte buffer into an ordered list of name/value pairs. Fails
/// with [`FcgiError::MalformedParams`] on truncation.
pub fn decode_pairs(mut buf: &[u8]) -> FcgiResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    while !buf.is_empty() {
        let (name_len, n1) = read_length(buf)?;
        buf = &buf[n1..];
        let (value_len, n2) = read_length(buf)?;
        buf = &buf[n2..];

        if buf.len() < name_len + value_len {
            return Err(truncated("name/value data runs past end of buffer"));
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&buf[name_len..name_len + value_len]).into_owned();
        buf = &buf[name_len + value_len..];

        pairs.push((name, value));
    }
    Ok(pairs)
}

/// Decodes a byte buffer directly into a map, merging pairs in order (a
/// later pair for the same key overwrites an earlier one), matching how
/// the Request Assembler merges successive `PARAMS` records.
pub fn decode_pairs_into_map(buf: &[u8]) -> FcgiResult<HashMap<String, String>> {
    Ok(decode_pairs(buf)?.into_iter().collect())
}
