/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Client side of the FastCGI 1.0 record layer.

use crate::Error;
use std::io::{Read, Write};

pub const VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT_LEN: usize = 0xffff;

pub const ROLE_RESPONDER: u16 = 1;
pub const FLAG_KEEP_CONN: u8 = 1;

/// Type of a record, the `type` byte of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
}

impl RecordType {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::BeginRequest => 1,
            Self::AbortRequest => 2,
            Self::EndRequest => 3,
            Self::Params => 4,
            Self::Stdin => 5,
            Self::Stdout => 6,
            Self::Stderr => 7,
            Self::Data => 8,
            Self::GetValues => 9,
            Self::GetValuesResult => 10,
            Self::UnknownType => 11,
        }
    }

    pub fn from_byte(value: u8) -> Result<Self, Error> {
        Ok(match value {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            otherwise => return Err(Error::protocol(format!("unknown record type {otherwise}"))),
        })
    }
}

/// `protocolStatus` of an `END_REQUEST` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolStatus {
    RequestComplete,
    CantMpxConn,
    Overloaded,
    UnknownRole,
}

impl ProtocolStatus {
    fn from_byte(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0 => Self::RequestComplete,
            1 => Self::CantMpxConn,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            otherwise => {
                return Err(Error::protocol(format!(
                    "unknown protocol status {otherwise}"
                )))
            }
        })
    }
}

/// A decoded record, padding stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordType,
    pub request_id: u16,
    pub content: Vec<u8>,
}

/// Body of the `END_REQUEST` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    pub fn decode(content: &[u8]) -> Result<Self, Error> {
        match *content {
            [a, b, c, d, status, ..] => Ok(Self {
                app_status: u32::from_be_bytes([a, b, c, d]),
                protocol_status: ProtocolStatus::from_byte(status)?,
            }),
            _ => Err(Error::protocol(format!(
                "END_REQUEST body too short ({} bytes)",
                content.len()
            ))),
        }
    }

    #[cfg(test)]
    pub fn encode(&self) -> [u8; 8] {
        let status = self.app_status.to_be_bytes();
        let protocol_status = match self.protocol_status {
            ProtocolStatus::RequestComplete => 0,
            ProtocolStatus::CantMpxConn => 1,
            ProtocolStatus::Overloaded => 2,
            ProtocolStatus::UnknownRole => 3,
        };
        [
            status[0],
            status[1],
            status[2],
            status[3],
            protocol_status,
            0,
            0,
            0,
        ]
    }
}

const fn padding_for(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// Write one record. `content` must fit in a single record.
pub fn write_record(
    out: &mut impl Write,
    kind: RecordType,
    request_id: u16,
    content: &[u8],
) -> std::io::Result<()> {
    let len = u16::try_from(content.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("record content too long ({} bytes)", content.len()),
        )
    })?;
    let padding = padding_for(content.len());
    let [id_hi, id_lo] = request_id.to_be_bytes();
    let [len_hi, len_lo] = len.to_be_bytes();

    #[allow(clippy::cast_possible_truncation)]
    out.write_all(&[
        VERSION_1,
        kind.to_byte(),
        id_hi,
        id_lo,
        len_hi,
        len_lo,
        padding as u8,
        0,
    ])?;
    out.write_all(content)?;
    out.write_all(&[0; 8][..padding])
}

/// Write a stream (`PARAMS`, `STDIN`, `STDOUT`...) split in records,
/// followed by the empty record closing it.
pub fn write_stream(
    out: &mut impl Write,
    kind: RecordType,
    request_id: u16,
    content: &[u8],
) -> std::io::Result<()> {
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        write_record(out, kind, request_id, chunk)?;
    }
    write_record(out, kind, request_id, &[])
}

pub fn write_begin_request(
    out: &mut impl Write,
    request_id: u16,
    keep_conn: bool,
) -> std::io::Result<()> {
    let [role_hi, role_lo] = ROLE_RESPONDER.to_be_bytes();
    let flags = if keep_conn { FLAG_KEEP_CONN } else { 0 };
    write_record(
        out,
        RecordType::BeginRequest,
        request_id,
        &[role_hi, role_lo, flags, 0, 0, 0, 0, 0],
    )
}

/// Read the next record. An EOF before the first byte of the header
/// is reported as [`std::io::ErrorKind::UnexpectedEof`] like any other.
pub fn read_record(input: &mut impl Read) -> Result<Record, Error> {
    let mut header = [0; HEADER_LEN];
    input.read_exact(&mut header)?;

    let [version, kind, id_hi, id_lo, len_hi, len_lo, padding, _] = header;
    if version != VERSION_1 {
        return Err(Error::protocol(format!(
            "unsupported fastcgi version {version}"
        )));
    }

    let mut content = vec![0; usize::from(u16::from_be_bytes([len_hi, len_lo]))];
    input.read_exact(&mut content)?;

    let mut padding_buffer = [0; 255];
    input.read_exact(&mut padding_buffer[..usize::from(padding)])?;

    Ok(Record {
        kind: RecordType::from_byte(kind)?,
        request_id: u16::from_be_bytes([id_hi, id_lo]),
        content,
    })
}

const MAX_PARAM_LEN: u32 = 0x7fff_ffff;

fn encode_length(out: &mut Vec<u8>, len: usize) -> std::io::Result<()> {
    if let Ok(short) = u8::try_from(len) {
        if short < 0x80 {
            out.push(short);
            return Ok(());
        }
    }

    let long = u32::try_from(len)
        .ok()
        .filter(|long| *long <= MAX_PARAM_LEN)
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("parameter too long ({len} bytes)"),
            )
        })?;
    out.extend_from_slice(&(long | 0x8000_0000).to_be_bytes());
    Ok(())
}

/// Encode name-value pairs as the content of a `PARAMS` stream.
///
/// # Errors
///
/// * a name or a value is longer than `2^31 - 1` bytes.
pub fn encode_params<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for (name, value) in params {
        encode_length(&mut out, name.len())?;
        encode_length(&mut out, value.len())?;
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}

#[cfg(test)]
fn decode_length(input: &[u8], cursor: &mut usize) -> Result<usize, Error> {
    let truncated = || Error::protocol("truncated name-value pair");

    let first = *input.get(*cursor).ok_or_else(truncated)?;
    if first & 0x80 == 0 {
        *cursor += 1;
        return Ok(usize::from(first));
    }

    let bytes = input.get(*cursor..*cursor + 4).ok_or_else(truncated)?;
    *cursor += 4;
    let len = u32::from_be_bytes([bytes[0] & 0x7f, bytes[1], bytes[2], bytes[3]]);
    usize::try_from(len).map_err(|_| truncated())
}

/// Decode the content of a `PARAMS` stream.
#[cfg(test)]
pub fn decode_params(input: &[u8]) -> Result<Vec<(String, String)>, Error> {
    let mut cursor = 0;
    let mut params = Vec::new();

    while cursor < input.len() {
        let name_len = decode_length(input, &mut cursor)?;
        let value_len = decode_length(input, &mut cursor)?;

        let name = input
            .get(cursor..cursor + name_len)
            .ok_or_else(|| Error::protocol("truncated parameter name"))?;
        cursor += name_len;
        let value = input
            .get(cursor..cursor + value_len)
            .ok_or_else(|| Error::protocol("truncated parameter value"))?;
        cursor += value_len;

        params.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_is_padded_to_eight_bytes() {
        let mut out = Vec::new();
        write_record(&mut out, RecordType::Stdin, 1, b"hello").unwrap();

        assert_eq!(out.len(), HEADER_LEN + 8);
        assert_eq!(&out[..HEADER_LEN], &[1, 5, 0, 1, 0, 5, 3, 0]);
        assert_eq!(&out[HEADER_LEN..HEADER_LEN + 5], b"hello");

        let record = read_record(&mut out.as_slice()).unwrap();
        assert_eq!(
            record,
            Record {
                kind: RecordType::Stdin,
                request_id: 1,
                content: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn stream_is_chunked_and_terminated() {
        let content = vec![b'x'; MAX_CONTENT_LEN + 10];
        let mut out = Vec::new();
        write_stream(&mut out, RecordType::Stdin, 7, &content).unwrap();

        let mut input = out.as_slice();
        let first = read_record(&mut input).unwrap();
        let second = read_record(&mut input).unwrap();
        let last = read_record(&mut input).unwrap();

        assert_eq!(first.content.len(), MAX_CONTENT_LEN);
        assert_eq!(second.content.len(), 10);
        assert!(last.content.is_empty());
        assert!(input.is_empty());
    }

    #[test]
    fn long_name_value_lengths() {
        let long = "v".repeat(300);
        let encoded =
            encode_params([("SCRIPT_FILENAME", "/srv/save.php"), ("body", long.as_str())]).unwrap();

        // 1 byte lengths for the first pair, 1 + 4 for the second.
        assert_eq!(encoded[0], 15);
        assert_eq!(encoded[1], 13);
        let second = 2 + 15 + 13;
        assert_eq!(encoded[second], 4);
        assert_eq!(&encoded[second + 1..second + 5], &[0x80, 0, 0x01, 0x2c]);

        assert_eq!(
            decode_params(&encoded).unwrap(),
            vec![
                ("SCRIPT_FILENAME".to_owned(), "/srv/save.php".to_owned()),
                ("body".to_owned(), long),
            ]
        );
    }

    #[test]
    fn length_boundaries() {
        let mut out = Vec::new();
        encode_length(&mut out, 0x7f).unwrap();
        encode_length(&mut out, 0x80).unwrap();
        encode_length(&mut out, 0x7fff_ffff).unwrap();
        assert_eq!(
            out,
            [0x7f, 0x80, 0, 0, 0x80, 0xff, 0xff, 0xff, 0xff]
        );

        let error = encode_length(&mut out, 0x8000_0000).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidInput);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn truncated_params() {
        let encoded = encode_params([("QUERY_STRING", "rcpt_to=a")]).unwrap();
        assert!(matches!(
            decode_params(&encoded[..encoded.len() - 1]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn end_request() {
        let end = EndRequest {
            app_status: 3,
            protocol_status: ProtocolStatus::Overloaded,
        };
        assert_eq!(EndRequest::decode(&end.encode()).unwrap(), end);
        assert!(EndRequest::decode(&[0, 0]).is_err());
    }

    #[test]
    fn bad_version() {
        let input = [2, 6, 0, 1, 0, 0, 0, 0];
        assert!(matches!(
            read_record(&mut input.as_slice()),
            Err(Error::Protocol(_))
        ));
    }
}
