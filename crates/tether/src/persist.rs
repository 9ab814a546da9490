//! Versioned binary envelope around dumped programs and executions.
//!
//! Layout: the magic bytes `TTHR`, the format version as a little-endian `u16`, one byte
//! naming the payload kind, then the postcard encoding of the payload.

use serde::{Serialize, de::DeserializeOwned};
use strum::{Display, FromRepr};

use crate::error::TetherError;

const MAGIC: &[u8; 4] = b"TTHR";

/// Bumped whenever the encoding of any persisted type changes.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = MAGIC.len() + 2 + 1;

/// What a dump contains, so that bytes of one kind are never loaded as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub(crate) enum PayloadKind {
    Program = 1,
    Progress = 2,
    Execution = 3,
}

pub(crate) fn encode<S: Serialize>(kind: PayloadKind, payload: &S) -> Result<Vec<u8>, TetherError> {
    let mut bytes = Vec::with_capacity(256);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.push(kind as u8);
    let bytes = postcard::to_extend(payload, bytes).map_err(|e| TetherError::Format(format!("encoding failed: {e}")))?;
    log::debug!("encoded {kind} snapshot, {} bytes", bytes.len());
    Ok(bytes)
}

pub(crate) fn decode<D: DeserializeOwned>(kind: PayloadKind, bytes: &[u8]) -> Result<D, TetherError> {
    if bytes.len() < HEADER_LEN {
        return Err(TetherError::Format("truncated header".to_owned()));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[..4] != MAGIC {
        return Err(TetherError::Format("not a tether snapshot".to_owned()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(TetherError::Format(format!(
            "unsupported format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    match PayloadKind::from_repr(header[6]) {
        Some(found) if found == kind => {}
        Some(found) => return Err(TetherError::Format(format!("payload kind mismatch: expected {kind}, found {found}"))),
        None => return Err(TetherError::Format(format!("unknown payload kind {}", header[6]))),
    }
    let (value, rest) =
        postcard::take_from_bytes(payload).map_err(|e| TetherError::Format(format!("decoding failed: {e}")))?;
    if !rest.is_empty() {
        return Err(TetherError::Format(format!("{} trailing bytes", rest.len())));
    }
    log::debug!("decoded {kind} snapshot, {} bytes", bytes.len());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let bytes = encode(PayloadKind::Program, &42_u32).unwrap();
        assert_eq!(&bytes[..7], b"TTHR\x01\x00\x01");
        assert_eq!(decode::<u32>(PayloadKind::Program, &bytes).unwrap(), 42);
    }

    #[test]
    fn rejects_corrupt_envelopes() {
        let bytes = encode(PayloadKind::Progress, &(1_u8, "abc".to_owned())).unwrap();
        let check = |bytes: &[u8], kind, expected: &str| {
            let err = decode::<(u8, String)>(kind, bytes).unwrap_err();
            assert_eq!(err.to_string(), format!("invalid snapshot: {expected}"));
        };

        check(&bytes[..3], PayloadKind::Progress, "truncated header");
        check(&bytes, PayloadKind::Execution, "payload kind mismatch: expected Execution, found Progress");

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        check(&bad_magic, PayloadKind::Progress, "not a tether snapshot");

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        check(&bad_version, PayloadKind::Progress, "unsupported format version 9, expected 1");

        let mut trailing = bytes.clone();
        trailing.push(0);
        check(&trailing, PayloadKind::Progress, "1 trailing bytes");

        let err = decode::<(u8, String)>(PayloadKind::Progress, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.to_string().starts_with("invalid snapshot: decoding failed"));
    }
}
