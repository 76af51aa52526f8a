//! Binary wire frames appended to object data: the per-file recovery
//! info trailer (one per object, reverse-parseable via its trailing
//! length field) and the per-chunk `MultiChunkInfo` record stored in a
//! MULTI file's metadata file.

use marfs_macros::WireCodec;

use crate::error::{MarfsError, MarfsResult};

/// Fixed-width portion of the recovery-info trailer. Everything after
/// this is a sequence of null-terminated strings, followed by an
/// 8-byte big-endian total-length field at the very end of the frame.
#[derive(WireCodec, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryInfoHeader {
    pub vers_maj: u16,
    pub vers_min: u16,
    pub inode: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    pub ctime: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryInfo {
    pub header: RecoveryInfoHeader,
    pub mdfs_path: String,
    pub pre_xattr: String,
    pub post_xattr: String,
}

fn push_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn take_cstr<'a>(buf: &'a [u8], at: &mut usize) -> MarfsResult<&'a str> {
    let start = *at;
    let nul = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| MarfsError::Corruption("recovery info string missing NUL terminator".into()))?;
    let s = std::str::from_utf8(&buf[start..start + nul])
        .map_err(|e| MarfsError::Corruption(format!("recovery info string not utf8: {e}")))?;
    *at = start + nul + 1;
    Ok(s)
}

impl RecoveryInfo {
    /// Encode the full per-object trailer, including the trailing
    /// total-length field that lets a reader seek to EOF and parse
    /// backwards without knowing the frame's start offset in advance.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.to_be_bytes_vec();
        push_cstr(&mut out, &self.mdfs_path);
        push_cstr(&mut out, &self.pre_xattr);
        push_cstr(&mut out, &self.post_xattr);
        let total_len = (out.len() + 8) as u64;
        out.extend_from_slice(&total_len.to_be_bytes());
        out
    }

    /// Decode a trailer given the full object tail buffer (at least as
    /// many bytes as the trailer occupies). Uses the trailing length
    /// field to find the frame's start.
    pub fn decode_from_tail(tail: &[u8]) -> MarfsResult<Self> {
        if tail.len() < 8 {
            return Err(MarfsError::Corruption("object tail too short for recovery info length field".into()));
        }
        let len_bytes = &tail[tail.len() - 8..];
        let total_len = u64::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if total_len < RecoveryInfoHeader::WIRE_LEN + 8 || total_len > tail.len() {
            return Err(MarfsError::Corruption(format!(
                "recovery info length field {total_len} inconsistent with tail size {}",
                tail.len()
            )));
        }
        let frame = &tail[tail.len() - total_len..tail.len() - 8];
        let header = RecoveryInfoHeader::from_be_bytes(frame)?;
        let mut at = RecoveryInfoHeader::WIRE_LEN;
        let mdfs_path = take_cstr(frame, &mut at)?.to_string();
        let pre_xattr = take_cstr(frame, &mut at)?.to_string();
        let post_xattr = take_cstr(frame, &mut at)?.to_string();
        Ok(Self { header, mdfs_path, pre_xattr, post_xattr })
    }
}

/// Per-chunk metadata, one instance per chunk of a MULTI (striped)
/// file, stored in that file's MULTI metadata entry. 44 bytes on the
/// wire; readers must not assume any native struct alignment beyond
/// this explicit field-by-field layout.
#[derive(WireCodec, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultiChunkInfo {
    pub vers_maj: u16,
    pub vers_min: u16,
    pub chunk_no: u64,
    pub logical_offset: u64,
    pub chunk_data_bytes: u64,
    pub correct_info: u64,
    pub encrypt_info: u64,
}

const _ASSERT_MULTI_CHUNK_INFO_44_BYTES: () = assert!(MultiChunkInfo::WIRE_LEN == 44);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_chunk_info_is_44_bytes_and_round_trips() {
        let info = MultiChunkInfo {
            vers_maj: 1,
            vers_min: 0,
            chunk_no: 7,
            logical_offset: 1 << 20,
            chunk_data_bytes: 65536,
            correct_info: 0,
            encrypt_info: 0,
        };
        let bytes = info.to_be_bytes_vec();
        assert_eq!(bytes.len(), 44);
        let decoded = MultiChunkInfo::from_be_bytes(&bytes).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn recovery_info_round_trips_through_trailer() {
        let info = RecoveryInfo {
            header: RecoveryInfoHeader {
                vers_maj: 1,
                vers_min: 0,
                inode: 123456,
                mode: 0o100644,
                uid: 1000,
                gid: 1000,
                mtime: 1_700_000_000,
                ctime: 1_700_000_001,
            },
            mdfs_path: "/ns1/.ref/00/01/deadbeef".into(),
            pre_xattr: "user.marfs_pre=v1".into(),
            post_xattr: "user.marfs_post=v1".into(),
        };
        let mut object_data = vec![0xAAu8; 128];
        object_data.extend_from_slice(&info.encode());
        let decoded = RecoveryInfo::decode_from_tail(&object_data).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = RecoveryInfoHeader::from_be_bytes(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, crate::error::WireFrameError::ShortBuffer { .. }));
    }
}
