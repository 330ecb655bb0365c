//! The outer binary container of a crash image.
//!
//! Every dump starts with a little-endian packed header whose exact shape
//! depends on the dump format version, followed by the body and a trailing
//! checksum. `tot_len` counts everything from the first header byte through
//! the last checksum byte.

use std::fmt;

use scroll::{Pread, LE};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::version::DumpVersion;

/// Which digest signs the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// zlib CRC32 over header and body.
    Crc32,
    /// SHA-256 over header and body.
    Sha256,
}

impl ChecksumKind {
    /// Size of the checksum field in bytes.
    pub fn size(self) -> usize {
        match self {
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Sha256 => 32,
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Crc32 => f.write_str("CRC32"),
            ChecksumKind::Sha256 => f.write_str("SHA256"),
        }
    }
}

/// Concrete header shape, selected by the dump format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// `tot_len, ver, task_num, tcb_sz`.
    V1,
    /// V1 plus `segs_num`.
    V2,
    /// V2 plus `chip_rev`.
    V2_1,
}

impl HeaderLayout {
    /// Serialized size of the header in bytes.
    pub fn size(self) -> usize {
        match self {
            HeaderLayout::V1 => 16,
            HeaderLayout::V2 => 20,
            HeaderLayout::V2_1 => 24,
        }
    }

    pub(crate) fn for_dump_ver(dump_ver: u16) -> Result<(Self, ChecksumKind), Error> {
        match dump_ver {
            DumpVersion::BIN_V1 => Ok((HeaderLayout::V1, ChecksumKind::Crc32)),
            DumpVersion::BIN_V2 => Ok((HeaderLayout::V2, ChecksumKind::Crc32)),
            DumpVersion::BIN_V2_1 => Ok((HeaderLayout::V2_1, ChecksumKind::Crc32)),
            DumpVersion::ELF_CRC32_V2 => Ok((HeaderLayout::V2, ChecksumKind::Crc32)),
            DumpVersion::ELF_SHA256_V2 => Ok((HeaderLayout::V2, ChecksumKind::Sha256)),
            DumpVersion::ELF_CRC32_V2_1 => Ok((HeaderLayout::V2_1, ChecksumKind::Crc32)),
            DumpVersion::ELF_SHA256_V2_1 => Ok((HeaderLayout::V2_1, ChecksumKind::Sha256)),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// Parsed envelope header. `segs_num` and `chip_rev` exist only on the
/// layouts that carry them.
#[derive(Debug, Clone)]
pub struct EnvelopeHeader {
    /// Total envelope length, header through checksum.
    pub tot_len: u32,
    /// Packed version word.
    pub ver: u32,
    /// Number of task records in the body.
    pub task_num: u32,
    /// Size of each task's TCB image.
    pub tcb_sz: u32,
    /// Number of trailing memory segments (V2 layouts and later).
    pub segs_num: Option<u32>,
    /// Silicon revision (V2.1 layouts).
    pub chip_rev: Option<u32>,
    layout: HeaderLayout,
}

impl EnvelopeHeader {
    fn parse(bytes: &[u8], layout: HeaderLayout) -> Result<Self, Error> {
        let mut offset = 0;
        let mut word = || -> Result<u32, Error> {
            let value = bytes.gread_with::<u32>(&mut offset, LE);
            value.map_err(|_| Error::HeaderDecode)
        };
        Ok(EnvelopeHeader {
            tot_len: word()?,
            ver: word()?,
            task_num: word()?,
            tcb_sz: word()?,
            segs_num: match layout {
                HeaderLayout::V1 => None,
                _ => Some(word()?),
            },
            chip_rev: match layout {
                HeaderLayout::V2_1 => Some(word()?),
                _ => None,
            },
            layout,
        })
    }

    /// Re-serializes the header with the exact layout it was parsed with.
    ///
    /// Checksums are computed over this serialization, so the byte layout
    /// must round-trip precisely.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.layout.size());
        out.extend_from_slice(&self.tot_len.to_le_bytes());
        out.extend_from_slice(&self.ver.to_le_bytes());
        out.extend_from_slice(&self.task_num.to_le_bytes());
        out.extend_from_slice(&self.tcb_sz.to_le_bytes());
        if let Some(segs_num) = self.segs_num {
            out.extend_from_slice(&segs_num.to_le_bytes());
        }
        if let Some(chip_rev) = self.chip_rev {
            out.extend_from_slice(&chip_rev.to_le_bytes());
        }
        out
    }

    /// The concrete layout this header was parsed with.
    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }
}

/// A parsed crash image container. Header and body are immutable after
/// parsing.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The envelope header, re-parsed with its concrete layout.
    pub header: EnvelopeHeader,
    /// The packed version word.
    pub version: DumpVersion,
    /// The digest kind that signs this envelope.
    pub checksum_kind: ChecksumKind,
    data: Vec<u8>,
    checksum: Vec<u8>,
}

impl Envelope {
    /// Parses an envelope out of raw dump bytes.
    ///
    /// A tentative V1 read recovers the version word, which then selects
    /// the real header and checksum shapes.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HeaderLayout::V1.size() {
            return Err(Error::HeaderDecode);
        }
        let ver: u32 = bytes.pread_with(4, LE).map_err(|_| Error::HeaderDecode)?;
        let version = DumpVersion(ver);
        let (layout, checksum_kind) = HeaderLayout::for_dump_ver(version.dump_ver())?;
        let header = EnvelopeHeader::parse(bytes, layout)?;

        let tot_len = header.tot_len as usize;
        if tot_len < layout.size() + checksum_kind.size() {
            return Err(Error::HeaderDecode);
        }
        if tot_len > bytes.len() {
            return Err(Error::TruncatedEnvelope {
                expected: tot_len,
                actual: bytes.len(),
            });
        }

        let data = bytes[layout.size()..tot_len - checksum_kind.size()].to_vec();
        let checksum = bytes[tot_len - checksum_kind.size()..tot_len].to_vec();
        Ok(Envelope {
            header,
            version,
            checksum_kind,
            data,
            checksum,
        })
    }

    /// The body between header and checksum.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The stored checksum bytes.
    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    /// Recomputes the digest over `header ++ body` and compares it with the
    /// stored checksum.
    ///
    /// The digest is computed over the concrete header layout: a V2.1
    /// header signs with the V2.1 serialization, a V1 header with V1.
    pub fn validate(&self) -> Result<(), Error> {
        let header = self.header.serialize();
        match self.checksum_kind {
            ChecksumKind::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(&header);
                hasher.update(&self.data);
                let actual = hasher.finalize();
                let expected = u32::from_le_bytes(
                    self.checksum[..4]
                        .try_into()
                        .map_err(|_| Error::HeaderDecode)?,
                );
                if actual != expected {
                    return Err(Error::ChecksumMismatch {
                        kind: ChecksumKind::Crc32,
                        expected: format!("{expected:08x}"),
                        actual: format!("{actual:08x}"),
                    });
                }
            }
            ChecksumKind::Sha256 => {
                let actual = Sha256::new()
                    .chain_update(&header)
                    .chain_update(&self.data)
                    .finalize();
                if actual.as_slice() != self.checksum {
                    return Err(Error::ChecksumMismatch {
                        kind: ChecksumKind::Sha256,
                        expected: hex_string(&self.checksum),
                        actual: hex_string(&actual),
                    });
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    use fmt::Write as _;
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Fixed prefix of each task record in a binary dump body.
#[derive(Debug, Clone, Copy)]
pub struct TaskHeader {
    /// Address of the task control block.
    pub tcb_addr: u32,
    /// Stack pointer at dump time.
    pub stack_top: u32,
    /// The other stack bound; numerically above `stack_top` when the stack
    /// grows downward.
    pub stack_end: u32,
}

impl TaskHeader {
    /// Lower stack bound.
    pub fn stack_base(&self) -> u32 {
        self.stack_top.min(self.stack_end)
    }

    /// Upper stack bound.
    pub fn stack_limit(&self) -> u32 {
        self.stack_top.max(self.stack_end)
    }

    /// Stack image length as stored in the body.
    pub fn stack_len(&self) -> u32 {
        self.stack_top.abs_diff(self.stack_end)
    }

    /// Whether the stack grows towards lower addresses.
    pub fn grows_down(&self) -> bool {
        self.stack_end > self.stack_top
    }
}

/// One task record: header, TCB image, stack image.
#[derive(Debug, Clone, Copy)]
pub struct TaskRecord<'a> {
    /// The fixed record prefix.
    pub header: TaskHeader,
    /// TCB memory, `tcb_sz` bytes.
    pub tcb: &'a [u8],
    /// Stack memory, `|stack_top - stack_end|` bytes.
    pub stack: &'a [u8],
}

/// One trailing memory segment of a V2 binary dump.
#[derive(Debug, Clone, Copy)]
pub struct MemSegment<'a> {
    /// Base address of the segment.
    pub addr: u32,
    /// Segment payload.
    pub data: &'a [u8],
}

/// Sequential reader over a binary dump body.
///
/// Task records come first, each field padded to a 4-byte boundary, then
/// the memory segment records.
pub(crate) struct BodyReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        BodyReader { data, offset: 0 }
    }

    fn word(&mut self) -> Result<u32, Error> {
        self.data
            .gread_with::<u32>(&mut self.offset, LE)
            .map_err(|_| Error::BodyDecode("unexpected end of body".into()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::BodyDecode("unexpected end of body".into()))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn align4(&mut self) {
        self.offset = (self.offset + 3) & !3;
    }

    pub(crate) fn task(&mut self, tcb_sz: u32) -> Result<TaskRecord<'a>, Error> {
        let header = TaskHeader {
            tcb_addr: self.word()?,
            stack_top: self.word()?,
            stack_end: self.word()?,
        };
        let tcb = self.take(tcb_sz as usize)?;
        self.align4();
        let stack = self.take(header.stack_len() as usize)?;
        self.align4();
        Ok(TaskRecord { header, tcb, stack })
    }

    pub(crate) fn mem_segment(&mut self) -> Result<MemSegment<'a>, Error> {
        let addr = self.word()?;
        let len = self.word()?;
        let data = self.take(len as usize)?;
        Ok(MemSegment { addr, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn signed_envelope(layout: HeaderLayout, dump_ver: u16, body: &[u8]) -> Vec<u8> {
        let tot_len = layout.size() + body.len() + 4;
        let mut header = vec![
            tot_len as u32,
            dump_ver as u32,
            1,      // task_num
            0x90,   // tcb_sz
        ];
        if layout != HeaderLayout::V1 {
            header.push(0); // segs_num
        }
        if layout == HeaderLayout::V2_1 {
            header.push(3); // chip_rev
        }
        let mut bytes = words(&header);
        bytes.extend_from_slice(body);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        let crc = hasher.finalize();
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn parses_each_layout() {
        let body = [0xAAu8; 8];
        for (layout, dump_ver) in [
            (HeaderLayout::V1, DumpVersion::BIN_V1),
            (HeaderLayout::V2, DumpVersion::BIN_V2),
            (HeaderLayout::V2_1, DumpVersion::BIN_V2_1),
        ] {
            let bytes = signed_envelope(layout, dump_ver, &body);
            let envelope = Envelope::parse(&bytes).unwrap();
            assert_eq!(envelope.header.layout(), layout);
            assert_eq!(envelope.checksum_kind, ChecksumKind::Crc32);
            assert_eq!(envelope.data(), &body);
            assert_eq!(envelope.header.segs_num.is_some(), layout != HeaderLayout::V1);
            assert_eq!(envelope.header.chip_rev, (layout == HeaderLayout::V2_1).then_some(3));
            envelope.validate().unwrap();
        }
    }

    #[test]
    fn any_flipped_bit_is_detected() {
        let bytes = signed_envelope(HeaderLayout::V2, DumpVersion::BIN_V2, &[0x55u8; 16]);
        // Flip one bit in the header, the body and the checksum field.
        for position in [9, bytes.len() - 10, bytes.len() - 1] {
            let mut corrupt = bytes.clone();
            corrupt[position] ^= 0x01;
            let envelope = Envelope::parse(&corrupt).unwrap();
            assert!(matches!(
                envelope.validate().unwrap_err(),
                Error::ChecksumMismatch {
                    kind: ChecksumKind::Crc32,
                    ..
                }
            ));
        }
    }

    #[test]
    fn digest_is_layout_sensitive() {
        // Sign a V2.1 envelope as if the header had the V2 shape: drop the
        // chip_rev word from the digest input.
        let body = [0x11u8; 8];
        let tot_len = HeaderLayout::V2_1.size() + body.len() + 4;
        let header = words(&[
            tot_len as u32,
            DumpVersion::BIN_V2_1 as u32,
            1,
            0x90,
            0, // segs_num
            3, // chip_rev
        ]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[..HeaderLayout::V2.size()]);
        hasher.update(&body);
        let wrong_crc = hasher.finalize();

        let mut bytes = header;
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&wrong_crc.to_le_bytes());

        let envelope = Envelope::parse(&bytes).unwrap();
        assert!(matches!(
            envelope.validate().unwrap_err(),
            Error::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn sha256_envelopes_validate() {
        let body = b"\x7fELF fake body";
        let tot_len = HeaderLayout::V2.size() + body.len() + 32;
        let header = words(&[
            tot_len as u32,
            DumpVersion::ELF_SHA256_V2 as u32,
            0,
            0,
            0,
        ]);
        let digest = Sha256::new()
            .chain_update(&header)
            .chain_update(body)
            .finalize();
        let mut bytes = header;
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&digest);

        let envelope = Envelope::parse(&bytes).unwrap();
        assert_eq!(envelope.checksum_kind, ChecksumKind::Sha256);
        envelope.validate().unwrap();

        let mut corrupt = bytes.clone();
        let body_pos = HeaderLayout::V2.size() + 2;
        corrupt[body_pos] ^= 0x80;
        let envelope = Envelope::parse(&corrupt).unwrap();
        assert!(matches!(
            envelope.validate().unwrap_err(),
            Error::ChecksumMismatch {
                kind: ChecksumKind::Sha256,
                ..
            }
        ));
    }

    #[test]
    fn truncated_envelopes_are_rejected() {
        let bytes = signed_envelope(HeaderLayout::V2, DumpVersion::BIN_V2, &[0u8; 32]);
        let err = Envelope::parse(&bytes[..bytes.len() - 8]).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedEnvelope {
                expected,
                actual,
            } if expected == bytes.len() && actual == bytes.len() - 8
        ));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let bytes = words(&[64, 0x0042, 0, 0]);
        assert!(matches!(
            Envelope::parse(&bytes).unwrap_err(),
            Error::UnsupportedVersion(0x0042)
        ));
    }

    #[test]
    fn body_reader_aligns_task_fields() {
        // tcb_sz = 6 and a 10-byte stack, both padded to 4.
        let mut body = words(&[0x3FFB_0000, 0x3FFB_4000, 0x3FFB_400A]);
        body.extend_from_slice(&[1, 2, 3, 4, 5, 6, 0, 0]); // tcb + pad
        body.extend_from_slice(&[9; 10]); // stack
        body.extend_from_slice(&[0, 0]); // pad
        body.extend_from_slice(&words(&[0x3FFC_0000, 4]));
        body.extend_from_slice(&[7, 7, 7, 7]);

        let mut reader = BodyReader::new(&body);
        let task = reader.task(6).unwrap();
        assert_eq!(task.header.tcb_addr, 0x3FFB_0000);
        assert_eq!(task.tcb, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(task.stack.len(), 10);
        assert!(task.header.grows_down());

        let seg = reader.mem_segment().unwrap();
        assert_eq!(seg.addr, 0x3FFC_0000);
        assert_eq!(seg.data, &[7, 7, 7, 7]);
    }

    #[test]
    fn body_reader_rejects_overruns() {
        let body = words(&[0x3FFB_0000, 0x3FFB_4000, 0x3FFB_4200]);
        let mut reader = BodyReader::new(&body);
        assert!(matches!(
            reader.task(0x90).unwrap_err(),
            Error::BodyDecode(_)
        ));
    }
}
