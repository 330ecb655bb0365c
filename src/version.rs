//! The packed version word found in every dump envelope.

/// Version word from the envelope header.
///
/// The high half carries the chip id, the low half the dump format version
/// packed as `(major << 8) | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpVersion(pub u32);

impl DumpVersion {
    /// Legacy binary dump (before IDF v4.1), CRC32 checksum.
    pub const BIN_V1: u16 = Self::make_dump_ver(0, 1);
    /// Binary dump with trailing memory segments, CRC32 checksum.
    pub const BIN_V2: u16 = Self::make_dump_ver(0, 2);
    /// Binary dump with memory segments and chip revision, CRC32 checksum.
    pub const BIN_V2_1: u16 = Self::make_dump_ver(0, 3);
    /// Pre-built ELF payload, CRC32 checksum.
    pub const ELF_CRC32_V2: u16 = Self::make_dump_ver(1, 0);
    /// Pre-built ELF payload, SHA-256 checksum.
    pub const ELF_SHA256_V2: u16 = Self::make_dump_ver(1, 1);
    /// Pre-built ELF payload with chip revision, CRC32 checksum.
    pub const ELF_CRC32_V2_1: u16 = Self::make_dump_ver(1, 2);
    /// Pre-built ELF payload with chip revision, SHA-256 checksum.
    pub const ELF_SHA256_V2_1: u16 = Self::make_dump_ver(1, 3);

    const RECOGNIZED: [u16; 7] = [
        Self::BIN_V1,
        Self::BIN_V2,
        Self::BIN_V2_1,
        Self::ELF_CRC32_V2,
        Self::ELF_SHA256_V2,
        Self::ELF_CRC32_V2_1,
        Self::ELF_SHA256_V2_1,
    ];

    /// Packs a major/minor pair into the low half of the version word.
    pub const fn make_dump_ver(major: u8, minor: u8) -> u16 {
        ((major as u16) << 8) | minor as u16
    }

    /// The chip id (high half of the version word).
    pub const fn chip_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The dump format version (low half of the version word).
    pub const fn dump_ver(self) -> u16 {
        self.0 as u16
    }

    /// Major part of the dump format version.
    pub const fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Minor part of the dump format version.
    pub const fn minor(self) -> u8 {
        self.0 as u8
    }

    /// Whether `dump_ver` names a known dump format version.
    pub fn is_recognized(dump_ver: u16) -> bool {
        Self::RECOGNIZED.contains(&dump_ver)
    }

    /// Whether the body is a pre-built ELF rather than binary task records.
    pub fn has_elf_body(self) -> bool {
        matches!(
            self.dump_ver(),
            Self::ELF_CRC32_V2 | Self::ELF_SHA256_V2 | Self::ELF_CRC32_V2_1 | Self::ELF_SHA256_V2_1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_ver_round_trips_major_minor() {
        for (major, minor) in [(0, 1), (0, 2), (0, 3), (1, 0), (1, 1), (1, 2), (1, 3)] {
            let packed = DumpVersion::make_dump_ver(major, minor);
            assert!(DumpVersion::is_recognized(packed));
            let version = DumpVersion(packed as u32);
            assert_eq!(version.major(), major);
            assert_eq!(version.minor(), minor);
        }
    }

    #[test]
    fn version_word_splits_into_chip_and_dump_ver() {
        let version = DumpVersion(0x0009_0103);
        assert_eq!(version.chip_id(), 9);
        assert_eq!(version.dump_ver(), DumpVersion::ELF_SHA256_V2_1);
        assert!(version.has_elf_body());

        let version = DumpVersion(0x0005_0002);
        assert_eq!(version.chip_id(), 5);
        assert_eq!(version.dump_ver(), DumpVersion::BIN_V2);
        assert!(!version.has_elf_body());
    }

    #[test]
    fn unknown_dump_vers_are_rejected() {
        for dump_ver in [0x0000, 0x0004, 0x0104, 0x0200, 0xFFFF] {
            assert!(!DumpVersion::is_recognized(dump_ver));
        }
    }
}
