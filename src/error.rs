use crate::envelope::ChecksumKind;

/// The overarching error type which contains all possible errors as variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input matches none of the known core dump encodings.
    #[error(
        "The format of the core file is not recognized. \
         Expected an ELF core, a raw dump or a base64-encoded dump"
    )]
    UnrecognizedFormat,
    /// The dump format version is not supported.
    #[error("Core dump version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    /// The chip id in the version word does not name a supported target.
    #[error("Core dump chip {0:#06x} is not supported")]
    UnsupportedChip(u16),
    /// The header claims more bytes than the input holds.
    #[error("Core dump is truncated: the header claims {expected} bytes but the input holds {actual}")]
    TruncatedEnvelope {
        /// Envelope length from the header's `tot_len` field.
        expected: usize,
        /// Actual input length.
        actual: usize,
    },
    /// The envelope header could not be decoded.
    #[error("Malformed core dump header")]
    HeaderDecode,
    /// The envelope body could not be decoded.
    #[error("Malformed core dump body: {0}")]
    BodyDecode(String),
    /// The checksum stored in the envelope does not match the payload.
    #[error("Invalid core dump {kind} checksum {actual}, should be {expected}")]
    ChecksumMismatch {
        /// The digest kind the envelope is signed with.
        kind: ChecksumKind,
        /// The checksum stored in the envelope, as hex.
        expected: String,
        /// The checksum computed over the payload, as hex.
        actual: String,
    },
    /// The core dump was produced by a different application image.
    #[error("Invalid application image for coredump: coredump SHA256 ({core_sha}) != app SHA256 ({app_sha})")]
    AppImageMismatch {
        /// The digest prefix embedded in the core dump.
        core_sha: String,
        /// The matching prefix of the application image digest.
        app_sha: String,
    },
    /// The version recorded inside the core file disagrees with the envelope.
    #[error("Invalid application image for coredump: core version {core_ver:#010x} != envelope version {envelope_ver:#010x}")]
    VersionMismatch {
        /// Version word stored in the core file's info note.
        core_ver: u32,
        /// Version word from the envelope header.
        envelope_ver: u32,
    },
    /// Two loadable segments claim overlapping address ranges.
    #[error("Cannot add overlapping region {addr_a:#010x}+{len_a:#x}, it conflicts with {addr_b:#010x}+{len_b:#x}")]
    SegmentConflict {
        /// Start address of the rejected segment.
        addr_a: u32,
        /// Length of the rejected segment.
        len_a: u32,
        /// Start address of the segment already present.
        addr_b: u32,
        /// Length of the segment already present.
        len_b: u32,
    },
    /// Upward-growing stacks cannot be decoded.
    #[error("Cannot get registers from a stack growing upward")]
    UnsupportedStackDirection,
    /// The stack image is smaller than the architecture's smallest frame.
    #[error("Stack of {len} bytes is too small to hold a {need} byte frame")]
    StackTooSmall {
        /// Bytes of stack memory present in the task record.
        len: usize,
        /// Bytes required by the frame layout.
        need: usize,
    },
    /// Reading or writing a file failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    /// Parsing an ELF image failed.
    #[error("Invalid ELF file")]
    ObjectRead(#[from] object::read::Error),
    /// Any other error occurred.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
