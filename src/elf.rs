//! Minimal ELF32 model: enough to read an application image or a pre-built
//! core, and to emit a core file a debugger accepts.
//!
//! Reading goes through [`object`]; writing is assembled by hand since a
//! core file is just a file header, a program header table and 4-aligned
//! segment payloads.

use std::path::Path;

use object::elf::{ET_CORE, PF_R, PF_W, PT_LOAD, PT_NOTE};
use object::read::elf::{ElfFile32, FileHeader as _, ProgramHeader as _};
use object::Object as _;
use sha2::{Digest, Sha256};

use crate::envelope::hex_string;
use crate::error::Error;

/// ELF note type of a PRSTATUS note.
pub const NT_PRSTATUS: u32 = 1;

/// Note type of the `ESP_CORE_DUMP_INFO` and `ESP_CHIP_REV` notes.
pub const PT_ESP_INFO: u32 = 0x6000_0001;
/// Note type of the per-task `TASK_INFO` notes.
pub const PT_ESP_TASK_INFO: u32 = 0x6000_0002;
/// Note type of the crash-origin `EXTRA_INFO` note.
pub const PT_ESP_EXTRA_INFO: u32 = 0x6000_0003;

/// Task status flags used in `TASK_INFO` notes.
pub const TASK_STATUS_CORRECT: u32 = 0;
/// The TCB address failed the sanity checks.
pub const TASK_STATUS_TCB_CORRUPTED: u32 = 1 << 0;
/// The stack bounds failed the sanity checks.
pub const TASK_STATUS_STACK_CORRUPTED: u32 = 1 << 1;

const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

pub(crate) fn align4(value: usize) -> usize {
    (value + 3) & !3
}

struct Segment {
    p_type: u32,
    flags: u32,
    vaddr: u32,
    data: Vec<u8>,
}

/// Builder for an ELF32 core file.
///
/// Segments appear in the output in insertion order; loadable segments are
/// checked for overlapping virtual ranges as they are added.
pub struct CoreElfBuilder {
    e_type: u16,
    e_machine: u16,
    e_entry: u32,
    e_flags: u32,
    segments: Vec<Segment>,
}

impl CoreElfBuilder {
    /// Creates a builder for a core file of the given machine type.
    pub fn new(e_machine: u16) -> Self {
        CoreElfBuilder {
            e_type: ET_CORE,
            e_machine,
            e_entry: 0,
            e_flags: 0,
            segments: Vec::new(),
        }
    }

    /// Adds a PT_LOAD segment at `vaddr`.
    ///
    /// Empty segments never conflict; non-empty segments must not overlap
    /// any previously added loadable range.
    pub fn add_load_segment(&mut self, vaddr: u32, data: Vec<u8>, flags: u32) -> Result<(), Error> {
        let len = data.len() as u32;
        if len > 0 {
            for existing in self.segments.iter().filter(|s| s.p_type == PT_LOAD) {
                let existing_len = existing.data.len() as u32;
                if existing_len == 0 {
                    continue;
                }
                if existing.vaddr < vaddr.saturating_add(len)
                    && vaddr < existing.vaddr.saturating_add(existing_len)
                {
                    return Err(Error::SegmentConflict {
                        addr_a: vaddr,
                        len_a: len,
                        addr_b: existing.vaddr,
                        len_b: existing_len,
                    });
                }
            }
        }
        self.segments.push(Segment {
            p_type: PT_LOAD,
            flags,
            vaddr,
            data,
        });
        Ok(())
    }

    /// Adds a PT_NOTE segment. Note segments always use `vaddr = 0` and may
    /// repeat.
    pub fn add_note_segment(&mut self, data: Vec<u8>) {
        self.segments.push(Segment {
            p_type: PT_NOTE,
            flags: 0,
            vaddr: 0,
            data,
        });
    }

    fn set_identity(&mut self, e_type: u16, e_entry: u32, e_flags: u32) {
        self.e_type = e_type;
        self.e_entry = e_entry;
        self.e_flags = e_flags;
    }

    /// Serializes the core file.
    pub fn build(&self) -> Vec<u8> {
        let phdr_table = EHDR_SIZE + PHDR_SIZE * self.segments.len();
        let mut out = Vec::with_capacity(align4(phdr_table));

        // e_ident
        out.extend_from_slice(&ELFMAG);
        out.extend_from_slice(&[ELFCLASS32, ELFDATA2LSB, EV_CURRENT]);
        out.extend_from_slice(&[0; 9]);

        out.extend_from_slice(&self.e_type.to_le_bytes());
        out.extend_from_slice(&self.e_machine.to_le_bytes());
        out.extend_from_slice(&u32::from(EV_CURRENT).to_le_bytes());
        out.extend_from_slice(&self.e_entry.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&self.e_flags.to_le_bytes());
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

        // Program headers, payload offsets assigned front to back.
        let mut offset = phdr_table;
        for segment in &self.segments {
            offset = align4(offset);
            let filesz = segment.data.len() as u32;
            out.extend_from_slice(&segment.p_type.to_le_bytes());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&segment.vaddr.to_le_bytes()); // p_vaddr
            out.extend_from_slice(&segment.vaddr.to_le_bytes()); // p_paddr
            out.extend_from_slice(&filesz.to_le_bytes()); // p_filesz
            out.extend_from_slice(&filesz.to_le_bytes()); // p_memsz
            out.extend_from_slice(&segment.flags.to_le_bytes());
            out.extend_from_slice(&4u32.to_le_bytes()); // p_align
            offset += segment.data.len();
        }

        for segment in &self.segments {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            out.extend_from_slice(&segment.data);
        }
        out
    }
}

/// Builds one ELF note: `namesz`/`descsz`/`type`, the NUL-terminated name
/// and the description, each padded to a 4-byte boundary.
pub fn build_note(name: &str, note_type: u32, desc: &[u8]) -> Vec<u8> {
    let namesz = name.len() + 1;
    let mut out = Vec::with_capacity(12 + align4(namesz) + align4(desc.len()));
    out.extend_from_slice(&(namesz as u32).to_le_bytes());
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&note_type.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.resize(12 + align4(namesz), 0);
    out.extend_from_slice(desc);
    out.resize(out.len() + align4(desc.len()) - desc.len(), 0);
    out
}

/// Re-emits a pre-built core image with one extra PT_NOTE segment appended.
pub(crate) fn append_note_segment(core: &[u8], note_data: Vec<u8>) -> Result<Vec<u8>, Error> {
    let elf = ElfFile32::<object::Endianness>::parse(core)?;
    let endianness = elf.endianness();
    let header = elf.raw_header();

    let mut builder = CoreElfBuilder::new(header.e_machine(endianness));
    builder.set_identity(
        header.e_type(endianness),
        header.e_entry(endianness),
        header.e_flags(endianness),
    );
    for ph in elf.raw_segments() {
        let data = ph
            .data(endianness, core)
            .map_err(|()| Error::BodyDecode("ELF segment data out of bounds".into()))?;
        builder.segments.push(Segment {
            p_type: ph.p_type(endianness),
            flags: ph.p_flags(endianness),
            vaddr: ph.p_vaddr(endianness),
            data: data.to_vec(),
        });
    }
    builder.add_note_segment(note_data);
    Ok(builder.build())
}

/// The `ESP_CORE_DUMP_INFO` note a crashing application embeds into an ELF
/// format dump: the version word and the application's SHA-256 marker.
pub(crate) struct CoreDumpInfoNote {
    pub(crate) version: u32,
    /// Hex digest, NUL-padded to 64 bytes by the firmware.
    pub(crate) sha256: Vec<u8>,
}

/// Finds the `ESP_CORE_DUMP_INFO` note in a core file, if present.
pub(crate) fn find_core_dump_info(core: &[u8]) -> Result<Option<CoreDumpInfoNote>, Error> {
    let elf = ElfFile32::<object::Endianness>::parse(core)?;
    let endianness = elf.endianness();
    for ph in elf.raw_segments() {
        if ph.p_type(endianness) != PT_NOTE {
            continue;
        }
        let Some(mut notes) = ph.notes(endianness, core)? else {
            continue;
        };
        while let Some(note) = notes.next()? {
            if note.name() != b"ESP_CORE_DUMP_INFO" || note.n_type(endianness) != PT_ESP_INFO {
                continue;
            }
            let desc = note.desc();
            if desc.len() < 4 + 64 {
                return Err(Error::BodyDecode(format!(
                    "core dump info note is too short: {} bytes",
                    desc.len()
                )));
            }
            return Ok(Some(CoreDumpInfoNote {
                version: u32::from_le_bytes(desc[..4].try_into().unwrap()),
                sha256: desc[4..68].to_vec(),
            }));
        }
    }
    Ok(None)
}

/// An application image, used to cross-check ELF format dumps.
pub struct AppImage {
    sha256_hex: String,
}

impl AppImage {
    /// Wraps the raw bytes of an application ELF.
    ///
    /// The bytes must parse as 32-bit ELF; the image marker is the SHA-256
    /// digest of the whole file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        ElfFile32::<object::Endianness>::parse(bytes)?;
        let digest = Sha256::digest(bytes);
        Ok(AppImage {
            sha256_hex: hex_string(&digest),
        })
    }

    /// Reads an application ELF from disk.
    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// The image marker: the file digest as lowercase hex.
    pub fn sha256_hex(&self) -> &str {
        &self.sha256_hex
    }
}

/// Flags for a read-write loadable segment.
pub(crate) const SEGMENT_RW: u32 = PF_R | PF_W;
