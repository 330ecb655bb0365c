//! Crash image loading and core file synthesis.

use std::path::Path;

use anyhow::anyhow;

use crate::architecture::Architecture;
use crate::elf::{
    self, AppImage, CoreElfBuilder, NT_PRSTATUS, PT_ESP_EXTRA_INFO, PT_ESP_INFO, PT_ESP_TASK_INFO,
    SEGMENT_RW, TASK_STATUS_CORRECT, TASK_STATUS_STACK_CORRUPTED, TASK_STATUS_TCB_CORRUPTED,
    build_note,
};
use crate::envelope::{BodyReader, Envelope, TaskRecord};
use crate::error::Error;
use crate::format::{self, CoreFileFormat};
use crate::targets::{Chip, TargetProfile};
use crate::version::DumpVersion;

/// Options for core file synthesis.
#[derive(Default)]
pub struct CorefileOptions {
    /// The application image the dump is expected to come from. When set,
    /// ELF format dumps are cross-checked against its SHA-256 marker.
    pub app_image: Option<AppImage>,
}

/// Synthesizes a core file from any recognized input encoding.
///
/// A ready-made ELF core passes through unchanged; raw and base64 inputs go
/// through envelope validation and synthesis.
pub fn synthesize_corefile(bytes: &[u8], opts: &CorefileOptions) -> Result<Vec<u8>, Error> {
    match CoreFileFormat::detect(bytes)? {
        CoreFileFormat::Elf => Ok(bytes.to_vec()),
        CoreFileFormat::Raw | CoreFileFormat::B64 => {
            CoreDumpLoader::from_bytes(bytes)?.create_corefile(opts)
        }
    }
}

/// Owns one parsed dump envelope and drives core file synthesis.
#[derive(Debug)]
pub struct CoreDumpLoader {
    envelope: Envelope,
    chip: Chip,
}

impl CoreDumpLoader {
    /// Parses a dump from raw or base64-encoded bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let decoded;
        let raw = match CoreFileFormat::detect(bytes)? {
            CoreFileFormat::Raw => bytes,
            CoreFileFormat::B64 => {
                decoded = format::decode_base64_lines(bytes)?;
                decoded.as_slice()
            }
            CoreFileFormat::Elf => {
                return Err(Error::Other(anyhow!(
                    "input is already an ELF core file, there is no envelope to load"
                )));
            }
        };

        let envelope = Envelope::parse(raw)?;
        let chip_id = envelope.version.chip_id();
        let chip = Chip::from_chip_id(chip_id).ok_or(Error::UnsupportedChip(chip_id))?;
        tracing::debug!(
            "loaded {} dump v{}.{} for {}",
            envelope.checksum_kind,
            envelope.version.major(),
            envelope.version.minor(),
            chip
        );
        Ok(CoreDumpLoader { envelope, chip })
    }

    /// Reads and parses a dump file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// The chip the dump was captured on.
    pub fn chip(&self) -> Chip {
        self.chip
    }

    /// The target name for selecting a debugger, e.g. `esp32s3`.
    pub fn target_name(&self) -> &'static str {
        self.chip.name()
    }

    /// The silicon revision, when the header carries one.
    pub fn chip_rev(&self) -> Option<u32> {
        self.envelope.header.chip_rev
    }

    /// The parsed envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Validates the envelope and synthesizes the ELF core file.
    pub fn create_corefile(&self, opts: &CorefileOptions) -> Result<Vec<u8>, Error> {
        self.envelope.validate()?;
        if self.envelope.version.has_elf_body() {
            self.extract_elf_corefile(opts)
        } else {
            self.extract_bin_corefile()
        }
    }

    /// Synthesizes the core file and writes it to `path`.
    pub fn write_corefile(&self, path: &Path, opts: &CorefileOptions) -> Result<(), Error> {
        std::fs::write(path, self.create_corefile(opts)?)?;
        Ok(())
    }

    /// ELF format dumps carry a ready-made core file as their body.
    fn extract_elf_corefile(&self, opts: &CorefileOptions) -> Result<Vec<u8>, Error> {
        let mut core = self.envelope.data().to_vec();

        if let Some(chip_rev) = self.envelope.header.chip_rev {
            let note = build_note("ESP_CHIP_REV", PT_ESP_INFO, &chip_rev.to_le_bytes());
            core = elf::append_note_segment(&core, note)?;
        }

        if let Some(app) = &opts.app_image {
            if let Some(info) = elf::find_core_dump_info(&core)? {
                // The embedded marker may be shorter than a full digest;
                // the firmware NUL-pads whatever prefix it kept.
                let trimmed: &[u8] = match info.sha256.iter().position(|&b| b == 0) {
                    Some(end) => &info.sha256[..end],
                    None => &info.sha256,
                };
                let core_sha = std::str::from_utf8(trimmed)
                    .map_err(|_| Error::BodyDecode("core dump SHA256 is not valid hex".into()))?;
                let app_sha = app.sha256_hex();
                let app_sha = app_sha.get(..core_sha.len()).unwrap_or(app_sha);

                tracing::debug!("app SHA256: {app_sha}, core dump SHA256: {core_sha}");
                if core_sha != app_sha {
                    return Err(Error::AppImageMismatch {
                        core_sha: core_sha.to_string(),
                        app_sha: app_sha.to_string(),
                    });
                }
                if info.version != self.envelope.header.ver {
                    return Err(Error::VersionMismatch {
                        core_ver: info.version,
                        envelope_ver: self.envelope.header.ver,
                    });
                }
            }
        }

        Ok(core)
    }

    /// Binary format dumps are synthesized task by task.
    fn extract_bin_corefile(&self) -> Result<Vec<u8>, Error> {
        let profile = self.chip.profile();
        let arch = self.chip.architecture();
        let header = &self.envelope.header;

        let mut core = CoreElfBuilder::new(arch.e_machine());
        let mut prstatus_notes = Vec::new();
        let mut info_notes = Vec::new();
        let mut task_info_notes = Vec::new();

        let mut body = BodyReader::new(self.envelope.data());
        for task_index in 0..header.task_num {
            let task = body.task(header.tcb_sz)?;
            let mut task_flags = TASK_STATUS_CORRECT;

            task_flags |= self.emit_tcb_segment(&mut core, profile, &task);
            task_flags |= self.emit_stack_segment(&mut core, profile, &task);

            let regs = arch.registers_from_stack(task.stack, task.header.grows_down())?;
            prstatus_notes.extend(build_note(
                "CORE",
                NT_PRSTATUS,
                &arch.build_prstatus(task.header.tcb_addr, &regs),
            ));
            task_info_notes.extend(build_note(
                "TASK_INFO",
                PT_ESP_TASK_INFO,
                &task_status_desc(task_index, task_flags, &task),
            ));

            // The first record is the crash-origin task; it contributes the
            // dump info and extra info notes.
            if task_index == 0 {
                info_notes.extend(build_note(
                    "ESP_CORE_DUMP_INFO",
                    PT_ESP_INFO,
                    &header.ver.to_le_bytes(),
                ));
                let mut extra = vec![task.header.tcb_addr];
                if arch == Architecture::Xtensa {
                    for (id, value) in &regs.extra {
                        extra.push(*id);
                        extra.push(*value);
                    }
                }
                let desc: Vec<u8> = extra.iter().flat_map(|w| w.to_le_bytes()).collect();
                info_notes.extend(build_note("EXTRA_INFO", PT_ESP_EXTRA_INFO, &desc));
            }
        }

        if let Some(segs_num) = header.segs_num {
            if self.envelope.version.dump_ver() == DumpVersion::BIN_V2 {
                for _ in 0..segs_num {
                    let seg = body.mem_segment()?;
                    tracing::debug!(
                        "read memory segment {} bytes @ {:#010x}",
                        seg.data.len(),
                        seg.addr
                    );
                    core.add_load_segment(seg.addr, seg.data.to_vec(), SEGMENT_RW)?;
                }
            } else if segs_num > 0 {
                tracing::warn!(
                    "dump carries {segs_num} memory segments, which this dump version does not emit"
                );
            }
        }

        core.add_note_segment(prstatus_notes);
        core.add_note_segment(info_notes);
        core.add_note_segment(task_info_notes);
        Ok(core.build())
    }

    /// Emits the TCB as a loadable segment when it passes the sanity
    /// checks; returns the status flags the attempt earned.
    fn emit_tcb_segment(
        &self,
        core: &mut CoreElfBuilder,
        profile: &TargetProfile,
        task: &TaskRecord<'_>,
    ) -> u32 {
        let tcb_addr = task.header.tcb_addr;
        let tcb_sz = self.envelope.header.tcb_sz;
        if profile.tcb_is_sane(tcb_addr, tcb_sz) {
            if let Err(err) = core.add_load_segment(tcb_addr, task.tcb.to_vec(), SEGMENT_RW) {
                tracing::warn!("skipping TCB {tcb_sz} bytes @ {tcb_addr:#010x} ({err})");
            }
        } else if tcb_addr != 0 && profile.addr_is_fake(tcb_addr) {
            return TASK_STATUS_TCB_CORRUPTED;
        } else {
            tracing::warn!("skipping TCB {tcb_sz} bytes @ {tcb_addr:#010x} (failed sanity check)");
        }
        TASK_STATUS_CORRECT
    }

    /// Emits the stack as a loadable segment. A stack at a fake address is
    /// still emitted, flagged as corrupted.
    fn emit_stack_segment(
        &self,
        core: &mut CoreElfBuilder,
        profile: &TargetProfile,
        task: &TaskRecord<'_>,
    ) -> u32 {
        let stack_base = task.header.stack_base();
        let stack_len_aligned = elf::align4(task.header.stack_len() as usize);
        if profile.stack_is_sane(stack_base, task.header.stack_limit()) {
            if let Err(err) = core.add_load_segment(stack_base, task.stack.to_vec(), SEGMENT_RW) {
                tracing::warn!(
                    "skipping task ({:#010x}) stack {stack_len_aligned} bytes @ {stack_base:#010x} ({err})",
                    task.header.tcb_addr,
                );
            }
        } else if stack_base != 0 && profile.addr_is_fake(stack_base) {
            if let Err(err) = core.add_load_segment(stack_base, task.stack.to_vec(), SEGMENT_RW) {
                tracing::warn!(
                    "skipping task ({:#010x}) stack {stack_len_aligned} bytes @ {stack_base:#010x} ({err})",
                    task.header.tcb_addr,
                );
            }
            return TASK_STATUS_STACK_CORRUPTED;
        } else {
            tracing::warn!(
                "skipping task ({:#010x}) stack {stack_len_aligned} bytes @ {stack_base:#010x} (failed sanity check)",
                task.header.tcb_addr,
            );
        }
        TASK_STATUS_CORRECT
    }
}

/// Description payload of a `TASK_INFO` note.
fn task_status_desc(task_index: u32, task_flags: u32, task: &TaskRecord<'_>) -> Vec<u8> {
    let mut desc = Vec::with_capacity(40);
    desc.extend_from_slice(&task_index.to_le_bytes());
    desc.extend_from_slice(&task_flags.to_le_bytes());
    desc.extend_from_slice(&task.header.tcb_addr.to_le_bytes());
    desc.extend_from_slice(&task.header.stack_base().to_le_bytes());
    desc.extend_from_slice(&task.header.stack_limit().to_le_bytes());
    desc.extend_from_slice(&(elf::align4(task.header.stack_len() as usize) as u32).to_le_bytes());
    // No task names in binary dumps; the field stays NUL.
    desc.resize(40, 0);
    desc
}
