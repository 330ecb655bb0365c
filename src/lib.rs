//! Decoder for crash images produced by ESP firmware, and synthesizer of
//! ELF core files debuggers consume directly.
//!
//! A dump is an integrity-checked binary envelope captured from flash or a
//! file. Its body either holds raw task records (TCB and stack memory, from
//! which per-task register state is reconstructed) or a ready-made ELF
//! core. Either way the result is an ELF32 core file with `PT_LOAD`
//! segments for the recovered memory and `PT_NOTE` segments carrying
//! PRSTATUS, task-info and extra-info notes.
//!
//! ```no_run
//! use esp_coredump::{CoreDumpLoader, CorefileOptions};
//!
//! # fn main() -> Result<(), esp_coredump::Error> {
//! let loader = CoreDumpLoader::from_file("coredump.bin".as_ref())?;
//! println!("dump captured on {}", loader.target_name());
//! loader.write_corefile("coredump.elf".as_ref(), &CorefileOptions::default())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod architecture;
pub mod elf;
mod envelope;
mod error;
mod format;
mod loader;
mod targets;
mod version;

pub use crate::architecture::Architecture;
pub use crate::elf::{AppImage, CoreElfBuilder};
pub use crate::envelope::{ChecksumKind, Envelope, EnvelopeHeader, HeaderLayout};
pub use crate::error::Error;
pub use crate::format::CoreFileFormat;
pub use crate::loader::{synthesize_corefile, CoreDumpLoader, CorefileOptions};
pub use crate::targets::{Chip, TargetProfile};
pub use crate::version::DumpVersion;
