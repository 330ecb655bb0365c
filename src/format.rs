//! Input classification: pre-built ELF core, raw envelope, or base64 text.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::Error;
use crate::version::DumpVersion;

const ELF_MAGIC: &[u8] = b"\x7f\x45\x4c\x46";

/// How a core dump input is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFileFormat {
    /// A ready-made ELF core file, no envelope.
    Elf,
    /// A raw binary envelope.
    Raw,
    /// A base64-encoded binary envelope.
    B64,
}

impl CoreFileFormat {
    /// Classifies an input byte stream.
    pub fn detect(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.starts_with(ELF_MAGIC) {
            return Ok(CoreFileFormat::Elf);
        }

        // Only the low three bytes of the version word take part in the
        // classification; every dump writer leaves byte 7 zero.
        if bytes.len() >= 7 {
            let ver = u32::from(bytes[4])
                | u32::from(bytes[5]) << 8
                | u32::from(bytes[6]) << 16;
            if DumpVersion::is_recognized(DumpVersion(ver).dump_ver()) {
                return Ok(CoreFileFormat::Raw);
            }
        }

        // Neither header matched; accept the input as base64 if every line
        // of it decodes.
        if decode_base64_lines(bytes).is_ok() {
            Ok(CoreFileFormat::B64)
        } else {
            Err(Error::UnrecognizedFormat)
        }
    }
}

/// Decodes a base64-wrapped dump, one line at a time.
pub(crate) fn decode_base64_lines(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk = BASE64
            .decode(line.as_bytes())
            .map_err(|_| Error::UnrecognizedFormat)?;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf_magic_wins() {
        assert_eq!(
            CoreFileFormat::detect(b"\x7fELF rest does not matter").unwrap(),
            CoreFileFormat::Elf
        );
    }

    #[test]
    fn recognized_version_word_means_raw() {
        let mut bytes = vec![0u8; 16];
        bytes[0] = 64; // tot_len
        bytes[4..8].copy_from_slice(&(DumpVersion::BIN_V2 as u32).to_le_bytes());
        assert_eq!(
            CoreFileFormat::detect(&bytes).unwrap(),
            CoreFileFormat::Raw
        );
    }

    #[test]
    fn chip_id_does_not_affect_classification() {
        let mut bytes = vec![0u8; 16];
        let ver = (u32::from(crate::Chip::Esp32c3.chip_id()) << 16)
            | u32::from(DumpVersion::ELF_SHA256_V2);
        bytes[4..8].copy_from_slice(&ver.to_le_bytes());
        assert_eq!(
            CoreFileFormat::detect(&bytes).unwrap(),
            CoreFileFormat::Raw
        );
    }

    #[test]
    fn base64_text_is_detected_and_decoded() {
        let encoded = b"AAECAwQFBgc=\nCAkKCwwNDg8=\n";
        assert_eq!(
            CoreFileFormat::detect(encoded).unwrap(),
            CoreFileFormat::B64
        );
        let decoded = decode_base64_lines(encoded).unwrap();
        assert_eq!(decoded, (0u8..16).collect::<Vec<_>>());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = CoreFileFormat::detect(b"not a dump at all!").unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat));
    }
}
