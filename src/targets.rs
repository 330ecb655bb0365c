//! Chip descriptions: memory windows and address sanity checks.
//!
//! One record per supported chip, carrying the memory-region constants the
//! synthesizer needs to decide whether a TCB or stack address recovered from
//! a dump can possibly be real.

use std::fmt;
use std::ops::Range;

use crate::architecture::Architecture;

/// Window used by the firmware to mark a missing or corrupted stack pointer.
const FAKE_STACK: Range<u32> = 0x2000_0000..0x3000_0000;

/// Largest stack a task record may claim.
const MAX_TASK_STACK_SIZE: u32 = 64 * 1024;

/// A chip that can produce core dumps this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Chip {
    Esp32,
    Esp32s2,
    Esp32s3,
    Esp32c3,
    Esp32c2,
    Esp32c6,
    Esp32h2,
}

impl Chip {
    /// Looks up a chip by the id found in the version word of a dump.
    pub fn from_chip_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Chip::Esp32),
            2 => Some(Chip::Esp32s2),
            9 => Some(Chip::Esp32s3),
            5 => Some(Chip::Esp32c3),
            12 => Some(Chip::Esp32c2),
            13 => Some(Chip::Esp32c6),
            16 => Some(Chip::Esp32h2),
            _ => None,
        }
    }

    /// The chip id used in dump version words.
    pub fn chip_id(self) -> u16 {
        match self {
            Chip::Esp32 => 0,
            Chip::Esp32s2 => 2,
            Chip::Esp32s3 => 9,
            Chip::Esp32c3 => 5,
            Chip::Esp32c2 => 12,
            Chip::Esp32c6 => 13,
            Chip::Esp32h2 => 16,
        }
    }

    /// The target name, as used to select a debugger binary.
    pub fn name(self) -> &'static str {
        match self {
            Chip::Esp32 => "esp32",
            Chip::Esp32s2 => "esp32s2",
            Chip::Esp32s3 => "esp32s3",
            Chip::Esp32c3 => "esp32c3",
            Chip::Esp32c2 => "esp32c2",
            Chip::Esp32c6 => "esp32c6",
            Chip::Esp32h2 => "esp32h2",
        }
    }

    /// The instruction set architecture of the chip.
    pub fn architecture(self) -> Architecture {
        match self {
            Chip::Esp32 | Chip::Esp32s2 | Chip::Esp32s3 => Architecture::Xtensa,
            Chip::Esp32c3 | Chip::Esp32c2 | Chip::Esp32c6 | Chip::Esp32h2 => Architecture::Riscv,
        }
    }

    /// The memory map of the chip.
    pub fn profile(self) -> &'static TargetProfile {
        match self {
            Chip::Esp32 => &ESP32,
            Chip::Esp32s2 => &ESP32S2,
            Chip::Esp32s3 => &ESP32S3,
            Chip::Esp32c3 => &ESP32C3,
            Chip::Esp32c2 => &ESP32C2,
            Chip::Esp32c6 => &ESP32C6,
            Chip::Esp32h2 => &ESP32H2,
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-chip memory map, as half-open address windows.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    /// Data RAM.
    pub dram: Range<u32>,
    /// Instruction RAM.
    pub iram: Range<u32>,
    /// RTC slow memory.
    pub rtc_slow: Range<u32>,
    /// RTC fast memory, data bus mapping.
    pub rtc_dram_fast: Range<u32>,
}

impl TargetProfile {
    /// Whether `addr` lies in data RAM.
    pub fn in_dram(&self, addr: u32) -> bool {
        self.dram.contains(&addr)
    }

    /// Whether `addr` lies in instruction RAM.
    pub fn in_iram(&self, addr: u32) -> bool {
        self.iram.contains(&addr)
    }

    /// Whether `addr` lies in RTC slow memory.
    pub fn in_rtc_slow(&self, addr: u32) -> bool {
        self.rtc_slow.contains(&addr)
    }

    /// Whether `addr` lies in RTC fast memory.
    pub fn in_rtc_dram_fast(&self, addr: u32) -> bool {
        self.rtc_dram_fast.contains(&addr)
    }

    /// A TCB is sane when it lies entirely within a single memory window.
    pub fn tcb_is_sane(&self, tcb_addr: u32, tcb_sz: u32) -> bool {
        let last = tcb_addr.wrapping_add(tcb_sz).wrapping_sub(1);
        [&self.dram, &self.iram, &self.rtc_slow, &self.rtc_dram_fast]
            .into_iter()
            .any(|window| window.contains(&tcb_addr) && window.contains(&last))
    }

    fn stack_ptr_in_dram(&self, addr: u32) -> bool {
        addr >= self.dram.start + 0x10 && addr <= self.dram.end - 0x10
    }

    /// A stack is sane when it is a small, aligned window inside data RAM.
    ///
    /// `start` must be 16-byte aligned; both ends must keep a 16-byte guard
    /// distance from the DRAM window edges.
    pub fn stack_is_sane(&self, start: u32, end: u32) -> bool {
        start & 0xF == 0
            && self.stack_ptr_in_dram(start)
            && self.stack_ptr_in_dram(end)
            && start < end
            && end - start < MAX_TASK_STACK_SIZE
    }

    /// Whether `addr` is a sentinel for a corrupted or missing pointer.
    pub fn addr_is_fake(&self, addr: u32) -> bool {
        FAKE_STACK.contains(&addr) || addr > 0x7FFF_FFFF
    }
}

static ESP32: TargetProfile = TargetProfile {
    dram: 0x3FFA_E000..0x4000_0000,
    iram: 0x4008_0000..0x400A_0000,
    rtc_slow: 0x5000_0000..0x5000_2000,
    rtc_dram_fast: 0x3FF8_0000..0x3FF8_2000,
};

static ESP32S2: TargetProfile = TargetProfile {
    dram: 0x3FFB_0000..0x4000_0000,
    iram: 0x4002_0000..0x4007_0000,
    rtc_slow: 0x5000_0000..0x5000_2000,
    rtc_dram_fast: 0x3FF9_E000..0x3FFA_0000,
};

static ESP32S3: TargetProfile = TargetProfile {
    dram: 0x3FC8_8000..0x3FD0_0000,
    iram: 0x4037_0000..0x403E_0000,
    rtc_slow: 0x5000_0000..0x5000_2000,
    rtc_dram_fast: 0x600F_E000..0x6010_0000,
};

static ESP32C3: TargetProfile = TargetProfile {
    dram: 0x3FC8_0000..0x3FCE_0000,
    iram: 0x4037_C000..0x403E_0000,
    rtc_slow: 0x5000_0000..0x5000_2000,
    rtc_dram_fast: 0x5000_0000..0x5000_2000,
};

// The C2 has no RTC memory; the windows are empty on purpose.
static ESP32C2: TargetProfile = TargetProfile {
    dram: 0x3FCA_0000..0x3FCE_0000,
    iram: 0x4037_C000..0x403C_0000,
    rtc_slow: 0x0000_0000..0x0000_0000,
    rtc_dram_fast: 0x0000_0000..0x0000_0000,
};

static ESP32C6: TargetProfile = TargetProfile {
    dram: 0x4080_0000..0x4088_0000,
    iram: 0x4080_0000..0x4088_0000,
    rtc_slow: 0x5000_0000..0x5000_4000,
    rtc_dram_fast: 0x5000_0000..0x5000_4000,
};

static ESP32H2: TargetProfile = TargetProfile {
    dram: 0x4080_0000..0x4085_0000,
    iram: 0x4080_0000..0x4085_0000,
    rtc_slow: 0x5000_0000..0x5000_1000,
    rtc_dram_fast: 0x5000_0000..0x5000_1000,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_ids_round_trip() {
        for chip in [
            Chip::Esp32,
            Chip::Esp32s2,
            Chip::Esp32s3,
            Chip::Esp32c3,
            Chip::Esp32c2,
            Chip::Esp32c6,
            Chip::Esp32h2,
        ] {
            assert_eq!(Chip::from_chip_id(chip.chip_id()), Some(chip));
        }
        assert_eq!(Chip::from_chip_id(1), None);
        assert_eq!(Chip::from_chip_id(0xFFFF), None);
    }

    #[test]
    fn tcb_must_fit_a_single_window() {
        let profile = Chip::Esp32.profile();
        assert!(profile.tcb_is_sane(0x3FFB_0000, 0x90));
        assert!(profile.tcb_is_sane(0x4008_0000, 0x90));
        // Straddles the end of DRAM.
        assert!(!profile.tcb_is_sane(0x3FFF_FFF0, 0x90));
        // Entirely outside every window.
        assert!(!profile.tcb_is_sane(0x2000_0000, 0x90));
        assert!(!profile.tcb_is_sane(0, 0x90));
    }

    #[test]
    fn stack_sanity() {
        let profile = Chip::Esp32.profile();
        assert!(profile.stack_is_sane(0x3FFB_4000, 0x3FFB_4200));
        // Misaligned start.
        assert!(!profile.stack_is_sane(0x3FFB_4004, 0x3FFB_4200));
        // Inverted and empty ranges.
        assert!(!profile.stack_is_sane(0x3FFB_4200, 0x3FFB_4000));
        assert!(!profile.stack_is_sane(0x3FFB_4000, 0x3FFB_4000));
        // Larger than any real task stack.
        assert!(!profile.stack_is_sane(0x3FFB_0000, 0x3FFB_0000 + 0x1_0000));
        // Outside DRAM.
        assert!(!profile.stack_is_sane(0x2000_0000, 0x2000_0200));
        // Too close to the DRAM window edge.
        assert!(!profile.stack_is_sane(0x3FFA_E000, 0x3FFA_E200));
    }

    #[test]
    fn fake_addresses() {
        let profile = Chip::Esp32.profile();
        assert!(profile.addr_is_fake(0x2000_0000));
        assert!(profile.addr_is_fake(0x2FFF_FFFF));
        assert!(!profile.addr_is_fake(0x3000_0000));
        assert!(profile.addr_is_fake(0x8000_0000));
        assert!(profile.addr_is_fake(0xFFFF_FFFF));
        assert!(!profile.addr_is_fake(0x3FFB_0000));
    }
}
