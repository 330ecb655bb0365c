//! Architecture specific register recovery.
//!
//! Each supported instruction set knows how to read the frame its RTOS
//! crash hook pushed onto a task stack, and how to lay the recovered
//! registers out in a PRSTATUS note description.

pub mod riscv;
pub mod xtensa;

use object::elf::{EM_RISCV, EM_XTENSA};

use crate::error::Error;

// PRSTATUS prefix offsets shared by both architectures.
const PR_PID_OFFSET: usize = 24;
const PR_REG_OFFSET: usize = 72;

/// The instruction set architecture of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// Xtensa LX6/LX7 with the windowed ABI.
    Xtensa,
    /// 32-bit RISC-V.
    Riscv,
}

impl Architecture {
    /// The `e_machine` value for core files of this architecture.
    pub fn e_machine(self) -> u16 {
        match self {
            Architecture::Xtensa => EM_XTENSA,
            Architecture::Riscv => EM_RISCV,
        }
    }

    /// Decodes the frame the crash hook saved on top of a task stack.
    ///
    /// `grows_down` is derived from the task record's stack bounds; stacks
    /// growing upward are rejected.
    pub fn registers_from_stack(
        self,
        stack: &[u8],
        grows_down: bool,
    ) -> Result<TaskRegisters, Error> {
        match self {
            Architecture::Xtensa => xtensa::registers_from_stack(stack, grows_down),
            Architecture::Riscv => riscv::registers_from_stack(stack, grows_down),
        }
    }

    /// Builds the PRSTATUS note description for one task.
    ///
    /// Non-register prefix fields are zero except `pr_pid`, which carries
    /// the TCB address so the debugger can tell tasks apart.
    pub fn build_prstatus(self, tcb_addr: u32, regs: &TaskRegisters) -> Vec<u8> {
        let total = match self {
            Architecture::Xtensa => xtensa::PRSTATUS_SIZE,
            Architecture::Riscv => riscv::PRSTATUS_SIZE,
        };
        let mut desc = vec![0u8; total];
        desc[PR_PID_OFFSET..PR_PID_OFFSET + 4].copy_from_slice(&tcb_addr.to_le_bytes());
        for (index, reg) in regs.gregs.iter().enumerate() {
            let offset = PR_REG_OFFSET + index * 4;
            desc[offset..offset + 4].copy_from_slice(&reg.to_le_bytes());
        }
        desc
    }
}

/// Registers recovered from one task stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRegisters {
    /// The PRSTATUS register image, in the architecture's gregset order.
    pub gregs: Vec<u32>,
    /// Exception registers that have no gregset slot, as `(id, value)`
    /// pairs for the extra-info note. Always empty on RISC-V.
    pub extra: Vec<(u32, u32)>,
}

/// Reads the little-endian word at `index` from a stack image.
///
/// Callers must have checked that the frame fits the slice.
fn stack_word(stack: &[u8], index: usize) -> u32 {
    u32::from_le_bytes(stack[index * 4..][..4].try_into().unwrap())
}
