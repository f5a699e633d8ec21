#![no_std]

//! Fixed-width unwind plan types shared between the table compiler and a
//! kernel-side sampler.
//!
//! Layouts are `#[repr(C)]` with explicit padding so the rows can be copied
//! verbatim into eBPF maps.

/// The return address cannot be recovered with the supported opcodes.
pub const OP_UNIMPLEMENTED: u8 = 0;
/// No caller exists at this address; the stack ends here.
pub const OP_UNDEFINED: u8 = 1;
/// Value is read from memory at `CFA + offset`.
pub const OP_DEREF_CFA_PLUS_OFFSET: u8 = 2;
/// Value is the content of register `reg` plus `offset`.
pub const OP_REGISTER_PLUS_OFFSET: u8 = 3;

/// One compiled unwind step: `(op, reg, offset)`.
///
/// `reg` uses the architecture's DWARF register numbering.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[repr(C)]
pub struct Instruction {
    pub offset: i64,
    pub reg: u16,
    pub op: u8,
    pub _pad: [u8; 5],
}

impl Instruction {
    pub const STRUCT_SIZE: usize = 16;

    pub const fn new(op: u8, reg: u16, offset: i64) -> Self {
        Self {
            offset,
            reg,
            op,
            _pad: [0; 5],
        }
    }
}

/// Compiled unwind plan for the instruction range `[begin, end)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[repr(C)]
pub struct PlanTableRow {
    pub begin: u64,
    pub end: u64,
    /// How to recover the caller's return address
    pub return_address: Instruction,
    /// How to compute the CFA, always `OP_REGISTER_PLUS_OFFSET`
    pub frame_base: Instruction,
}

impl PlanTableRow {
    pub const STRUCT_SIZE: usize = 48;

    pub fn contains(&self, pc: u64) -> bool {
        self.begin <= pc && pc < self.end
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for Instruction {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PlanTableRow {}
