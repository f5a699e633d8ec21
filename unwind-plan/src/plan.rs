//! Compiles executed CFI rules into fixed-width unwind plan rows.

use std::ops::Deref;

pub use unwind_plan_common::{
    Instruction, PlanTableRow, OP_DEREF_CFA_PLUS_OFFSET, OP_REGISTER_PLUS_OFFSET, OP_UNDEFINED,
    OP_UNIMPLEMENTED,
};

use crate::cfi::{CfaRule, CfiRecord, Rule};
use crate::config::CfaExpressionPolicy;
use crate::error::{Error, Result};

/// Typed view of an instruction opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Unimplemented,
    Undefined,
    DerefCfaPlusOffset,
    RegisterPlusOffset,
}

pub trait InstructionExt {
    fn opcode(&self) -> Op;
    fn describe(&self) -> String;
}

impl InstructionExt for Instruction {
    fn opcode(&self) -> Op {
        match self.op {
            OP_UNDEFINED => Op::Undefined,
            OP_DEREF_CFA_PLUS_OFFSET => Op::DerefCfaPlusOffset,
            OP_REGISTER_PLUS_OFFSET => Op::RegisterPlusOffset,
            _ => Op::Unimplemented,
        }
    }

    fn describe(&self) -> String {
        match self.opcode() {
            Op::Unimplemented => "unimplemented".to_string(),
            Op::Undefined => "undefined".to_string(),
            Op::DerefCfaPlusOffset => format!("*(cfa{:+})", self.offset),
            Op::RegisterPlusOffset => format!("r{}{:+}", self.reg, self.offset),
        }
    }
}

/// Compiles one record into a table row.
///
/// Fails with `UnsupportedCfaForm` when the CFA is not a register plus
/// offset. Return address rules other than a CFA offset or undefined
/// compile to `OP_UNIMPLEMENTED`.
pub fn compile_row(record: &CfiRecord) -> Result<PlanTableRow> {
    let frame_base = match record.rules.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => {
            Instruction::new(OP_REGISTER_PLUS_OFFSET, register, offset)
        }
        CfaRule::Expression => {
            return Err(Error::UnsupportedCfaForm {
                begin: record.begin,
                end: record.end,
            })
        }
    };

    let return_address = match record.return_address_rule() {
        Some(Rule::Offset(offset)) => Instruction::new(OP_DEREF_CFA_PLUS_OFFSET, 0, offset),
        Some(Rule::Undefined) => Instruction::new(OP_UNDEFINED, 0, 0),
        _ => Instruction::new(OP_UNIMPLEMENTED, 0, 0),
    };

    Ok(PlanTableRow {
        begin: record.begin,
        end: record.end,
        return_address,
        frame_base,
    })
}

/// Unwind plan for one image, sorted by `begin`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanTable {
    rows: Vec<PlanTableRow>,
}

impl PlanTable {
    /// Compiles every record, handling expression CFAs according to `policy`.
    ///
    /// Under `Omit` a table left with no rows at all is still an error.
    pub fn compile(records: &[CfiRecord], policy: CfaExpressionPolicy) -> Result<Self> {
        let mut rows = Vec::with_capacity(records.len());
        let mut omitted = 0usize;
        let mut first_err = None;

        for record in records {
            match compile_row(record) {
                Ok(row) => rows.push(row),
                Err(e @ Error::UnsupportedCfaForm { .. })
                    if policy == CfaExpressionPolicy::Omit =>
                {
                    omitted += 1;
                    first_err.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if rows.is_empty() {
            if let Some(e) = first_err {
                return Err(e);
            }
        }
        if omitted > 0 {
            tracing::debug!(
                "Omitted {} of {} rows with expression-based CFA",
                omitted,
                records.len()
            );
        }

        // Sort by begin address for binary search
        rows.sort_by_key(|row| row.begin);
        Ok(Self { rows })
    }

    /// Finds the row covering `pc`
    pub fn lookup(&self, pc: u64) -> Option<&PlanTableRow> {
        let idx = self.rows.partition_point(|row| row.begin <= pc);
        let row = self.rows.get(idx.checked_sub(1)?)?;
        row.contains(pc).then_some(row)
    }

    pub fn into_rows(self) -> Vec<PlanTableRow> {
        self.rows
    }
}

impl Deref for PlanTable {
    type Target = [PlanTableRow];

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}
