use gimli::{CallFrameInstruction, CallFrameInstructionIter, Reader};

use super::rules::{CfaRule, Rule, RuleSet};
use crate::error::{Error, Result};

/// Replays call frame instructions into a [`RuleSet`].
///
/// Only the rule set after the whole program is kept; location advances are
/// not tracked. Instructions the rule model has no place for leave the
/// current rules untouched.
pub(crate) struct Executor<'a> {
    /// Target of `DW_CFA_restore`, the CIE end state for FDE programs
    initial: &'a RuleSet,
    state: RuleSet,
    remembered: Vec<RuleSet>,
    data_alignment: i64,
}

impl<'a> Executor<'a> {
    pub fn new(initial: &'a RuleSet, start: RuleSet, data_alignment: i64) -> Self {
        Self {
            initial,
            state: start,
            remembered: Vec::new(),
            data_alignment,
        }
    }

    /// Runs every instruction of `program` and returns the final rules.
    ///
    /// An opcode gimli does not know ends the program early since its
    /// operands cannot be skipped; the rules gathered so far are kept.
    pub fn run<R: Reader>(
        mut self,
        mut program: CallFrameInstructionIter<'_, R>,
    ) -> Result<RuleSet> {
        loop {
            match program.next() {
                Ok(Some(instruction)) => self.apply(instruction),
                Ok(None) => break,
                Err(gimli::Error::UnknownCallFrameInstruction(op)) => {
                    tracing::trace!("Stopping CFI program at unknown opcode {}", op);
                    break;
                }
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(self.state)
    }

    fn factored(&self, factored_offset: i64) -> i64 {
        factored_offset.wrapping_mul(self.data_alignment)
    }

    pub fn apply<T: gimli::ReaderOffset>(&mut self, instruction: CallFrameInstruction<T>) {
        use CallFrameInstruction::*;

        match instruction {
            DefCfa { register, offset } => self.state.set_cfa(CfaRule::RegisterAndOffset {
                register: register.0,
                offset: offset as i64,
            }),
            DefCfaSf {
                register,
                factored_offset,
            } => self.state.set_cfa(CfaRule::RegisterAndOffset {
                register: register.0,
                offset: self.factored(factored_offset),
            }),
            DefCfaRegister { register } => {
                if let CfaRule::RegisterAndOffset { offset, .. } = self.state.cfa() {
                    self.state.set_cfa(CfaRule::RegisterAndOffset {
                        register: register.0,
                        offset,
                    });
                }
            }
            DefCfaOffset { offset } => self.set_cfa_offset(offset as i64),
            DefCfaOffsetSf { factored_offset } => {
                self.set_cfa_offset(self.factored(factored_offset))
            }
            DefCfaExpression { .. } => self.state.set_cfa(CfaRule::Expression),

            Undefined { register } => self.state.set_register(register.0, Rule::Undefined),
            SameValue { register } => self.state.set_register(register.0, Rule::SameValue),
            Offset {
                register,
                factored_offset,
            } => {
                let offset = self.factored(factored_offset as i64);
                self.state.set_register(register.0, Rule::Offset(offset))
            }
            OffsetExtendedSf {
                register,
                factored_offset,
            } => {
                let offset = self.factored(factored_offset);
                self.state.set_register(register.0, Rule::Offset(offset))
            }
            ValOffset {
                register,
                factored_offset,
            } => {
                let offset = self.factored(factored_offset as i64);
                self.state.set_register(register.0, Rule::ValOffset(offset))
            }
            ValOffsetSf {
                register,
                factored_offset,
            } => {
                let offset = self.factored(factored_offset);
                self.state.set_register(register.0, Rule::ValOffset(offset))
            }
            Register {
                dest_register,
                src_register,
            } => self.state.set_register(
                dest_register.0,
                Rule::RegisterPlusOffset {
                    register: src_register.0,
                    offset: 0,
                },
            ),
            Expression { register, .. } | ValExpression { register, .. } => {
                self.state.set_register(register.0, Rule::Unsupported)
            }
            Restore { register } => match self.initial.register(register.0) {
                Some(rule) => self.state.set_register(register.0, rule),
                None => self.state.clear_register(register.0),
            },

            RememberState => self.remembered.push(self.state.clone()),
            RestoreState => {
                if let Some(state) = self.remembered.pop() {
                    self.state = state;
                }
            }

            // Locations, GNU_args_size, AArch64 return address signing
            _ => {}
        }
    }

    fn set_cfa_offset(&mut self, offset: i64) {
        if let CfaRule::RegisterAndOffset { register, .. } = self.state.cfa() {
            self.state
                .set_cfa(CfaRule::RegisterAndOffset { register, offset });
        }
    }
}
