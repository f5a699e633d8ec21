use std::collections::BTreeMap;
use std::sync::Arc;

/// How to recover a register's value in the caller's frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// No value is recoverable
    Undefined,
    /// Unchanged from the callee
    SameValue,
    /// Saved in memory at `CFA + n`
    Offset(i64),
    /// The value is `CFA + n`
    ValOffset(i64),
    /// The value is the content of `register` plus `offset`
    RegisterPlusOffset { register: u16, offset: i64 },
    /// Computed by a DWARF expression
    Unsupported,
}

/// How to compute the call frame address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaRule {
    RegisterAndOffset { register: u16, offset: i64 },
    Expression,
}

impl Default for CfaRule {
    fn default() -> Self {
        CfaRule::RegisterAndOffset {
            register: 0,
            offset: 0,
        }
    }
}

/// CFA rule plus one rule per tracked register.
///
/// The register map is shared copy-on-write: every FDE starts from a clone
/// of its CIE's state and only pays for a copy once it changes a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    cfa: CfaRule,
    registers: Arc<BTreeMap<u16, Rule>>,
}

impl RuleSet {
    pub fn cfa(&self) -> CfaRule {
        self.cfa
    }

    pub fn register(&self, register: u16) -> Option<Rule> {
        self.registers.get(&register).copied()
    }

    pub fn registers(&self) -> impl Iterator<Item = (u16, Rule)> + '_ {
        self.registers.iter().map(|(r, rule)| (*r, *rule))
    }

    pub(crate) fn set_cfa(&mut self, cfa: CfaRule) {
        self.cfa = cfa;
    }

    pub(crate) fn set_register(&mut self, register: u16, rule: Rule) {
        if self.registers.get(&register) != Some(&rule) {
            Arc::make_mut(&mut self.registers).insert(register, rule);
        }
    }

    pub(crate) fn clear_register(&mut self, register: u16) {
        if self.registers.contains_key(&register) {
            Arc::make_mut(&mut self.registers).remove(&register);
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_registers_with(&self, other: &RuleSet) -> bool {
        Arc::ptr_eq(&self.registers, &other.registers)
    }
}
