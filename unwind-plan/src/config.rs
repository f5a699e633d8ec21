use std::path::PathBuf;

const PROC_ROOT: &str = "/proc";

/// What to do with rows whose CFA is a DWARF expression.
///
/// These cannot be expressed as a register plus offset. Linkers emit them
/// for PLT stubs, glibc for signal trampolines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CfaExpressionPolicy {
    /// Leave the range out of the table.
    #[default]
    Omit,
    /// Fail the whole image with `UnsupportedCfaForm`.
    Reject,
}

/// Settings for building unwind plan tables
#[derive(Debug, Clone)]
pub struct UnwinderConfig {
    /// Root of the proc filesystem, mappings resolve to `<proc_root>/<pid>/root/<path>`
    pub proc_root: PathBuf,
    /// Use `.debug_frame` when an image carries no `.eh_frame`
    pub debug_frame_fallback: bool,
    pub cfa_expressions: CfaExpressionPolicy,
}

impl Default for UnwinderConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(PROC_ROOT),
            debug_frame_fallback: false,
            cfa_expressions: CfaExpressionPolicy::default(),
        }
    }
}
