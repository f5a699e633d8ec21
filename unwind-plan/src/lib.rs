//! Compiles DWARF call frame information of a process's images into
//! fixed-width unwind plan tables for samplers that cannot evaluate DWARF.
//!
//! Pipeline: [`elf_section`] locates `.eh_frame`, [`cfi`] decodes and
//! executes its programs, [`plan`] compiles the resulting rules and
//! [`Unwinder`] picks the image for a pid.

pub mod cfi;
pub mod config;
pub mod elf_section;
mod error;
pub mod maps;
pub mod plan;
mod unwinder;

pub use config::{CfaExpressionPolicy, UnwinderConfig};
pub use error::{Error, Result};
pub use plan::{Instruction, InstructionExt, Op, PlanTable, PlanTableRow};
pub use unwinder::{compile_image, MappedPlanTable, Unwinder};
