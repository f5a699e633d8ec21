//! Per-process unwind plan assembly.

use std::collections::HashSet;
use std::path::Path;

use crate::cfi;
use crate::config::UnwinderConfig;
use crate::elf_section;
use crate::error::{Error, Result};
use crate::maps::{resolve_path, Mapping, MappingProvider, ProcfsMappings};
use crate::plan::PlanTable;

/// Compiles the unwind plan of the image at `path`.
///
/// `load_bias` maps link-time addresses to the process's address space; use
/// `0` for file-relative tables.
pub fn compile_image(path: &Path, load_bias: u64, config: &UnwinderConfig) -> Result<PlanTable> {
    let section = elf_section::locate(path, config.debug_frame_fallback)?;
    compile_section(&section, load_bias, config)
}

fn compile_section(
    section: &elf_section::ImageSection,
    load_bias: u64,
    config: &UnwinderConfig,
) -> Result<PlanTable> {
    if section.pointer_width == 0 {
        return Err(Error::UnsupportedArchitecture(format!(
            "{:?}",
            section.architecture
        )));
    }
    let records = cfi::decode_image_section(section, load_bias)?;
    PlanTable::compile(&records, config.cfa_expressions)
}

/// Table compiled for one mapped file
#[derive(Debug, Clone)]
pub struct MappedPlanTable {
    pub mapping: Mapping,
    pub table: PlanTable,
}

/// Builds unwind plan tables for processes.
///
/// Holds no per-request state; requests for different pids can run on
/// separate threads against the same `Unwinder`.
pub struct Unwinder<M = ProcfsMappings> {
    config: UnwinderConfig,
    mappings: M,
}

impl Unwinder<ProcfsMappings> {
    pub fn new(config: UnwinderConfig) -> Self {
        let mappings = ProcfsMappings::new(config.proc_root.clone());
        Self { config, mappings }
    }
}

impl Default for Unwinder<ProcfsMappings> {
    fn default() -> Self {
        Self::new(UnwinderConfig::default())
    }
}

impl<M: MappingProvider> Unwinder<M> {
    pub fn with_provider(config: UnwinderConfig, mappings: M) -> Self {
        Self { config, mappings }
    }

    pub fn config(&self) -> &UnwinderConfig {
        &self.config
    }

    /// Returns the table of the first mapping that compiles.
    ///
    /// Only one table is produced per process, on the assumption that one
    /// binary dominates its unwinding needs. Shared objects with their own
    /// CFI are not covered; see [`Unwinder::unwind_tables_for_pid`].
    pub fn unwind_table_for_pid(&self, pid: u32) -> Result<PlanTable> {
        let mappings = self.mappings.mappings_for_process(pid)?;

        for mapping in &mappings {
            if mapping.is_pseudo() {
                continue;
            }
            if let Some(table) = self.try_mapping(pid, mapping) {
                return Ok(table);
            }
        }

        Err(Error::NoUnwindTableFound(pid))
    }

    /// Returns a table for every mapped file that compiles, in mapping order.
    ///
    /// Each file is compiled once, for its first mapping.
    pub fn unwind_tables_for_pid(&self, pid: u32) -> Result<Vec<MappedPlanTable>> {
        let mappings = self.mappings.mappings_for_process(pid)?;

        let mut seen: HashSet<&Path> = HashSet::new();
        let mut tables = Vec::new();
        for mapping in &mappings {
            if mapping.is_pseudo() || !seen.insert(mapping.path.as_path()) {
                continue;
            }
            if let Some(table) = self.try_mapping(pid, mapping) {
                tables.push(MappedPlanTable {
                    mapping: mapping.clone(),
                    table,
                });
            }
        }

        if tables.is_empty() {
            return Err(Error::NoUnwindTableFound(pid));
        }
        Ok(tables)
    }

    /// Compiles one mapping, logging and swallowing any failure
    fn try_mapping(&self, pid: u32, mapping: &Mapping) -> Option<PlanTable> {
        let path = match resolve_path(&self.config.proc_root, pid, mapping) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Failed to resolve {}: {}", mapping.path.display(), e);
                return None;
            }
        };

        match self.compile_mapping(&path, mapping) {
            Ok(table) => {
                tracing::debug!(
                    "Compiled {} unwind rows for {} (pid {})",
                    table.len(),
                    path.display(),
                    pid
                );
                Some(table)
            }
            Err(e) => {
                tracing::warn!("Failed to build unwind table for {}: {}", path.display(), e);
                None
            }
        }
    }

    fn compile_mapping(&self, path: &Path, mapping: &Mapping) -> Result<PlanTable> {
        let section = elf_section::locate(path, self.config.debug_frame_fallback)?;
        compile_section(&section, mapping.load_bias(section.base_vaddr), &self.config)
    }
}
