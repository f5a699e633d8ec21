//! Process mappings and their on-disk images.

use std::path::{Path, PathBuf};

use procfs::process::{MMPermissions, MMapPath, Process};

use crate::error::{Error, Result};

pub const VDSO: &str = "[vdso]";
pub const VSYSCALL: &str = "[vsyscall]";

/// One mapped region of a process
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,
    /// File offset the mapping starts at
    pub offset: u64,
    /// Path in the process's mount namespace, or a pseudo name like `[vdso]`
    pub path: PathBuf,
}

impl Mapping {
    /// vDSO and vsyscall pages have no image on disk
    pub fn is_pseudo(&self) -> bool {
        self.path == Path::new(VDSO) || self.path == Path::new(VSYSCALL)
    }

    /// Difference between runtime addresses and the image's link-time addresses
    pub fn load_bias(&self, base_vaddr: u64) -> u64 {
        self.start.wrapping_sub(self.offset).wrapping_sub(base_vaddr)
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "0x{:x}-0x{:x} {}",
            self.start,
            self.end,
            self.path.display()
        )
    }
}

/// Source of a process's memory mappings, in address order
pub trait MappingProvider {
    fn mappings_for_process(&self, pid: u32) -> Result<Vec<Mapping>>;
}

/// Reads mappings from `<proc_root>/<pid>/maps`
#[derive(Debug, Clone)]
pub struct ProcfsMappings {
    proc_root: PathBuf,
}

impl ProcfsMappings {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl MappingProvider for ProcfsMappings {
    fn mappings_for_process(&self, pid: u32) -> Result<Vec<Mapping>> {
        let resolution_err = |e: procfs::ProcError| Error::MappingResolution {
            pid,
            reason: e.to_string(),
        };

        let process =
            Process::new_with_root(self.proc_root.join(pid.to_string())).map_err(resolution_err)?;
        let maps = process.maps().map_err(resolution_err)?;

        let mappings = maps
            .iter()
            .filter(|m| {
                m.perms.contains(MMPermissions::EXECUTE) && m.perms.contains(MMPermissions::READ)
            })
            .filter_map(|m| {
                let path = match &m.pathname {
                    MMapPath::Path(p) => p.clone(),
                    MMapPath::Vdso => PathBuf::from(VDSO),
                    MMapPath::Vsyscall => PathBuf::from(VSYSCALL),
                    _ => return None,
                };
                Some(Mapping {
                    start: m.address.0,
                    end: m.address.1,
                    offset: m.offset,
                    path,
                })
            })
            .collect();

        Ok(mappings)
    }
}

/// Path of a mapping's file as seen through `<proc_root>/<pid>/root`
pub fn resolve_path(proc_root: &Path, pid: u32, mapping: &Mapping) -> Result<PathBuf> {
    let relative = mapping
        .path
        .strip_prefix("/")
        .map_err(|_| Error::MappingResolution {
            pid,
            reason: format!("{} is not an absolute path", mapping.path.display()),
        })?;

    let mut resolved = proc_root.join(pid.to_string());
    resolved.push("root");
    resolved.push(relative);
    Ok(resolved)
}
