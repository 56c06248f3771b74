//! Exported symbol lookup
//!
//! Two lookups are provided:
//! - `DynamicSymbols`: live addresses in this process via `dlopen`/`dlsym`
//! - `ElfExports`: the export table of a module file on disk (object crate)
//!
//! `SymbolTable` is a fixed in-memory table for hosts that resolve
//! symbols themselves.

use crate::error::HookError;
use anyhow::{Context, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::File;
use std::path::Path;

/// Resolves `(module, symbol)` to an address
pub trait SymbolLookup: Send + Sync {
    fn find_exported_symbol(&self, module_path: &str, symbol: &str) -> Result<usize, HookError>;
}

/// Label used in attach lines: file name up to the first `.`
///
/// `/usr/lib/libc.so.6` -> `libc`; an empty module path means "any module".
pub fn module_label(module_path: &str) -> String {
    if module_path.is_empty() {
        return "*".to_string();
    }
    let file_name = Path::new(module_path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| module_path.to_string());
    match file_name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => file_name,
    }
}

/// Live lookup in the current process
///
/// Only modules that are already loaded are searched (`RTLD_NOLOAD`), so a
/// lookup never maps a new library into the process. An empty module path
/// searches the global namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicSymbols;

impl SymbolLookup for DynamicSymbols {
    fn find_exported_symbol(&self, module_path: &str, symbol: &str) -> Result<usize, HookError> {
        let not_found = || HookError::SymbolNotFound {
            module: module_path.to_string(),
            symbol: symbol.to_string(),
        };
        let sym = CString::new(symbol).map_err(|_| not_found())?;

        if module_path.is_empty() {
            let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, sym.as_ptr()) };
            return if p.is_null() {
                Err(not_found())
            } else {
                Ok(p as usize)
            };
        }

        let path = CString::new(module_path)
            .map_err(|_| HookError::ModuleNotFound(module_path.to_string()))?;

        unsafe {
            let handle = libc::dlopen(path.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_NOW);
            if handle.is_null() {
                return Err(HookError::ModuleNotFound(module_path.to_string()));
            }
            let p = libc::dlsym(handle, sym.as_ptr());
            libc::dlclose(handle);
            if p.is_null() {
                Err(not_found())
            } else {
                Ok(p as usize)
            }
        }
    }
}

/// One entry of a module's export table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub name: String,
    /// File-relative virtual address
    pub address: u64,
}

/// Export table of a module file
#[derive(Debug, Clone)]
pub struct ElfExports {
    module_path: String,
    exports: Vec<ExportedSymbol>,
}

impl ElfExports {
    /// Parse the export table of an ELF (or Mach-O/PE) module
    pub fn load(module_path: &Path) -> Result<Self> {
        let file = File::open(module_path)
            .with_context(|| format!("Failed to open module: {}", module_path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map module")?;

        let object = object::File::parse(&*mmap)
            .with_context(|| format!("Failed to parse module: {}", module_path.display()))?;

        let mut exports: Vec<ExportedSymbol> = object
            .dynamic_symbols()
            .filter(|s| s.is_definition() && s.is_global())
            .filter_map(|s| {
                let name = s.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(ExportedSymbol {
                    name: name.to_string(),
                    address: s.address(),
                })
            })
            .collect();

        // Static-only binaries have no dynamic table; fall back to the symtab.
        if exports.is_empty() {
            exports = object
                .symbols()
                .filter(|s| s.is_definition() && s.is_global())
                .filter_map(|s| {
                    let name = s.name().ok()?;
                    (!name.is_empty()).then(|| ExportedSymbol {
                        name: name.to_string(),
                        address: s.address(),
                    })
                })
                .collect();
        }

        exports.sort_by(|a, b| a.name.cmp(&b.name));
        exports.dedup_by(|a, b| a.name == b.name);

        tracing::debug!(
            module = %module_path.display(),
            count = exports.len(),
            "loaded export table"
        );

        Ok(Self {
            module_path: module_path.display().to_string(),
            exports,
        })
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn exports(&self) -> &[ExportedSymbol] {
        &self.exports
    }

    pub fn find(&self, symbol: &str) -> Option<&ExportedSymbol> {
        self.exports
            .binary_search_by(|e| e.name.as_str().cmp(symbol))
            .ok()
            .map(|i| &self.exports[i])
    }

    fn matches_module(&self, module_path: &str) -> bool {
        module_path == self.module_path
            || Path::new(&self.module_path).file_name() == Path::new(module_path).file_name()
    }
}

impl SymbolLookup for ElfExports {
    fn find_exported_symbol(&self, module_path: &str, symbol: &str) -> Result<usize, HookError> {
        if !self.matches_module(module_path) {
            return Err(HookError::ModuleNotFound(module_path.to_string()));
        }
        self.find(symbol)
            .map(|e| e.address as usize)
            .ok_or_else(|| HookError::SymbolNotFound {
                module: module_path.to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// Fixed `(module, symbol) -> address` table
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    modules: HashMap<String, HashMap<String, usize>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_export(mut self, module: &str, symbol: &str, address: usize) -> Self {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(symbol.to_string(), address);
        self
    }
}

impl SymbolLookup for SymbolTable {
    fn find_exported_symbol(&self, module_path: &str, symbol: &str) -> Result<usize, HookError> {
        let exports = self
            .modules
            .get(module_path)
            .ok_or_else(|| HookError::ModuleNotFound(module_path.to_string()))?;
        exports
            .get(symbol)
            .copied()
            .ok_or_else(|| HookError::SymbolNotFound {
                module: module_path.to_string(),
                symbol: symbol.to_string(),
            })
    }
}
