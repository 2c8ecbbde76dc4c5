//! Bus name <-> interface index resolution
//!
//! Interface numbering can change while the daemon runs (hot-plugged USB
//! adapters, vcan recreated), so callers resolve on every use.

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use parking_lot::RwLock;

pub trait InterfaceResolver: Send + Sync {
    fn index_of(&self, name: &str) -> Option<u32>;
    fn name_of(&self, index: u32) -> Option<String>;
}

/// Resolves through the kernel (`if_nametoindex` / `if_indextoname`)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl InterfaceResolver for SystemResolver {
    fn index_of(&self, name: &str) -> Option<u32> {
        let name = CString::new(name).ok()?;
        // SAFETY: name is a valid NUL-terminated string
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        (index != 0).then_some(index)
    }

    fn name_of(&self, index: u32) -> Option<String> {
        let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
        // SAFETY: buf holds IF_NAMESIZE bytes as required
        let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: if_indextoname wrote a NUL-terminated name into buf
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }
}

/// Table-driven resolver for the mock endpoint and tests
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, u32>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the given names 1, 2, 3... in order
    pub fn sequential<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resolver = Self::new();
        for (i, name) in names.into_iter().enumerate() {
            resolver.insert(name, i as u32 + 1);
        }
        resolver
    }

    pub fn insert(&self, name: impl Into<String>, index: u32) {
        self.table.write().insert(name.into(), index);
    }

    pub fn remove(&self, name: &str) -> Option<u32> {
        self.table.write().remove(name)
    }
}

impl InterfaceResolver for StaticResolver {
    fn index_of(&self, name: &str) -> Option<u32> {
        self.table.read().get(name).copied()
    }

    fn name_of(&self, index: u32) -> Option<String> {
        self.table
            .read()
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(name, _)| name.clone())
    }
}
