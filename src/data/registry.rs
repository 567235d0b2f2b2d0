//! Stable integer handles for registered grids and decompositions.
//!
//! A handle is assigned once, at registration, and is the only key used by
//! routers, weight caches and interchange tables. Registering the same name
//! with an identical definition returns the existing handle, so two call
//! sites that describe "the same grid" agree without comparing objects.

use crate::coupler_error::CouplerError;
use crate::data::decomp::DecompDescriptor;
use crate::data::grid::GridDescriptor;
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle of a registered [`GridDescriptor`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct GridId(pub u32);

/// Handle of a registered [`DecompDescriptor`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct DecompId(pub u32);

impl fmt::Debug for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GridId").field(&self.0).finish()
    }
}

impl fmt::Debug for DecompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DecompId").field(&self.0).finish()
    }
}

/// Something that can live in a [`Registry`].
pub trait Registered: PartialEq {
    /// Name used as the interning key.
    fn key_name(&self) -> String;
}

impl Registered for GridDescriptor {
    fn key_name(&self) -> String {
        self.name().to_owned()
    }
}

impl Registered for DecompDescriptor {
    fn key_name(&self) -> String {
        format!("{}::{}", self.component(), self.name())
    }
}

/// Append-only store of immutable definitions addressed by dense handles.
#[derive(Debug)]
pub struct Registry<T> {
    items: Vec<Arc<T>>,
    by_name: HashMap<String, u32>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<T: Registered> Registry<T> {
    /// Register `item`, returning its handle index.
    ///
    /// # Errors
    /// `DuplicateRegistration` if the name is taken by a different definition.
    pub fn register(&mut self, item: T) -> Result<u32, CouplerError> {
        let name = item.key_name();
        if let Some(&idx) = self.by_name.get(&name) {
            if *self.items[idx as usize] == item {
                log::debug!("registry: `{name}` already registered as {idx}");
                return Ok(idx);
            }
            return Err(CouplerError::DuplicateRegistration(name));
        }
        let idx = self.items.len() as u32;
        self.items.push(Arc::new(item));
        self.by_name.insert(name, idx);
        Ok(idx)
    }

    pub fn get(&self, idx: u32) -> Option<&Arc<T>> {
        self.items.get(idx as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
