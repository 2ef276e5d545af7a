use crate::error::DtError;
use alloc::{boxed::Box, string::String, vec::Vec};
use bitflags::bitflags;
use core::str;
use hashbrown::HashMap;
use thiserror::Error;
use utils::endian::{BigEndian32, BigEndian64, EndianData, be32_cells};

bitflags! {
    /// Bookkeeping flags of a [Property].
    pub struct PropFlags: u32 {
        /// The property was allocated at runtime rather than read from a blob.
        const DYNAMIC = 0x01;
    }
}

/// A named, byte-valued property owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
    pub flags: PropFlags,
}

impl Property {
    /// A property read from static data, such as a flattened blob.
    pub fn new(name: impl Into<Box<str>>, data: impl Into<Box<[u8]>>) -> Property {
        Property {
            name: name.into(),
            data: data.into(),
            flags: PropFlags::empty(),
        }
    }

    /// Copy `name` and `value` into a new [PropFlags::DYNAMIC] property.
    ///
    /// Storage is reserved fallibly so that exhaustion is reported as
    /// [DtError::AllocationFailure]. A zero-length `value` is valid and is
    /// how boolean properties are stored.
    pub fn try_copy(name: &str, value: &[u8]) -> Result<Property, DtError> {
        let mut owned_name = String::new();
        owned_name
            .try_reserve_exact(name.len())
            .map_err(|_| DtError::AllocationFailure)?;
        owned_name.push_str(name);
        let mut data = Vec::new();
        data.try_reserve_exact(value.len())
            .map_err(|_| DtError::AllocationFailure)?;
        data.extend_from_slice(value);
        Ok(Property {
            name: owned_name.into_boxed_str(),
            data: data.into_boxed_slice(),
            flags: PropFlags::DYNAMIC,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Property {
    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        BigEndian32::from_bytes(&self.data)
            .map(|v| v.value())
            .ok_or(PropertyError::InvalidPropFormat)
    }
    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        BigEndian64::from_bytes(&self.data)
            .map(|v| v.value())
            .ok_or(PropertyError::InvalidPropFormat)
    }
    pub fn value_as_u32_list(&self) -> Result<Vec<u32>, PropertyError> {
        if self.data.len() % BigEndian32::SIZE != 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        Ok(be32_cells(&self.data).collect())
    }
    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        let end = self
            .data
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.data.len());
        str::from_utf8(&self.data[..end]).map_err(|_| PropertyError::InvalidPropFormat)
    }
    pub fn value_as_strlist(&self) -> Result<Vec<&str>, PropertyError> {
        if self.data.is_empty() {
            return Ok(Vec::new());
        }
        // a list always ends with a terminator, do not report an empty tail
        let slice = match self.data.split_last() {
            Some((&0, body)) => body,
            _ => &self.data[..],
        };
        slice
            .split(|b| *b == 0)
            .map(|s| str::from_utf8(s).map_err(|_| PropertyError::InvalidPropFormat))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property payload has an unexpected format")]
    InvalidPropFormat,
    #[error("property not found")]
    PropNotFound,
    #[error("phandle does not resolve to a node")]
    DanglingHandle,
}

/// Insertion-ordered property set with a name index.
///
/// Duplicate detection is a hash lookup; iteration follows insertion order.
#[derive(Debug, Default, Clone)]
pub struct PropertyMap {
    props: Vec<Property>,
    index: HashMap<Box<str>, usize>,
}

impl PropertyMap {
    pub fn new() -> PropertyMap {
        PropertyMap::default()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|idx| &self.props[*idx])
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Property> {
        self.props.iter()
    }

    /// Append `prop`, handing it back if the name is taken.
    pub fn insert(&mut self, prop: Property) -> Result<(), Property> {
        if self.index.contains_key(&prop.name) {
            return Err(prop);
        }
        self.index.insert(prop.name.clone(), self.props.len());
        self.props.push(prop);
        Ok(())
    }

    /// Insert or replace `prop`. A replaced property keeps its position.
    pub fn replace(&mut self, prop: Property) -> Option<Property> {
        match self.index.get(&prop.name) {
            Some(idx) => Some(core::mem::replace(&mut self.props[*idx], prop)),
            None => {
                self.index.insert(prop.name.clone(), self.props.len());
                self.props.push(prop);
                None
            }
        }
    }

    /// Remove the property called `name`, returning it with its former position.
    pub fn remove(&mut self, name: &str) -> Option<(usize, Property)> {
        let idx = self.index.remove(name)?;
        let prop = self.props.remove(idx);
        self.reindex_from(idx);
        Some((idx, prop))
    }

    /// Put a removed property back at `position`.
    pub fn restore(&mut self, position: usize, prop: Property) {
        let position = position.min(self.props.len());
        self.props.insert(position, prop);
        self.reindex_from(position);
    }

    fn reindex_from(&mut self, start: usize) {
        for (idx, prop) in self.props.iter().enumerate().skip(start) {
            self.index.insert(prop.name.clone(), idx);
        }
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = &'a Property;
    type IntoIter = core::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
