//! In-memory device tree: a navigable node/property store, a flattened
//! device tree reader and a changeset engine to patch the tree in place.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod changeset;
pub mod error;
pub mod fdt;
pub mod node;
pub mod prop;

pub use changeset::{Changeset, NodeRef};
pub use error::DtError;
pub use node::{DeviceTree, Node, NodeFlags, NodeId};
pub use prop::{PropFlags, Property, PropertyError};
