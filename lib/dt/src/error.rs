//! Errors raised while mutating the device tree.

use thiserror::Error;

/// Failure of a [crate::Changeset] operation or of a direct tree mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DtError {
    /// An add entry targets a property name already present on the node.
    #[error("property already exists on the target node")]
    DuplicateProperty,
    /// A remove entry targets a property the node does not carry.
    #[error("property not found on the target node")]
    PropertyNotFound,
    /// An attach entry would give the parent two children of the same name.
    #[error("parent already has a child with that name")]
    DuplicateNode,
    /// The node handle does not belong to this tree.
    #[error("node not found")]
    NodeNotFound,
    /// Malformed input, rejected before anything was allocated.
    #[error("invalid argument")]
    InvalidArgument,
    /// The entry refers to a node this changeset cannot operate on.
    #[error("invalid changeset target")]
    InvalidTarget,
    /// The changeset was applied before.
    #[error("changeset already applied")]
    AlreadyApplied,
    /// Out of memory while copying names or payloads.
    #[error("allocation failure")]
    AllocationFailure,
}
