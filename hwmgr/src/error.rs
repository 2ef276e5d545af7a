use alloc::string::String;
use dt::DtError;
use thiserror::Error;

use crate::resource::ResourceError;

/// Why probing a device class gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The class template node is not in the tree.
    #[error("{0} node is missing")]
    MissingNode(String),
    /// A resource provider is not ready; probing may be retried later.
    #[error("resource deferred")]
    ResourceDeferred,
    /// A candidate's bus transfer timed out, the bus is considered stuck.
    #[error("bus timeout at address {addr:#04x}")]
    BusTimeout { addr: u16 },
    /// Powering the chip up failed.
    #[error("resource error: {0}")]
    Resource(ResourceError),
    /// The detection could not be written to the tree.
    #[error("device tree error: {0}")]
    Tree(#[from] DtError),
}

/// Pipeline level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwMgrError {
    #[error("{0} node is missing")]
    MissingNode(String),
    /// Board rail fixup must wait for its regulator to come up.
    #[error("regulator deferred")]
    Deferred,
    #[error("regulator error: {0}")]
    Regulator(ResourceError),
    #[error("device tree error: {0}")]
    Tree(#[from] DtError),
}
