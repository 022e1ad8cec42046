//! Error types for configuration parsing and address allocation.
//!
//! Every fatal error aborts the invocation before any write-back happens.
//! `NothingToRemove` is the one benign condition: it is reported and the
//! process exits successfully without touching the file.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The configuration text does not match the expected grammar.
    /// No partial model is produced.
    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    /// No supported netmask can hold the requested number of hosts.
    #[error("subnet size {0} not supported")]
    UnsupportedSize(u32),

    /// Prefix length outside the supported /16..=/30 range.
    #[error("subnet prefix /{0} not supported")]
    UnsupportedPrefix(u8),

    /// Every candidate block at the required prefix length overlaps an
    /// existing subnet.
    #[error("no free /{prefix} subnet available in {supernet}")]
    NoFreeSubnet { supernet: String, prefix: u8 },

    /// The subnet has no unreserved host address left in either family.
    #[error("no available address space in subnet '{0}'")]
    NoFreeAddress(String),

    #[error("subnet name '{0}' is already in use")]
    NameCollision(String),

    /// A reservation for this hardware address already exists.
    #[error("a reservation for {mac} already exists: {existing}")]
    DuplicateMac { mac: String, existing: String },

    /// The supplied network token matched more than one subnet; the caller
    /// must disambiguate.
    #[error("network reference '{0}' matches more than one subnet")]
    AmbiguousReference(String),

    /// The supplied network token matched no subnet at all.
    #[error("network reference '{0}' does not match any subnet")]
    UnknownNetwork(String),

    #[error("invalid gateway placement '{0}', expected 'first' or 'last'")]
    InvalidGatewayPlacement(String),

    /// A delete found nothing to delete. Benign.
    #[error("no entries matched '{0}', nothing to remove")]
    NothingToRemove(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error still counts as a successful invocation.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::NothingToRemove(_))
    }
}
