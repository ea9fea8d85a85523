//! Buffered transactional view of one packet-filter table.
//!
//! A [`TableHandle`] is acquired per invocation: it pulls a snapshot of
//! the table's chains through the [`KernelBackend`] seam, buffers every
//! mutation locally, and pushes the whole table back atomically on
//! [`TableHandle::commit`]. Nothing reaches the kernel before commit.

mod kernel;
mod table;

pub use kernel::{ChainState, KernelBackend, MemoryBackend, Snapshot};
pub use table::TableHandle;

use std::str::FromStr;

use thiserror::Error;

/// Table and chain errors, with the message text the kernel's own
/// strerror would produce.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("can't initialize table `{0}': Table does not exist")]
    NoTable(String),
    #[error("No chain/target/match by that name")]
    NoChain(String),
    #[error("No chain/target/match by that name")]
    NoMatchingRule,
    #[error("Index of deletion too big")]
    BadRuleNumber(usize),
    #[error("Chain already exists")]
    ChainExists(String),
    #[error("Can't delete built-in chain `{0}'")]
    BuiltinChain(String),
    #[error("Directory not empty")]
    ChainNotEmpty(String),
    #[error("Device or resource busy")]
    ChainInUse(String),
    #[error("Only built-in chains can have policies")]
    PolicyOnUserChain(String),
    #[error("Invalid policy `{0}'")]
    InvalidPolicy(String),
    #[error("commit failed: {0}")]
    Commit(String),
}

pub type Result<T> = std::result::Result<T, TableError>;

/// Default policy of a built-in chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
    Queue,
    Return,
}

impl Policy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
            Self::Queue => "QUEUE",
            Self::Return => "RETURN",
        }
    }
}

impl FromStr for Policy {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACCEPT" => Ok(Self::Accept),
            "DROP" => Ok(Self::Drop),
            "QUEUE" => Ok(Self::Queue),
            "RETURN" => Ok(Self::Return),
            _ => Err(TableError::InvalidPolicy(s.to_string())),
        }
    }
}
