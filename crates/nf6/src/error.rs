//! Classified errors and the single top-level reporter.

use nf6_ext::ExtError;
use nf6_table::TableError;
use thiserror::Error;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for kernel, commit, or dispatch failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a parameter problem.
pub const EXIT_PARAMETER: i32 = 2;

/// Tool errors, classified by how the process should exit.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed argv, illegal combination, bad value. Exit 2 with a
    /// usage hint.
    #[error("{0}")]
    Parameter(String),
    /// Table or extension ABI mismatch. Exit 1 with an upgrade hint.
    #[error("{0}")]
    Version(String),
    /// Kernel-side failure: dispatch or commit.
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Parameter(_) => EXIT_PARAMETER,
            Self::Version(_) | Self::Table(_) | Self::Io(_) => EXIT_FAILURE,
        }
    }
}

impl From<ExtError> for Error {
    fn from(err: ExtError) -> Self {
        match err {
            ExtError::Parameter(_) | ExtError::CouldntLoad { .. } | ExtError::Abi(_) => {
                Self::Parameter(err.to_string())
            }
            ExtError::Version { .. } | ExtError::AlreadyRegistered { .. } => {
                Self::Version(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand used throughout the compiler.
pub(crate) fn param(msg: impl Into<String>) -> Error {
    Error::Parameter(msg.into())
}

/// Print the classified message and hints to stderr.
pub fn report(err: &Error) {
    eprintln!("{} v{}: {err}", crate::PROGRAM_NAME, crate::VERSION);
    match err {
        Error::Parameter(_) => {
            eprintln!(
                "Try `{0} -h' or '{0} --help' for more information.",
                crate::PROGRAM_NAME
            );
        }
        Error::Version(_) => {
            eprintln!("Perhaps {} or your kernel needs to be upgraded.", crate::PROGRAM_NAME);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(param("x").exit_code(), EXIT_PARAMETER);
        assert_eq!(Error::Version("x".into()).exit_code(), EXIT_FAILURE);
        assert_eq!(
            Error::Table(TableError::NoMatchingRule).exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_ext_error_classification() {
        let load = ExtError::CouldntLoad {
            kind: "target",
            name: "MADEUP".into(),
        };
        let err = Error::from(load);
        assert_eq!(err.exit_code(), EXIT_PARAMETER);
        assert_eq!(err.to_string(), "couldn't load target `MADEUP'");
    }
}
