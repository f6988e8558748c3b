use std::io;
use thiserror::Error;
use uncore_raw::{Backend, RegisterError};

use crate::uncore::BoxHandle;

#[derive(Error, Debug)]
pub enum UncoreError {
    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error("PCI operation failed: {0}")]
    PciError(String),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),

    #[error("Register error: {0}")]
    RegisterError(#[from] RegisterError),

    #[error("Invalid box handle: {0}")]
    InvalidHandle(BoxHandle),

    #[error("Box type {name} uses the {expected} backend but the box was created for {actual}")]
    BackendMismatch {
        name: &'static str,
        expected: Backend,
        actual: Backend,
    },

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, UncoreError>;
