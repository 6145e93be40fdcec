//! Skylift platform facade
//!
//! Content-library mounting and template deployment against an instance's
//! management endpoint.

pub mod client;
pub mod error;

// Re-exports
pub use client::{
    ContentLibrary, DeployTarget, HttpVcenterConnect, LibrarySpec, NetworkIdentity, VcenterApi,
    VcenterClient, VcenterConnect, VcenterEndpoint, VirtualMachine,
};
pub use error::{Result, VcenterError};
