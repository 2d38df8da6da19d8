//! Shared test utilities for the radiation workspace.
//!
//! - [`fixtures`]: SIS measurement and forecast files shaped like the DWD feed,
//!   written through libnetcdf
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! radiation-test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;

pub use fixtures::*;
