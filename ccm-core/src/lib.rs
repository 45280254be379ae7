//! Client-less building blocks for the cloud controller manager
//!
//! This crate holds everything needed to turn user supplied options into a
//! validated component configuration without talking to an apiserver:
//!
//! - [`options`]: independently validated option groups and their aggregate
//! - [`validation`]: the error types collected while validating those groups
//! - [`labels`]: the include/exclude node selector compiler
//! - [`resync`]: the jittered resync period generator shared by all watchers
//! - [`config`]: the component configuration the option groups apply onto
//!
//! The client-bearing assembly lives in the `ccm-config` crate.
#![forbid(unsafe_code)]

pub mod config;
pub use config::CloudControllerManagerConfiguration;

pub mod labels;
pub use labels::Selector;

mod net;

pub mod options;
pub use options::{CloudControllerManagerOptions, ControllerNames};

pub mod resync;
pub use resync::ResyncPeriod;

pub mod validation;
pub use validation::{AggregateError, ValidationError};
