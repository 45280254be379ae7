//! Configuration assembly for the cloud controller manager
//!
//! [`Config::assemble`] turns validated [`ccm_core::CloudControllerManagerOptions`]
//! into everything controllers need at startup:
//!
//! - an apiserver [`kube::Client`] with the configured rate limits and user agent
//! - an [`EventRecorder`] publishing events as the manager
//! - a [`ControllerClientBuilder`] handing out per-controller clients
//! - a [`SharedInformerFactory`], scoped to a node selector when filtering is on
//!
//! ```no_run
//! use ccm_config::{ccm_core::{CloudControllerManagerOptions, ControllerNames}, Config};
//!
//! # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let names = ControllerNames::new(["cloud-node", "service", "route"]);
//! let config = Config::from_options(CloudControllerManagerOptions::new(), &names).await?;
//! println!("watching nodes every {:?}", config.shared_informers.nodes().resync_period());
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub use ccm_core;

pub mod client_builder;
pub use client_builder::ControllerClientBuilder;

pub mod config;
pub use config::Config;

pub mod connection;
pub use connection::ClientConnection;

pub mod error;
pub use error::{Error, Result};

pub mod informers;
pub use informers::SharedInformerFactory;

pub mod recorder;
pub use recorder::EventRecorder;
