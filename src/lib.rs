#![doc = include_str!("../README.md")]

//! ## Modules
//!
//! - [`discovery`] - [`Discoverer`], search sessions, worker pool, [`SearchHandle`]
//! - [`protocol`] - KNXnet/IP frames, HPAI, DIBs, search and description services
//! - [`net`] - network interfaces, transports (UDP and in-memory mock)
//! - [`config`] - [`DiscovererConfig`] from code, text or environment
//! - [`error`] - [`KnxError`] and the [`Result`] alias

// Macro modules (must be declared before use)
#[macro_use]
mod logging;

pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;

// Re-export commonly used types
#[doc(inline)]
pub use config::DiscovererConfig;
#[doc(inline)]
pub use discovery::{Discovered, Discoverer, Interrupter, SearchHandle, WorkerPool, WorkerState};
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use net::NetworkInterface;
#[doc(inline)]
pub use protocol::{DescriptionResponse, Hpai, SearchResponse};
