//! Server discovery: sessions, response collection and the public [`Discoverer`].
//!
//! ```text
//! Discoverer ──launch──> SearchSession ──runs on──> WorkerPool thread
//!     │                        │
//!     │                        └── decoded responses ──> ResponseAggregator
//!     └── search_responses() / SearchHandle <─────────────────┘
//! ```

mod aggregator;
mod discoverer;
mod handle;
mod pool;
mod result;
mod session;

pub use discoverer::{Discoverer, DiscovererBuilder, Interrupter};
pub use handle::{SearchHandle, SearchResult};
pub use pool::{WorkerLease, WorkerPool, WorkerState, WorkerStatus};
pub use result::Discovered;
