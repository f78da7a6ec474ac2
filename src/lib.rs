//! DNS answer freshness and browser DNS cache measurement.
//!
//! Resolver adapters query one channel (system stub, Google DoH, Cloudflare
//! DoH) and report absence instead of errors. TTLs of every site's
//! subresource domains are aggregated into refresh-rate estimates, and
//! browser timing entries are classified into DNS cache hits and misses.
//! Long batch runs are persisted incrementally through [`snapshot::Snapshot`].

pub mod bench;
pub mod cli;
pub mod dns;
pub mod domains;
pub mod harness;
pub mod output;
pub mod resolver;
pub mod snapshot;
pub mod stats;
pub mod timing;
pub mod transport;
