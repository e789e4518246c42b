//! Library crate for `catchunks`: fetches a segmented, versioned content
//! object over a toy UDP-based transport, with NDN-style pipelined
//! congestion control (AIMD window, Jacobson/Karn RTT estimation,
//! per-segment retry budgets for timeouts vs Nacks).
//!
//! Module layout mirrors the source's own file split (`rtt-estimator.hpp`,
//! `pipeline-interests*.cpp`, `consumer.cpp`, `discover-version-*.cpp`,
//! `ndncatchunks.cpp`) one-for-one, plus `face`/`wire` standing in for the
//! `ndn-cxx::Face`/NDN-TLV machinery this toy transport doesn't carry.

pub mod cli;
pub mod consumer;
pub mod discover;
pub mod err;
pub mod face;
pub mod fetcher;
pub mod pipeline;
pub mod rtt;
pub mod types;
pub mod wire;

pub use err::Error;
