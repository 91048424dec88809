//! Broker adapters - Pluggable implementations of the execution boundary

pub mod paper;

pub use paper::PaperBroker;
