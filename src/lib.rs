//! Off-chain mirror and cross-chain settlement relayer for an
//! on-chain treasury policy contract.
//!
//! The relayer ingests contract events over a websocket stream, keeps
//! a PostgreSQL mirror of accounts and spend requests, and drives
//! approved requests through a burn/attest/mint settlement pipeline
//! against the payment rail, recording completion back on-chain. A
//! background sweeper recovers requests whose pipeline died mid-flight.

pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
