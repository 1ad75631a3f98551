//! Test doubles for the domain trait seams.
//!
//! Compiled for unit tests and, behind the `test-utils` feature, for
//! the integration test suites.

pub mod mocks;

pub use mocks::{
    MockAlertSink, MockChainGateway, MockJobQueue, MockMirrorStore, MockRailClient,
};
