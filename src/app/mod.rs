//! Application layer: the event bus, the request lifecycle manager,
//! the settlement orchestrator and the stuck-request sweeper.

pub mod event_bus;
pub mod lifecycle;
pub mod orchestrator;
pub mod sweeper;

pub use event_bus::EventBus;
pub use lifecycle::{LifecycleConfig, RequestLifecycleManager};
pub use orchestrator::SettlementOrchestrator;
pub use sweeper::{StuckRequestSweeper, SweeperConfig, spawn_sweeper};
