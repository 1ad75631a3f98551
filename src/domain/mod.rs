//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{AppError, ChainError, ConfigError, DatabaseError, RailError, ValidationError};
pub use events::{EventMeta, TreasuryEvent};
pub use traits::{AlertSink, ChainGateway, JobQueue, MirrorStore, RailClient};
pub use types::{
    AccountParams, AlertKind, AlertSeverity, ChainAccountState, ChainRequestState,
    ChainRequestStatus, HealthReport, HealthStatus, NewSpendRequest, RailAttestation,
    RequestFilter, RequestStatus, SpendAccount, SpendRequest, TxOutcome,
};
