//! Master registry and batch signature aggregation

pub mod engine;
pub mod gas;
pub mod payload;
pub mod registry;

pub use engine::{
    AggregationConfig, AggregationEngine, BatchAuthorization, OperationAuthorization, DEFAULT_MAX_BATCH_SIZE,
};
pub use gas::{calculate_gas_savings, GasEstimate};
pub use payload::{batch_hash, AggregatedBlob, AggregationMode, Domain, SigningPayload};
pub use registry::{MasterEntry, MasterRegistry};
