pub mod calculation;
pub mod pool;
pub mod worker;

pub use calculation::{CalculationRequest, CalculationResult, ValidationResult};
pub use pool::{PoolConfig, PoolStatus};
pub use worker::{EngineCommand, WorkerOptions, WorkerState};
