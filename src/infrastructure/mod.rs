//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（BC 子进程），只暴露能力，不认识进程池和请求格式。

pub mod bc_worker;
pub mod exit;
pub mod framing;

pub use bc_worker::{check_precision, BcWorker};
pub use exit::ExitReason;
