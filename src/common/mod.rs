//! Common utilities and types shared across adaptive-sampler

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod storage;
pub mod utils;

pub use backend::{MemoryBackend, MemoryStoreFactory, SamplingStoreFactory};
pub use config::{Config, Options};
pub use error::{Error, Result};
pub use lock::{DistributedLock, LockTable, MemoryLock};
pub use metrics::{Counter, Gauge, SamplerMetrics};
pub use storage::{MemoryStore, SamplingStore};
pub use utils::{format_duration, generate_node_id, parse_duration, timestamp_now_millis};
