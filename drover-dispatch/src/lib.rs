//! The adaptive dispatch scheduler.
//!
//! One [`DispatchEngine`] per running job partitions recipients into
//! per-destination-domain buckets, round-robins chunks across them,
//! rotates sender identities, and drives each chunk through the
//! [`ChunkScheduler`] state machine against the pressure gauge, the
//! domain health tracker, and the retry policy. The [`JobRegistry`]
//! admits jobs (one active per campaign unless forced) and owns the
//! running engines.

mod bucket;
mod chunk;
mod clock;
mod engine;
mod error;
mod registry;
mod retry;
mod scheduler;
mod transport;

pub use bucket::{DestinationBucket, PartitionOutcome, partition_recipients};
pub use chunk::{Chunk, ChunkState, message_token};
pub use clock::{Clock, TokioClock};
pub use engine::{DispatchEngine, EngineConfig, KillSwitchConfig};
pub use error::DispatchError;
pub use registry::{JobRegistry, RegistryConfig};
pub use retry::RetryPolicy;
pub use scheduler::{ChunkDisposition, ChunkScheduler};
pub use transport::{ChunkTransport, HttpInjectTransport, InjectConfig, LogTransport, TransportError};
