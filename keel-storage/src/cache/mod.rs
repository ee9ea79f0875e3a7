//! Cache tiers in front of the store.
//!
//! Two tiers sit between callers and the authoritative store:
//!
//! - [`LocalCache`]: typed copies owned by one handle (and its clones),
//!   never shared across processes.
//! - The remote tier: a shared, lossy byte cache behind the [`RemoteCache`]
//!   trait, reached through [`RemoteCacheClient`], which bounds every call
//!   with a timeout and turns failures into misses.
//!
//! Neither tier is ever authoritative. Reads fall through to the store on a
//! miss, and writes reach the store before either cache.

pub mod local;
pub mod memory;
pub mod noop;
pub mod remote;
pub mod traits;

pub use local::LocalCache;
pub use memory::InMemoryRemoteCache;
pub use noop::NoopRemoteCache;
pub use remote::{CacheOutcome, RemoteCacheClient};
pub use traits::{CacheStats, RemoteCache};
