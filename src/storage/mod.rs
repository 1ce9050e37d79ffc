pub mod backend;
pub mod meta;
pub mod models;
pub mod pending;
pub mod pool;
pub mod reader;
pub mod reconcile;
pub mod redb_backend;
mod tables;
pub mod writer;

pub use backend::{BackendError, StorageBackend};
pub use meta::MetaRepository;
pub use models::{ObjectRecord, StorageLocation};
pub use pending::PendingQueue;
pub use pool::{BackendPool, PoolError};
pub use reader::{BlobReader, RangeSpec, ReadError};
pub use reconcile::Reconciler;
pub use redb_backend::RedbBackend;
pub use writer::{BlobWriter, WriteError, WriterConfig};
