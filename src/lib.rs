pub mod clock;
pub mod config;
pub mod error;
pub mod io;
pub mod observability;
pub mod store;
pub mod sync;

pub use clock::{Clock, SimulatedClock, SystemClock, Timestamp};
pub use config::{S3Config, StoreType, SyncConfig};
pub use observability::{LogConfig, LogFormat};
pub use error::{ConfigError, ListingError, PartialApplyFailure, StoreError, StoreResult};
pub use store::{InMemoryObjectStore, LocalFsObjectStore, ObjectMeta, ObjectStore};
pub use sync::{
    DeletionPolicy, DiffPlan, Reconciler, ReconcilerConfig, RunReport, RunStatus, RunSummary,
    Scheduler, SchedulerConfig, Snapshot,
};
