pub mod checkpoint;
pub mod config;
pub mod data;
pub mod git;
pub mod util;

pub use checkpoint::{
    phase_key, run_checkpoint, CheckpointError, CheckpointOutcome, CheckpointRequest,
};
pub use config::{Config, ConfigError};
pub use data::{
    MemoryStateStore, SqliteStateStore, StateAccessor, StateEntry, StateError, StateStore,
    StateValue, StoreOptions, ValueType,
};
pub use git::{
    CommitResult, CommitSettings, ProjectRepository, RepoError, RepoStatus, ScopedRepository,
    ToolingRepository,
};
