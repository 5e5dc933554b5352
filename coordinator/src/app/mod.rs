mod cache;
mod config_store;
mod directory;
mod orchestrator;
mod startup;
mod state;

// Re-export a curated surface for the HTTP layer, the CLI and integration tests
pub use cache::{Action, BoundedLru, OperationRecord, RecentOperations};
pub use config_store::ConfigStore;
pub use directory::{
    DecryptedSecret, DirectoryError, EncryptedSecret, PgProjectDirectory, ProjectDirectory,
    TenantRecord, TenantStatus,
};
pub use orchestrator::{
    DestroyOutcome, DestroyStatus, GatewayEntry, GatewayError, GatewayOptions, Orchestrator,
    ReloadOutcome, SpawnOutcome, SpawnStatus, is_valid_tenant_id,
};
pub use startup::{shutdown_signal, start, start_server};
pub use state::{AppState, build_orchestrator};
