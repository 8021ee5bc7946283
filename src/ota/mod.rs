// FlashWave OTA engine - core module structure
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod fetch;
pub mod health;
pub mod machine;
pub mod slots;
pub mod state;
pub mod store;
pub mod version;

pub use config::AgentConfig;
pub use descriptor::ReleaseDescriptor;
pub use envelope::OtaKey;
pub use machine::{BootOutcome, CycleOutcome, UpdateMachine, UpdatePhase};
pub use version::FirmwareVersion;
