pub mod artifacts;
pub mod console;
pub mod record;
pub mod run_bundle;
pub mod serve;
pub mod start;

pub use artifacts::{cmd_artifacts, ArtifactsArgs};
pub use console::{cmd_console, ConsoleArgs};
pub use record::{cmd_record, RecordArgs};
pub use serve::{cmd_serve, ServeArgs};
pub use start::cmd_start;
