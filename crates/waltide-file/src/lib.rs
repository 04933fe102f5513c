mod error;
pub mod properties;
mod sink;

pub use error::{FileSinkError, FileSinkResult};
pub use sink::{load_checkpoint, ReplicationDirectorySink, STATE_FILE};
