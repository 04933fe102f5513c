pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod event;
pub mod interval;
pub mod lsn;
pub mod mock;
pub mod notification;
pub mod source;

pub use checkpoint::{CheckpointState, SharedCheckpoint};
pub use engine::{ReplicationEngine, ReplicatorConfig, DEFAULT_SLOT_NAME, OUTPUT_PLUGIN};
pub use error::{BoxError, Error, Result};
pub use event::{ChangeAction, ChangeEvent, EntityBody, EntitySnapshot, RelationMember};
pub use interval::{IdleDecision, IntervalController};
pub use lsn::{format_lsn, parse_lsn, Lsn};
pub use notification::{EntityRef, Notification, Opcode, TransactionFlag};
pub use source::{
    ChangeSink, HistorySource, NotificationStream, ReferenceClock, ReplicationBackend,
    SinkMetadata, CHECKPOINT_METADATA_KEY,
};
