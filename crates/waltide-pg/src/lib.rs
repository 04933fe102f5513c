mod clock;
mod connect;
mod context;
mod error;
pub mod history;
pub mod slot;
pub mod stream;

pub use clock::DatabaseClock;
pub use connect::connect_postgres;
pub use context::{DatabaseType, ReplicationContext};
pub use error::{PgError, PgResult};
pub use history::{ApidbHistory, ElementKind};
pub use slot::SlotInfo;
pub use stream::SqlNotificationStream;
