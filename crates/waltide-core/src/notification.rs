//! Decoding of the logical decoding notification lines.
//!
//! The output plugin emits one text line per notification:
//!
//! ```text
//! BEGIN
//! NEW way 123 4
//! COMMIT
//! ```

/// Reference to a newly committed entity version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub element_kind: String,
    pub id: i64,
    pub version: i64,
}

/// Notification opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Begin,
    Commit,
    New,
    Update,
    Unknown,
}

/// A single decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Begin,
    Commit,
    New(EntityRef),
    /// Reserved by the output plugin. Carries no effect.
    Update,
    /// Unrecognised or malformed line, kept verbatim for logging.
    Unknown(String),
}

impl Notification {
    /// Decode one notification line.
    ///
    /// `NEW` must carry exactly three arguments (kind, id, version) with
    /// integer id and version; anything else is `Unknown`. `BEGIN` and
    /// `COMMIT` ignore any arguments.
    pub fn parse(line: &str) -> Self {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.first().copied() {
            Some("BEGIN") => Notification::Begin,
            Some("COMMIT") => Notification::Commit,
            Some("UPDATE") => Notification::Update,
            Some("NEW") => match tokens.as_slice() {
                [_, kind, id, version] => match (id.parse::<i64>(), version.parse::<i64>()) {
                    (Ok(id), Ok(version)) => Notification::New(EntityRef {
                        element_kind: kind.to_string(),
                        id,
                        version,
                    }),
                    _ => Notification::Unknown(line.to_string()),
                },
                _ => Notification::Unknown(line.to_string()),
            },
            _ => Notification::Unknown(line.to_string()),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Notification::Begin => Opcode::Begin,
            Notification::Commit => Opcode::Commit,
            Notification::New(_) => Opcode::New,
            Notification::Update => Opcode::Update,
            Notification::Unknown(_) => Opcode::Unknown,
        }
    }
}

/// Whether the stream is currently inside a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionFlag {
    #[default]
    Idle,
    InTransaction,
}

impl TransactionFlag {
    /// Next state after observing `notification`.
    pub fn apply(self, notification: &Notification) -> Self {
        match notification {
            Notification::Begin => TransactionFlag::InTransaction,
            Notification::Commit => TransactionFlag::Idle,
            Notification::New(_) | Notification::Update | Notification::Unknown(_) => self,
        }
    }

    pub fn in_transaction(self) -> bool {
        self == TransactionFlag::InTransaction
    }
}
