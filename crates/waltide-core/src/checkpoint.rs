//! Replication checkpoint state.
//!
//! The checkpoint records how far replication has progressed so that a
//! restarted process neither misses nor repeats any data. It is persisted as a
//! string-keyed property mapping by the change sink.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::lsn::Lsn;

pub const KEY_SLOT_NAME: &str = "slotName";
pub const KEY_LSN_MAX: &str = "lsnMax";
pub const KEY_LSN_MAX_QUERIED: &str = "lsnMaxQueried";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_SEQUENCE_NUMBER: &str = "sequenceNumber";

/// Textual form of `timestamp` in the property mapping.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// State remembered between replication intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointState {
    /// Replication slot this checkpoint belongs to. Assigned once.
    pub slot_name: Option<String>,
    /// Position confirmed complete as of the previous finished interval.
    pub lsn_max: Lsn,
    /// Position read through as of the previous finished interval.
    pub lsn_max_queried: Lsn,
    /// Latest entity timestamp forwarded to the sink.
    pub timestamp: DateTime<Utc>,
    /// Checkpoint generation counter.
    pub sequence_number: u64,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            slot_name: None,
            lsn_max: Lsn::INVALID,
            lsn_max_queried: Lsn::INVALID,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            sequence_number: 0,
        }
    }
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a checkpoint from its property mapping.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self> {
        let mut state = Self::default();
        state.load(properties)?;
        Ok(state)
    }

    /// Overwrite this checkpoint with the values in `properties`.
    ///
    /// Values must be in the exact form `store` writes them, and `lsnMax` may
    /// not be ahead of `lsnMaxQueried`.
    pub fn load(&mut self, properties: &BTreeMap<String, String>) -> Result<()> {
        let lsn_max = canonical(properties, KEY_LSN_MAX, |v| v.parse::<Lsn>(), Lsn::to_string)?;
        let lsn_max_queried = canonical(
            properties,
            KEY_LSN_MAX_QUERIED,
            |v| v.parse::<Lsn>(),
            Lsn::to_string,
        )?;
        let timestamp = canonical(properties, KEY_TIMESTAMP, parse_timestamp, |t| {
            format_timestamp(*t)
        })?;
        let sequence_number = canonical(
            properties,
            KEY_SEQUENCE_NUMBER,
            |v| v.parse::<u64>(),
            u64::to_string,
        )?;

        if lsn_max > lsn_max_queried {
            return Err(invalid(
                KEY_LSN_MAX,
                format!("{lsn_max} is ahead of {KEY_LSN_MAX_QUERIED} {lsn_max_queried}"),
            ));
        }

        self.slot_name = properties
            .get(KEY_SLOT_NAME)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.lsn_max = lsn_max;
        self.lsn_max_queried = lsn_max_queried;
        self.timestamp = timestamp;
        self.sequence_number = sequence_number;

        Ok(())
    }

    /// Write all fields into `properties`.
    pub fn store(&self, properties: &mut BTreeMap<String, String>) {
        if let Some(slot_name) = &self.slot_name {
            properties.insert(KEY_SLOT_NAME.to_string(), slot_name.clone());
        }
        properties.insert(KEY_LSN_MAX.to_string(), self.lsn_max.to_string());
        properties.insert(KEY_LSN_MAX_QUERIED.to_string(), self.lsn_max_queried.to_string());
        properties.insert(KEY_TIMESTAMP.to_string(), format_timestamp(self.timestamp));
        properties.insert(KEY_SEQUENCE_NUMBER.to_string(), self.sequence_number.to_string());
    }

    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        self.store(&mut properties);
        properties
    }

    /// True when the stream position is the "never replicated" sentinel.
    pub fn is_never_replicated(&self) -> bool {
        !self.lsn_max_queried.is_valid()
    }

    /// Record the slot name, refusing to change an already recorded one.
    pub fn assign_slot_name(&mut self, slot_name: &str) -> Result<()> {
        match &self.slot_name {
            Some(recorded) if recorded != slot_name => Err(Error::SlotMismatch {
                recorded: recorded.clone(),
                configured: slot_name.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.slot_name = Some(slot_name.to_string());
                Ok(())
            }
        }
    }

    /// Raise the timestamp high-water mark. Never lowers it.
    pub fn advance_timestamp(&mut self, timestamp: DateTime<Utc>) {
        if timestamp > self.timestamp {
            self.timestamp = timestamp;
        }
    }

    /// Advance the LSN high-water marks at the end of an interval.
    pub fn finish_interval(&mut self, last_received: Lsn, system_time: DateTime<Utc>) {
        self.lsn_max = self.lsn_max_queried;
        self.lsn_max_queried = last_received.max(self.lsn_max_queried);
        self.advance_timestamp(system_time);
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CheckpointState(slotName={}, lsnMax={}, lsnMaxQueried={}, timestamp={}, sequenceNumber={})",
            self.slot_name.as_deref().unwrap_or("-"),
            self.lsn_max,
            self.lsn_max_queried,
            format_timestamp(self.timestamp),
            self.sequence_number
        )
    }
}

/// Checkpoint handle shared between the engine and the change sink.
///
/// The lock is only held for the duration of the closure, never across an
/// await point.
#[derive(Debug, Clone, Default)]
pub struct SharedCheckpoint {
    inner: Arc<Mutex<CheckpointState>>,
}

impl SharedCheckpoint {
    pub fn new(state: CheckpointState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&CheckpointState) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut CheckpointState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> CheckpointState {
        self.read(CheckpointState::clone)
    }
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map(|dt| dt.and_utc())
}

fn required<'a>(properties: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    properties
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidCheckpoint {
            key: key.to_string(),
            message: "missing".to_string(),
        })
}

/// Parse `key` and insist the text is exactly what `render` would write back.
fn canonical<T, E: fmt::Display>(
    properties: &BTreeMap<String, String>,
    key: &str,
    parse: impl FnOnce(&str) -> std::result::Result<T, E>,
    render: impl FnOnce(&T) -> String,
) -> Result<T> {
    let raw = required(properties, key)?;
    let value = parse(raw).map_err(|e| invalid(key, e))?;
    let rendered = render(&value);
    if rendered != raw {
        return Err(invalid(
            key,
            format!("'{raw}' is not in canonical form, expected '{rendered}'"),
        ));
    }
    Ok(value)
}

fn invalid(key: &str, cause: impl fmt::Display) -> Error {
    Error::InvalidCheckpoint {
        key: key.to_string(),
        message: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_is_never_replicated() {
        let state = CheckpointState::new();
        assert!(state.is_never_replicated());
        assert_eq!(state.lsn_max, Lsn::INVALID);
        assert_eq!(state.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(state.sequence_number, 0);
        assert!(state.slot_name.is_none());
    }

    #[test]
    fn test_properties_roundtrip() {
        let original = props(&[
            ("slotName", "osmosis"),
            ("lsnMax", "0/16B3748"),
            ("lsnMaxQueried", "1/A0"),
            ("timestamp", "2024-03-01T12:30:05Z"),
            ("sequenceNumber", "42"),
        ]);

        let state = CheckpointState::from_properties(&original).unwrap();
        assert_eq!(state.slot_name.as_deref(), Some("osmosis"));
        assert_eq!(state.lsn_max, Lsn(0x16B3748));
        assert_eq!(state.lsn_max_queried, Lsn(0x1_0000_00A0));
        assert_eq!(state.sequence_number, 42);

        assert_eq!(state.to_properties(), original);
    }

    #[test]
    fn test_load_rejects_missing_and_malformed_values() {
        let missing = props(&[("lsnMax", "0/1")]);
        assert!(matches!(
            CheckpointState::from_properties(&missing),
            Err(Error::InvalidCheckpoint { key, .. }) if key == "lsnMaxQueried"
        ));

        let malformed = props(&[
            ("lsnMax", "0/1"),
            ("lsnMaxQueried", "nonsense"),
            ("timestamp", "2024-03-01T12:30:05Z"),
            ("sequenceNumber", "1"),
        ]);
        assert!(matches!(
            CheckpointState::from_properties(&malformed),
            Err(Error::InvalidCheckpoint { key, .. }) if key == "lsnMaxQueried"
        ));
    }

    #[test]
    fn test_load_rejects_non_canonical_text() {
        let base = [
            ("lsnMax", "0/16B3748"),
            ("lsnMaxQueried", "0/16B3748"),
            ("timestamp", "2024-03-01T12:30:05Z"),
            ("sequenceNumber", "42"),
        ];

        for (key, value) in [
            ("lsnMax", "0/16b3748"),
            ("lsnMaxQueried", "00/16B3748"),
            ("timestamp", "2024-3-01T12:30:05Z"),
            ("sequenceNumber", "042"),
            ("sequenceNumber", " 42"),
        ] {
            let mut properties = props(&base);
            properties.insert(key.to_string(), value.to_string());
            let result = CheckpointState::from_properties(&properties);
            assert!(
                matches!(&result, Err(Error::InvalidCheckpoint { key: k, .. }) if k == key),
                "{key}={value} was accepted: {result:?}"
            );
        }

        let state = CheckpointState::from_properties(&props(&base)).unwrap();
        assert_eq!(state.to_properties(), props(&base));
    }

    #[test]
    fn test_load_rejects_lsn_max_ahead_of_lsn_max_queried() {
        let properties = props(&[
            ("lsnMax", "0/20"),
            ("lsnMaxQueried", "0/10"),
            ("timestamp", "2024-03-01T12:30:05Z"),
            ("sequenceNumber", "1"),
        ]);

        let err = CheckpointState::from_properties(&properties).unwrap_err();
        assert!(matches!(err, Error::InvalidCheckpoint { ref key, .. } if key == "lsnMax"));
    }

    #[test]
    fn test_slot_name_is_assigned_once() {
        let mut state = CheckpointState::new();
        state.assign_slot_name("osmosis").unwrap();
        state.assign_slot_name("osmosis").unwrap();

        let err = state.assign_slot_name("other").unwrap_err();
        assert!(matches!(err, Error::SlotMismatch { .. }));
        assert_eq!(state.slot_name.as_deref(), Some("osmosis"));
    }

    #[test]
    fn test_timestamp_never_decreases() {
        let mut state = CheckpointState::new();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        state.advance_timestamp(later);
        state.advance_timestamp(earlier);
        assert_eq!(state.timestamp, later);
    }

    #[test]
    fn test_finish_interval_shifts_high_water_marks() {
        let mut state = CheckpointState {
            lsn_max: Lsn(10),
            lsn_max_queried: Lsn(20),
            ..CheckpointState::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        state.finish_interval(Lsn(35), now);
        assert_eq!(state.lsn_max, Lsn(20));
        assert_eq!(state.lsn_max_queried, Lsn(35));
        assert_eq!(state.timestamp, now);

        state.finish_interval(Lsn(35), now);
        assert_eq!(state.lsn_max, Lsn(35));
        assert_eq!(state.lsn_max_queried, Lsn(35));
    }

    #[test]
    fn test_shared_checkpoint_updates_are_visible() {
        let shared = SharedCheckpoint::default();
        let other = shared.clone();

        other.update(|cp| cp.sequence_number = 7);
        assert_eq!(shared.read(|cp| cp.sequence_number), 7);
    }
}
