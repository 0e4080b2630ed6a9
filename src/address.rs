//! Thread and response addressing.
//!
//! A thread has two addresses: its primary id, a time-ordered UUID, and a
//! legacy epoch id, the creation time in whole seconds. Old clients can only
//! send the numeric key, so both must resolve to the same thread.
//!
//! Response numbers are not computed here. Assigning `max + 1` is only
//! correct inside the store's own unit of work, see
//! [Store::append_response](crate::models::Store::append_response).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::validate::{Field, Problem, ValidationError};

/// The primary id of a thread.
pub type ThreadId = Uuid;
/// The primary id of a response.
pub type ResponseId = Uuid;
/// The primary id of a board.
pub type BoardId = Uuid;
/// A thread's legacy key: creation time in seconds since the Unix epoch.
pub type EpochId = i64;
/// A response's position in its thread, starting at 1.
pub type ResponseNumber = i32;

/// Generate a new thread id.
///
/// Ids are UUIDv7, so they sort by creation time and ids made by one process
/// are strictly increasing.
pub fn new_thread_id() -> ThreadId {
    Uuid::now_v7()
}

/// Generate a new response id.
pub fn new_response_id() -> ResponseId {
    Uuid::now_v7()
}

/// The legacy epoch id for a thread created at `posted_at`.
///
/// Two threads created in the same second get the same epoch id; nothing here
/// prevents that.
pub fn epoch_id_for(posted_at: DateTime<Utc>) -> EpochId {
    posted_at.timestamp()
}

/// How a caller refers to a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThreadRef {
    Id(ThreadId),
    Epoch(EpochId),
}

impl ThreadRef {
    /// Parse a legacy thread key such as `1700000000` or `1700000000.dat`.
    pub fn from_legacy_key(key: &str) -> Result<ThreadRef, ValidationError> {
        let digits = key.strip_suffix(".dat").unwrap_or(key);

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::new(Field::ThreadId, Problem::Malformed));
        }

        digits
            .parse()
            .map(ThreadRef::Epoch)
            .map_err(|_| ValidationError::new(Field::ThreadId, Problem::Malformed))
    }
}

impl FromStr for ThreadRef {
    type Err = ValidationError;

    /// Accept either a UUID or a legacy numeric key.
    fn from_str(s: &str) -> Result<ThreadRef, ValidationError> {
        match Uuid::parse_str(s) {
            Ok(id) => Ok(ThreadRef::Id(id)),
            Err(_) => ThreadRef::from_legacy_key(s),
        }
    }
}

impl From<ThreadId> for ThreadRef {
    fn from(id: ThreadId) -> ThreadRef {
        ThreadRef::Id(id)
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ThreadRef::Id(id) => write!(f, "{}", id),
            ThreadRef::Epoch(epoch) => write!(f, "#{}", epoch),
        }
    }
}

/// Check a response number that came from a caller.
pub fn validate_response_number(
    number: i64,
) -> Result<ResponseNumber, ValidationError> {
    if number < 1 {
        return Err(ValidationError::new(
            Field::ResponseNumber,
            Problem::NotPositive,
        ));
    }
    ResponseNumber::try_from(number)
        .map_err(|_| ValidationError::new(Field::ResponseNumber, Problem::Malformed))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn epoch_id_is_floor_of_seconds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(epoch_id_for(at), 1_714_564_800);

        let at = at + chrono::Duration::milliseconds(999);
        assert_eq!(epoch_id_for(at), 1_714_564_800);

        let at = Utc.timestamp_millis_opt(1_700_000_000_999).unwrap();
        assert_eq!(epoch_id_for(at), 1_700_000_000);
    }

    #[test]
    fn ids_are_increasing() {
        let ids: Vec<ThreadId> = (0..1000).map(|_| new_thread_id()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        let a = new_response_id();
        let b = new_response_id();
        assert!(a < b);
        assert_eq!(a.get_version_num(), 7);
    }

    #[test]
    fn legacy_keys() {
        assert_eq!(
            ThreadRef::from_legacy_key("1700000000.dat").unwrap(),
            ThreadRef::Epoch(1_700_000_000)
        );
        assert_eq!(
            ThreadRef::from_legacy_key("1700000000").unwrap(),
            ThreadRef::Epoch(1_700_000_000)
        );
        assert!(ThreadRef::from_legacy_key(".dat").is_err());
        assert!(ThreadRef::from_legacy_key("-1").is_err());
        assert!(ThreadRef::from_legacy_key("12a").is_err());
        assert!(ThreadRef::from_legacy_key("99999999999999999999").is_err());
    }

    #[test]
    fn thread_ref_from_str() {
        let id = new_thread_id();
        assert_eq!(id.to_string().parse::<ThreadRef>().unwrap(), ThreadRef::Id(id));
        assert_eq!("42".parse::<ThreadRef>().unwrap(), ThreadRef::Epoch(42));
        assert!("nope".parse::<ThreadRef>().is_err());
    }

    #[test]
    fn response_numbers_start_at_one() {
        assert_eq!(validate_response_number(1).unwrap(), 1);
        assert!(validate_response_number(0).is_err());
        assert!(validate_response_number(i64::MAX).is_err());
    }
}
