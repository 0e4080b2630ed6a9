//! Pseudonymous poster identity: daily hash ids, tripcodes and author names.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use chrono::NaiveDate;

use serde::{Deserialize, Serialize};

use sha2::{Digest, Sha256};

use crate::validate::{text_len, Field, Problem, ValidationError, AUTHOR_NAME_MAX};

/// Length of a hash id.
pub const HASH_ID_LEN: usize = 8;
/// Length of a tripcode.
pub const TRIP_LEN: usize = 12;

/// An 8 character tag identifying a poster for one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashId(String);

impl HashId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a hash id read back from storage.
    pub(crate) fn from_stored(hash_id: String) -> HashId {
        HashId(hash_id)
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the hash id for a poster's IP on a given day.
///
/// The tag is the first 8 characters of the base64 SHA-256 digest of the IP
/// followed by the date. There is no per-board salt, so the same IP gets the
/// same tag on every board for the whole day.
pub fn hash_identity(ip: &str, date: NaiveDate) -> HashId {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(date.format("%a %b %d %Y").to_string().as_bytes());

    let encoded = STANDARD.encode(hasher.finalize());
    HashId(encoded[..HASH_ID_LEN].to_string())
}

/// Accept a hash id that was produced elsewhere, e.g. read back from storage.
pub fn create_hash_id(raw: &str) -> Result<HashId, ValidationError> {
    if raw.chars().count() != HASH_ID_LEN {
        return Err(ValidationError::new(
            Field::HashId,
            Problem::WrongLength {
                expected: HASH_ID_LEN,
            },
        ));
    }
    Ok(HashId(raw.to_string()))
}

/// A tripcode derived from a poster's secret key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trip(String);

impl Trip {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a tripcode read back from storage.
    pub(crate) fn from_stored(trip: String) -> Trip {
        Trip(trip)
    }
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a tripcode from a key.
pub fn derive_trip(key: &str) -> Trip {
    let digest = Sha256::digest(key.as_bytes());
    let encoded = STANDARD.encode(digest);

    let trip = encoded[..TRIP_LEN].replace('+', ".").replace('/', "$");
    Trip(trip)
}

/// The name a response was posted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorName {
    /// A plain display name, possibly the board default.
    Bare { name: String },
    /// A display name signed with a tripcode.
    Tripped { name: String, trip: Trip },
}

impl AuthorName {
    /// The display name, without the trip.
    pub fn name(&self) -> &str {
        match self {
            AuthorName::Bare { name } | AuthorName::Tripped { name, .. } => {
                name
            }
        }
    }

    pub fn trip(&self) -> Option<&Trip> {
        match self {
            AuthorName::Bare { .. } => None,
            AuthorName::Tripped { trip, .. } => Some(trip),
        }
    }

    /// Rebuild an author name from its stored columns.
    pub(crate) fn from_parts(name: String, trip: Option<String>) -> AuthorName {
        match trip {
            Some(trip) => AuthorName::Tripped {
                name,
                trip: Trip::from_stored(trip),
            },
            None => AuthorName::Bare { name },
        }
    }
}

impl fmt::Display for AuthorName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthorName::Bare { name } => f.write_str(name),
            AuthorName::Tripped { name, trip } => write!(f, "{} ◆{}", name, trip),
        }
    }
}

/// Parse the raw name field of a post.
///
/// An empty or missing name falls back to the board default. Otherwise the
/// text before the first `#` is the display name and everything after it is
/// the trip key.
pub fn parse_author_name(
    raw: Option<&str>,
    fallback: &str,
) -> Result<AuthorName, ValidationError> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => {
            return Ok(AuthorName::Bare {
                name: fallback.to_string(),
            })
        }
    };

    if text_len(raw) > AUTHOR_NAME_MAX {
        return Err(ValidationError::new(
            Field::AuthorName,
            Problem::TooLong {
                max: AUTHOR_NAME_MAX,
            },
        ));
    }

    Ok(match raw.split_once('#') {
        Some((name, key)) => AuthorName::Tripped {
            name: name.to_string(),
            trip: derive_trip(key),
        },
        None => AuthorName::Bare {
            name: raw.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn hash_identity_is_stable_per_day() {
        let a = hash_identity("192.0.2.1", day(2024, 5, 1));
        let b = hash_identity("192.0.2.1", day(2024, 5, 1));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), HASH_ID_LEN);

        assert_ne!(a, hash_identity("192.0.2.2", day(2024, 5, 1)));
        assert_ne!(a, hash_identity("192.0.2.1", day(2024, 5, 2)));
    }

    #[test]
    fn hash_identity_matches_digest() {
        let digest = Sha256::digest(b"198.51.100.7Wed May 01 2024");
        let expected = &STANDARD.encode(digest)[..8];

        assert_eq!(
            hash_identity("198.51.100.7", day(2024, 5, 1)).as_str(),
            expected
        );
    }

    #[test]
    fn create_hash_id_checks_length() {
        assert!(create_hash_id("abcdefgh").is_ok());
        assert_eq!(
            create_hash_id("abc").unwrap_err().problem,
            Problem::WrongLength { expected: 8 }
        );
        assert!(create_hash_id("abcdefghi").is_err());
        assert!(create_hash_id("").is_err());
    }

    #[test]
    fn trip_is_deterministic() {
        let a = derive_trip("secret");
        let b = derive_trip("secret");
        assert_eq!(a, b);
        assert_eq!(a.as_str().chars().count(), TRIP_LEN);
        assert_ne!(a, derive_trip("Secret"));
    }

    #[test]
    fn trip_substitutes_unsafe_characters() {
        for key in ["a", "b", "hunter2", "tripkey", "#", "", "日本語"] {
            let trip = derive_trip(key);
            assert!(!trip.as_str().contains('+'));
            assert!(!trip.as_str().contains('/'));

            let expected = STANDARD.encode(Sha256::digest(key.as_bytes()))
                [..TRIP_LEN]
                .replace('+', ".")
                .replace('/', "$");
            assert_eq!(trip.as_str(), expected);
        }
    }

    #[test]
    fn empty_name_uses_fallback() {
        let expected = AuthorName::Bare {
            name: "Anonymous".into(),
        };
        assert_eq!(parse_author_name(None, "Anonymous").unwrap(), expected);
        assert_eq!(parse_author_name(Some(""), "Anonymous").unwrap(), expected);
    }

    #[test]
    fn bare_name() {
        let name = parse_author_name(Some("lain"), "Anonymous").unwrap();
        assert_eq!(name, AuthorName::Bare { name: "lain".into() });
        assert_eq!(name.trip(), None);
    }

    #[test]
    fn tripped_name_splits_on_first_hash() {
        let name = parse_author_name(Some("lain#wired#7"), "Anonymous").unwrap();
        assert_eq!(
            name,
            AuthorName::Tripped {
                name: "lain".into(),
                trip: derive_trip("wired#7"),
            }
        );
        assert_eq!(name.name(), "lain");
    }

    #[test]
    fn trip_only_name() {
        let name = parse_author_name(Some("#key"), "Anonymous").unwrap();
        assert_eq!(name.name(), "");
        assert_eq!(name.trip(), Some(&derive_trip("key")));
    }

    #[test]
    fn name_length_counts_the_trip_key() {
        let raw = format!("{}#{}", "n".repeat(50), "k".repeat(50));
        assert_eq!(
            parse_author_name(Some(&raw), "Anonymous")
                .unwrap_err()
                .problem,
            Problem::TooLong { max: 100 }
        );

        let raw = format!("{}#{}", "n".repeat(50), "k".repeat(49));
        assert!(parse_author_name(Some(&raw), "Anonymous").is_ok());
    }

    #[test]
    fn stored_parts_roundtrip() {
        let name = AuthorName::from_parts("a".into(), Some("XYZ".into()));
        assert_eq!(name.trip().map(Trip::as_str), Some("XYZ"));
        assert_eq!(
            AuthorName::from_parts("a".into(), None),
            AuthorName::Bare { name: "a".into() }
        );
    }
}
