use std::fmt::{Display, Formatter};
use std::ops::Deref;

use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};

/// An opaque unique ID, used for voters.
///
/// Its hex form is the voter identity that appears in signed vote payloads.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(ObjectId);

impl Id {
    /// Generate a fresh, unique ID.
    pub fn new() -> Self {
        Self(ObjectId::new())
    }

    /// A filter document matching this ID.
    pub fn as_doc(&self) -> Document {
        doc! { "_id": self.0 }
    }

    /// The 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Id {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl From<ObjectId> for Id {
    fn from(id: ObjectId) -> Self {
        Self(id)
    }
}

/// A filter document matching the given integer `_id`.
pub fn u64_id_filter(id: u64) -> Document {
    doc! { "_id": u64_bson(id) }
}

/// BSON has no unsigned 64-bit integer, so integer IDs are stored as `i64`.
///
/// Values above `i64::MAX` saturate. Counter-assigned IDs never get there, and
/// a saturated filter matches no stored document.
pub fn u64_bson(value: u64) -> Bson {
    Bson::Int64(i64::try_from(value).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ids_are_stored_as_i64() {
        assert_eq!(u64_bson(42), Bson::Int64(42));
        assert_eq!(u64_id_filter(7), doc! { "_id": 7_i64 });
        assert_eq!(u64_bson(u64::MAX), Bson::Int64(i64::MAX));
    }

    #[test]
    fn voter_ids_are_lowercase_hex() {
        let id = Id::new();
        assert_eq!(id.to_hex().len(), 24);
        assert_eq!(id.to_string(), id.to_hex());
        assert_eq!(id.as_doc(), doc! { "_id": *id });
    }
}
