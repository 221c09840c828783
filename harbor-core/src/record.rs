use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Bookkeeping fields shared by every stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMeta {
    /// Fresh metadata with a random id at version 1
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp a modification time
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// A typed record kept in a named collection.
///
/// The JSON form of a record is the flattened `RecordMeta` plus the
/// record's own fields.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn version(&self) -> u32 {
        self.meta().version
    }
}

/// Implement [`Record`] for a struct with a `meta: RecordMeta` field
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $collection:expr) => {
        impl $crate::record::Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn meta(&self) -> &$crate::record::RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::record::RecordMeta {
                &mut self.meta
            }
        }
    };
}

/// Every collection name, for listing and history lookups
pub const COLLECTIONS: &[&str] = &[
    "patients",
    "appointments",
    "prescriptions",
    "take_homes",
    "dea222_orders",
    "pdmp_lookups",
    "reminders",
    "studies",
];
