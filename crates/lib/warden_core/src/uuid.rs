// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Principals, refresh tokens and audit rows use v7 ids so rows sort by
// creation time without a separate index.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable) as text.
pub fn uuidv7() -> String {
    Uuid::now_v7().to_string()
}
