//! Property-based test generators using proptest.

use crate::fixtures::base_time;
use proptest::prelude::*;
use skiff_protocol::{SyncLogEntry, SyncOperation};

/// Strategy for entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex")
}

/// Strategy for operations, including custom tags.
pub fn operation_strategy() -> impl Strategy<Value = SyncOperation> {
    prop_oneof![
        Just(SyncOperation::Create),
        Just(SyncOperation::Update),
        Just(SyncOperation::Delete),
        prop::string::string_regex("[a-z]{3,10}")
            .expect("Invalid regex")
            .prop_map(SyncOperation::from),
    ]
}

/// Strategy for data entries created within a day of [`base_time`].
pub fn data_entry_strategy() -> impl Strategy<Value = SyncLogEntry> {
    (
        entity_type_strategy(),
        "[a-z0-9]{1,12}",
        operation_strategy(),
        0i64..86_400,
    )
        .prop_map(|(entity_type, entity_id, operation, offset)| {
            SyncLogEntry::new(entity_type, entity_id, operation, "{}", false)
                .with_created_at(base_time() + chrono::Duration::seconds(offset))
        })
}

/// Strategy for up to `max` data entries in arbitrary order.
pub fn outbox_strategy(max: usize) -> impl Strategy<Value = Vec<SyncLogEntry>> {
    prop::collection::vec(data_entry_strategy(), 0..=max)
}
