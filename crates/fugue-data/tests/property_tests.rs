//! Property tests for version reference counting, the valid chain and alias
//! deletion.

use fugue_data::{
    DataInfo, DataInstance, DataLocation, DataValue, DataVersion, DeletionMode,
    InMemoryHostDirectory, LogicalData, Protocol,
};
use fugue_types::DataId;
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Generators
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum ChainOp {
    Keep,
    CompleteWrite,
    Cancel,
    MarkToDelete,
}

fn arb_chain_op() -> impl Strategy<Value = ChainOp> {
    prop_oneof![
        Just(ChainOp::Keep),
        Just(ChainOp::CompleteWrite),
        Just(ChainOp::Cancel),
        Just(ChainOp::MarkToDelete),
    ]
}

// ============================================================================
// Reference Counting
// ============================================================================

proptest! {
    #[test]
    fn prop_deletable_reported_exactly_once(
        accesses in prop::collection::vec(any::<bool>(), 0..10),
        mark_at in 0usize..11,
    ) {
        let mut v = DataVersion::new(DataInstance::new(DataId::new(1), 1));
        for &is_read in &accesses {
            if is_read { v.will_be_read() } else { v.will_be_written() }
        }

        let mark_at = mark_at % (accesses.len() + 1);
        let mut deletable = 0;
        for (i, &is_read) in accesses.iter().enumerate() {
            if i == mark_at && v.mark_to_delete() {
                deletable += 1;
            }
            let done = if is_read { v.has_been_read() } else { v.has_been_written() };
            if done {
                deletable += 1;
            }
        }
        if mark_at == accesses.len() && v.mark_to_delete() {
            deletable += 1;
        }

        prop_assert_eq!(deletable, 1);
        prop_assert_eq!(v.readers(), 0);
        prop_assert_eq!(v.writers(), 0);
        prop_assert!(!v.is_valid());
        prop_assert!(!v.invalidate());
        prop_assert!(!v.is_valid());
    }
}

// ============================================================================
// Valid Chain
// ============================================================================

proptest! {
    #[test]
    fn prop_previous_valid_predecessor_is_valid(
        ops in prop::collection::vec(arb_chain_op(), 1..12),
    ) {
        let mut info = DataInfo::new(DataId::new(5));
        for _ in 1..ops.len() {
            info.will_be_written();
        }
        let newest = ops.len() as u32;

        for (i, op) in ops.iter().enumerate() {
            let version = i as u32 + 1;
            match op {
                ChainOp::Keep => {}
                // version 1 was registered, not written by a task
                ChainOp::CompleteWrite if version > 1 => {
                    info.has_been_written(version).unwrap();
                }
                ChainOp::CompleteWrite => {}
                ChainOp::Cancel => {
                    info.cancel_version(version).unwrap();
                }
                ChainOp::MarkToDelete => {
                    info.mark_version_to_delete(version);
                }
            }
        }

        for version in 1..=newest {
            if let Some(prev) = info.previous_valid_predecessor(version) {
                prop_assert!(prev < version);
                prop_assert!(info.version(prev).map(|v| v.is_valid()).unwrap_or(false));
            }
        }

        let chain = info.valid_chain();
        prop_assert!(chain.windows(2).all(|w| w[0] < w[1]));
        for id in chain {
            prop_assert!(info.version(id).map(|v| v.is_valid()).unwrap_or(false));
        }
    }
}

// ============================================================================
// Alias Deletion
// ============================================================================

proptest! {
    #[test]
    fn prop_only_last_alias_clears_value(
        extra in 0usize..5,
        order_seed in any::<u64>(),
    ) {
        let hosts = Arc::new(InMemoryHostDirectory::new("master"));
        let ld = LogicalData::new("a0", hosts);
        ld.set_value(DataValue::from("value"));
        let mut aliases = vec!["a0".to_string()];
        for i in 1..=extra {
            let alias = format!("a{}", i);
            ld.add_known_alias(&alias);
            aliases.push(alias);
        }
        ld.add_location(DataLocation::private("w1", Protocol::File, "/remote/a"));

        // deterministic rotation of the removal order
        let len = aliases.len();
        aliases.rotate_left((order_seed as usize) % len);

        let (last, rest) = aliases.split_last().unwrap();
        for alias in rest {
            prop_assert!(!ld.remove_known_alias(alias, DeletionMode::Sync));
            prop_assert!(ld.is_in_memory());
            prop_assert!(ld
                .locations()
                .contains(&DataLocation::private("w1", Protocol::File, "/remote/a")));
        }

        prop_assert!(ld.remove_known_alias(last, DeletionMode::Sync));
        prop_assert!(!ld.is_in_memory());
        prop_assert!(ld.locations().is_empty());
        prop_assert!(ld.is_deleted());
    }
}
