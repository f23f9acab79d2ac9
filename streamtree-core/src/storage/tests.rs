//! Unit tests for the block-allocated arrays.

use proptest::prelude::*;
use rstest::rstest;

use crate::{error::StorageErrorCode, test_utils::suite_proptest_config};

use super::{
    BlockArray, BlockGeometry, BlockStore, ExtendableArray, FREE_END, HeapProvider, MmapProvider,
    OocArray, dump_binary, read_binary,
};

#[rstest]
#[case(0)]
#[case(31)]
fn rejects_unsupported_block_bits(#[case] bits: u32) {
    let err = BlockGeometry::new(bits).expect_err("exponent must be rejected");
    assert_eq!(err.code(), StorageErrorCode::InvalidBlockBits);
}

#[rstest]
#[case(2, 0, (0, 0))]
#[case(2, 3, (0, 3))]
#[case(2, 4, (1, 0))]
#[case(3, 19, (2, 3))]
fn locates_elements_by_block_and_offset(
    #[case] bits: u32,
    #[case] index: usize,
    #[case] expected: (usize, usize),
) {
    let geometry = BlockGeometry::new(bits).expect("valid exponent");
    assert_eq!(geometry.locate(index), expected);
}

#[test]
fn growth_keeps_existing_elements_in_place() {
    let mut array = BlockArray::<u64>::new(2).expect("valid exponent");
    array.push(7).expect("push");
    let before: *const u64 = array.get(0).expect("element 0");

    array.resize(64).expect("grow");

    let after: *const u64 = array.get(0).expect("element 0");
    assert_eq!(before, after, "growth must not relocate existing blocks");
    assert_eq!(array.get(0), Some(&7));
    assert_eq!(array.block_count(), 16);
}

#[test]
fn shrink_frees_tail_blocks_and_regrowth_resets_values() {
    let mut array = BlockArray::<u32>::new(2).expect("valid exponent");
    for value in 1..=10 {
        array.push(value).expect("push");
    }
    array.resize(5).expect("shrink");
    assert_eq!(array.block_count(), 2);
    assert_eq!(array.get(5), None);

    array.resize(10).expect("regrow");
    let values: Vec<u32> = array.iter().copied().collect();
    assert_eq!(values, vec![1, 2, 3, 4, 5, 0, 0, 0, 0, 0]);
}

#[test]
fn binary_dump_is_independent_of_block_size() {
    let mut source = BlockArray::<u32>::new(2).expect("valid exponent");
    for value in 0..11 {
        source.push(value * 3).expect("push");
    }
    let mut bytes = Vec::new();
    dump_binary(&source, &mut bytes).expect("dump");
    assert_eq!(bytes.len(), 11 * size_of::<u32>());

    let mut copy = BlockArray::<u32>::new(4).expect("valid exponent");
    read_binary(&mut copy, bytes.as_slice()).expect("read");
    assert_eq!(
        copy.iter().copied().collect::<Vec<_>>(),
        source.iter().copied().collect::<Vec<_>>()
    );
}

#[test]
fn binary_read_rejects_partial_elements() {
    let bytes = [0_u8; 6];
    let mut array = BlockArray::<u32>::new(2).expect("valid exponent");
    let err = read_binary(&mut array, bytes.as_slice()).expect_err("six bytes is not whole u32s");
    assert_eq!(err.code(), StorageErrorCode::TruncatedElement);
    assert_eq!(array.len(), 1);
}

#[test]
fn heap_provider_tracks_block_lifecycle() {
    let mut array =
        OocArray::<u64, _>::with_provider(2, HeapProvider::new()).expect("valid exponent");
    array.resize(12).expect("grow to three blocks");
    assert_eq!(array.provider().live_blocks(), 3);

    array.resize(4).expect("shrink to one block");
    assert_eq!(array.provider().live_blocks(), 1);
    assert_eq!(array.provider().released(), 2);
}

#[test]
fn out_of_core_array_keeps_one_file_per_live_block() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let mut array = OocArray::<u64>::new(2, Some(scratch.path())).expect("array");
    array.resize(12).expect("grow to three blocks");

    let paths: Vec<_> = (0..3)
        .map(|index| array.provider().block_path(index))
        .collect();
    for path in &paths {
        assert!(path.exists(), "{} should exist", path.display());
    }

    array.resize(4).expect("shrink to one block");
    assert!(paths[0].exists());
    assert!(!paths[1].exists());
    assert!(!paths[2].exists());

    let guard = array.provider().guard_path().to_path_buf();
    drop(array);
    assert!(!paths[0].exists());
    assert!(!guard.exists());
}

#[test]
fn out_of_core_values_survive_growth() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let mut array = OocArray::<u32>::new(3, Some(scratch.path())).expect("array");
    for value in 0..20 {
        array.push(value).expect("push");
    }
    array.resize(40).expect("grow");
    assert_eq!(array.get(19), Some(&19));
    assert_eq!(array.get(20), Some(&0));

    let mut bytes = Vec::new();
    dump_binary(&array, &mut bytes).expect("dump");
    let mut copy = BlockArray::<u32>::new(2).expect("valid exponent");
    read_binary(&mut copy, bytes.as_slice()).expect("read");
    assert_eq!(copy.len(), 40);
    assert_eq!(copy.get(19), Some(&19));
}

#[test]
fn extendable_array_reuses_freed_slots_before_appending() {
    let mut array = ExtendableArray::new(2).expect("valid exponent");
    let slots: Vec<_> = (0..4)
        .map(|id| array.insert(id, id * 10).expect("insert"))
        .collect();
    assert_eq!(array.remove(1), Some(10));
    assert_eq!(array.remove(3), Some(30));
    assert_eq!(array.free_len(), 2);

    let reused = array.insert(99, 990).expect("insert");
    assert_eq!(reused, slots[3], "most recently freed slot comes first");
    let reused_again = array.insert(98, 980).expect("insert");
    assert_eq!(reused_again, slots[1]);
    assert_eq!(array.slot_count(), 4);

    let appended = array.insert(97, 970).expect("insert");
    assert_eq!(appended, 4);
    assert_eq!(array.capacity(), 8, "full tail block forces one new block");
    array.validate_free_chain().expect("free chain intact");
}

#[test]
fn extendable_array_lookup_by_id_and_slot() {
    let mut array = ExtendableArray::new(3).expect("valid exponent");
    let slot = array.insert(42, "vertex").expect("insert");
    assert_eq!(array.slot_of(42), Some(slot));
    assert_eq!(array.id_at(slot), Some(42));
    assert_eq!(array.get(slot), Some(&"vertex"));
    assert!(array.remove(42).is_some());
    assert_eq!(array.get(slot), None);
    assert_eq!(array.slot_of(42), None);
    assert_ne!(slot, FREE_END);
}

#[derive(Clone, Debug)]
enum ArenaOp {
    Insert(u64),
    Remove(u64),
}

fn arena_ops() -> impl Strategy<Value = Vec<ArenaOp>> {
    prop::collection::vec(
        prop_oneof![
            (0_u64..32).prop_map(ArenaOp::Insert),
            (0_u64..32).prop_map(ArenaOp::Remove),
        ],
        0..200,
    )
}

proptest! {
    #![proptest_config(suite_proptest_config(64))]

    #[test]
    fn extendable_array_matches_a_map_model(ops in arena_ops()) {
        let mut array = ExtendableArray::new(2).expect("valid exponent");
        let mut model = std::collections::HashMap::new();
        for op in ops {
            match op {
                ArenaOp::Insert(id) => {
                    let slot = array.insert(id, id).expect("insert");
                    model.insert(id, slot);
                }
                ArenaOp::Remove(id) => {
                    prop_assert_eq!(array.remove(id), model.remove(&id).map(|_| id));
                }
            }
            prop_assert!(array.validate_free_chain().is_ok());
        }
        prop_assert_eq!(array.len(), model.len());
        for (id, slot) in model {
            prop_assert_eq!(array.slot_of(id), Some(slot));
            prop_assert_eq!(array.get(slot), Some(&id));
        }
    }

    #[test]
    fn block_array_resize_preserves_prefix(
        values in prop::collection::vec(any::<u32>(), 0..100),
        bits in 1_u32..5,
        target in 0_usize..150,
    ) {
        let mut array = BlockArray::<u32>::new(bits).expect("valid exponent");
        for value in &values {
            array.push(*value).expect("push");
        }
        array.resize(target).expect("resize");
        prop_assert_eq!(array.len(), target);
        prop_assert_eq!(array.capacity(), target.div_ceil(1 << bits) << bits);
        let kept = values.len().min(target);
        let prefix: Vec<u32> = array.iter().take(kept).copied().collect();
        prop_assert_eq!(prefix.as_slice(), &values[..kept]);
        prop_assert!(array.iter().skip(kept).all(|value| *value == 0));
    }
}

#[test]
fn mmap_provider_names_blocks_after_its_guard() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let provider = MmapProvider::new(Some(scratch.path())).expect("provider");
    let guard = provider.guard_path().to_string_lossy().into_owned();
    let block = provider.block_path(7).to_string_lossy().into_owned();
    assert_eq!(block, format!("{guard}_block_0007"));
}
