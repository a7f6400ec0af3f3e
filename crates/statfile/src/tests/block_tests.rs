use super::*;
use crate::format::FIRST_BLOCK_OFFSET;
use anyhow::Result;
use tempfile::tempdir;

// -------------------- Basic get / set --------------------

#[test]
fn set_then_get() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 1000)?;

    assert_eq!(f.set_block(42, 7, 3.5)?, SetOutcome::Inserted);
    assert_eq!(f.get_block(42, 7), 3.5);
    assert_eq!(f.get_block(99, 1), 0.0);
    assert_eq!(f.used_blocks()?, 1);
    Ok(())
}

#[test]
fn missing_pair_reads_zero() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 16)?;

    // Same bucket, different second hash.
    f.set_block(3, 1, 9.0)?;
    assert_eq!(f.get_block(3, 2), 0.0);
    assert_eq!(f.get_block(3 + 16, 1), 0.0);
    Ok(())
}

#[test]
fn update_in_place_keeps_used_count() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 100)?;

    f.set_block(10, 20, 1.0)?;
    assert_eq!(f.set_block(10, 20, 4.25)?, SetOutcome::Updated);
    assert_eq!(f.get_block(10, 20), 4.25);
    assert_eq!(f.used_blocks()?, 1);
    Ok(())
}

#[test]
fn colliding_pairs_share_a_chain() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 100)?;

    // 7, 107 and 207 all start at bucket 7.
    f.set_block(7, 1, 1.0)?;
    f.set_block(107, 1, 2.0)?;
    f.set_block(207, 1, 3.0)?;

    assert_eq!(f.get_block(7, 1), 1.0);
    assert_eq!(f.get_block(107, 1), 2.0);
    assert_eq!(f.get_block(207, 1), 3.0);
    assert_eq!(f.used_blocks()?, 3);
    Ok(())
}

#[test]
fn block_lands_at_its_bucket() -> Result<()> {
    let dir = tempdir()?;
    let (path, mut f) = fresh(&dir, "a.stat", 100)?;

    f.set_block(142, 9, 0.5)?;
    f.flush_async()?;

    let bytes = raw(&path);
    let block = Block::decode_at(&bytes, FIRST_BLOCK_OFFSET + 42 * BLOCK_BYTES);
    assert_eq!(
        block,
        Block {
            hash1: 142,
            hash2: 9,
            value: 0.5
        }
    );
    Ok(())
}

#[test]
fn values_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let (path, mut f) = fresh(&dir, "a.stat", 500)?;

    for i in 1..=50u32 {
        f.set_block(i * 31, i, f64::from(i) / 2.0)?;
    }
    f.close();
    drop(f);

    let mut f = MappedFile::open(&path)?;
    for i in 1..=50u32 {
        assert_eq!(f.get_block(i * 31, i), f64::from(i) / 2.0);
    }
    assert_eq!(f.used_blocks()?, 50);
    Ok(())
}

// -------------------- Eviction --------------------

#[test]
fn full_chain_evicts_first_minimum() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 200)?;

    // Every h1 below maps to bucket 5, so the chain holds CHAIN_LENGTH blocks.
    let h1 = |k: u32| 5 + k * 200;
    for k in 0..CHAIN_LENGTH as u32 {
        let value = match k {
            3 | 7 => 1.0,
            _ => 10.0 + f64::from(k),
        };
        assert_eq!(f.set_block(h1(k), k + 1, value)?, SetOutcome::Inserted);
    }
    assert_eq!(f.used_blocks()?, CHAIN_LENGTH as u64);

    let extra = CHAIN_LENGTH as u32;
    let outcome = f.set_block(h1(extra), extra + 1, 50.0)?;
    assert_eq!(
        outcome,
        SetOutcome::Evicted(Block {
            hash1: h1(3),
            hash2: 4,
            value: 1.0
        })
    );

    assert_eq!(f.get_block(h1(extra), extra + 1), 50.0);
    assert_eq!(f.get_block(h1(3), 4), 0.0);
    assert_eq!(f.get_block(h1(7), 8), 1.0);
    assert_eq!(f.used_blocks()?, CHAIN_LENGTH as u64);
    Ok(())
}

#[test]
fn chain_is_cut_at_section_end() -> Result<()> {
    let dir = tempdir()?;
    let (path, mut f) = fresh(&dir, "a.stat", 10)?;

    // Bucket 8 of 10: only slots 8 and 9 are probed.
    f.set_block(8, 1, 2.0)?;
    f.set_block(18, 1, 1.0)?;
    let outcome = f.set_block(28, 1, 3.0)?;
    assert_eq!(
        outcome,
        SetOutcome::Evicted(Block {
            hash1: 18,
            hash2: 1,
            value: 1.0
        })
    );
    assert_eq!(f.get_block(28, 1), 3.0);
    assert_eq!(f.get_block(8, 1), 2.0);
    f.flush_async()?;

    // The chain never wrapped into slot 0.
    let bytes = raw(&path);
    assert!(Block::decode_at(&bytes, FIRST_BLOCK_OFFSET).is_empty());
    Ok(())
}

#[test]
fn unordered_values_replace_first_slot() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 10)?;

    f.set_block(8, 1, f64::NAN)?;
    f.set_block(18, 1, f64::NAN)?;
    match f.set_block(28, 1, 5.0)? {
        SetOutcome::Evicted(victim) => assert_eq!(victim.hash1, 8),
        other => panic!("expected eviction, got {other:?}"),
    }
    assert_eq!(f.get_block(28, 1), 5.0);
    Ok(())
}

#[test]
fn single_block_file() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 1)?;

    f.set_block(1, 1, 1.0)?;
    assert!(matches!(f.set_block(2, 2, 2.0)?, SetOutcome::Evicted(_)));
    assert_eq!(f.get_block(2, 2), 2.0);
    assert_eq!(f.get_block(1, 1), 0.0);
    Ok(())
}

// -------------------- Closed handles --------------------

#[test]
fn closed_handle_reads_zero_and_refuses_writes() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 100)?;

    f.set_block(1, 2, 3.0)?;
    f.close();
    assert!(!f.is_mapped());
    assert_eq!(f.get_block(1, 2), 0.0);
    assert!(matches!(
        f.set_block(1, 2, 4.0),
        Err(StatfileError::Closed { .. })
    ));
    assert!(matches!(f.revision(), Err(StatfileError::Closed { .. })));

    // Closing again is harmless.
    f.close();
    Ok(())
}

#[test]
fn access_time_moves_on_lookup() -> Result<()> {
    let dir = tempdir()?;
    let (_path, mut f) = fresh(&dir, "a.stat", 10)?;
    let before = f.access_time();
    f.get_block(1, 1);
    assert!(f.access_time() >= before);
    Ok(())
}
