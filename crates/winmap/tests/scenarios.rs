use std::io::Write;

use tempfile::TempDir;
use winmap::{Error, GreedyManager, Result, TilingConfig, TilingManager};

/// 20 bytes, all zero except the final byte = 0xEE.
fn scenario_file() -> (TempDir, std::path::PathBuf) {
    let mut bytes = vec![0u8; 20];
    bytes[19] = 0xEE;
    write_temp_file(&bytes)
}

fn write_temp_file(bytes: &[u8]) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(bytes).unwrap();
    (dir, path)
}

#[test]
fn round_trip_whole_file_matches_source_bytes() -> Result<()> {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let cursor = mgr.open(&path)?;
    let buf = cursor.buffer()?;
    assert_eq!(buf.len(), 20);
    assert_eq!(buf[0], 0);
    assert_eq!(buf[19], 0xEE);
    Ok(())
}

#[test]
fn round_trip_partial_window_matches_source_bytes() -> Result<()> {
    let mgr = TilingManager::new();
    let mut data = vec![0u8; 4096];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let (_dir, path) = write_temp_file(&data);
    let cursor = mgr.open_range(&path, 100, 50)?;
    assert_eq!(cursor.buffer()?, &data[100..150]);
    Ok(())
}

#[test]
fn next_cursor_chain_reconstructs_whole_file() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 8,
        max_memory_size: 1024,
        max_open_handles: 16,
    });
    let data: Vec<u8> = (0u8..20).collect();
    let (_dir, path) = write_temp_file(&data);

    let mut out = Vec::new();
    let mut cursor = mgr.open_range(&path, 0, 4)?;
    loop {
        out.extend_from_slice(cursor.buffer()?);
        match cursor.next_cursor() {
            Ok(next) => cursor = next,
            Err(Error::OutOfRange { .. }) => break,
            Err(other) => return Err(other),
        }
    }
    assert_eq!(out, data);
    Ok(())
}

#[test]
fn sliding_cursor_matches_source_bytes_across_region_boundaries() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 5,
        max_memory_size: 1024,
        max_open_handles: 16,
    });
    let (_dir, path) = scenario_file();
    let cursor = mgr.open_sliding(&path)?;

    let mut data = vec![0u8; 20];
    data[19] = 0xEE;
    for i in 0..20 {
        assert_eq!(cursor.get(i as isize)?, data[i]);
    }
    // Negative indices count back from file_size.
    assert_eq!(cursor.get(-1)?, 0xEE);
    assert_eq!(cursor.get(-20)?, 0);
    Ok(())
}

#[test]
fn sliding_slice_straddling_two_regions_is_contiguous() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 5,
        max_memory_size: 1024,
        max_open_handles: 16,
    });
    let data: Vec<u8> = (0u8..20).collect();
    let (_dir, path) = write_temp_file(&data);
    let cursor = mgr.open_sliding(&path)?;

    // [3, 8) straddles the window boundary at 5.
    let slice = cursor.slice(3, 8)?;
    assert_eq!(slice, data[3..8]);
    Ok(())
}

#[test]
fn empty_file_rejected_at_open() {
    let mgr = TilingManager::new();
    let (_dir, path) = write_temp_file(&[]);
    assert!(matches!(mgr.open(&path), Err(Error::EmptyFile(_))));
}

#[test]
fn size_zero_request_runs_to_eof() -> Result<()> {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let cursor = mgr.open_range(&path, 5, 0)?;
    assert_eq!(cursor.size(), 15);
    assert_eq!(cursor.ofs_end(), 20);
    Ok(())
}

#[test]
fn offset_at_eof_is_out_of_range() {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    assert!(matches!(
        mgr.open_range(&path, 20, 0),
        Err(Error::OutOfRange { .. })
    ));
}

#[test]
fn release_twice_fails_already_released() -> Result<()> {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let cursor = mgr.open(&path)?;
    cursor.release()?;
    assert!(matches!(cursor.release(), Err(Error::AlreadyReleased)));
    Ok(())
}

#[test]
fn counters_stay_consistent_across_open_and_release() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 4096,
        max_memory_size: 1 << 20,
        max_open_handles: 16,
    });
    let (_dir, path) = write_temp_file(&vec![0u8; 4096 * 4]);

    let c1 = mgr.open_range(&path, 0, 10)?;
    let c2 = mgr.open_range(&path, 4096 * 3, 10)?;
    assert_eq!(mgr.num_open_cursors(), 2);
    assert_eq!(mgr.num_open_regions(), 2);
    assert_eq!(mgr.num_used_regions(), 2);
    assert!(mgr.mapped_memory_size() <= mgr.max_mapped_memory_size());

    c1.release()?;
    assert_eq!(mgr.num_open_cursors(), 1);
    assert_eq!(mgr.num_used_regions(), 1);
    assert_eq!(mgr.num_open_regions(), 2);

    c2.release()?;
    assert_eq!(mgr.num_open_cursors(), 0);
    assert_eq!(mgr.num_used_regions(), 0);
    Ok(())
}

#[test]
fn pinned_region_survives_eviction_pressure() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 4,
        max_memory_size: 4,
        max_open_handles: 1,
    });
    let (_dir, path) = scenario_file();
    let held = mgr.open_range(&path, 0, 1)?;
    assert_eq!(mgr.num_open_regions(), 1);

    let err = mgr.open_range(&path, 16, 1).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));
    assert!(!held.closed());
    assert_eq!(mgr.num_open_regions(), 1);
    Ok(())
}

#[test]
fn close_force_releases_every_outstanding_cursor() -> Result<()> {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let fixed = mgr.open(&path)?;
    let sliding = mgr.open_sliding(&path)?;
    let _ = sliding.get(0)?;

    assert!(!fixed.closed());
    assert!(!sliding.is_closed());

    mgr.close();

    assert!(fixed.closed());
    assert!(sliding.is_closed());
    assert_eq!(mgr.num_open_regions(), 0);
    assert_eq!(mgr.num_open_cursors(), 0);
    Ok(())
}

#[test]
fn sliding_cursor_close_is_ignored_until_manager_closes() -> Result<()> {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let cursor = mgr.open_sliding(&path)?;
    let _ = cursor.get(0)?;

    cursor.close();
    assert!(!cursor.is_closed(), "sliding cursor close() is a no-op by design");
    assert_eq!(mgr.num_open_cursors(), 1);

    mgr.close();
    assert!(cursor.is_closed());
    Ok(())
}

#[test]
fn greedy_manager_maps_each_file_exactly_once() -> Result<()> {
    let mgr = GreedyManager::new();
    let (_dir, path) = write_temp_file(&vec![0u8; 4096 * 10]);

    let c1 = mgr.open_range(&path, 0, 10)?;
    let c2 = mgr.open_range(&path, 4096 * 9, 10)?;
    assert_eq!(mgr.num_open_regions(), 1);
    assert_eq!(mgr.num_open_cursors(), 2);

    drop(c1);
    drop(c2);
    assert_eq!(mgr.num_open_cursors(), 0);
    Ok(())
}

#[test]
fn greedy_manager_rejects_sliding_cursors() {
    let mgr = GreedyManager::new();
    let (_dir, path) = write_temp_file(&vec![0u8; 16]);
    assert!(matches!(mgr.open_sliding(&path), Err(Error::Unsupported)));
}

#[test]
fn scoped_acquisition_closes_cursors_on_unwind() {
    let mgr = TilingManager::new();
    let (_dir, path) = scenario_file();
    let cursor = {
        let _scope = mgr.scope();
        let cursor = mgr.open(&path).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            panic!("simulated failure mid-scope");
        }));
        assert!(result.is_err());
        cursor
    };
    assert!(cursor.closed());
}

#[test]
fn collect_reclaims_only_unused_regions() -> Result<()> {
    let mgr = TilingManager::with_config(TilingConfig {
        window_size: 16,
        max_memory_size: 1024,
        max_open_handles: 16,
    });
    let (_dir, path) = write_temp_file(&vec![0u8; 64]);
    let held = mgr.open_range(&path, 0, 1)?;
    let dropped = mgr.open_range(&path, 32, 1)?;
    drop(dropped);

    assert_eq!(mgr.num_open_regions(), 2);
    assert_eq!(mgr.collect(), 1);
    assert_eq!(mgr.num_open_regions(), 1);
    drop(held);
    Ok(())
}

#[test]
fn two_managers_over_the_same_file_do_not_share_regions() -> Result<()> {
    let (_dir, path) = scenario_file();
    let mgr_a = TilingManager::new();
    let mgr_b = TilingManager::new();

    let a = mgr_a.open(&path)?;
    let b = mgr_b.open(&path)?;
    assert_eq!(a.buffer()?, b.buffer()?);
    assert_eq!(mgr_a.num_open_regions(), 1);
    assert_eq!(mgr_b.num_open_regions(), 1);
    Ok(())
}
