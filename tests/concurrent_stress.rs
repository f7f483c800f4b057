//! Concurrent stress tests for SharedConfigState
//!
//! Many readers against one publishing writer must never observe a torn
//! snapshot: size and content always come from the same build.

mod common;

use common::{ChunkDir, SETTLE};
use sshconfig_fs::{AggregatedConfig, ConfigFs, DetectionMode, SharedConfigState, WatcherConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Build `n` copies of a byte derived from `n`, so every build is uniform
/// and its length identifies it.
fn uniform_build(n: usize) -> AggregatedConfig {
    AggregatedConfig::from_bytes(vec![b'a' + (n % 26) as u8; n])
}

fn assert_uniform(bytes: &[u8]) {
    if let Some(&first) = bytes.first() {
        assert!(
            bytes.iter().all(|&b| b == first),
            "torn read: mixed bytes in {} byte read",
            bytes.len()
        );
        assert_eq!(first, b'a' + (bytes.len() % 26) as u8, "content from another build");
    }
}

#[test]
fn test_snapshots_never_torn() {
    let state = Arc::new(SharedConfigState::new(uniform_build(1)));
    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            let done = Arc::clone(&done);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let snap = state.snapshot();
                    assert_eq!(snap.file.size, snap.config.len());
                    assert_eq!(snap.file.blocks, snap.config.len().div_ceil(512));
                    assert_uniform(snap.config.content());
                    observed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let writer = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            for n in 1..2_000 {
                state.publish(uniform_build(n * 7 % 4_096 + 1));
            }
        })
    };

    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(observed.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_full_reads_never_torn() {
    let state = Arc::new(SharedConfigState::new(uniform_build(64)));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let whole = state.read_bytes(0, u32::MAX);
                    assert!(!whole.is_empty());
                    assert_uniform(&whole);
                }
            })
        })
        .collect();

    for n in 1..1_000 {
        state.publish(uniform_build(n % 300 + 1));
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_reads_during_watcher_rebuilds() {
    let dir = ChunkDir::with(&[("01_base", "Host *\n")]);
    let mut fs = ConfigFs::new(
        dir.path(),
        WatcherConfig {
            poll_interval: Duration::from_millis(10),
            detection: DetectionMode::DirectoryMtime,
        },
    );
    fs.on_mount().unwrap();
    let fs = Arc::new(fs);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..6)
        .map(|_| {
            let fs = Arc::clone(&fs);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let snap = fs.state().snapshot();
                    assert_eq!(snap.file.size, snap.config.len());
                    // Every build starts with the base fragment
                    assert!(snap.config.content().starts_with(b"Host *\n"));
                }
            })
        })
        .collect();

    for i in 0..10 {
        dir.write(&format!("{:02}_host", i + 2), format!("Host h{}\n", i));
        thread::sleep(SETTLE);
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    // Concurrent reads of an unchanging snapshot agree
    let a = fs.read("/config", u32::MAX, 0).unwrap();
    let b = fs.read("/config", u32::MAX, 0).unwrap();
    assert_eq!(a, b);
}
