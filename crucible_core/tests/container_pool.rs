//! Pool behaviour over an injected hierarchy root: a scratch directory
//! stands in for the cgroup v2 mount, so the file protocol is exercised
//! without privileges.

use std::fs;
use std::path::Path;

use crucible_core::pool::ContainerPool;

fn seed_proc_files(root: &Path, capacity: usize, prefix: &str) {
    for i in 0..capacity {
        fs::write(root.join(format!("{}_{}", prefix, i)).join("cgroup.procs"), "").unwrap();
    }
}

#[test]
fn pool_creates_every_slot_eagerly() {
    let dir = tempfile::tempdir().unwrap();
    let _pool = ContainerPool::new_under(dir.path(), 4, "pool").unwrap();
    for i in 0..4 {
        assert!(dir.path().join(format!("pool_{}", i)).is_dir());
    }
}

#[test]
fn released_container_comes_back_clean() {
    let dir = tempfile::tempdir().unwrap();
    let pool = ContainerPool::new_under(dir.path(), 1, "pool").unwrap();
    seed_proc_files(dir.path(), 1, "pool");

    let container = pool.acquire().unwrap();
    container.set_memory_limit(64 * 1024 * 1024).unwrap();
    container.add_process(1234).unwrap();
    // the process "exits": the kernel would clear cgroup.procs
    fs::write(container.path().join("cgroup.procs"), "").unwrap();
    pool.release(container);

    let container = pool.acquire().unwrap();
    assert!(container.procs().unwrap().is_empty());
    // next tenant writes its own limits
    container.set_memory_limit(128 * 1024 * 1024).unwrap();
    let limit = fs::read_to_string(container.path().join("memory.max")).unwrap();
    assert_eq!(limit, "134217728");
}

#[test]
fn capacity_is_preserved_across_many_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let capacity = 3;
    let pool = ContainerPool::new_under(dir.path(), capacity, "pool").unwrap();
    seed_proc_files(dir.path(), capacity, "pool");

    for _ in 0..10 {
        let all: Vec<_> = (0..capacity).map(|_| pool.acquire().unwrap()).collect();
        for container in all {
            pool.release(container);
        }
    }
    // still exactly `capacity` live containers
    let drained: Vec<_> = (0..capacity).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(drained.len(), capacity);
}
