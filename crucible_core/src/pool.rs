use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};

use crate::cgroup::{Container, CGROUP_ROOT};
use crate::error::{Error, Result};

/// Fixed-size pool of resource containers. Capacity equals the worker
/// count, so a worker can always obtain a container without deadlocking.
/// Acquisition order is FIFO; ownership moves to the caller and comes
/// back through `release`.
pub struct ContainerPool {
    slots: Receiver<Container>,
    returns: Sender<Container>,
    capacity: usize,
    root: PathBuf,
}

impl ContainerPool {
    /// Eagerly creates `capacity` containers named `prefix_0 .. prefix_{K-1}`.
    /// Failure here is fatal for the service: no sandbox, no judging.
    pub fn new(capacity: usize, prefix: &str) -> Result<Self> {
        Self::new_under(Path::new(CGROUP_ROOT), capacity, prefix)
    }

    pub fn new_under(root: &Path, capacity: usize, prefix: &str) -> Result<Self> {
        let (returns, slots) = bounded(capacity);
        for i in 0..capacity {
            let container = Container::create_under(root, &format!("{}_{}", prefix, i))?;
            returns
                .send(container)
                .map_err(|_| Error::Sandbox("container pool channel closed".into()))?;
        }
        info!("container pool ready, capacity {}", capacity);
        Ok(Self {
            slots,
            returns,
            capacity,
            root: root.to_path_buf(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a container is free.
    pub fn acquire(&self) -> Result<Container> {
        self.slots
            .recv()
            .map_err(|_| Error::Sandbox("container pool is shut down".into()))
    }

    /// Resets the container and puts it back. A container that cannot be
    /// reset is destroyed and its slot refilled with a fresh one of the
    /// same name; if even that fails the pool shrinks and the error is
    /// surfaced in the log.
    pub fn release(&self, container: Container) {
        match container.reset() {
            Ok(()) => {
                let _ = self.returns.send(container);
            }
            Err(err) => {
                let name = container.name().to_string();
                warn!("container {} failed to reset ({}), replacing it", name, err);
                if let Err(err) = container.destroy() {
                    warn!("could not destroy container {}: {}", name, err);
                }
                match Container::create_under(&self.root, &name) {
                    Ok(fresh) => {
                        let _ = self.returns.send(fresh);
                    }
                    Err(err) => {
                        error!("failed to recreate container {}: {}", name, err);
                    }
                }
            }
        }
    }

    /// Kills residents and removes every container directory. Containers
    /// currently rented out are not waited for; call this only after the
    /// workers have stopped.
    pub fn shutdown(&self) {
        while let Ok(container) = self.slots.try_recv() {
            let name = container.name().to_string();
            if let Err(err) = container.destroy() {
                warn!("failed to destroy container {}: {}", name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pool_with_proc_files(dir: &Path, capacity: usize, prefix: &str) -> ContainerPool {
        let pool = ContainerPool::new_under(dir, capacity, prefix).unwrap();
        for i in 0..capacity {
            fs::write(dir.join(format!("{}_{}", prefix, i)).join("cgroup.procs"), "").unwrap();
        }
        pool
    }

    #[test]
    fn eager_creation_names_slots() {
        let dir = tempfile::tempdir().unwrap();
        let _pool = ContainerPool::new_under(dir.path(), 3, "judge").unwrap();
        for i in 0..3 {
            assert!(dir.path().join(format!("judge_{}", i)).is_dir());
        }
    }

    #[test]
    fn acquire_is_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_proc_files(dir.path(), 2, "judge");

        let first = pool.acquire().unwrap();
        assert_eq!(first.name(), "judge_0");
        let second = pool.acquire().unwrap();
        assert_eq!(second.name(), "judge_1");

        pool.release(first);
        pool.release(second);
        assert_eq!(pool.acquire().unwrap().name(), "judge_0");
    }

    #[test]
    fn release_returns_container_to_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_proc_files(dir.path(), 1, "judge");

        for _ in 0..5 {
            let container = pool.acquire().unwrap();
            pool.release(container);
        }
        // Still exactly one live slot.
        let container = pool.acquire().unwrap();
        assert_eq!(container.name(), "judge_0");
    }

    #[test]
    fn failed_reset_replaces_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ContainerPool::new_under(dir.path(), 1, "judge").unwrap();
        // No cgroup.procs file: reset will fail and force a rebuild.
        let container = pool.acquire().unwrap();
        pool.release(container);

        let fresh = pool.acquire().unwrap();
        assert_eq!(fresh.name(), "judge_0");
        assert!(dir.path().join("judge_0").is_dir());
    }

    #[test]
    fn shutdown_removes_idle_containers() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_proc_files(dir.path(), 2, "judge");
        // destroy() uses remove_dir, so clear our scratch files first
        for i in 0..2 {
            fs::remove_file(dir.path().join(format!("judge_{}", i)).join("cgroup.procs")).unwrap();
        }
        pool.shutdown();
        assert!(!dir.path().join("judge_0").exists());
        assert!(!dir.path().join("judge_1").exists());
    }
}
