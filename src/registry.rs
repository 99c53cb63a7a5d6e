use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde::Serialize;

use crate::config::RegistryConfig;

#[derive(Serialize)]
struct InstanceInfo<'a> {
    id: &'a str,
    addr: &'a str,
    task_count: usize,
    last_updated: u64,
}

/// Periodic liveness announcement to an external service registry. The
/// registry is a collaborator, not a dependency: failures only make
/// noise in the log.
pub struct Heartbeat {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn start(config: RegistryConfig, addr: String) -> Heartbeat {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let client = reqwest::blocking::Client::new();
        let id = format!("{}-{}", hostname(), addr);

        while !stop_flag.load(Ordering::SeqCst) {
            let info = InstanceInfo {
                id: &id,
                addr: &addr,
                // load reporting is not wired up yet
                task_count: 0,
                last_updated: now_secs(),
            };
            match client.post(&config.url).json(&info).send() {
                Ok(_) => debug!("heartbeat sent to {}", config.url),
                Err(err) => warn!("failed to send heartbeat: {}", err),
            }

            // sleep in short steps so stop requests are honored promptly
            for _ in 0..config.interval_secs * 10 {
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    });

    Heartbeat {
        stop,
        handle: Some(handle),
    }
}

impl Heartbeat {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "crucible".into())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
