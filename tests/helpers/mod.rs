//! Test helpers and fixtures for legato integration tests.
//!
//! Asset trees live in temporary directories; pumping is manual so every
//! test controls when callbacks fire.

#![allow(dead_code)]

use legato::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Cycles to run before a test gives up waiting for completions.
pub const MAX_CYCLES: usize = 1000;

/// Temporary asset directory.
pub struct AssetDir {
    dir: TempDir,
}

impl AssetDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create asset dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `bytes` to `name` under the root.
    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("Failed to write asset");
        path
    }

    /// Write `bytes` to `language/name`.
    pub fn write_localized(&self, language: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let dir = self.dir.path().join(language);
        std::fs::create_dir_all(&dir).expect("Failed to create language dir");
        let path = dir.join(name);
        std::fs::write(&path, bytes).expect("Failed to write asset");
        path
    }

    /// Streaming system rooted here.
    pub fn system(&self, backend: BackendKind) -> StreamingSystem {
        self.builder(backend).build().expect("Failed to build streaming system")
    }

    pub fn builder(&self, backend: BackendKind) -> StreamingSystemBuilder {
        StreamingSystem::builder()
            .base_path(self.path())
            .backend(backend)
            .io_threads(2)
    }
}

/// Deterministic content: byte `i` is `i % 251`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Everything a completion callback saw.
#[derive(Debug)]
pub struct Delivery {
    pub cookie: u64,
    pub status: IoStatus,
    pub bytes: Vec<u8>,
    pub file_position: u64,
    pub cancelled: bool,
}

pub type Deliveries = Arc<Mutex<Vec<Delivery>>>;

pub fn deliveries() -> Deliveries {
    Arc::new(Mutex::new(Vec::new()))
}

/// A transfer of `size` bytes at `position` recording its completion.
pub fn recorded_read(sink: &Deliveries, cookie: u64, position: u64, size: usize) -> TransferInfo {
    let sink = Arc::clone(sink);
    TransferInfo::new(vec![0u8; size], position)
        .cookie(cookie)
        .on_complete(move |done, status| {
            sink.lock().unwrap().push(Delivery {
                cookie: done.cookie,
                status,
                bytes: done.data().to_vec(),
                file_position: done.file_position,
                cancelled: done.cancelled,
            });
        })
}

/// Run cycles until `count` deliveries arrived.
pub fn pump_until(system: &StreamingSystem, sink: &Deliveries, count: usize) {
    for _ in 0..MAX_CYCLES {
        system.run_cycle();
        if sink.lock().unwrap().len() >= count {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!(
        "only {} of {} transfers delivered",
        sink.lock().unwrap().len(),
        count
    );
}

/// Install a test log subscriber once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
