use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use jam_core::events::{EventSink, HostEvent};
use jam_core::host::{Host, HostOutcome};
use jam_core::plugin::enumerate::LIBRARY_EXTENSION;
use jam_core::plugin::mock::{self, MockLoader, MockPlugin, MockStats};
use jam_core::settings::InvokeSettings;
use tempfile::TempDir;

/// Collects every event emitted during a run.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &HostEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A scan directory populated with mock libraries.
pub struct Fixture {
    pub dir: TempDir,
    pub events: Arc<RecordingSink>,
    loader: MockLoader,
    _session: MutexGuard<'static, ()>,
}

/// Platform file name for a library stem, e.g. `lib("control")`.
pub fn lib(stem: &str) -> String {
    format!("lib{stem}{LIBRARY_EXTENSION}")
}

impl Fixture {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let session = mock::session_lock();
        mock::reset_calls();

        Self {
            dir: TempDir::new().unwrap(),
            events: Arc::new(RecordingSink::default()),
            loader: MockLoader::new(),
            _session: session,
        }
    }

    /// Adds a library the mock loader can map.
    pub fn with_library(mut self, stem: &str, plugin: MockPlugin) -> Self {
        let name = lib(stem);
        mock::touch_all(self.dir.path(), &[&name]).unwrap();
        self.loader = self.loader.with_plugin(name, plugin);
        self
    }

    /// Adds a file the mock loader refuses to map.
    #[allow(dead_code)]
    pub fn with_file(self, name: &str) -> Self {
        mock::touch_all(self.dir.path(), &[name]).unwrap();
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.loader.stats()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run(&self) -> HostOutcome {
        self.run_in(self.dir.path())
    }

    pub fn run_in(&self, dir: &Path) -> HostOutcome {
        let host = Host::new(
            self.loader.clone(),
            self.events.clone(),
            InvokeSettings::default(),
        );
        host.run(dir)
    }
}
