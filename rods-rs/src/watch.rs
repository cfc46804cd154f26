//! Monitors the files of all inputs.
//!
//! Indexes are built once when the system starts. If an input file is modified afterwards,
//! positions and indexes no longer match the file. Therefore the modification time of each
//! file is checked every couple of seconds. If an input is marked with `dieOnInputChange`
//! (the default), a change aborts the platform so that the process exits and can be restarted
//! (e.g. by a container runtime). Otherwise a warning is logged once.
use crate::inputs::Input;
use crate::platform::Platform;
use crate::spawn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Determines how often the files are checked.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

struct WatchedFile {
    input: String,
    path: PathBuf,
    die_on_change: bool,
    last_modified: Option<SystemTime>,
    reported: bool,
}

/// Keeps the modification times of a set of files.
#[derive(Default)]
pub struct Monitor {
    files: Vec<WatchedFile>,
}

impl Monitor {
    /// Creates a monitor for the files of the given inputs.
    pub fn new<'a>(inputs: impl Iterator<Item = &'a Arc<dyn Input>>) -> Self {
        let mut monitor = Monitor::default();
        for input in inputs {
            monitor.watch(input.name(), input.path(), input.die_on_change());
        }

        monitor
    }

    /// Adds a file to observe.
    pub fn watch(&mut self, input: &str, path: &Path, die_on_change: bool) {
        self.files.push(WatchedFile {
            input: input.to_owned(),
            path: path.to_owned(),
            die_on_change,
            last_modified: modified(path),
            reported: false,
        });
    }

    /// Checks all files for changes.
    ///
    /// Returns the reason to stop the system if a file has changed whose input has to die on
    /// changes.
    pub fn check(&mut self) -> Option<String> {
        for file in self.files.iter_mut().filter(|file| !file.reported) {
            if modified(&file.path) == file.last_modified {
                continue;
            }

            file.reported = true;
            if file.die_on_change {
                log::error!(
                    "The file {} of the input '{}' has changed. Shutting down...",
                    file.path.display(),
                    file.input
                );
                return Some(format!(
                    "The file {} of the input '{}' has changed.",
                    file.path.display(),
                    file.input
                ));
            }

            log::warn!(
                "The file {} of the input '{}' has changed. Results will be inconsistent until the system is restarted!",
                file.path.display(),
                file.input
            );
        }

        None
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
}

/// Forks a task which checks the monitor periodically until the platform is terminated.
pub fn install(platform: Arc<Platform>, mut monitor: Monitor) {
    spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(POLL_INTERVAL).await;
            if !platform.is_running() {
                break;
            }
            if let Some(reason) = monitor.check() {
                platform.abort(reason);
            }
        }
    });
}
