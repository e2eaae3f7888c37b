//! Native file watching
//!
//! One recursive notify watcher per configured directory. Events flow:
//! notify callback -> filter -> bounded channel -> pump thread -> debouncer.

use crate::debounce::ChangeDebouncer;
use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind};
use crate::filter::WatchFilter;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use respawn_core::WatchConfig;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Events buffered between the notify callbacks and the pump
///
/// A single queued event is enough to schedule a restart, so overflow is
/// dropped rather than blocking the notify thread.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Recursive watcher for one directory
pub struct DirectoryWatcher {
    root: PathBuf,
    tag: String,
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Start watching `dir`, sending matching changes to `tx`
    pub fn start(
        dir: &Path,
        filter: WatchFilter,
        tx: Sender<ChangeEvent>,
    ) -> Result<Self, WatchError> {
        // Backends report canonical paths (e.g. /private/var on macOS)
        let root = dir.canonicalize().map_err(|source| WatchError::Resolve {
            path: dir.to_path_buf(),
            source,
        })?;
        let tag = dir_tag(dir);

        let handler_root = root.clone();
        let handler_tag = tag.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for change in to_changes(&event, &handler_root, &handler_tag, &filter) {
                        match tx.try_send(change) {
                            Ok(()) => {}
                            Err(TrySendError::Full(change)) => {
                                trace!("Event queue full, dropping {}", change);
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                }
                Err(e) => warn!("Watch error in {}: {}", handler_tag, e),
            }
        })
        .map_err(|source| WatchError::Notify {
            path: root.clone(),
            source,
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: root.clone(),
                source,
            })?;

        info!("Watching {} ({})", root.display(), tag);

        Ok(Self {
            root,
            tag,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Short name identifying a watched directory in events and logs
pub(crate) fn dir_tag(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Create),
        // chmod/touch-style metadata updates do not change sources
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modify),
        _ => None,
    }
}

fn to_changes(event: &Event, root: &Path, tag: &str, filter: &WatchFilter) -> Vec<ChangeEvent> {
    let Some(kind) = classify(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            let rel = path.strip_prefix(root).ok()?;
            if !filter.matches(rel) {
                return None;
            }
            Some(ChangeEvent::new(tag, rel, kind))
        })
        .collect()
}

/// All directory watchers plus the pump feeding the debouncer
///
/// Dropping the set (or calling `stop`) ends watching.
pub struct WatchSet {
    watchers: Vec<DirectoryWatcher>,
    stop_tx: Option<Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl WatchSet {
    /// Watch every directory in `config`, feeding changes into `debouncer`
    pub fn start(config: &WatchConfig, debouncer: ChangeDebouncer) -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);

        let mut watchers = Vec::with_capacity(config.dirs.len());
        for dir in &config.dirs {
            let filter = WatchFilter::load(dir, config)?;
            watchers.push(DirectoryWatcher::start(dir, filter, tx.clone())?);
        }
        drop(tx);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let pump = std::thread::Builder::new()
            .name("respawn-events".into())
            .spawn(move || pump_events(rx, stop_rx, debouncer))
            .map_err(WatchError::Pump)?;

        Ok(Self {
            watchers,
            stop_tx: Some(stop_tx),
            pump: Some(pump),
        })
    }

    pub fn watchers(&self) -> &[DirectoryWatcher] {
        &self.watchers
    }

    /// Stop all watchers and wait for the pump to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.watchers.clear();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("Event pump panicked");
            }
        }
    }
}

impl Drop for WatchSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump_events(rx: Receiver<ChangeEvent>, stop_rx: Receiver<()>, debouncer: ChangeDebouncer) {
    loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => match msg {
                Ok(change) => debouncer.on_event(change),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    debug!("Event pump stopped");
}
