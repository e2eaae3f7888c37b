//! Periodic reconciliation scanner
//!
//! Walks the watched directories on an interval and reports changes the
//! native watcher may have missed (dropped events, network filesystems).

use crate::debounce::ChangeDebouncer;
use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind};
use crate::filter::WatchFilter;
use crate::watch::dir_tag;
use respawn_core::WatchConfig;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

struct ScanRoot {
    tag: String,
    filter: WatchFilter,
}

/// mtime-based safety net feeding the debouncer
pub struct PeriodicReconciler {
    roots: Vec<ScanRoot>,
    interval: Duration,
    /// Files modified after this instant count as missed changes
    last_scan: SystemTime,
    debouncer: ChangeDebouncer,
}

impl PeriodicReconciler {
    pub fn new(
        config: &WatchConfig,
        interval: Duration,
        debouncer: ChangeDebouncer,
    ) -> Result<Self, WatchError> {
        let roots = config
            .dirs
            .iter()
            .map(|dir| {
                Ok(ScanRoot {
                    tag: dir_tag(dir),
                    filter: WatchFilter::load(dir, config)?,
                })
            })
            .collect::<Result<Vec<_>, WatchError>>()?;

        Ok(Self {
            roots,
            interval,
            last_scan: SystemTime::now(),
            debouncer,
        })
    }

    /// Run the scan loop until the task is aborted
    pub async fn run(mut self) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting periodic reconciliation (interval: {:?})", self.interval);

        loop {
            timer.tick().await;

            let scan_started = SystemTime::now();
            match self.scan_for_changes() {
                Some(change) => {
                    info!("Reconciliation found a missed change: {}", change);
                    self.debouncer.on_event(change);
                }
                None => debug!("Reconciliation: no missed changes"),
            }
            self.last_scan = scan_started;
        }
    }

    /// Most recently modified matching file newer than the last scan
    fn scan_for_changes(&self) -> Option<ChangeEvent> {
        let mut newest: Option<(SystemTime, ChangeEvent)> = None;

        for root in &self.roots {
            let walker = WalkDir::new(root.filter.root())
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    !entry.file_type().is_dir() || root.filter.enters_dir(entry.path())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Reconciliation scan of {} hit an error: {}", root.tag, e);
                        continue;
                    }
                };

                if !entry.file_type().is_file() || !root.filter.matches(entry.path()) {
                    continue;
                }

                let Some(mtime) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                    continue;
                };
                if mtime <= self.last_scan {
                    continue;
                }
                if newest.as_ref().is_some_and(|(seen, _)| *seen >= mtime) {
                    continue;
                }

                let Some(rel) = root.filter.relative(entry.path()) else {
                    continue;
                };
                newest = Some((mtime, ChangeEvent::new(&root.tag, rel, ChangeKind::Modify)));
            }
        }

        newest.map(|(_, change)| change)
    }
}
