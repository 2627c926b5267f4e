use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::cachify::Cachify;

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Invalidates the cache whenever something under the asset root changes.
pub fn start_source_watcher(cachify: Cachify) {
    use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc::channel;

    let root: PathBuf = cachify.root().to_path_buf();
    std::thread::spawn(move || {
        let (tx, rx) = channel();
        let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(err) => {
                log::warn!("source watcher init failed: {err}");
                return;
            }
        };
        if let Err(err) = watcher.watch(&root, RecursiveMode::Recursive) {
            log::warn!("source watcher start failed: {err}");
            return;
        }
        log::info!("watching {} for asset changes", root.display());

        let mut last = Instant::now() - DEBOUNCE;
        for res in rx {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("source watcher error: {err}");
                    continue;
                }
            };
            match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {}
                _ => continue,
            }
            if last.elapsed() < DEBOUNCE {
                continue;
            }
            last = Instant::now();
            if cachify.invalidate() {
                log::info!("asset sources changed, cache will rebuild on next request");
            }
        }
    });
}
