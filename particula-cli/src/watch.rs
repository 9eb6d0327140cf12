//! Re-run a simulation description every time its file is saved

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use tracing::{info, warn};

pub fn watch_file(path: &Path, print: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        // the receiver is gone only during shutdown
        let _ = tx.send(res);
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    info!(file = %path.display(), "watching for changes");

    rerun(path, print);
    for event in rx {
        match event {
            Ok(Event {
                kind: EventKind::Modify(_) | EventKind::Create(_),
                paths,
                ..
            }) if paths.iter().any(|p| p.ends_with(path) || path.ends_with(p)) => {
                rerun(path, print);
            }
            Ok(_) => {}
            Err(e) => warn!("file watcher error: {}", e),
        }
    }
    Ok(())
}

fn rerun(path: &Path, print: &[String]) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            warn!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    if let Err(e) = crate::run_source(&source, None, print) {
        eprintln!("Error: {}", e);
    }
}
