//! `wfref watch`: filesystem changes feed the debounced trigger

use super::{report, Session};
use crate::extract::YamlReferenceExtractor;
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn run(session: &Session, files: &[PathBuf]) -> Result<()> {
    let documents: BTreeSet<PathBuf> = files
        .iter()
        .map(|file| {
            file.canonicalize()
                .with_context(|| format!("Cannot watch {}", file.display()))
        })
        .collect::<Result<_>>()?;

    let trigger = session.trigger(Arc::new(YamlReferenceExtractor::new()))?;
    let mut events = session.cache.subscribe();

    let (changes_tx, mut changes) = mpsc::unbounded_channel::<PathBuf>();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = changes_tx.send(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "File watch error"),
        })?;

    // Editors often save by replacing the file, so watch the directories
    let directories: BTreeSet<&Path> = documents.iter().filter_map(|d| d.parent()).collect();
    for directory in &directories {
        watcher.watch(directory, RecursiveMode::NonRecursive)?;
    }

    for document in &documents {
        trigger.on_open(document);
    }
    println!(
        "👀 Watching {} document(s), press Ctrl-C to stop",
        documents.len()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(path) = changes.recv() => {
                let path = path.canonicalize().unwrap_or(path);
                if documents.contains(&path) {
                    debug!(document = %path.display(), "Document changed");
                    trigger.on_edit(&path);
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", report::event_line(&event, &session.cache)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Record notifications dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                info!("Stopping watcher");
                break;
            }
        }
    }

    for document in &documents {
        trigger.cancel(document);
    }
    Ok(())
}
