use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use video_catalog_core::{walk_roots, ReconcileEngine};

use crate::types::NativeError;

/// Quiet period before a burst of events is applied to the catalog.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Catalog-level meaning of a filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Removed(PathBuf),
    DirectoryRemoved(PathBuf),
}

impl WatchEvent {
    fn path(&self) -> &Path {
        match self {
            WatchEvent::Added(p) | WatchEvent::Removed(p) | WatchEvent::DirectoryRemoved(p) => p,
        }
    }
}

/// Translate a raw notification. Renames become a removal of the old path
/// and an addition of the new one; ambiguous kinds are resolved by checking
/// whether the path still exists.
pub fn convert_notify_event(event: &Event) -> Vec<WatchEvent> {
    let by_existence = |path: &PathBuf| {
        if path.exists() {
            WatchEvent::Added(path.clone())
        } else {
            WatchEvent::DirectoryRemoved(path.clone())
        }
    };

    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) => {
            event.paths.iter().cloned().map(WatchEvent::Added).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut events = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                events.push(WatchEvent::DirectoryRemoved(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                events.push(WatchEvent::Added(to.clone()));
            }
            events
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .cloned()
            .map(WatchEvent::DirectoryRemoved)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(WatchEvent::Added).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Any) => {
            event.paths.iter().map(by_existence).collect()
        }
        EventKind::Remove(RemoveKind::File) => {
            event.paths.iter().cloned().map(WatchEvent::Removed).collect()
        }
        EventKind::Remove(_) => event
            .paths
            .iter()
            .cloned()
            .map(WatchEvent::DirectoryRemoved)
            .collect(),
        _ => Vec::new(),
    }
}

/// Directory watchers keyed by root, feeding one consumer task that applies
/// events to the catalog through the engine.
pub struct WatchRegistry {
    engine: Arc<ReconcileEngine>,
    watchers: HashMap<PathBuf, RecommendedWatcher>,
    events_tx: Option<mpsc::UnboundedSender<WatchEvent>>,
    consumer: Option<JoinHandle<()>>,
}

impl WatchRegistry {
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self {
            engine,
            watchers: HashMap::new(),
            events_tx: None,
            consumer: None,
        }
    }

    /// Start a recursive watch on `path`. Must run inside the tokio runtime.
    pub fn start_watching(&mut self, path: &Path) -> Result<(), NativeError> {
        if !path.is_dir() {
            return Err(NativeError::NotADirectory(path.display().to_string()));
        }
        let root = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        if self.watchers.contains_key(&root) {
            return Err(NativeError::AlreadyWatching(root.display().to_string()));
        }

        let events_tx = self.sender();
        let engine = Arc::clone(&self.engine);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for watch_event in convert_notify_event(&event) {
                        if !is_relevant(&engine, &watch_event) {
                            continue;
                        }
                        debug!(event = ?watch_event, "File watch event");
                        if events_tx.send(watch_event).is_err() {
                            warn!("Watch consumer stopped, dropping event");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        info!(path = %root.display(), "Watching directory");
        self.watchers.insert(root, watcher);
        Ok(())
    }

    pub fn stop_watching(&mut self, path: &Path) -> bool {
        let root = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let removed = self.watchers.remove(&root).is_some();
        if removed {
            info!(path = %root.display(), "Stopped watching directory");
        }
        if self.watchers.is_empty() {
            self.events_tx = None;
        }
        removed
    }

    /// Drop every watcher. The consumer drains what it already received and exits.
    pub fn stop_all(&mut self) {
        let count = self.watchers.len();
        self.watchers.clear();
        self.events_tx = None;
        self.consumer = None;
        info!(count, "Stopped all directory watchers");
    }

    pub fn watched(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .watchers
            .keys()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        paths.sort();
        paths
    }

    fn sender(&mut self) -> mpsc::UnboundedSender<WatchEvent> {
        let running = self.consumer.as_ref().is_some_and(|h| !h.is_finished());
        if let (true, Some(tx)) = (running, &self.events_tx) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.consumer = Some(tokio::spawn(consume_events(Arc::clone(&self.engine), rx)));
        self.events_tx = Some(tx.clone());
        tx
    }
}

/// Media files and anything that might be a directory pass; other files are noise.
fn is_relevant(engine: &ReconcileEngine, event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Added(path) => path.is_dir() || engine.is_media_file(path),
        WatchEvent::Removed(path) => engine.is_media_file(path),
        WatchEvent::DirectoryRemoved(_) => true,
    }
}

async fn consume_events(engine: Arc<ReconcileEngine>, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
    let mut pending: HashMap<PathBuf, WatchEvent> = HashMap::new();

    while let Some(first) = rx.recv().await {
        pending.insert(first.path().to_path_buf(), first);

        let mut closed = false;
        loop {
            match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                Ok(Some(event)) => {
                    pending.insert(event.path().to_path_buf(), event);
                }
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        for (_, event) in pending.drain() {
            apply_event(&engine, event).await;
        }
        if closed {
            break;
        }
    }

    debug!("Watch consumer finished");
}

async fn apply_event(engine: &ReconcileEngine, event: WatchEvent) {
    match event {
        WatchEvent::Added(path) if path.is_dir() => {
            let config = engine.config().clone();
            let root = vec![path.clone()];
            let files = match tokio::task::spawn_blocking(move || walk_roots(&root, &config)).await {
                Ok(outcome) => outcome.files,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to walk new directory");
                    return;
                }
            };
            for file in files {
                if let Err(e) = engine.process_file(&file, false).await {
                    warn!(path = %file.display(), error = %e, "Failed to catalog watched file");
                }
            }
        }
        WatchEvent::Added(path) => {
            if let Err(e) = engine.process_file(&path, false).await {
                warn!(path = %path.display(), error = %e, "Failed to catalog watched file");
            }
        }
        WatchEvent::Removed(path) => {
            if let Err(e) = engine.forget_path(&path).await {
                error!(path = %path.display(), error = %e, "Failed to remove catalog entry");
            }
        }
        WatchEvent::DirectoryRemoved(path) => {
            if let Err(e) = engine.forget_directory(&path).await {
                error!(path = %path.display(), error = %e, "Failed to remove catalog entries");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange};
    use video_catalog_core::{
        CatalogConfig, CatalogStore, EntryFields, FfprobeProber, FileFacts, MediaFacts,
        SqliteCatalog,
    };

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(path.to_path_buf()))
    }

    fn engine() -> (Arc<SqliteCatalog>, Arc<ReconcileEngine>) {
        let store = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let engine = ReconcileEngine::new(
            store.clone(),
            Arc::new(FfprobeProber::new("ffprobe")),
            CatalogConfig::default(),
        );
        (store, Arc::new(engine))
    }

    fn catalog(store: &SqliteCatalog, path: &Path) {
        let fields = EntryFields::new(path, None, FileFacts::default(), MediaFacts::unknown());
        store.upsert(&path.to_string_lossy(), &fields).unwrap();
    }

    #[test]
    fn test_create_and_write_are_additions() {
        let a = Path::new("/lib/a.mp4");
        let created = convert_notify_event(&event(EventKind::Create(CreateKind::File), &[a]));
        let written = convert_notify_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[a],
        ));

        assert_eq!(created, vec![WatchEvent::Added(a.to_path_buf())]);
        assert_eq!(written, created);
    }

    #[test]
    fn test_renames_split_into_removal_and_addition() {
        let from = Path::new("/lib/old.mp4");
        let to = Path::new("/lib/new.mp4");

        let both = convert_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[from, to],
        ));
        assert_eq!(
            both,
            vec![
                WatchEvent::DirectoryRemoved(from.to_path_buf()),
                WatchEvent::Added(to.to_path_buf()),
            ]
        );

        let moved_out = convert_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &[from],
        ));
        assert_eq!(moved_out, vec![WatchEvent::DirectoryRemoved(from.to_path_buf())]);

        let moved_in = convert_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[to],
        ));
        assert_eq!(moved_in, vec![WatchEvent::Added(to.to_path_buf())]);
    }

    #[test]
    fn test_ambiguous_rename_checks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("here.mp4");
        std::fs::write(&present, b"data").unwrap();
        let absent = dir.path().join("gone.mp4");

        let events = convert_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &[present.as_path(), absent.as_path()],
        ));
        assert_eq!(
            events,
            vec![
                WatchEvent::Added(present.clone()),
                WatchEvent::DirectoryRemoved(absent.clone()),
            ]
        );
    }

    #[test]
    fn test_removals_by_kind() {
        let file = Path::new("/lib/a.mp4");
        let folder = Path::new("/lib/season");

        let removed_file =
            convert_notify_event(&event(EventKind::Remove(RemoveKind::File), &[file]));
        let removed_folder =
            convert_notify_event(&event(EventKind::Remove(RemoveKind::Folder), &[folder]));
        let access = convert_notify_event(&event(
            EventKind::Access(AccessKind::Any),
            &[file],
        ));

        assert_eq!(removed_file, vec![WatchEvent::Removed(file.to_path_buf())]);
        assert_eq!(
            removed_folder,
            vec![WatchEvent::DirectoryRemoved(folder.to_path_buf())]
        );
        assert!(access.is_empty());
    }

    #[test]
    fn test_relevance_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine();

        assert!(is_relevant(&engine, &WatchEvent::Added(dir.path().join("a.mp4"))));
        assert!(is_relevant(&engine, &WatchEvent::Added(dir.path().to_path_buf())));
        assert!(!is_relevant(&engine, &WatchEvent::Added(dir.path().join("notes.txt"))));
        assert!(!is_relevant(&engine, &WatchEvent::Added(dir.path().join("._a.mp4"))));
        assert!(is_relevant(&engine, &WatchEvent::Removed(dir.path().join("a.MKV"))));
        assert!(!is_relevant(&engine, &WatchEvent::Removed(dir.path().join("poster.jpg"))));
        assert!(is_relevant(
            &engine,
            &WatchEvent::DirectoryRemoved(dir.path().join("season"))
        ));
    }

    #[tokio::test]
    async fn test_burst_keeps_last_event_per_path() {
        let (store, engine) = engine();
        let clip = PathBuf::from("/lib/clip.mp4");
        let other = PathBuf::from("/lib/season/e01.mkv");
        catalog(&store, &clip);
        catalog(&store, &other);
        catalog(&store, Path::new("/lib/kept.mp4"));

        let (tx, rx) = mpsc::unbounded_channel();
        // The addition is superseded, so no probe runs.
        tx.send(WatchEvent::Added(clip.clone())).unwrap();
        tx.send(WatchEvent::Removed(clip.clone())).unwrap();
        tx.send(WatchEvent::DirectoryRemoved(PathBuf::from("/lib/season"))).unwrap();
        drop(tx);

        consume_events(engine, rx).await;

        let remaining: Vec<String> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(remaining, vec!["/lib/kept.mp4".to_string()]);
    }
}
