//! Mod folder watcher: announces `.jar` mods added to or removed from the
//! hoster's branch folder and the server's mods folder.
//!
//! The last seen listing is kept in a JSON file so changes made while the
//! process was stopped are announced on the first check.

use crate::error::AppResult;
use crate::models::mods::{HosterMods, ModChange, ModFolder, SavedModNames};
use crate::services::poller::{now_seconds, DELIVERY_TIMEOUT};
use crate::services::store::ModSink;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

const MOD_EXTENSION: &str = "jar";

/// Names of the `.jar` files directly inside `dir`. A missing folder lists as empty.
pub async fn list_mods(dir: &Path) -> AppResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MOD_EXTENSION) {
            continue;
        }
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

async fn load_saved(file: &Path) -> AppResult<SavedModNames> {
    match tokio::fs::read_to_string(file).await {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(SavedModNames::default()),
        Err(e) => Err(e.into()),
    }
}

/// Resolves a configured root. `None` when unset or missing on disk.
async fn existing(path: Option<PathBuf>) -> Option<PathBuf> {
    let path = path?;
    match tokio::fs::metadata(&path).await {
        Ok(_) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mod folder not found");
            None
        }
    }
}

pub struct ModWatcher {
    hoster_root: Option<PathBuf>,
    server_root: Option<PathBuf>,
    state_file: PathBuf,
    saved: SavedModNames,
    dirty: bool,
    sink: Arc<dyn ModSink>,
    interval: Duration,
}

impl ModWatcher {
    /// Loads the saved listing and resolves the watched roots. A section whose
    /// folder is no longer watched is dropped from the saved listing.
    #[instrument(skip(sink))]
    pub async fn load(
        hoster_root: Option<PathBuf>,
        server_root: Option<PathBuf>,
        state_file: PathBuf,
        sink: Arc<dyn ModSink>,
        interval: Duration,
    ) -> AppResult<Self> {
        let mut saved = load_saved(&state_file).await?;
        let mut dirty = false;

        let hoster_root = existing(hoster_root).await;
        match &hoster_root {
            Some(root) => {
                saved.hoster.get_or_insert_with(HosterMods::default);
                info!(path = %root.display(), "watching hoster's branch folder");
            }
            None if saved.hoster.is_some() => {
                saved.hoster = None;
                dirty = true;
                warn!("hoster's branch folder no longer watched, dropping saved mod names");
            }
            None => {}
        }

        let server_root = existing(server_root).await;
        match &server_root {
            Some(root) => {
                saved.server.get_or_insert_with(BTreeSet::new);
                info!(path = %root.display(), "watching server's mods folder");
            }
            None if saved.server.is_some() => {
                saved.server = None;
                dirty = true;
                warn!("server's mods folder no longer watched, dropping saved mod names");
            }
            None => {}
        }

        Ok(Self {
            hoster_root,
            server_root,
            state_file,
            saved,
            dirty,
            sink,
            interval,
        })
    }

    /// True when at least one folder is watched.
    pub fn is_watching(&self) -> bool {
        self.hoster_root.is_some() || self.server_root.is_some()
    }

    pub fn saved(&self) -> &SavedModNames {
        &self.saved
    }

    /// Lists every watched folder and returns what changed since the last
    /// check. The hoster's folders are compared first; mods the server
    /// already lists are left out of them, and the server listing leaves out
    /// the hoster's server-side mods.
    pub async fn check(&mut self, now: i64) -> AppResult<Vec<ModChange>> {
        let mut changes = Vec::new();
        let SavedModNames { hoster, server } = &mut self.saved;

        if let (Some(root), Some(hoster)) = (&self.hoster_root, hoster.as_mut()) {
            for folder in ModFolder::HOSTER {
                let mut current = list_mods(&root.join(folder.relative_path())).await?;
                if let Some(server) = server.as_ref() {
                    current.retain(|name| !server.contains(name));
                }
                let Some(last) = hoster.folder_mut(folder) else {
                    continue;
                };
                if let Some(change) = ModChange::between(now, folder, last, &current) {
                    *last = current;
                    changes.push(change);
                }
            }
        }

        if let (Some(root), Some(last)) = (&self.server_root, server.as_mut()) {
            let mut current = list_mods(root).await?;
            if let Some(hoster) = hoster.as_ref() {
                let server_side: BTreeSet<&String> = hoster.server_side().collect();
                current.retain(|name| !server_side.contains(name));
            }
            if let Some(change) = ModChange::between(now, ModFolder::Server, last, &current) {
                *last = current;
                changes.push(change);
            }
        }

        if !changes.is_empty() {
            self.dirty = true;
        }
        Ok(changes)
    }

    /// Writes the listing when it changed since the last save.
    pub async fn save(&mut self) -> AppResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_string(&self.saved)?;
        tokio::fs::write(&self.state_file, json).await?;
        self.dirty = false;
        debug!(file = %self.state_file.display(), "mod names saved");
        Ok(())
    }

    /// One check: announce every change, then persist the listing.
    pub async fn tick(&mut self, now: i64) {
        match self.check(now).await {
            Ok(changes) => {
                for change in &changes {
                    info!(
                        folder = ?change.folder,
                        added = change.added.len(),
                        removed = change.removed.len(),
                        "mods changed"
                    );
                    match tokio::time::timeout(DELIVERY_TIMEOUT, self.sink.publish_mods(change)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "failed to publish mod change"),
                        Err(_) => warn!("mod change delivery timed out"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "mod check failed"),
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, "could not save mod names");
        }
    }

    /// Checks every `interval` until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "mod watcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick(now_seconds()).await;
        }
        info!("mod watcher stopped");
    }
}
