use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::cache::{AnnotationCache, CacheEntry};
use crate::canvas::{Bbox, RasterStore};
use crate::error::{EngineError, Result};
use crate::io;
use crate::library::AssetResolver;
use crate::project::{AnnotationProject, ToolEvent};
use crate::settings::EngineSettings;

// ============================================================================
// ASYNC IO PIPELINE: background decode / save
// ============================================================================

/// Result delivered from a background IO task.
enum IoResult {
    /// Image (and annotation, if any) decoded for the load started at
    /// `generation`.
    Loaded {
        generation: u64,
        key: String,
        entry: CacheEntry,
    },
    LoadFailed {
        generation: u64,
        key: String,
        error: String,
    },
    SaveComplete {
        key: String,
    },
    /// A newer save of the same key was queued before this one ran.
    SaveSuperseded {
        key: String,
    },
    SaveFailed {
        key: String,
        project_id: uuid::Uuid,
        error: String,
    },
}

/// What happened since the last [`Annotator::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotatorEvent {
    /// `key` is now the live project.
    Loaded { key: String, had_annotation: bool },
    LoadFailed { key: String, error: String },
    /// A decode finished after navigation moved on; its result was dropped.
    StaleLoadDiscarded { key: String },
    Saved { key: String },
    SaveFailed { key: String, error: String },
}

fn lock_sequences(sequences: &Mutex<HashMap<String, u64>>) -> MutexGuard<'_, HashMap<String, u64>> {
    sequences.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_cache(cache: &Mutex<AnnotationCache>) -> MutexGuard<'_, AnnotationCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Latest save sequence number per key.
type SaveSequences = Arc<Mutex<HashMap<String, u64>>>;

/// Decode an image and its annotation. A missing or unreadable annotation
/// leaves `mask` empty; only an unreadable image is an error.
fn load_entry(resolver: &dyn AssetResolver, key: &str) -> Result<CacheEntry> {
    let image = io::load_image(&resolver.image_path(key)?)?;
    let mask = if resolver.annotation_exists(key) {
        let path = resolver.annotation_path(key)?;
        match io::load_annotation(&path, image.width(), image.height()) {
            Ok(mask) => Some(mask),
            Err(e) => {
                tracing::warn!("no annotation available for '{}': {}", key, e);
                None
            }
        }
    } else {
        None
    };
    Ok(CacheEntry::new(image, mask))
}

// ============================================================================
// ANNOTATOR: owner-thread controller
// ============================================================================

/// Owns the live [`AnnotationProject`] and moves between images.
///
/// Every method runs on the owner thread. Decoding and saving happen on the
/// rayon pool and report back through [`poll`](Self::poll); a decode that
/// finishes after navigation moved on is discarded by generation.
pub struct Annotator {
    resolver: Arc<dyn AssetResolver>,
    pub settings: EngineSettings,
    cache: Arc<Mutex<AnnotationCache>>,
    io_sender: mpsc::Sender<IoResult>,
    io_receiver: mpsc::Receiver<IoResult>,
    /// Single low-priority thread for neighbour decodes.
    prefetch_pool: Option<rayon::ThreadPool>,
    /// Single ordered writer for annotation saves.
    save_pool: Option<rayon::ThreadPool>,
    save_sequences: SaveSequences,
    /// Held for the whole write so saves never overlap and an older save of
    /// a key never lands after a newer one.
    save_lock: Arc<Mutex<()>>,
    next_save: u64,
    keys: Vec<String>,
    current: Option<usize>,
    project: Option<AnnotationProject>,
    /// Bumped on every navigation; decodes carry the value they started with.
    load_generation: u64,
    pending_io_ops: usize,
    /// Keys whose last save failed after their project was closed.
    unsaved: HashSet<String>,
    events: Vec<AnnotatorEvent>,
}

impl Annotator {
    pub fn new(resolver: Arc<dyn AssetResolver>, settings: EngineSettings) -> Self {
        let (io_sender, io_receiver) = mpsc::channel();
        let prefetch_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|_| "labelfe-prefetch".to_string())
            .build()
            .map_err(|e| tracing::warn!("prefetch pool unavailable, using global pool: {}", e))
            .ok();
        let save_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|_| "labelfe-save".to_string())
            .build()
            .map_err(|e| tracing::warn!("save pool unavailable, using global pool: {}", e))
            .ok();
        Self {
            resolver,
            cache: Arc::new(Mutex::new(AnnotationCache::new(settings.cache_capacity))),
            settings,
            io_sender,
            io_receiver,
            prefetch_pool,
            save_pool,
            save_sequences: Arc::new(Mutex::new(HashMap::new())),
            save_lock: Arc::new(Mutex::new(())),
            next_save: 0,
            keys: Vec::new(),
            current: None,
            project: None,
            load_generation: 0,
            pending_io_ops: 0,
            unsaved: HashSet::new(),
            events: Vec::new(),
        }
    }

    /// Replace the navigation order. Cached entries from the previous list
    /// are dropped.
    pub fn set_keys(&mut self, keys: Vec<String>) {
        self.flush();
        self.project = None;
        self.current = None;
        self.load_generation += 1;
        lock_cache(&self.cache).clear();
        self.keys = keys;
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.and_then(|i| self.keys.get(i)).map(String::as_str)
    }

    pub fn project(&self) -> Option<&AnnotationProject> {
        self.project.as_ref()
    }

    pub fn project_mut(&mut self) -> Option<&mut AnnotationProject> {
        self.project.as_mut()
    }

    /// Background tasks (decodes and saves) not yet reported by `poll`.
    pub fn pending_io(&self) -> usize {
        self.pending_io_ops
    }

    pub fn is_cached(&self, key: &str) -> bool {
        lock_cache(&self.cache).contains(key)
    }

    /// Navigate to `keys[index]`.
    ///
    /// The current project is saved first if dirty. A cached image becomes
    /// live immediately; otherwise it is decoded in the background and shows
    /// up as [`AnnotatorEvent::Loaded`] from a later `poll`.
    pub fn open(&mut self, index: usize) -> Result<()> {
        let key = self
            .keys
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::InvalidImageId(format!("#{}", index)))?;

        self.flush();
        self.project = None;
        self.current = Some(index);
        self.load_generation += 1;
        let generation = self.load_generation;

        let cached = lock_cache(&self.cache).get(&key);
        match cached {
            Some(entry) => {
                tracing::debug!("'{}' served from cache", key);
                self.install(key, entry);
            }
            None => {
                tracing::info!("loading '{}' (generation {})", key, generation);
                let resolver = Arc::clone(&self.resolver);
                let cache = Arc::clone(&self.cache);
                let sender = self.io_sender.clone();
                self.pending_io_ops += 1;
                rayon::spawn(move || {
                    let result = match load_entry(resolver.as_ref(), &key) {
                        Ok(entry) => {
                            let mut cache = lock_cache(&cache);
                            if !cache.contains(&key) {
                                cache.put(key.clone(), entry.clone());
                            }
                            IoResult::Loaded {
                                generation,
                                key,
                                entry,
                            }
                        }
                        Err(e) => IoResult::LoadFailed {
                            generation,
                            key,
                            error: e.to_string(),
                        },
                    };
                    let _ = sender.send(result);
                });
            }
        }

        self.prefetch_neighbours(index);
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        let index = self.current.map_or(0, |i| i + 1);
        if index >= self.keys.len() {
            return Ok(());
        }
        self.open(index)
    }

    pub fn previous(&mut self) -> Result<()> {
        match self.current {
            Some(i) if i > 0 => self.open(i - 1),
            _ => Ok(()),
        }
    }

    /// Forward an event to the live project.
    pub fn handle(&mut self, event: ToolEvent, now: Instant) -> Result<Option<Bbox>> {
        let project = self.project.as_mut().ok_or(EngineError::NotLoaded)?;
        match project.handle(event, now) {
            Err(e) if e.is_dropped_input() => {
                tracing::debug!("dropped input: {}", e);
                Err(e)
            }
            other => other,
        }
    }

    /// Drain background results. Call regularly from the owner thread.
    pub fn poll(&mut self) -> Vec<AnnotatorEvent> {
        while let Ok(result) = self.io_receiver.try_recv() {
            self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
            match result {
                IoResult::Loaded {
                    generation,
                    key,
                    entry,
                } => {
                    if generation != self.load_generation {
                        tracing::debug!(
                            "discarding stale load of '{}' (generation {} < {})",
                            key,
                            generation,
                            self.load_generation
                        );
                        self.events.push(AnnotatorEvent::StaleLoadDiscarded { key });
                        continue;
                    }
                    // a save may have refreshed the cache while decoding
                    let entry = lock_cache(&self.cache).get(&key).unwrap_or(entry);
                    self.install(key, entry);
                }
                IoResult::LoadFailed {
                    generation,
                    key,
                    error,
                } => {
                    if generation != self.load_generation {
                        self.events.push(AnnotatorEvent::StaleLoadDiscarded { key });
                        continue;
                    }
                    tracing::error!("failed to open '{}': {}", key, error);
                    self.events.push(AnnotatorEvent::LoadFailed { key, error });
                }
                IoResult::SaveComplete { key } => {
                    tracing::info!("saved annotation '{}'", key);
                    self.unsaved.remove(&key);
                    self.events.push(AnnotatorEvent::Saved { key });
                }
                IoResult::SaveSuperseded { key } => {
                    tracing::debug!("skipped superseded save of '{}'", key);
                }
                IoResult::SaveFailed {
                    key,
                    project_id,
                    error,
                } => {
                    tracing::error!("failed to save '{}': {}", key, error);
                    match self.project.as_mut() {
                        Some(project) if project.id == project_id => project.mark_dirty(),
                        _ => {
                            self.unsaved.insert(key.clone());
                        }
                    }
                    self.events.push(AnnotatorEvent::SaveFailed { key, error });
                }
            }
        }
        std::mem::take(&mut self.events)
    }

    /// Save the live project if it has unsaved edits. The write runs in the
    /// background; the dirty flag is cleared now and set again if it fails.
    pub fn flush(&mut self) {
        let Some(project) = self.project.as_mut() else {
            return;
        };
        project.commit_stroke();
        if !project.is_dirty {
            return;
        }
        project.mark_clean();

        let key = project.key.clone();
        let project_id = project.id;
        let buffer = project.canvas().clone();
        if let Some(image) = project.image.clone() {
            lock_cache(&self.cache).put(
                key.clone(),
                CacheEntry {
                    image,
                    mask: Some(Arc::new(buffer.clone())),
                },
            );
        }

        let path = match self.resolver.annotation_path(&key) {
            Ok(path) => path,
            Err(e) => {
                project.mark_dirty();
                self.events.push(AnnotatorEvent::SaveFailed {
                    key,
                    error: e.to_string(),
                });
                return;
            }
        };

        self.next_save += 1;
        let sequence = self.next_save;
        lock_sequences(&self.save_sequences).insert(key.clone(), sequence);

        let sender = self.io_sender.clone();
        let sequences = Arc::clone(&self.save_sequences);
        let save_lock = Arc::clone(&self.save_lock);
        self.pending_io_ops += 1;
        let job = move || {
            let _writing = save_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let superseded = lock_sequences(&sequences).get(&key) != Some(&sequence);
            let result = if superseded {
                IoResult::SaveSuperseded { key }
            } else {
                match io::save_annotation(&buffer, &path) {
                    Ok(()) => IoResult::SaveComplete { key },
                    Err(e) => IoResult::SaveFailed {
                        key,
                        project_id,
                        error: e.to_string(),
                    },
                }
            };
            let _ = sender.send(result);
        };
        match &self.save_pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }

    fn install(&mut self, key: String, entry: CacheEntry) {
        let had_annotation = entry.mask.is_some();
        let mut project = AnnotationProject::from_image(
            key.clone(),
            entry.image,
            entry.mask.as_deref(),
            &self.settings,
        );
        if self.unsaved.contains(&key) {
            project.mark_dirty();
        }
        tracing::info!(
            "opened '{}' ({}x{}, annotation: {})",
            key,
            project.canvas().width(),
            project.canvas().height(),
            had_annotation
        );
        self.project = Some(project);
        self.events.push(AnnotatorEvent::Loaded {
            key,
            had_annotation,
        });
    }

    /// Decode the neighbours of `index` into the cache on the prefetch
    /// thread, skipping anything already cached.
    fn prefetch_neighbours(&self, index: usize) {
        let radius = self.settings.prefetch_radius;
        let mut keys = Vec::new();
        for offset in 1..=radius {
            if let Some(key) = self.keys.get(index + offset) {
                keys.push(key.clone());
            }
            if let Some(key) = index.checked_sub(offset).and_then(|i| self.keys.get(i)) {
                keys.push(key.clone());
            }
        }
        if keys.is_empty() {
            return;
        }

        let resolver = Arc::clone(&self.resolver);
        let cache = Arc::clone(&self.cache);
        let job = move || {
            for key in keys {
                if lock_cache(&cache).contains(&key) {
                    continue;
                }
                match load_entry(resolver.as_ref(), &key) {
                    Ok(entry) => {
                        let mut cache = lock_cache(&cache);
                        if !cache.contains(&key) {
                            tracing::debug!("prefetched '{}'", key);
                            cache.put(key, entry);
                        }
                    }
                    Err(e) => tracing::debug!("prefetch of '{}' failed: {}", key, e),
                }
            }
        };
        match &self.prefetch_pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }
}

impl Drop for Annotator {
    fn drop(&mut self) {
        self.flush();
    }
}
