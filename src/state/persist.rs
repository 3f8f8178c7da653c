/// Persistence manager
///
/// Serializes the four logical buckets (styles, presets, folders,
/// gallery) into a quota-bounded key-value store backed by SQLite.
/// When a bucket does not fit, its image payloads are recompressed at
/// progressively lower fidelity tiers; the gallery is additionally
/// truncated before the bucket is given up on. A save either fully
/// succeeds at one tier or falls to the next, and no failure escapes
/// this module: every outcome folds into a per-bucket report.

use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task;

use crate::imaging::{
    self, GALLERY_COMPACT, STYLE_COMPACT_PREVIEW, STYLE_COMPACT_THUMB, STYLE_PREVIEW,
};
use super::data::{GalleryEntry, ImagePayload, Preset, StyleEntry, StyleFolder};
use super::store::Workspace;

/// Storage keys, one per logical bucket
pub const STYLES_KEY: &str = "styles";
pub const PRESETS_KEY: &str = "presets";
pub const FOLDERS_KEY: &str = "folders";
pub const GALLERY_KEY: &str = "gallery";

/// Total capacity of the local store (5 MiB)
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Custom-style artwork above this size is normalized to the standard
/// preview tier before the first write attempt
const OVERSIZE_ARTWORK_BYTES: usize = 48 * 1024;

/// Gallery entries kept when persisting (in-memory list is unbounded)
const GALLERY_PERSIST_CAP: usize = 15;

/// Gallery entries kept on the last fallback tier
const GALLERY_TRUNCATED_CAP: usize = 5;

/// Quiet period after the last tracked change before an autosave fires
pub const AUTOSAVE_QUIET_PERIOD: Duration = Duration::from_secs(7);

#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would push the store past its capacity ceiling
    #[error("store quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Quota-bounded key-value store, one row per bucket.
///
/// The capacity ceiling is enforced on every put: a write that would
/// exceed it fails with `QuotaExceeded` and leaves the previous
/// payload for that key untouched.
pub struct LocalStore {
    conn: Connection,
    db_path: PathBuf,
    quota_bytes: usize,
}

impl LocalStore {
    /// Open the store in the user's data directory:
    /// - Linux: ~/.local/share/style-studio/style_studio.db
    /// - macOS: ~/Library/Application Support/style-studio/style_studio.db
    /// - Windows: %APPDATA%\style-studio\style_studio.db
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&Self::default_path(), DEFAULT_QUOTA_BYTES)
    }

    /// Get the path where the store should live
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .expect("Could not determine user data directory");

        path.push("style-studio");
        path.push("style_studio.db");
        path
    }

    pub fn open(path: &Path, quota_bytes: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .expect("Failed to create application data directory");
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            db_path: path.to_path_buf(),
            quota_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub fn open_in_memory(quota_bytes: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            db_path: PathBuf::from(":memory:"),
            quota_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS buckets (
                key         TEXT PRIMARY KEY,
                payload     TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Get the path to the store file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Bytes currently occupied across all buckets
    pub fn used_bytes(&self) -> Result<usize, StoreError> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM buckets",
            [],
            |row| row.get(0),
        )?;
        Ok(used as usize)
    }

    /// Write one bucket, enforcing the capacity ceiling.
    /// The previous payload for the key is replaced, so only the other
    /// buckets count against the new payload.
    pub fn put(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let others: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM buckets WHERE key != ?1",
            [key],
            |row| row.get(0),
        )?;

        let needed = others as usize + payload.len();
        if needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO buckets (key, payload) VALUES (?1, ?2)",
            [key, payload],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let payload = self
            .conn
            .query_row("SELECT payload FROM buckets WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(payload)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM buckets WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Owned copy of the persistable collections, cloned from the
/// workspace so the save can run on another thread
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub styles: Vec<StyleEntry>,
    pub presets: Vec<Preset>,
    pub folders: Vec<StyleFolder>,
    pub gallery: Vec<GalleryEntry>,
}

impl Snapshot {
    pub fn of(workspace: &Workspace) -> Self {
        Self {
            styles: workspace.styles.clone(),
            presets: workspace.presets.clone(),
            folders: workspace.folders.clone(),
            gallery: workspace.gallery.clone(),
        }
    }
}

/// Per-bucket outcome of one save pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub styles: bool,
    pub presets: bool,
    pub folders: bool,
    pub gallery: bool,
}

impl SaveReport {
    pub fn all_ok(&self) -> bool {
        self.styles && self.presets && self.folders && self.gallery
    }

    pub fn failed() -> Self {
        Self {
            styles: false,
            presets: false,
            folders: false,
            gallery: false,
        }
    }
}

/// Outcome of one write attempt at one fidelity tier
enum PutOutcome {
    Stored,
    Full,
    Failed,
}

fn try_put<T: serde::Serialize>(store: &LocalStore, key: &str, value: &T) -> PutOutcome {
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("⚠️  Could not serialize bucket '{}': {}", key, e);
            return PutOutcome::Failed;
        }
    };

    match store.put(key, &payload) {
        Ok(()) => PutOutcome::Stored,
        Err(StoreError::QuotaExceeded { .. }) => PutOutcome::Full,
        Err(e) => {
            eprintln!("⚠️  Could not write bucket '{}': {}", key, e);
            PutOutcome::Failed
        }
    }
}

/// Terminal failure for a bucket: drop its persisted copy so the store
/// never holds a stale half of the fallback ladder. Other buckets'
/// rows are untouched.
fn drop_bucket(store: &LocalStore, key: &str) {
    if let Err(e) = store.remove(key) {
        eprintln!("⚠️  Could not drop bucket '{}': {}", key, e);
    }
    eprintln!("❌ Bucket '{}' no longer fits the local store", key);
}

/// Text-only buckets have no image payloads to recompress, so they
/// get a single attempt before the bucket is dropped
fn save_plain<T: serde::Serialize>(store: &LocalStore, key: &str, value: &T) -> bool {
    match try_put(store, key, value) {
        PutOutcome::Stored => true,
        _ => {
            drop_bucket(store, key);
            false
        }
    }
}

/// Write every bucket, walking the fallback ladder per bucket.
/// Buckets are independent: one bucket ending up dropped never blocks
/// or deletes another. In-memory state is never modified.
pub fn save_all(store: &LocalStore, snapshot: &Snapshot) -> SaveReport {
    let folders = save_plain(store, FOLDERS_KEY, &snapshot.folders);
    let presets = save_plain(store, PRESETS_KEY, &snapshot.presets);
    let styles = save_styles(store, &snapshot.styles);
    let gallery = save_gallery(store, &snapshot.gallery);

    SaveReport {
        styles,
        presets,
        folders,
        gallery,
    }
}

/// Recompress a payload for a fallback tier, keeping the original when
/// the bytes cannot be decoded (a bad entry should not sink the save)
fn shrink(payload: &ImagePayload, tier: imaging::FidelityTier) -> ImagePayload {
    match imaging::recompress(payload, tier) {
        Ok(smaller) => smaller,
        Err(e) => {
            eprintln!("⚠️  Recompression failed, keeping original bytes: {}", e);
            payload.clone()
        }
    }
}

/// Tier 1: oversized custom artwork normalized to the standard preview.
/// Tier 2: all custom artwork recompressed to the compact tiers.
/// After that the bucket is dropped.
fn save_styles(store: &LocalStore, styles: &[StyleEntry]) -> bool {
    let normalized: Vec<StyleEntry> = styles
        .iter()
        .map(|s| {
            let oversized = s
                .preview
                .as_ref()
                .map(|p| p.len() > OVERSIZE_ARTWORK_BYTES)
                .unwrap_or(false);
            if !s.builtin && oversized {
                let mut out = s.clone();
                let compressed = shrink(s.preview.as_ref().unwrap(), STYLE_PREVIEW);
                out.thumbnail = Some(compressed.clone());
                out.preview = Some(compressed);
                out
            } else {
                s.clone()
            }
        })
        .collect();

    match try_put(store, STYLES_KEY, &normalized) {
        PutOutcome::Stored => return true,
        PutOutcome::Failed => {
            drop_bucket(store, STYLES_KEY);
            return false;
        }
        PutOutcome::Full => {}
    }

    let compact: Vec<StyleEntry> = normalized
        .iter()
        .map(|s| {
            if s.builtin {
                return s.clone();
            }
            let mut out = s.clone();
            out.preview = out.preview.as_ref().map(|p| shrink(p, STYLE_COMPACT_PREVIEW));
            out.thumbnail = out
                .thumbnail
                .as_ref()
                .map(|t| shrink(t, STYLE_COMPACT_THUMB));
            out.reference = out
                .reference
                .as_ref()
                .map(|r| shrink(r, STYLE_COMPACT_THUMB));
            out
        })
        .collect();

    match try_put(store, STYLES_KEY, &compact) {
        PutOutcome::Stored => true,
        _ => {
            drop_bucket(store, STYLES_KEY);
            false
        }
    }
}

/// Tier 1: most recent entries at their stored fidelity.
/// Tier 2: same window, images recompressed to the compact tier.
/// Tier 3: compact images truncated to a handful of entries.
/// After that the bucket is dropped.
fn save_gallery(store: &LocalStore, gallery: &[GalleryEntry]) -> bool {
    let capped: Vec<GalleryEntry> = gallery.iter().take(GALLERY_PERSIST_CAP).cloned().collect();

    match try_put(store, GALLERY_KEY, &capped) {
        PutOutcome::Stored => return true,
        PutOutcome::Failed => {
            drop_bucket(store, GALLERY_KEY);
            return false;
        }
        PutOutcome::Full => {}
    }

    let compact: Vec<GalleryEntry> = capped
        .iter()
        .map(|entry| {
            let mut out = entry.clone();
            out.image = shrink(&entry.image, GALLERY_COMPACT);
            out
        })
        .collect();

    if matches!(try_put(store, GALLERY_KEY, &compact), PutOutcome::Stored) {
        return true;
    }

    let truncated: Vec<GalleryEntry> = compact
        .iter()
        .take(GALLERY_TRUNCATED_CAP)
        .cloned()
        .collect();

    match try_put(store, GALLERY_KEY, &truncated) {
        PutOutcome::Stored => true,
        _ => {
            drop_bucket(store, GALLERY_KEY);
            false
        }
    }
}

/// Run a full save on the blocking pool.
/// A fresh store handle is opened inside the task because the SQLite
/// connection is not Send.
pub async fn save_all_async(path: PathBuf, quota_bytes: usize, snapshot: Snapshot) -> SaveReport {
    task::spawn_blocking(move || match LocalStore::open(&path, quota_bytes) {
        Ok(store) => save_all(&store, &snapshot),
        Err(e) => {
            eprintln!("⚠️  Could not open the local store: {}", e);
            SaveReport::failed()
        }
    })
    .await
    .unwrap_or_else(|e| {
        eprintln!("⚠️  Save task failed: {}", e);
        SaveReport::failed()
    })
}

/// Buckets read back at startup. A missing or unreadable bucket is
/// None; the workspace falls back to shipped defaults for it.
#[derive(Debug, Default)]
pub struct LoadedBuckets {
    pub styles: Option<Vec<StyleEntry>>,
    pub presets: Option<Vec<Preset>>,
    pub folders: Option<Vec<StyleFolder>>,
    pub gallery: Option<Vec<GalleryEntry>>,
}

fn load_bucket<T: serde::de::DeserializeOwned>(store: &LocalStore, key: &str) -> Option<T> {
    let payload = match store.get(key) {
        Ok(Some(p)) => p,
        Ok(None) => return None,
        Err(e) => {
            eprintln!("⚠️  Could not read bucket '{}': {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&payload) {
        Ok(value) => Some(value),
        Err(e) => {
            eprintln!("⚠️  Bucket '{}' is corrupt, falling back to defaults: {}", key, e);
            None
        }
    }
}

pub fn load_all(store: &LocalStore) -> LoadedBuckets {
    LoadedBuckets {
        styles: load_bucket(store, STYLES_KEY),
        presets: load_bucket(store, PRESETS_KEY),
        folders: load_bucket(store, FOLDERS_KEY),
        gallery: load_bucket(store, GALLERY_KEY),
    }
}

/// Debounce and single-writer bookkeeping for automatic saves.
///
/// Every tracked mutation bumps the generation and schedules a tick;
/// only the tick carrying the latest generation actually saves, so a
/// burst of edits collapses into one write. While a save is in flight
/// new requests set `dirty_again` instead of starting a second writer;
/// the caller re-runs once the first save reports back.
#[derive(Debug, Default)]
pub struct AutosavePolicy {
    generation: u64,
    in_flight: bool,
    dirty_again: bool,
}

impl AutosavePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tracked mutation and get the generation a scheduled
    /// tick must present to still be relevant
    pub fn touch(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// True if no newer mutation superseded this tick
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Try to become the single writer.
    /// Returns false when a save is already running; the request is
    /// remembered and replayed by `finish`.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            self.dirty_again = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Mark the in-flight save as done.
    /// Returns true when another save was requested meanwhile and
    /// should run now.
    pub fn finish(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.dirty_again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::RgbImage;
    use std::io::Cursor;

    /// Deterministic noise; PNG cannot squeeze it, so payload sizes
    /// reliably shrink down the fallback ladder
    fn sample_payload(width: u32, height: u32) -> ImagePayload {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let n = x
                .wrapping_mul(2_654_435_761)
                .wrapping_add(y.wrapping_mul(40_503))
                ^ x.rotate_left(13);
            image::Rgb([(n & 0xFF) as u8, ((n >> 8) & 0xFF) as u8, ((n >> 16) & 0xFF) as u8])
        });
        let mut data = Vec::new();
        img.write_with_encoder(PngEncoder::new(&mut Cursor::new(&mut data)))
            .unwrap();
        ImagePayload::new("image/png", data)
    }

    fn gallery_of(count: usize, image: &ImagePayload) -> Vec<GalleryEntry> {
        (0..count)
            .map(|i| GalleryEntry {
                id: format!("gal_{}", i),
                image: image.clone(),
                style_name: "Watercolor".to_string(),
                prompt: "paint it".to_string(),
                created_at: 1_700_000_000 + i as i64,
                aspect_ratio: "auto".to_string(),
            })
            .collect()
    }

    fn snapshot_with_gallery(gallery: Vec<GalleryEntry>) -> Snapshot {
        let ws = Workspace::new();
        Snapshot {
            styles: ws.styles.clone(),
            presets: ws.presets.clone(),
            folders: ws.folders.clone(),
            gallery,
        }
    }

    fn json_len<T: serde::Serialize>(value: &T) -> usize {
        serde_json::to_string(value).unwrap().len()
    }

    #[test]
    fn test_put_enforces_quota() {
        let store = LocalStore::open_in_memory(100).unwrap();

        store.put("a", "x".repeat(60).as_str()).unwrap();
        let err = store.put("b", "y".repeat(60).as_str()).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        // The failed write left both keys as they were
        assert_eq!(store.get("a").unwrap().unwrap().len(), 60);
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn test_replacing_a_key_frees_its_old_bytes() {
        let store = LocalStore::open_in_memory(100).unwrap();
        store.put("a", "x".repeat(80).as_str()).unwrap();
        // 80 old + 80 new would blow the quota if the old copy counted
        store.put("a", "z".repeat(80).as_str()).unwrap();
        assert_eq!(store.used_bytes().unwrap(), 80);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = LocalStore::open_in_memory(DEFAULT_QUOTA_BYTES).unwrap();
        let snapshot = snapshot_with_gallery(gallery_of(3, &sample_payload(32, 32)));

        let report = save_all(&store, &snapshot);
        assert!(report.all_ok());

        let loaded = load_all(&store);
        assert_eq!(loaded.presets.unwrap(), snapshot.presets);
        assert_eq!(loaded.folders.unwrap(), snapshot.folders);
        assert_eq!(loaded.styles.unwrap(), snapshot.styles);
        assert_eq!(loaded.gallery.unwrap(), snapshot.gallery);
    }

    #[test]
    fn test_gallery_cap_applies_before_the_first_attempt() {
        let store = LocalStore::open_in_memory(DEFAULT_QUOTA_BYTES).unwrap();
        let snapshot = snapshot_with_gallery(gallery_of(40, &sample_payload(16, 16)));

        assert!(save_all(&store, &snapshot).gallery);

        let persisted = load_all(&store).gallery.unwrap();
        assert_eq!(persisted.len(), GALLERY_PERSIST_CAP);
        // The window keeps the newest entries (front of the list)
        assert_eq!(persisted[0].id, "gal_0");
    }

    #[test]
    fn test_gallery_falls_back_in_increasing_compression_order() {
        let big = sample_payload(600, 600);
        let full = gallery_of(GALLERY_PERSIST_CAP, &big);

        // Measure the ladder's rungs to place the quota between them
        let compact_img = imaging::recompress(&big, GALLERY_COMPACT).unwrap();
        let compact = gallery_of(GALLERY_PERSIST_CAP, &compact_img);
        let truncated: Vec<GalleryEntry> =
            compact.iter().take(GALLERY_TRUNCATED_CAP).cloned().collect();

        let full_len = json_len(&full);
        let compact_len = json_len(&compact);
        let truncated_len = json_len(&truncated);
        assert!(truncated_len < compact_len && compact_len < full_len);

        let base = {
            let store = LocalStore::open_in_memory(usize::MAX).unwrap();
            save_all(&store, &snapshot_with_gallery(Vec::new()));
            store.used_bytes().unwrap()
        };

        // Quota admits the compact tier but not the full one
        let store = LocalStore::open_in_memory(base + compact_len + 64).unwrap();
        assert!(save_all(&store, &snapshot_with_gallery(full.clone())).gallery);
        let persisted = load_all(&store).gallery.unwrap();
        assert_eq!(persisted.len(), GALLERY_PERSIST_CAP);
        assert!(persisted[0].image.len() < big.len());
        assert_eq!(persisted[0].image.mime, "image/jpeg");

        // Tighter quota admits only the truncated tier
        let store = LocalStore::open_in_memory(base + truncated_len + 64).unwrap();
        assert!(save_all(&store, &snapshot_with_gallery(full.clone())).gallery);
        assert_eq!(
            load_all(&store).gallery.unwrap().len(),
            GALLERY_TRUNCATED_CAP
        );

        // Tighter still and the bucket is dropped, nothing else with it
        let store = LocalStore::open_in_memory(base + 16).unwrap();
        let report = save_all(&store, &snapshot_with_gallery(full));
        assert!(!report.gallery);
        assert!(report.styles && report.presets && report.folders);
        assert!(load_all(&store).gallery.is_none());
        assert!(load_all(&store).styles.is_some());
    }

    #[test]
    fn test_custom_style_artwork_compacts_under_pressure() {
        let big = sample_payload(900, 900);
        let mut ws = Workspace::new();
        ws.add_custom_style(
            "Huge".to_string(),
            "big artwork".to_string(),
            Some(big.clone()),
            None,
            None,
        );
        let snapshot = Snapshot::of(&ws);

        // Room for the compact rendition only
        let normalized = imaging::recompress(&big, STYLE_PREVIEW).unwrap();
        let compact = imaging::recompress(&normalized, STYLE_COMPACT_PREVIEW).unwrap();
        assert!(compact.len() < normalized.len());

        let base = {
            let store = LocalStore::open_in_memory(usize::MAX).unwrap();
            save_all(&store, &Snapshot::of(&Workspace::new()));
            store.used_bytes().unwrap()
        };
        // Two compact copies land in the entry (preview + thumbnail);
        // base64 expands them by a third
        let quota = base + 3 * compact.len();
        let store = LocalStore::open_in_memory(quota).unwrap();

        let report = save_all(&store, &snapshot);
        assert!(report.styles);

        let persisted = load_all(&store).styles.unwrap();
        let custom = persisted.iter().find(|s| s.label == "Huge").unwrap();
        let preview = custom.preview.as_ref().unwrap();
        let (w, h) = imaging::dimensions(preview).unwrap();
        assert!(w <= STYLE_COMPACT_PREVIEW.max_dim && h <= STYLE_COMPACT_PREVIEW.max_dim);
    }

    #[test]
    fn test_corrupt_bucket_loads_as_none() {
        let store = LocalStore::open_in_memory(DEFAULT_QUOTA_BYTES).unwrap();
        store.put(STYLES_KEY, "{ not json").unwrap();
        assert!(load_all(&store).styles.is_none());
    }

    #[test]
    fn test_autosave_ticks_are_superseded_by_newer_edits() {
        let mut policy = AutosavePolicy::new();
        let first = policy.touch();
        let second = policy.touch();

        assert!(!policy.is_current(first));
        assert!(policy.is_current(second));
    }

    #[test]
    fn test_overlapping_saves_coalesce_into_one_rerun() {
        let mut policy = AutosavePolicy::new();

        assert!(policy.begin());
        // Two more requests while the writer is busy
        assert!(!policy.begin());
        assert!(!policy.begin());

        // One follow-up save, not two
        assert!(policy.finish());
        assert!(policy.begin());
        assert!(!policy.finish());
    }
}
