/// In-memory application store
///
/// The Workspace owns the style library, presets, folders, gallery and
/// loaded photos, and exposes the mutation operations the UI
/// dispatches. Everything here only touches memory; writing to disk is
/// the persistence manager's job.

use chrono::Utc;

use super::data::{
    builtin_styles, default_folders, default_presets, GalleryEntry, ImagePayload, PhotoState,
    Preset, StyleEntry, StyleFolder,
};

pub struct Workspace {
    pub styles: Vec<StyleEntry>,
    pub presets: Vec<Preset>,
    pub folders: Vec<StyleFolder>,
    /// Newest first
    pub gallery: Vec<GalleryEntry>,
    pub photos: Vec<PhotoState>,
    /// Disambiguates ids minted within the same millisecond
    id_counter: u64,
}

impl Workspace {
    /// A fresh workspace seeded with the shipped catalog
    pub fn new() -> Self {
        Self {
            styles: builtin_styles(),
            presets: default_presets(),
            folders: default_folders(),
            gallery: Vec::new(),
            photos: Vec::new(),
            id_counter: 0,
        }
    }

    /// Rebuild a workspace from whatever buckets survived on disk.
    /// Missing buckets fall back to the shipped defaults.
    pub fn from_persisted(
        styles: Option<Vec<StyleEntry>>,
        presets: Option<Vec<Preset>>,
        folders: Option<Vec<StyleFolder>>,
        gallery: Option<Vec<GalleryEntry>>,
    ) -> Self {
        let styles = match styles {
            Some(saved) => reconcile_styles(saved),
            None => builtin_styles(),
        };
        let presets = match presets {
            Some(p) if !p.is_empty() => p,
            _ => default_presets(),
        };
        Self {
            styles,
            presets,
            folders: folders.unwrap_or_else(default_folders),
            gallery: gallery.unwrap_or_default(),
            photos: Vec::new(),
            id_counter: 0,
        }
    }

    fn new_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!(
            "{}_{}_{}",
            prefix,
            Utc::now().timestamp_millis(),
            self.id_counter
        )
    }

    // ========== Styles ==========

    pub fn style(&self, id: &str) -> Option<&StyleEntry> {
        self.styles.iter().find(|s| s.id == id)
    }

    fn style_mut(&mut self, id: &str) -> Option<&mut StyleEntry> {
        self.styles.iter_mut().find(|s| s.id == id)
    }

    /// Non-deleted styles whose label matches the search term
    pub fn visible_styles(&self, search: &str) -> Vec<&StyleEntry> {
        let needle = search.to_lowercase();
        self.styles
            .iter()
            .filter(|s| !s.deleted && (needle.is_empty() || s.label.to_lowercase().contains(&needle)))
            .collect()
    }

    /// Soft-deleted styles waiting in the trash
    pub fn trashed_styles(&self) -> Vec<&StyleEntry> {
        self.styles.iter().filter(|s| s.deleted).collect()
    }

    /// Save a generated result as a new custom style
    pub fn add_custom_style(
        &mut self,
        label: String,
        prompt: String,
        artwork: Option<ImagePayload>,
        reference: Option<ImagePayload>,
        folder_id: Option<String>,
    ) -> String {
        let id = self.new_id("c");
        self.styles.push(StyleEntry {
            id: id.clone(),
            label,
            prompt,
            thumbnail: artwork.clone(),
            preview: artwork,
            reference,
            folder_id,
            rating: 0,
            deleted: false,
            builtin: false,
        });
        id
    }

    pub fn update_style(&mut self, id: &str, label: String, prompt: String) {
        if let Some(style) = self.style_mut(id) {
            style.label = label;
            style.prompt = prompt;
        }
    }

    /// Replace a style's artwork with a freshly generated illustration
    pub fn set_style_artwork(
        &mut self,
        id: &str,
        thumbnail: ImagePayload,
        preview: ImagePayload,
    ) {
        if let Some(style) = self.style_mut(id) {
            style.thumbnail = Some(thumbnail);
            style.preview = Some(preview);
        }
    }

    /// Set a style's star rating.
    /// Clicking the current rating again clears it back to 0.
    pub fn set_rating(&mut self, id: &str, rating: u8) {
        if let Some(style) = self.style_mut(id) {
            style.rating = if style.rating == rating {
                0
            } else {
                rating.min(5)
            };
        }
    }

    pub fn move_style_to_folder(&mut self, id: &str, folder_id: Option<String>) {
        if let Some(style) = self.style_mut(id) {
            style.folder_id = folder_id;
        }
    }

    /// Flag a style as deleted; it moves to the trash list but keeps
    /// all its data until permanently removed.
    pub fn soft_delete_style(&mut self, id: &str) {
        if let Some(style) = self.style_mut(id) {
            style.deleted = true;
        }
    }

    pub fn restore_style(&mut self, id: &str) {
        if let Some(style) = self.style_mut(id) {
            style.deleted = false;
        }
    }

    pub fn restore_all_styles(&mut self) {
        for style in &mut self.styles {
            style.deleted = false;
        }
    }

    /// Remove a style entirely. There is no way back from this one.
    pub fn purge_style(&mut self, id: &str) {
        self.styles.retain(|s| s.id != id);
    }

    // ========== Folders ==========

    pub fn create_folder(&mut self, name: String) -> String {
        let id = self.new_id("f");
        self.folders.push(StyleFolder {
            id: id.clone(),
            name,
        });
        id
    }

    pub fn rename_folder(&mut self, id: &str, name: String) {
        if let Some(folder) = self.folders.iter_mut().find(|f| f.id == id) {
            folder.name = name;
        }
    }

    /// Delete a folder and unfile every style that pointed at it
    pub fn delete_folder(&mut self, id: &str) {
        self.folders.retain(|f| f.id != id);
        for style in &mut self.styles {
            if style.folder_id.as_deref() == Some(id) {
                style.folder_id = None;
            }
        }
    }

    // ========== Presets ==========

    pub fn preset(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn save_preset(
        &mut self,
        name: String,
        style_id: Option<String>,
        custom_prompt: String,
        style_influence: u8,
        vibrancy: i8,
        mood: i8,
        aspect_ratio: String,
    ) -> String {
        let id = self.new_id("p");
        self.presets.push(Preset {
            id: id.clone(),
            name,
            style_id,
            custom_prompt,
            style_influence,
            vibrancy,
            mood,
            aspect_ratio,
        });
        id
    }

    pub fn delete_preset(&mut self, id: &str) {
        self.presets.retain(|p| p.id != id);
    }

    // ========== Gallery ==========

    /// Prepend a freshly generated output, newest first
    pub fn add_gallery_entry(
        &mut self,
        image: ImagePayload,
        style_name: String,
        prompt: String,
        aspect_ratio: String,
    ) -> String {
        let id = self.new_id("gal");
        self.gallery.insert(
            0,
            GalleryEntry {
                id: id.clone(),
                image,
                style_name,
                prompt,
                created_at: Utc::now().timestamp(),
                aspect_ratio,
            },
        );
        id
    }

    pub fn remove_gallery_entry(&mut self, id: &str) {
        self.gallery.retain(|g| g.id != id);
    }

    pub fn clear_gallery(&mut self) {
        self.gallery.clear();
    }

    // ========== Photos ==========

    pub fn add_photo(&mut self, name: String, payload: ImagePayload) -> String {
        let id = self.new_id("img");
        self.photos.push(PhotoState::new(id.clone(), name, payload));
        id
    }

    pub fn remove_photo(&mut self, id: &str) {
        self.photos.retain(|p| p.id != id);
    }

    pub fn clear_photos(&mut self) {
        self.photos.clear();
    }

    pub fn photo(&self, id: &str) -> Option<&PhotoState> {
        self.photos.iter().find(|p| p.id == id)
    }

    pub fn photo_mut(&mut self, id: &str) -> Option<&mut PhotoState> {
        self.photos.iter_mut().find(|p| p.id == id)
    }
}

/// Merge persisted edits back onto the shipped catalog.
///
/// Shipped entries keep their label but pick up the saved rating,
/// deletion flag, folder, artwork and prompt; custom entries are
/// appended after the catalog, in their saved order.
fn reconcile_styles(saved: Vec<StyleEntry>) -> Vec<StyleEntry> {
    let mut merged = builtin_styles();
    for entry in &mut merged {
        if let Some(stored) = saved.iter().find(|s| s.id == entry.id) {
            entry.rating = stored.rating;
            entry.deleted = stored.deleted;
            entry.folder_id = stored.folder_id.clone();
            if stored.thumbnail.is_some() {
                entry.thumbnail = stored.thumbnail.clone();
            }
            if stored.preview.is_some() {
                entry.preview = stored.preview.clone();
            }
            if stored.reference.is_some() {
                entry.reference = stored.reference.clone();
            }
            if !stored.prompt.is_empty() {
                entry.prompt = stored.prompt.clone();
            }
        }
    }

    let catalog_ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
    let customs: Vec<StyleEntry> = saved
        .into_iter()
        .filter(|s| !catalog_ids.contains(&s.id.as_str()))
        .collect();
    merged.extend(customs);
    merged
}

// Implement Debug for better error messages
impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("styles", &self.styles.len())
            .field("presets", &self.presets.len())
            .field("folders", &self.folders.len())
            .field("gallery", &self.gallery.len())
            .field("photos", &self.photos.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ImagePayload {
        ImagePayload::new("image/jpeg", vec![1, 2, 3])
    }

    #[test]
    fn test_rating_sets_and_toggles_off() {
        let mut ws = Workspace::new();
        let id = ws.styles[0].id.clone();

        ws.set_rating(&id, 4);
        assert_eq!(ws.style(&id).unwrap().rating, 4);

        // A different value just moves the rating
        ws.set_rating(&id, 2);
        assert_eq!(ws.style(&id).unwrap().rating, 2);

        // Re-selecting the current value clears it
        ws.set_rating(&id, 2);
        assert_eq!(ws.style(&id).unwrap().rating, 0);
    }

    #[test]
    fn test_soft_delete_restore_and_purge() {
        let mut ws = Workspace::new();
        let id = ws.styles[0].id.clone();
        let total = ws.styles.len();

        ws.soft_delete_style(&id);
        assert!(!ws.visible_styles("").iter().any(|s| s.id == id));
        assert!(ws.trashed_styles().iter().any(|s| s.id == id));
        // Nothing lost yet
        assert_eq!(ws.styles.len(), total);

        ws.restore_style(&id);
        assert!(ws.visible_styles("").iter().any(|s| s.id == id));
        assert!(ws.trashed_styles().is_empty());

        ws.soft_delete_style(&id);
        ws.purge_style(&id);
        assert_eq!(ws.styles.len(), total - 1);
        assert!(ws.trashed_styles().is_empty());
    }

    #[test]
    fn test_edit_and_artwork_updates() {
        let mut ws = Workspace::new();
        let id = ws.add_custom_style("Draft".into(), "first try".into(), None, None, None);

        ws.update_style(&id, "Final".into(), "polished prompt".into());
        let style = ws.style(&id).unwrap();
        assert_eq!(style.label, "Final");
        assert_eq!(style.prompt, "polished prompt");

        ws.set_style_artwork(&id, payload(), payload());
        let style = ws.style(&id).unwrap();
        assert_eq!(style.thumbnail, Some(payload()));
        assert_eq!(style.preview, Some(payload()));
    }

    #[test]
    fn test_move_style_between_folders() {
        let mut ws = Workspace::new();
        let folder = ws.create_folder("Favorites".into());
        let id = ws.styles[0].id.clone();

        ws.move_style_to_folder(&id, Some(folder.clone()));
        assert_eq!(ws.style(&id).unwrap().folder_id, Some(folder));

        ws.move_style_to_folder(&id, None);
        assert_eq!(ws.style(&id).unwrap().folder_id, None);
    }

    #[test]
    fn test_restore_all() {
        let mut ws = Workspace::new();
        let a = ws.styles[0].id.clone();
        let b = ws.styles[1].id.clone();
        ws.soft_delete_style(&a);
        ws.soft_delete_style(&b);
        assert_eq!(ws.trashed_styles().len(), 2);

        ws.restore_all_styles();
        assert!(ws.trashed_styles().is_empty());
    }

    #[test]
    fn test_search_filters_visible_styles() {
        let mut ws = Workspace::new();
        ws.add_custom_style("Pencil Test".into(), "pencil".into(), None, None, None);

        let hits = ws.visible_styles("pencil");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "Pencil Test");

        // Case-insensitive
        assert_eq!(ws.visible_styles("PENCIL").len(), 1);
    }

    #[test]
    fn test_reconcile_keeps_edits_and_customs() {
        let mut ws = Workspace::new();
        let shipped_id = ws.styles[0].id.clone();
        let second_id = ws.styles[1].id.clone();
        ws.set_rating(&shipped_id, 5);
        ws.soft_delete_style(&second_id);
        let custom_id = ws.add_custom_style(
            "Mine".into(),
            "my prompt".into(),
            Some(payload()),
            None,
            None,
        );

        let restored = Workspace::from_persisted(
            Some(ws.styles.clone()),
            Some(ws.presets.clone()),
            Some(ws.folders.clone()),
            Some(ws.gallery.clone()),
        );

        assert_eq!(restored.style(&shipped_id).unwrap().rating, 5);
        assert_eq!(restored.trashed_styles().len(), 1);
        let custom = restored.style(&custom_id).unwrap();
        assert_eq!(custom.label, "Mine");
        assert_eq!(custom.thumbnail, Some(payload()));
        // Catalog entries come first, customs after
        assert_eq!(restored.styles.len(), builtin_styles().len() + 1);
    }

    #[test]
    fn test_empty_preset_bucket_falls_back_to_defaults() {
        let ws = Workspace::from_persisted(None, Some(Vec::new()), None, None);
        assert!(!ws.presets.is_empty());
    }

    #[test]
    fn test_delete_folder_unfiles_styles() {
        let mut ws = Workspace::new();
        let folder = ws.create_folder("Test".into());
        let style_id = ws.styles[0].id.clone();
        ws.move_style_to_folder(&style_id, Some(folder.clone()));

        ws.delete_folder(&folder);
        assert!(ws.folders.iter().all(|f| f.id != folder));
        assert_eq!(ws.style(&style_id).unwrap().folder_id, None);
    }

    #[test]
    fn test_gallery_is_newest_first() {
        let mut ws = Workspace::new();
        ws.add_gallery_entry(payload(), "A".into(), "p1".into(), "auto".into());
        let newest = ws.add_gallery_entry(payload(), "B".into(), "p2".into(), "auto".into());

        assert_eq!(ws.gallery[0].id, newest);
        assert_eq!(ws.gallery[1].style_name, "A");

        ws.remove_gallery_entry(&newest);
        assert_eq!(ws.gallery.len(), 1);
        ws.clear_gallery();
        assert!(ws.gallery.is_empty());
    }

    #[test]
    fn test_minted_ids_are_unique() {
        let mut ws = Workspace::new();
        let a = ws.add_photo("a.png".into(), payload());
        let b = ws.add_photo("b.png".into(), payload());
        assert_ne!(a, b);
    }
}
