/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the local store, the remote style engine and the UI layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// An encoded image held in memory.
///
/// The bytes stay in their encoded form (JPEG/PNG/WebP) until something
/// needs pixels. Serialized as base64 text so bucket payloads and
/// project files remain plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// MIME type of the encoded bytes (e.g. "image/jpeg")
    pub mime: String,
    /// Encoded image bytes
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    /// Size of the encoded bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Serialize raw bytes as base64 text inside JSON
mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A named prompt template describing a visual transformation.
///
/// Styles are either shipped with the binary (`builtin`) or created by
/// the user from a generated result. Deleting a style only flags it;
/// the entry stays around in the trash until permanently removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleEntry {
    /// Unique id ("s_watercolor" for shipped styles, "c_<millis>" for custom ones)
    pub id: String,
    /// Display name
    pub label: String,
    /// Prompt text sent to the engine
    pub prompt: String,
    /// Small artwork for the style list
    #[serde(default)]
    pub thumbnail: Option<ImagePayload>,
    /// Larger artwork for the preview pane
    #[serde(default)]
    pub preview: Option<ImagePayload>,
    /// Optional reference image forwarded to the engine
    #[serde(default)]
    pub reference: Option<ImagePayload>,
    /// Folder this style is filed under, if any
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Star rating, 0 (unrated) to 5
    #[serde(default)]
    pub rating: u8,
    /// Soft-delete flag; deleted styles live in the trash list
    #[serde(default)]
    pub deleted: bool,
    /// Shipped with the binary (merged with persisted edits on load)
    #[serde(default)]
    pub builtin: bool,
}

/// A saved combination of generation knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    /// Style selected when the preset was saved, if any
    pub style_id: Option<String>,
    pub custom_prompt: String,
    /// Style influence 0-100
    pub style_influence: u8,
    pub vibrancy: i8,
    pub mood: i8,
    pub aspect_ratio: String,
}

/// A user-defined grouping for styles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFolder {
    pub id: String,
    pub name: String,
}

/// One generated output kept in the gallery strip.
///
/// Entries are stored newest first and capped before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    /// Thumbnail-fidelity copy of the output
    pub image: ImagePayload,
    pub style_name: String,
    /// Full instruction that produced the output
    pub prompt: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub aspect_ratio: String,
}

/// A loaded photo plus its generated result history.
///
/// Results append to `history`; undo/redo only move `history_index`.
/// Index 0 is always the untouched original.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoState {
    pub id: String,
    /// Filename the photo was loaded from
    pub name: String,
    pub original: ImagePayload,
    pub history: Vec<ImagePayload>,
    pub history_index: usize,
    /// URL of the last animation produced from this photo
    pub video_url: Option<String>,
}

impl PhotoState {
    pub fn new(id: String, name: String, original: ImagePayload) -> Self {
        let history = vec![original.clone()];
        Self {
            id,
            name,
            original,
            history,
            history_index: 0,
            video_url: None,
        }
    }

    /// The image currently shown for this photo
    pub fn current(&self) -> &ImagePayload {
        self.history
            .get(self.history_index)
            .unwrap_or(&self.original)
    }

    /// Append a new result and jump to it.
    /// Earlier entries are kept, so undo can still walk back through them.
    pub fn push_result(&mut self, result: ImagePayload) {
        self.history.push(result);
        self.history_index = self.history.len() - 1;
    }

    pub fn can_undo(&self) -> bool {
        self.history_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.history_index + 1 < self.history.len()
    }

    pub fn undo(&mut self) {
        if self.can_undo() {
            self.history_index -= 1;
        }
    }

    pub fn redo(&mut self) {
        if self.can_redo() {
            self.history_index += 1;
        }
    }
}

// ========== Shipped catalog ==========

fn shipped(id: &str, label: &str, prompt: &str, folder_id: Option<&str>) -> StyleEntry {
    StyleEntry {
        id: id.to_string(),
        label: label.to_string(),
        prompt: prompt.to_string(),
        thumbnail: None,
        preview: None,
        reference: None,
        folder_id: folder_id.map(str::to_string),
        rating: 0,
        deleted: false,
        builtin: true,
    }
}

/// The style catalog shipped with the binary.
/// Persisted edits (rating, deletion, folder, artwork, prompt) are
/// merged back onto these entries when the app loads.
pub fn builtin_styles() -> Vec<StyleEntry> {
    vec![
        shipped(
            "s_watercolor",
            "Watercolor",
            "Soft watercolor painting, wet paper texture, gentle color bleed",
            Some("fld_paint"),
        ),
        shipped(
            "s_oil",
            "Oil Painting",
            "Classical oil painting, visible brush strokes, rich impasto texture",
            Some("fld_paint"),
        ),
        shipped(
            "s_ink_sketch",
            "Ink Sketch",
            "Loose ink sketch, confident line work, minimal cross hatching",
            Some("fld_sketch"),
        ),
        shipped(
            "s_charcoal",
            "Charcoal",
            "Charcoal drawing, deep blacks, smudged shading on rough paper",
            Some("fld_sketch"),
        ),
        shipped(
            "s_anime",
            "Anime",
            "Clean anime illustration, cel shading, expressive lighting",
            None,
        ),
        shipped(
            "s_cyberpunk",
            "Cyberpunk",
            "Neon cyberpunk scene, rain slick streets, saturated magenta and cyan glow",
            None,
        ),
        shipped(
            "s_film_noir",
            "Film Noir",
            "Black and white film noir, hard shadows, dramatic venetian blind light",
            Some("fld_photo"),
        ),
        shipped(
            "s_golden_hour",
            "Golden Hour",
            "Warm golden hour photograph, long shadows, sun flare, soft haze",
            Some("fld_photo"),
        ),
    ]
}

/// Folders created on first run
pub fn default_folders() -> Vec<StyleFolder> {
    vec![
        StyleFolder {
            id: "fld_paint".to_string(),
            name: "Painting".to_string(),
        },
        StyleFolder {
            id: "fld_sketch".to_string(),
            name: "Sketch".to_string(),
        },
        StyleFolder {
            id: "fld_photo".to_string(),
            name: "Photographic".to_string(),
        },
    ]
}

/// Presets created on first run
pub fn default_presets() -> Vec<Preset> {
    vec![
        Preset {
            id: "default_1".to_string(),
            name: "Cinematic Portrait".to_string(),
            style_id: None,
            custom_prompt: "Cinematic portrait, moody lighting".to_string(),
            style_influence: 80,
            vibrancy: 10,
            mood: -10,
            aspect_ratio: "3:4".to_string(),
        },
        Preset {
            id: "default_2".to_string(),
            name: "Classic Film".to_string(),
            style_id: None,
            custom_prompt: "Vintage film aesthetic".to_string(),
            style_influence: 70,
            vibrancy: -15,
            mood: -20,
            aspect_ratio: "4:3".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ImagePayload {
        ImagePayload::new("image/png", vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3])
    }

    #[test]
    fn test_payload_serializes_as_base64_text() {
        let json = serde_json::to_string(&payload()).unwrap();
        // No raw byte arrays in the JSON, only a base64 string
        assert!(json.contains("\"data\":\""));

        let restored: ImagePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, payload());
    }

    #[test]
    fn test_style_entry_round_trip() {
        let mut style = builtin_styles().remove(0);
        style.rating = 4;
        style.thumbnail = Some(payload());

        let json = serde_json::to_string(&style).unwrap();
        let restored: StyleEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, style);
    }

    #[test]
    fn test_photo_history_undo_redo() {
        let mut photo = PhotoState::new("img_1".into(), "cat.png".into(), payload());
        assert!(!photo.can_undo());

        photo.push_result(ImagePayload::new("image/jpeg", vec![1]));
        photo.push_result(ImagePayload::new("image/jpeg", vec![2]));
        assert_eq!(photo.current().data, vec![2]);

        photo.undo();
        assert_eq!(photo.current().data, vec![1]);
        photo.undo();
        assert_eq!(photo.current(), &photo.original);
        assert!(!photo.can_undo());

        photo.redo();
        photo.redo();
        assert_eq!(photo.current().data, vec![2]);
        assert!(!photo.can_redo());
    }

    #[test]
    fn test_results_append_without_discarding_history() {
        let mut photo = PhotoState::new("img_1".into(), "cat.png".into(), payload());
        photo.push_result(ImagePayload::new("image/jpeg", vec![1]));
        photo.undo();

        // A new result lands after the old one instead of replacing it
        photo.push_result(ImagePayload::new("image/jpeg", vec![2]));
        assert_eq!(photo.history.len(), 3);
        assert_eq!(photo.current().data, vec![2]);
    }
}
