/// Project file export and import
///
/// A project file is one JSON document holding the style library,
/// presets and folders. Exporting and re-importing the same file
/// restores all three collections exactly; the gallery is deliberately
/// not part of it. A malformed file fails the import without touching
/// any state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::state::data::{Preset, StyleEntry, StyleFolder};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("could not access the project file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a valid project file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub styles: Vec<StyleEntry>,
    pub presets: Vec<Preset>,
    pub folders: Vec<StyleFolder>,
}

impl ProjectFile {
    pub fn to_json(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ProjectError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Suggested filename for an export, e.g. "style_project_2026-08-08.json"
pub fn default_export_name() -> String {
    format!("style_project_{}.json", Utc::now().format("%Y-%m-%d"))
}

pub fn export_project(
    path: &Path,
    styles: &[StyleEntry],
    presets: &[Preset],
    folders: &[StyleFolder],
) -> Result<(), ProjectError> {
    let file = ProjectFile {
        styles: styles.to_vec(),
        presets: presets.to_vec(),
        folders: folders.to_vec(),
    };
    std::fs::write(path, file.to_json()?)?;
    println!("📦 Exported project to {}", path.display());
    Ok(())
}

/// Parse a project file from disk.
/// Nothing is applied here; the caller swaps its collections only
/// after the whole file parsed.
pub fn import_project(path: &Path) -> Result<ProjectFile, ProjectError> {
    let json = std::fs::read_to_string(path)?;
    ProjectFile::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{builtin_styles, default_folders, default_presets, ImagePayload};

    fn sample_project() -> ProjectFile {
        let mut styles = builtin_styles();
        styles[0].rating = 3;
        styles.push(StyleEntry {
            id: "c_1".to_string(),
            label: "Mine".to_string(),
            prompt: "my look".to_string(),
            thumbnail: Some(ImagePayload::new("image/jpeg", vec![7, 7, 7])),
            preview: None,
            reference: None,
            folder_id: Some("fld_paint".to_string()),
            rating: 5,
            deleted: false,
            builtin: false,
        });
        ProjectFile {
            styles,
            presets: default_presets(),
            folders: default_folders(),
        }
    }

    #[test]
    fn test_export_then_import_restores_everything() {
        let project = sample_project();
        let json = project.to_json().unwrap();
        let restored = ProjectFile::from_json(&json).unwrap();
        assert_eq!(restored, project);
    }

    #[test]
    fn test_round_trip_through_a_file() {
        let dir = std::env::temp_dir().join("style_studio_project_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("project.json");

        let project = sample_project();
        export_project(&path, &project.styles, &project.presets, &project.folders).unwrap();
        let restored = import_project(&path).unwrap();

        assert_eq!(restored, project);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        assert!(matches!(
            ProjectFile::from_json("{ definitely not json"),
            Err(ProjectError::Malformed(_))
        ));
        // Valid JSON with the wrong shape is just as invalid
        assert!(matches!(
            ProjectFile::from_json(r#"{"styles": 42}"#),
            Err(ProjectError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let path = Path::new("/nonexistent/style_studio/project.json");
        assert!(matches!(import_project(path), Err(ProjectError::Io(_))));
    }
}
