use iced::widget::{button, column, container, row, scrollable, slider, text, text_input, Column, Row};
use iced::{Alignment, Element, Length, Task, Theme};
use rfd::FileDialog;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Declare the application modules
mod imaging;
mod project;
mod remote;
mod state;

use remote::batch::{self, BatchRun, Slot, StylizeRequest};
use remote::client::{EngineFailure, HttpStyleEngine, StyleEngine, UpscaleTarget};
use state::data::ImagePayload;
use state::persist::{
    self, AutosavePolicy, LocalStore, SaveReport, Snapshot, AUTOSAVE_QUIET_PERIOD,
    DEFAULT_QUOTA_BYTES,
};
use state::store::Workspace;

/// Aspect ratios offered by the picker; "auto" sends no hint
const ASPECT_RATIOS: [&str; 6] = ["auto", "1:1", "3:4", "4:3", "16:9", "9:16"];

/// Result of one engine call, with the gallery thumbnail already derived
#[derive(Debug, Clone)]
struct GenerationDone {
    photo_id: String,
    style_name: String,
    instruction: String,
    aspect_ratio: String,
    /// (full output, gallery-fidelity copy)
    result: Result<(ImagePayload, ImagePayload), EngineFailure>,
}

/// Transient user-visible notice
#[derive(Debug, Clone)]
struct Toast {
    message: String,
    is_error: bool,
}

/// Main application state
struct StyleStudio {
    workspace: Workspace,
    engine: Arc<HttpStyleEngine>,
    store_path: PathBuf,
    autosave: AutosavePolicy,

    selected_photo: Option<String>,
    selected_style: Option<String>,
    custom_prompt: String,
    style_influence: u8,
    vibrancy: i8,
    mood: i8,
    aspect_ratio: String,
    search: String,
    new_folder_name: String,
    new_preset_name: String,
    new_style_name: String,

    batch_mode: bool,
    blend_mode: bool,
    show_trash: bool,
    batch_selected: BTreeSet<String>,
    blend_a: Option<String>,
    blend_b: Option<String>,

    batch: Option<BatchRun>,
    editing_style: Option<String>,
    edit_label: String,
    edit_prompt: String,
    pending_delete: Option<String>,
    last_instruction: Option<String>,
    rate_limit_cooldown: Option<u64>,

    is_generating: bool,
    is_saving: bool,
    is_animating: bool,
    is_upscaling: bool,

    /// Status message to display to the user
    status: String,
    toast: Option<Toast>,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    // Photos
    AddPhotos,
    SelectPhoto(String),
    RemovePhoto(String),
    ClearPhotos,
    Undo,
    Redo,

    // Style library
    SearchChanged(String),
    SelectStyle(String),
    ToggleBatchStyle(String),
    SelectBlendStyle(String),
    SetRating(String, u8),
    StartEditStyle(String),
    EditLabelChanged(String),
    EditPromptChanged(String),
    ConfirmEditStyle,
    CancelEditStyle,
    UseResultAsArtwork(String),
    StyleArtworkReady(String, Option<(ImagePayload, ImagePayload)>),
    RequestDeleteStyle(String),
    ConfirmDeleteStyle,
    CancelDeleteStyle,
    RestoreStyle(String),
    RestoreAllStyles,
    PurgeStyle(String),
    ToggleTrash,

    // Folders
    FolderNameChanged(String),
    CreateFolder,
    RenameFolder(String),
    DeleteFolder(String),
    MoveSelectedToFolder(Option<String>),

    // Generation knobs
    PromptChanged(String),
    InfluenceChanged(u8),
    VibrancyChanged(i8),
    MoodChanged(i8),
    AspectChanged(String),
    ToggleBatchMode,
    ToggleBlendMode,

    // Presets
    PresetNameChanged(String),
    SavePreset,
    ApplyPreset(String),
    DeletePreset(String),

    // Generation
    Generate,
    GenerationFinished(GenerationDone),
    PromptGenerationFinished(GenerationDone),
    BatchItemFinished(usize, GenerationDone),
    Animate,
    AnimationFinished(String, Result<String, EngineFailure>),
    Upscale(UpscaleTarget),
    UpscaleFinished(String, Result<ImagePayload, EngineFailure>),
    StyleNameChanged(String),
    SaveResultAsStyle,
    CustomStyleReady {
        label: String,
        prompt: String,
        artwork: Option<ImagePayload>,
    },

    // Gallery
    RemoveGalleryEntry(String),
    ClearGallery,

    // Persistence and project files
    ManualSave,
    AutosaveTick(u64),
    SaveFinished { manual: bool, report: SaveReport },
    ExportProject,
    ImportProject,
}

impl StyleStudio {
    /// Create a new instance of the application
    fn new() -> (Self, Task<Message>) {
        // Open the local store and read the persisted buckets back.
        // If this fails, we panic because the app cannot function without its store.
        let store = LocalStore::open_default()
            .expect("Failed to open the local store. Check permissions and disk space.");
        let loaded = persist::load_all(&store);
        let workspace =
            Workspace::from_persisted(loaded.styles, loaded.presets, loaded.folders, loaded.gallery);

        println!(
            "🎨 Style Studio initialized with {} styles, {} presets, {} gallery entries",
            workspace.styles.len(),
            workspace.presets.len(),
            workspace.gallery.len()
        );

        let status = format!(
            "Ready. {} styles in the library.",
            workspace.visible_styles("").len()
        );

        (
            StyleStudio {
                workspace,
                engine: Arc::new(HttpStyleEngine::from_env()),
                store_path: store.path().clone(),
                autosave: AutosavePolicy::new(),
                selected_photo: None,
                selected_style: None,
                custom_prompt: String::new(),
                style_influence: 50,
                vibrancy: 0,
                mood: 0,
                aspect_ratio: "auto".to_string(),
                search: String::new(),
                new_folder_name: String::new(),
                new_preset_name: String::new(),
                new_style_name: String::new(),
                batch_mode: false,
                blend_mode: false,
                show_trash: false,
                batch_selected: BTreeSet::new(),
                blend_a: None,
                blend_b: None,
                batch: None,
                editing_style: None,
                edit_label: String::new(),
                edit_prompt: String::new(),
                pending_delete: None,
                last_instruction: None,
                rate_limit_cooldown: None,
                is_generating: false,
                is_saving: false,
                is_animating: false,
                is_upscaling: false,
                status,
                toast: None,
            },
            Task::none(),
        )
    }

    fn show_toast(&mut self, message: impl Into<String>, is_error: bool) {
        self.toast = Some(Toast {
            message: message.into(),
            is_error,
        });
    }

    /// Record a tracked mutation and arm the debounced autosave.
    /// Only the tick carrying the newest generation will save.
    fn schedule_autosave(&mut self) -> Task<Message> {
        let generation = self.autosave.touch();
        Task::perform(
            async move {
                tokio::time::sleep(AUTOSAVE_QUIET_PERIOD).await;
                generation
            },
            Message::AutosaveTick,
        )
    }

    /// Kick off a save unless one is already running; an overlapping
    /// request is remembered and replayed when the writer frees up
    fn begin_save(&mut self, manual: bool) -> Task<Message> {
        if !self.autosave.begin() {
            return Task::none();
        }
        self.is_saving = true;
        let path = self.store_path.clone();
        let snapshot = Snapshot::of(&self.workspace);
        Task::perform(
            persist::save_all_async(path, DEFAULT_QUOTA_BYTES, snapshot),
            move |report| Message::SaveFinished { manual, report },
        )
    }

    /// The photo currently shown in the result pane
    fn active_photo(&self) -> Option<&state::data::PhotoState> {
        let id = self.selected_photo.as_ref()?;
        self.workspace.photo(id)
    }

    /// The prompt the generate button would send, minus the intensity prefix
    fn base_prompt(&self) -> (String, String) {
        if self.blend_mode {
            if let (Some(a), Some(b)) = (
                self.blend_a.as_ref().and_then(|id| self.workspace.style(id)),
                self.blend_b.as_ref().and_then(|id| self.workspace.style(id)),
            ) {
                return (batch::blend_prompt(a, b), format!("{} + {}", a.label, b.label));
            }
        }
        if !self.custom_prompt.trim().is_empty() {
            let name = self
                .selected_style
                .as_ref()
                .and_then(|id| self.workspace.style(id))
                .map(|s| s.label.clone())
                .unwrap_or_else(|| "Custom".to_string());
            return (self.custom_prompt.trim().to_string(), name);
        }
        if let Some(style) = self
            .selected_style
            .as_ref()
            .and_then(|id| self.workspace.style(id))
        {
            return (style.prompt.clone(), style.label.clone());
        }
        (batch::DEFAULT_PROMPT.to_string(), "Custom".to_string())
    }

    /// Apply one finished generation to the workspace: the full result
    /// goes into the photo's history, the thumbnail into the gallery
    fn apply_generation(&mut self, done: &GenerationDone) -> bool {
        match &done.result {
            Ok((full, thumb)) => {
                if let Some(photo) = self.workspace.photo_mut(&done.photo_id) {
                    photo.push_result(full.clone());
                }
                self.workspace.add_gallery_entry(
                    thumb.clone(),
                    done.style_name.clone(),
                    done.instruction.clone(),
                    done.aspect_ratio.clone(),
                );
                self.last_instruction = Some(done.instruction.clone());
                self.rate_limit_cooldown = None;
                true
            }
            Err(failure) => {
                if failure.rate_limited {
                    self.rate_limit_cooldown = Some(failure.retry_after.unwrap_or(60));
                }
                self.status = format!("❌ {}", failure.message);
                false
            }
        }
    }

    /// Spawn the engine call for one batch item
    fn spawn_batch_item(&self, index: usize, request: StylizeRequest) -> Task<Message> {
        let run = self.batch.as_ref().expect("batch run must exist");
        let item = &run.items()[index];
        let done_template = (
            item.photo_id.clone(),
            item.style_name.clone(),
            self.aspect_ratio.clone(),
        );
        let engine = self.engine.clone();
        Task::perform(
            async move {
                let (photo_id, style_name, aspect_ratio) = done_template;
                stylize_once(engine, request, photo_id, style_name, aspect_ratio).await
            },
            move |done| Message::BatchItemFinished(index, done),
        )
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            // ========== Photos ==========
            Message::AddPhotos => {
                let files = FileDialog::new()
                    .set_title("Select Photos")
                    .add_filter("Images", &["jpg", "jpeg", "png", "webp"])
                    .pick_files();

                let Some(paths) = files else {
                    return Task::none();
                };
                let mut added = 0;
                for path in paths {
                    match std::fs::read(&path) {
                        Ok(bytes) => {
                            let name = path
                                .file_name()
                                .unwrap_or_default()
                                .to_string_lossy()
                                .to_string();
                            let payload = ImagePayload::new(mime_for(&path), bytes);
                            let id = self.workspace.add_photo(name, payload);
                            if self.selected_photo.is_none() {
                                self.selected_photo = Some(id);
                            }
                            added += 1;
                        }
                        Err(e) => eprintln!("⚠️  Could not read {}: {}", path.display(), e),
                    }
                }
                self.status = format!("Loaded {} photos.", added);
                Task::none()
            }
            Message::SelectPhoto(id) => {
                self.selected_photo = Some(id);
                Task::none()
            }
            Message::RemovePhoto(id) => {
                self.workspace.remove_photo(&id);
                if self.selected_photo.as_deref() == Some(id.as_str()) {
                    self.selected_photo = self.workspace.photos.first().map(|p| p.id.clone());
                }
                Task::none()
            }
            Message::ClearPhotos => {
                self.workspace.clear_photos();
                self.selected_photo = None;
                Task::none()
            }
            Message::Undo => {
                if let Some(id) = self.selected_photo.clone() {
                    if let Some(photo) = self.workspace.photo_mut(&id) {
                        photo.undo();
                    }
                }
                Task::none()
            }
            Message::Redo => {
                if let Some(id) = self.selected_photo.clone() {
                    if let Some(photo) = self.workspace.photo_mut(&id) {
                        photo.redo();
                    }
                }
                Task::none()
            }

            // ========== Style library ==========
            Message::SearchChanged(term) => {
                self.search = term;
                Task::none()
            }
            Message::SelectStyle(id) => {
                if self.selected_style.as_deref() == Some(id.as_str()) {
                    self.selected_style = None;
                } else {
                    self.selected_style = Some(id);
                }
                Task::none()
            }
            Message::ToggleBatchStyle(id) => {
                if !self.batch_selected.remove(&id) {
                    self.batch_selected.insert(id);
                }
                Task::none()
            }
            Message::SelectBlendStyle(id) => {
                self.select_blend(id);
                Task::none()
            }
            Message::SetRating(id, rating) => {
                self.workspace.set_rating(&id, rating);
                self.schedule_autosave()
            }
            Message::StartEditStyle(id) => {
                if let Some(style) = self.workspace.style(&id) {
                    self.edit_label = style.label.clone();
                    self.edit_prompt = style.prompt.clone();
                    self.editing_style = Some(id);
                }
                Task::none()
            }
            Message::EditLabelChanged(label) => {
                self.edit_label = label;
                Task::none()
            }
            Message::EditPromptChanged(prompt) => {
                self.edit_prompt = prompt;
                Task::none()
            }
            Message::ConfirmEditStyle => {
                let Some(id) = self.editing_style.take() else {
                    return Task::none();
                };
                if self.edit_label.trim().is_empty() {
                    return Task::none();
                }
                self.workspace.update_style(
                    &id,
                    self.edit_label.trim().to_string(),
                    self.edit_prompt.trim().to_string(),
                );
                self.schedule_autosave()
            }
            Message::CancelEditStyle => {
                self.editing_style = None;
                Task::none()
            }
            Message::UseResultAsArtwork(id) => {
                let Some(photo) = self.active_photo() else {
                    return Task::none();
                };
                let result = photo.current().clone();
                Task::perform(
                    async move {
                        let thumbnail =
                            imaging::recompress_async(result.clone(), imaging::STYLE_PREVIEW)
                                .await
                                .ok();
                        let preview = imaging::recompress_async(result, imaging::GALLERY_THUMB)
                            .await
                            .ok();
                        thumbnail.zip(preview)
                    },
                    move |artwork| Message::StyleArtworkReady(id.clone(), artwork),
                )
            }
            Message::StyleArtworkReady(id, artwork) => {
                if let Some((thumbnail, preview)) = artwork {
                    self.workspace.set_style_artwork(&id, thumbnail, preview);
                    self.show_toast("Style illustration updated!", false);
                    return self.schedule_autosave();
                }
                Task::none()
            }
            Message::RequestDeleteStyle(id) => {
                self.pending_delete = Some(id);
                Task::none()
            }
            Message::CancelDeleteStyle => {
                self.pending_delete = None;
                Task::none()
            }
            Message::ConfirmDeleteStyle => {
                let Some(id) = self.pending_delete.take() else {
                    return Task::none();
                };
                self.workspace.soft_delete_style(&id);
                if self.selected_style.as_deref() == Some(id.as_str()) {
                    self.selected_style = None;
                }
                self.batch_selected.remove(&id);
                self.show_toast("Moved to trash", false);
                self.schedule_autosave()
            }
            Message::RestoreStyle(id) => {
                self.workspace.restore_style(&id);
                self.show_toast("Style restored", false);
                self.schedule_autosave()
            }
            Message::RestoreAllStyles => {
                self.workspace.restore_all_styles();
                self.show_toast("All styles restored", false);
                self.schedule_autosave()
            }
            Message::PurgeStyle(id) => {
                self.workspace.purge_style(&id);
                self.show_toast("Permanently deleted", true);
                self.schedule_autosave()
            }
            Message::ToggleTrash => {
                self.show_trash = !self.show_trash;
                Task::none()
            }

            // ========== Folders ==========
            Message::FolderNameChanged(name) => {
                self.new_folder_name = name;
                Task::none()
            }
            Message::CreateFolder => {
                let name = self.new_folder_name.trim().to_string();
                if name.is_empty() {
                    return Task::none();
                }
                self.workspace.create_folder(name);
                self.new_folder_name.clear();
                self.schedule_autosave()
            }
            Message::RenameFolder(id) => {
                let name = self.new_folder_name.trim().to_string();
                if name.is_empty() {
                    self.show_toast("Type the new folder name first", true);
                    return Task::none();
                }
                self.workspace.rename_folder(&id, name);
                self.new_folder_name.clear();
                self.schedule_autosave()
            }
            Message::DeleteFolder(id) => {
                self.workspace.delete_folder(&id);
                self.schedule_autosave()
            }
            Message::MoveSelectedToFolder(folder_id) => {
                let Some(style_id) = self.selected_style.clone() else {
                    return Task::none();
                };
                self.workspace.move_style_to_folder(&style_id, folder_id);
                self.schedule_autosave()
            }

            // ========== Generation knobs ==========
            Message::PromptChanged(prompt) => {
                self.custom_prompt = prompt;
                Task::none()
            }
            Message::InfluenceChanged(value) => {
                self.style_influence = value;
                Task::none()
            }
            Message::VibrancyChanged(value) => {
                self.vibrancy = value;
                Task::none()
            }
            Message::MoodChanged(value) => {
                self.mood = value;
                Task::none()
            }
            Message::AspectChanged(value) => {
                self.aspect_ratio = value;
                Task::none()
            }
            Message::ToggleBatchMode => {
                self.batch_mode = !self.batch_mode;
                if !self.batch_mode {
                    self.batch_selected.clear();
                }
                Task::none()
            }
            Message::ToggleBlendMode => {
                self.blend_mode = !self.blend_mode;
                if !self.blend_mode {
                    self.blend_a = None;
                    self.blend_b = None;
                }
                Task::none()
            }

            // ========== Presets ==========
            Message::PresetNameChanged(name) => {
                self.new_preset_name = name;
                Task::none()
            }
            Message::SavePreset => {
                let name = self.new_preset_name.trim().to_string();
                if name.is_empty() {
                    return Task::none();
                }
                self.workspace.save_preset(
                    name,
                    self.selected_style.clone(),
                    self.custom_prompt.clone(),
                    self.style_influence,
                    self.vibrancy,
                    self.mood,
                    self.aspect_ratio.clone(),
                );
                self.new_preset_name.clear();
                self.schedule_autosave()
            }
            Message::ApplyPreset(id) => {
                if let Some(preset) = self.workspace.preset(&id).cloned() {
                    self.selected_style = preset
                        .style_id
                        .filter(|sid| self.workspace.style(sid).is_some());
                    self.custom_prompt = preset.custom_prompt;
                    self.style_influence = preset.style_influence;
                    self.vibrancy = preset.vibrancy;
                    self.mood = preset.mood;
                    self.aspect_ratio = preset.aspect_ratio;
                }
                Task::none()
            }
            Message::DeletePreset(id) => {
                self.workspace.delete_preset(&id);
                self.schedule_autosave()
            }

            // ========== Generation ==========
            Message::Generate => self.start_generation(),
            Message::GenerationFinished(done) => {
                self.is_generating = false;
                if self.apply_generation(&done) {
                    self.status = format!("✅ Styled with {}.", done.style_name);
                    return self.schedule_autosave();
                }
                Task::none()
            }
            Message::PromptGenerationFinished(done) => {
                self.is_generating = false;
                match done.result {
                    Ok((full, thumb)) => {
                        // The created image becomes a regular photo so it
                        // can be styled, animated or upscaled further
                        let id = self.workspace.add_photo("generated.png".to_string(), full);
                        self.selected_photo = Some(id);
                        self.workspace.add_gallery_entry(
                            thumb,
                            done.style_name,
                            done.instruction,
                            done.aspect_ratio,
                        );
                        self.rate_limit_cooldown = None;
                        self.status = "✅ Image created.".to_string();
                        self.schedule_autosave()
                    }
                    Err(failure) => {
                        if failure.rate_limited {
                            self.rate_limit_cooldown = Some(failure.retry_after.unwrap_or(60));
                        }
                        self.status = format!("❌ {}", failure.message);
                        Task::none()
                    }
                }
            }
            Message::BatchItemFinished(index, done) => self.finish_batch_item(index, done),
            Message::Animate => {
                let Some(photo) = self.active_photo() else {
                    return Task::none();
                };
                let photo_id = photo.id.clone();
                let image = photo.current().clone();
                let engine = self.engine.clone();
                self.is_animating = true;
                Task::perform(
                    async move {
                        let result = engine.animate(&image).await.map_err(EngineFailure::from);
                        (photo_id, result)
                    },
                    |(id, result)| Message::AnimationFinished(id, result),
                )
            }
            Message::AnimationFinished(photo_id, result) => {
                self.is_animating = false;
                match result {
                    Ok(url) => {
                        if let Some(photo) = self.workspace.photo_mut(&photo_id) {
                            photo.video_url = Some(url);
                        }
                        self.status = "✅ Animation ready.".to_string();
                    }
                    Err(failure) => {
                        if failure.rate_limited {
                            self.rate_limit_cooldown = Some(failure.retry_after.unwrap_or(60));
                        }
                        self.status = format!("❌ {}", failure.message);
                    }
                }
                Task::none()
            }
            Message::Upscale(target) => {
                let Some(photo) = self.active_photo() else {
                    return Task::none();
                };
                let photo_id = photo.id.clone();
                let image = photo.current().clone();
                let engine = self.engine.clone();
                self.is_upscaling = true;
                self.status = format!("Upscaling to {}...", target.label());
                Task::perform(
                    async move {
                        let result = engine
                            .upscale(&image, target)
                            .await
                            .map_err(EngineFailure::from);
                        (photo_id, result)
                    },
                    |(id, result)| Message::UpscaleFinished(id, result),
                )
            }
            Message::UpscaleFinished(photo_id, result) => {
                self.is_upscaling = false;
                match result {
                    Ok(payload) => {
                        if let Some(photo) = self.workspace.photo_mut(&photo_id) {
                            photo.push_result(payload);
                        }
                        self.status = "✅ Upscale complete.".to_string();
                    }
                    Err(failure) => {
                        if failure.rate_limited {
                            self.rate_limit_cooldown = Some(failure.retry_after.unwrap_or(60));
                        }
                        self.status = format!("❌ {}", failure.message);
                    }
                }
                Task::none()
            }
            Message::StyleNameChanged(name) => {
                self.new_style_name = name;
                Task::none()
            }
            Message::SaveResultAsStyle => {
                let label = self.new_style_name.trim().to_string();
                if label.is_empty() {
                    self.show_toast("Give the style a name first", true);
                    return Task::none();
                }
                let Some(photo) = self.active_photo() else {
                    return Task::none();
                };
                if !photo.can_undo() {
                    self.show_toast("Generate a result before saving a style", true);
                    return Task::none();
                }
                let prompt = self
                    .last_instruction
                    .clone()
                    .or_else(|| {
                        let trimmed = self.custom_prompt.trim();
                        (!trimmed.is_empty()).then(|| trimmed.to_string())
                    })
                    .unwrap_or_else(|| "Custom hybrid style.".to_string());
                let result = photo.current().clone();
                self.new_style_name.clear();
                Task::perform(
                    async move {
                        // Styles carry thumbnail-fidelity artwork only
                        let artwork = imaging::recompress_async(result, imaging::GALLERY_THUMB)
                            .await
                            .ok();
                        (label, prompt, artwork)
                    },
                    |(label, prompt, artwork)| Message::CustomStyleReady {
                        label,
                        prompt,
                        artwork,
                    },
                )
            }
            Message::CustomStyleReady {
                label,
                prompt,
                artwork,
            } => {
                self.workspace
                    .add_custom_style(label, prompt, artwork, None, None);
                self.show_toast("Style saved successfully!", false);
                self.schedule_autosave()
            }

            // ========== Gallery ==========
            Message::RemoveGalleryEntry(id) => {
                self.workspace.remove_gallery_entry(&id);
                self.schedule_autosave()
            }
            Message::ClearGallery => {
                self.workspace.clear_gallery();
                self.schedule_autosave()
            }

            // ========== Persistence and project files ==========
            Message::ManualSave => self.begin_save(true),
            Message::AutosaveTick(generation) => {
                if self.autosave.is_current(generation) {
                    self.begin_save(false)
                } else {
                    // A newer edit re-armed the timer; this tick is stale
                    Task::none()
                }
            }
            Message::SaveFinished { manual, report } => {
                self.is_saving = false;
                let rerun = self.autosave.finish();
                if manual {
                    if report.all_ok() {
                        self.show_toast("Project saved!", false);
                    } else if !report.gallery {
                        self.show_toast("Storage critical, image history discarded.", true);
                    } else {
                        self.show_toast("Could not save every part of the project.", true);
                    }
                }
                if rerun {
                    return self.begin_save(false);
                }
                Task::none()
            }
            Message::ExportProject => {
                let file = FileDialog::new()
                    .set_title("Export Project")
                    .set_file_name(project::default_export_name())
                    .save_file();
                if let Some(path) = file {
                    match project::export_project(
                        &path,
                        &self.workspace.styles,
                        &self.workspace.presets,
                        &self.workspace.folders,
                    ) {
                        Ok(()) => self.show_toast("Project exported!", false),
                        Err(e) => self.show_toast(format!("Export failed: {}", e), true),
                    }
                }
                Task::none()
            }
            Message::ImportProject => {
                let file = FileDialog::new()
                    .set_title("Import Project")
                    .add_filter("Project", &["json"])
                    .pick_file();
                let Some(path) = file else {
                    return Task::none();
                };
                match project::import_project(&path) {
                    Ok(file) => {
                        self.workspace.styles = file.styles;
                        self.workspace.presets = file.presets;
                        self.workspace.folders = file.folders;
                        self.selected_style = None;
                        self.batch_selected.clear();
                        self.blend_a = None;
                        self.blend_b = None;
                        self.show_toast("Project imported!", false);
                        self.schedule_autosave()
                    }
                    Err(e) => {
                        // The workspace is untouched when the file is bad
                        eprintln!("⚠️  Import rejected: {}", e);
                        self.show_toast("Invalid project file!", true);
                        Task::none()
                    }
                }
            }
        }
    }

    /// Two-style blend selection, mirroring a two-slot toggle:
    /// picking a filled slot clears it, a third pick starts over
    fn select_blend(&mut self, id: String) {
        match (self.blend_a.clone(), self.blend_b.clone()) {
            (None, _) => self.blend_a = Some(id),
            (Some(a), None) => {
                if a == id {
                    self.blend_a = None;
                } else {
                    self.blend_b = Some(id);
                }
            }
            (Some(a), Some(b)) => {
                if a == id {
                    self.blend_a = Some(b);
                    self.blend_b = None;
                } else if b == id {
                    self.blend_b = None;
                } else {
                    self.blend_a = Some(id);
                    self.blend_b = None;
                }
            }
        }
    }

    /// Decide which of the three generation shapes the click means and
    /// kick it off: styles over one photo, one style over all photos,
    /// or a single call
    fn start_generation(&mut self) -> Task<Message> {
        if self.is_generating {
            return Task::none();
        }

        // With no photo loaded, a described style becomes a
        // text-to-image request
        if self.workspace.photos.is_empty() {
            let prompt = self.custom_prompt.trim().to_string();
            if prompt.is_empty() {
                self.status = "Load a photo or describe an image to create.".to_string();
                return Task::none();
            }
            let engine = self.engine.clone();
            let hint = batch::aspect_hint(&self.aspect_ratio);
            let aspect_ratio = self.aspect_ratio.clone();
            self.is_generating = true;
            self.status = "Creating from prompt...".to_string();
            return Task::perform(
                generate_once(engine, prompt, hint, aspect_ratio),
                Message::PromptGenerationFinished,
            );
        }

        let batch_styles = self.batch_mode && !self.batch_selected.is_empty();
        let blend_ready = self.blend_mode && self.blend_a.is_some() && self.blend_b.is_some();
        if self.selected_style.is_none()
            && self.custom_prompt.trim().is_empty()
            && !blend_ready
            && !batch_styles
        {
            self.status = "Pick a style or describe one first.".to_string();
            return Task::none();
        }

        if batch_styles {
            let Some(photo) = self.active_photo() else {
                return Task::none();
            };
            let styles: Vec<&state::data::StyleEntry> = self
                .workspace
                .styles
                .iter()
                .filter(|s| self.batch_selected.contains(&s.id))
                .collect();
            let run = BatchRun::styles_on_photo(
                photo,
                &styles,
                self.style_influence,
                &self.aspect_ratio,
            );
            self.batch = Some(run);
        } else if self.workspace.photos.len() > 1 {
            let (base_prompt, style_name) = self.base_prompt();
            let reference = self
                .selected_style
                .as_ref()
                .and_then(|id| self.workspace.style(id))
                .and_then(|s| s.reference.clone());
            let run = BatchRun::style_over_photos(
                &self.workspace.photos,
                &style_name,
                &base_prompt,
                self.style_influence,
                reference,
                &self.aspect_ratio,
            );
            self.batch = Some(run);
        } else {
            // Single photo, single style
            let Some(photo) = self.active_photo() else {
                return Task::none();
            };
            let (base_prompt, style_name) = self.base_prompt();
            let instruction = batch::compose_instruction(self.style_influence, &base_prompt);
            let reference = self
                .selected_style
                .as_ref()
                .and_then(|id| self.workspace.style(id))
                .and_then(|s| s.reference.clone());
            let request = StylizeRequest {
                image: photo.original.clone(),
                instruction,
                reference,
                aspect_ratio: batch::aspect_hint(&self.aspect_ratio),
            };
            let engine = self.engine.clone();
            let photo_id = photo.id.clone();
            let aspect_ratio = self.aspect_ratio.clone();
            self.batch = None;
            self.is_generating = true;
            self.status = format!("Styling with {}...", style_name);
            return Task::perform(
                stylize_once(engine, request, photo_id, style_name, aspect_ratio),
                Message::GenerationFinished,
            );
        }

        // Batch path: fire the first item, the rest chain item by item
        self.is_generating = true;
        let run = self.batch.as_ref().expect("batch run was just created");
        let (current, total) = run.progress();
        self.status = format!("Batch {}/{}...", current, total);
        match run.next_request() {
            Some((index, request)) => self.spawn_batch_item(index, request),
            None => {
                self.is_generating = false;
                Task::none()
            }
        }
    }

    /// Record one finished batch item and chain the next one
    fn finish_batch_item(&mut self, index: usize, done: GenerationDone) -> Task<Message> {
        let applied = self.apply_generation(&done);
        let mut tasks = Vec::new();
        if applied {
            tasks.push(self.schedule_autosave());
        }

        let Some(run) = self.batch.as_mut() else {
            self.is_generating = false;
            return Task::batch(tasks);
        };
        run.record(index, done.result.map(|(full, _thumb)| full));

        match run.next_request() {
            Some((next_index, request)) => {
                let (current, total) = run.progress();
                self.status = format!("Batch {}/{}...", current, total);
                tasks.push(self.spawn_batch_item(next_index, request));
            }
            None => {
                self.is_generating = false;
                let filled = run
                    .items()
                    .iter()
                    .filter(|i| matches!(i.slot, Slot::Filled(_)))
                    .count();
                let failed = run.total() - filled;
                self.status = format!("✅ Batch complete: {} styled, {} failed.", filled, failed);
            }
        }
        Task::batch(tasks)
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let content: Row<Message> = row![
            self.view_photos_pane(),
            self.view_styles_pane(),
            self.view_result_pane(),
        ]
        .spacing(16)
        .padding(16);

        let header = self.view_header();

        container(column![header, content].spacing(12))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn view_header(&self) -> Element<Message> {
        let mut header = row![
            text("Style Studio").size(28),
            button(if self.is_saving { "Saving..." } else { "Save Project" })
                .on_press(Message::ManualSave)
                .padding(8),
            button("Export").on_press(Message::ExportProject).padding(8),
            button("Import").on_press(Message::ImportProject).padding(8),
        ]
        .spacing(12)
        .align_y(Alignment::Center);

        if let Some(seconds) = self.rate_limit_cooldown {
            header = header.push(text(format!("⏳ Rate limited, wait {}s", seconds)).size(14));
        }
        if let Some(toast) = &self.toast {
            let marker = if toast.is_error { "❌" } else { "✅" };
            header = header.push(text(format!("{} {}", marker, toast.message)).size(14));
        }
        header.into()
    }

    fn view_photos_pane(&self) -> Element<Message> {
        let mut pane: Column<Message> = column![
            text("1. Photos").size(20),
            row![
                button("Add Photos").on_press(Message::AddPhotos).padding(8),
                button("Clear").on_press(Message::ClearPhotos).padding(8),
            ]
            .spacing(8),
        ]
        .spacing(10);

        for photo in &self.workspace.photos {
            let marker = if self.selected_photo.as_deref() == Some(photo.id.as_str()) {
                "▶ "
            } else {
                "  "
            };
            pane = pane.push(
                row![
                    button(text(format!("{}{}", marker, photo.name)).size(14))
                        .on_press(Message::SelectPhoto(photo.id.clone()))
                        .padding(4),
                    button(text("x").size(14))
                        .on_press(Message::RemovePhoto(photo.id.clone()))
                        .padding(4),
                ]
                .spacing(6),
            );
        }

        let can_generate = !self.is_generating
            && (!self.workspace.photos.is_empty() || !self.custom_prompt.trim().is_empty());
        let generate = if can_generate {
            button("Convert Now").on_press(Message::Generate)
        } else {
            button(if self.is_generating {
                "Working..."
            } else {
                "Convert Now"
            })
        };
        pane = pane.push(generate.padding(10));
        pane = pane.push(text(&self.status).size(14));

        pane = pane.push(text(format!("Influence: {}", self.style_influence)).size(14));
        pane = pane.push(slider(0..=100u8, self.style_influence, Message::InfluenceChanged));
        pane = pane.push(text(format!("Vibrancy: {}", self.vibrancy)).size(14));
        pane = pane.push(slider(-50..=50i32, i32::from(self.vibrancy), |v| {
            Message::VibrancyChanged(v as i8)
        }));
        pane = pane.push(text(format!("Mood: {}", self.mood)).size(14));
        pane = pane.push(slider(-50..=50i32, i32::from(self.mood), |v| {
            Message::MoodChanged(v as i8)
        }));

        let mut aspects = Row::new().spacing(4);
        for ratio in ASPECT_RATIOS {
            let label = if self.aspect_ratio == ratio {
                format!("[{}]", ratio)
            } else {
                ratio.to_string()
            };
            aspects = aspects.push(
                button(text(label).size(12))
                    .on_press(Message::AspectChanged(ratio.to_string()))
                    .padding(4),
            );
        }
        pane = pane.push(aspects);

        pane = pane.push(text("Presets").size(16));
        for preset in &self.workspace.presets {
            pane = pane.push(
                row![
                    button(text(&preset.name).size(14))
                        .on_press(Message::ApplyPreset(preset.id.clone()))
                        .padding(4),
                    button(text("x").size(14))
                        .on_press(Message::DeletePreset(preset.id.clone()))
                        .padding(4),
                ]
                .spacing(6),
            );
        }
        pane = pane.push(
            row![
                text_input("Preset name", &self.new_preset_name)
                    .on_input(Message::PresetNameChanged)
                    .padding(6),
                button("Save").on_press(Message::SavePreset).padding(6),
            ]
            .spacing(6),
        );

        scrollable(pane.width(Length::FillPortion(3))).into()
    }

    fn view_styles_pane(&self) -> Element<Message> {
        let mut pane: Column<Message> = column![
            text("2. Styles").size(20),
            text_input("Search styles...", &self.search)
                .on_input(Message::SearchChanged)
                .padding(6),
            row![
                button(if self.batch_mode { "[Batch]" } else { "Batch" })
                    .on_press(Message::ToggleBatchMode)
                    .padding(6),
                button(if self.blend_mode { "[Blend]" } else { "Blend" })
                    .on_press(Message::ToggleBlendMode)
                    .padding(6),
                button(text(format!("Trash ({})", self.workspace.trashed_styles().len())))
                    .on_press(Message::ToggleTrash)
                    .padding(6),
            ]
            .spacing(8),
        ]
        .spacing(10);

        if self.editing_style.is_some() {
            pane = pane.push(
                row![
                    text_input("Style name", &self.edit_label)
                        .on_input(Message::EditLabelChanged)
                        .padding(6),
                    text_input("Prompt", &self.edit_prompt)
                        .on_input(Message::EditPromptChanged)
                        .padding(6),
                    button("Save").on_press(Message::ConfirmEditStyle).padding(4),
                    button("Cancel").on_press(Message::CancelEditStyle).padding(4),
                ]
                .spacing(6),
            );
        }

        if let Some(id) = &self.pending_delete {
            let label = self
                .workspace
                .style(id)
                .map(|s| s.label.clone())
                .unwrap_or_default();
            pane = pane.push(
                row![
                    text(format!("Delete '{}'?", label)).size(14),
                    button("Delete").on_press(Message::ConfirmDeleteStyle).padding(4),
                    button("Cancel").on_press(Message::CancelDeleteStyle).padding(4),
                ]
                .spacing(6),
            );
        }

        if self.show_trash {
            pane = pane.push(text("Trash").size(16));
            pane = pane.push(
                button("Restore All")
                    .on_press(Message::RestoreAllStyles)
                    .padding(6),
            );
            for style in self.workspace.trashed_styles() {
                pane = pane.push(
                    row![
                        text(&style.label).size(14),
                        button(text("Restore").size(12))
                            .on_press(Message::RestoreStyle(style.id.clone()))
                            .padding(4),
                        button(text("Delete forever").size(12))
                            .on_press(Message::PurgeStyle(style.id.clone()))
                            .padding(4),
                    ]
                    .spacing(6),
                );
            }
            return scrollable(pane.width(Length::FillPortion(4))).into();
        }

        for style in self.workspace.visible_styles(&self.search) {
            let marker = if self.batch_mode {
                if self.batch_selected.contains(&style.id) {
                    "☑ "
                } else {
                    "☐ "
                }
            } else if self.blend_mode {
                if self.blend_a.as_deref() == Some(style.id.as_str()) {
                    "A "
                } else if self.blend_b.as_deref() == Some(style.id.as_str()) {
                    "B "
                } else {
                    "  "
                }
            } else if self.selected_style.as_deref() == Some(style.id.as_str()) {
                "▶ "
            } else {
                "  "
            };

            let select_message = if self.batch_mode {
                Message::ToggleBatchStyle(style.id.clone())
            } else if self.blend_mode {
                Message::SelectBlendStyle(style.id.clone())
            } else {
                Message::SelectStyle(style.id.clone())
            };

            let mut stars = Row::new().spacing(2);
            for star in 1..=5u8 {
                let glyph = if star <= style.rating { "★" } else { "☆" };
                stars = stars.push(
                    button(text(glyph).size(12))
                        .on_press(Message::SetRating(style.id.clone(), star))
                        .padding(2),
                );
            }

            pane = pane.push(
                row![
                    button(text(format!("{}{}", marker, style.label)).size(14))
                        .on_press(select_message)
                        .padding(4),
                    stars,
                    button(text("✎").size(12))
                        .on_press(Message::StartEditStyle(style.id.clone()))
                        .padding(4),
                    button(text("🖼").size(12))
                        .on_press(Message::UseResultAsArtwork(style.id.clone()))
                        .padding(4),
                    button(text("🗑").size(12))
                        .on_press(Message::RequestDeleteStyle(style.id.clone()))
                        .padding(4),
                ]
                .spacing(6)
                .align_y(Alignment::Center),
            );
        }

        pane = pane.push(text("Folders").size(16));
        if self.selected_style.is_some() {
            pane = pane.push(
                button(text("Unfile selected style").size(12))
                    .on_press(Message::MoveSelectedToFolder(None))
                    .padding(4),
            );
        }
        for folder in &self.workspace.folders {
            let mut folder_row = row![text(&folder.name).size(14)].spacing(6);
            if self.selected_style.is_some() {
                folder_row = folder_row.push(
                    button(text("Move here").size(12))
                        .on_press(Message::MoveSelectedToFolder(Some(folder.id.clone())))
                        .padding(4),
                );
            }
            folder_row = folder_row.push(
                button(text("Rename").size(12))
                    .on_press(Message::RenameFolder(folder.id.clone()))
                    .padding(4),
            );
            folder_row = folder_row.push(
                button(text("x").size(12))
                    .on_press(Message::DeleteFolder(folder.id.clone()))
                    .padding(4),
            );
            pane = pane.push(folder_row);
        }
        pane = pane.push(
            row![
                text_input("New folder", &self.new_folder_name)
                    .on_input(Message::FolderNameChanged)
                    .padding(6),
                button("Create").on_press(Message::CreateFolder).padding(6),
            ]
            .spacing(6),
        );

        pane = pane.push(
            text_input("Or describe a style...", &self.custom_prompt)
                .on_input(Message::PromptChanged)
                .padding(6),
        );

        scrollable(pane.width(Length::FillPortion(4))).into()
    }

    fn view_result_pane(&self) -> Element<Message> {
        let mut pane: Column<Message> = column![text("3. Result").size(20)].spacing(10);

        if let Some(photo) = self.active_photo() {
            let handle = iced::widget::image::Handle::from_bytes(photo.current().data.clone());
            pane = pane.push(
                iced::widget::image(handle)
                    .width(Length::Fill)
                    .height(Length::Fixed(360.0)),
            );

            let mut controls = Row::new().spacing(8);
            if photo.can_undo() {
                controls = controls.push(button("Undo").on_press(Message::Undo).padding(6));
            }
            if photo.can_redo() {
                controls = controls.push(button("Redo").on_press(Message::Redo).padding(6));
            }
            if !self.is_animating {
                controls = controls.push(button("Animate").on_press(Message::Animate).padding(6));
            }
            if !self.is_upscaling {
                controls = controls.push(
                    button("Upscale 2K")
                        .on_press(Message::Upscale(UpscaleTarget::TwoK))
                        .padding(6),
                );
                controls = controls.push(
                    button("Upscale 4K")
                        .on_press(Message::Upscale(UpscaleTarget::FourK))
                        .padding(6),
                );
            }
            pane = pane.push(controls);

            if let Some(url) = &photo.video_url {
                pane = pane.push(text(format!("🎬 Animation: {}", url)).size(12));
            }

            pane = pane.push(
                row![
                    text_input("Name this look...", &self.new_style_name)
                        .on_input(Message::StyleNameChanged)
                        .padding(6),
                    button("Save as Style")
                        .on_press(Message::SaveResultAsStyle)
                        .padding(6),
                ]
                .spacing(6),
            );
        } else {
            pane = pane.push(text("Load a photo to get started.").size(14));
        }

        if let Some(run) = &self.batch {
            let (current, total) = run.progress();
            pane = pane.push(text(format!("Batch progress: {}/{}", current, total)).size(14));
            for item in run.items() {
                let line = match &item.slot {
                    Slot::Pending => format!("… {}", item.label),
                    Slot::Filled(_) => format!("✅ {}", item.label),
                    Slot::Failed(failure) => format!("❌ {} ({})", item.label, failure.message),
                };
                pane = pane.push(text(line).size(12));
            }
        }

        pane = pane.push(
            row![
                text(format!("Gallery ({})", self.workspace.gallery.len())).size(16),
                button(text("Clear").size(12)).on_press(Message::ClearGallery).padding(4),
            ]
            .spacing(8),
        );
        for entry in self.workspace.gallery.iter().take(12) {
            pane = pane.push(
                row![
                    text(format!("{} · {}", entry.style_name, entry.aspect_ratio)).size(12),
                    button(text("x").size(12))
                        .on_press(Message::RemoveGalleryEntry(entry.id.clone()))
                        .padding(2),
                ]
                .spacing(6),
            );
        }

        scrollable(pane.width(Length::FillPortion(5))).into()
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn main() -> iced::Result {
    iced::application("Style Studio", StyleStudio::update, StyleStudio::view)
        .theme(StyleStudio::theme)
        .centered()
        .run_with(StyleStudio::new)
}

/// Guess a MIME type from the file extension
fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// One engine call plus the gallery thumbnail derived from the output.
/// Runs as a background task so the UI stays responsive.
async fn stylize_once(
    engine: Arc<HttpStyleEngine>,
    request: StylizeRequest,
    photo_id: String,
    style_name: String,
    aspect_ratio: String,
) -> GenerationDone {
    let instruction = request.instruction.clone();

    let result = match engine
        .stylize(
            &request.image,
            &request.instruction,
            request.reference.as_ref(),
            request.aspect_ratio.as_deref(),
        )
        .await
    {
        Ok(full) => {
            // The gallery keeps a small copy; recompression failures
            // fall back to the full output rather than losing the entry
            let thumb = imaging::recompress_async(full.clone(), imaging::GALLERY_THUMB)
                .await
                .unwrap_or_else(|_| full.clone());
            Ok((full, thumb))
        }
        Err(e) => Err(EngineFailure::from(e)),
    };

    GenerationDone {
        photo_id,
        style_name,
        instruction,
        aspect_ratio,
        result,
    }
}

/// Text-to-image call for the no-photo case
async fn generate_once(
    engine: Arc<HttpStyleEngine>,
    prompt: String,
    hint: Option<String>,
    aspect_ratio: String,
) -> GenerationDone {
    let result = match engine.generate(&prompt, hint.as_deref()).await {
        Ok(full) => {
            let thumb = imaging::recompress_async(full.clone(), imaging::GALLERY_THUMB)
                .await
                .unwrap_or_else(|_| full.clone());
            Ok((full, thumb))
        }
        Err(e) => Err(EngineFailure::from(e)),
    };

    GenerationDone {
        photo_id: String::new(),
        style_name: "Prompt".to_string(),
        instruction: prompt,
        aspect_ratio,
        result,
    }
}
