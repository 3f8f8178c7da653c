/// Batch generation orchestration
///
/// A batch applies many styles to one photo, or one style to many
/// photos, one engine call per work item. Items run strictly one at a
/// time because the hosted engine is rate limited; a failing item only
/// marks its own slot and the run moves on. Output order always
/// matches input order and progress only moves forward.

use crate::remote::client::{EngineFailure, StyleEngine};
use crate::state::data::{ImagePayload, PhotoState, StyleEntry};

/// Fallback instruction when neither a style nor a custom prompt is set
pub const DEFAULT_PROMPT: &str = "An artistic transformation.";

/// How hard the engine should push toward the target style,
/// derived from the 0-100 influence slider
pub fn intensity_instruction(influence: u8) -> &'static str {
    if influence >= 90 {
        "Transform the image COMPLETELY and RIGIDLY to match the target style."
    } else if influence >= 70 {
        "Apply the style with high intensity."
    } else if influence <= 10 {
        "Apply the style EXTREMELY SUBTLY."
    } else if influence <= 30 {
        "Apply the style subtly."
    } else {
        "Apply the style with balanced intensity."
    }
}

/// Full instruction for one engine call: intensity qualifier + prompt
pub fn compose_instruction(influence: u8, base_prompt: &str) -> String {
    format!("{} {}", intensity_instruction(influence), base_prompt)
}

/// Blend mode folds two styles into a single instruction
pub fn blend_prompt(a: &StyleEntry, b: &StyleEntry) -> String {
    format!(
        "Blend these two styles into one cohesive look. First style: {} Second style: {}",
        a.prompt, b.prompt
    )
}

/// Map the aspect-ratio picker value to the hint the engine accepts
pub fn aspect_hint(aspect_ratio: &str) -> Option<String> {
    if aspect_ratio == "auto" {
        None
    } else {
        Some(aspect_ratio.to_string())
    }
}

/// Output slot of one work item
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Pending,
    Filled(ImagePayload),
    Failed(EngineFailure),
}

/// One (image, instruction) pair in a batch
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// What the result list shows for this item
    pub label: String,
    /// Style name recorded on the gallery entry
    pub style_name: String,
    /// Photo receiving the result
    pub photo_id: String,
    pub instruction: String,
    pub image: ImagePayload,
    pub slot: Slot,
}

/// Cloneable inputs for a single engine call
#[derive(Debug, Clone)]
pub struct StylizeRequest {
    pub image: ImagePayload,
    pub instruction: String,
    pub reference: Option<ImagePayload>,
    pub aspect_ratio: Option<String>,
}

/// A sequential run over an ordered set of work items.
///
/// The driver repeatedly takes `next_request`, awaits the engine and
/// feeds the outcome back through `record`. Tests and headless callers
/// can use `run` to do the whole loop in one place.
#[derive(Debug)]
pub struct BatchRun {
    items: Vec<WorkItem>,
    reference: Option<ImagePayload>,
    aspect_ratio: Option<String>,
    cursor: usize,
}

impl BatchRun {
    /// Several styles applied to the active photo
    pub fn styles_on_photo(
        photo: &PhotoState,
        styles: &[&StyleEntry],
        influence: u8,
        aspect_ratio: &str,
    ) -> Self {
        let items = styles
            .iter()
            .map(|style| WorkItem {
                label: style.label.clone(),
                style_name: style.label.clone(),
                photo_id: photo.id.clone(),
                instruction: compose_instruction(influence, &style.prompt),
                image: photo.original.clone(),
                slot: Slot::Pending,
            })
            .collect();

        Self {
            items,
            reference: None,
            aspect_ratio: aspect_hint(aspect_ratio),
            cursor: 0,
        }
    }

    /// One style (or custom prompt) applied to every loaded photo
    pub fn style_over_photos(
        photos: &[PhotoState],
        style_name: &str,
        base_prompt: &str,
        influence: u8,
        reference: Option<ImagePayload>,
        aspect_ratio: &str,
    ) -> Self {
        let instruction = compose_instruction(influence, base_prompt);
        let items = photos
            .iter()
            .map(|photo| WorkItem {
                label: photo.name.clone(),
                style_name: style_name.to_string(),
                photo_id: photo.id.clone(),
                instruction: instruction.clone(),
                image: photo.original.clone(),
                slot: Slot::Pending,
            })
            .collect();

        Self {
            items,
            reference,
            aspect_ratio: aspect_hint(aspect_ratio),
            cursor: 0,
        }
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.items.len()
    }

    /// Progress as (current, total). `current` counts the item being
    /// worked on, so it reads 1/N before the first call and N/N at the
    /// end, never moving backwards.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.items.len();
        ((self.cursor + 1).min(total), total)
    }

    /// Inputs for the next pending item, or None once every slot is
    /// resolved
    pub fn next_request(&self) -> Option<(usize, StylizeRequest)> {
        let item = self.items.get(self.cursor)?;
        Some((
            self.cursor,
            StylizeRequest {
                image: item.image.clone(),
                instruction: item.instruction.clone(),
                reference: self.reference.clone(),
                aspect_ratio: self.aspect_ratio.clone(),
            },
        ))
    }

    /// Resolve the slot for one item and advance past it.
    /// A failure lands in that slot only; the next request is
    /// unaffected.
    pub fn record(&mut self, index: usize, result: Result<ImagePayload, EngineFailure>) {
        if let Some(item) = self.items.get_mut(index) {
            item.slot = match result {
                Ok(image) => Slot::Filled(image),
                Err(failure) => Slot::Failed(failure),
            };
        }
        self.cursor = index + 1;
    }

    /// Drive the whole run against an engine, one call at a time
    pub async fn run(&mut self, engine: &dyn StyleEngine) {
        while let Some((index, request)) = self.next_request() {
            let result = engine
                .stylize(
                    &request.image,
                    &request.instruction,
                    request.reference.as_ref(),
                    request.aspect_ratio.as_deref(),
                )
                .await
                .map_err(EngineFailure::from);
            self.record(index, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::client::RemoteError;
    use crate::state::data::builtin_styles;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Engine stub that pops pre-scripted responses and records the
    /// instructions it was called with
    struct ScriptedEngine {
        responses: Mutex<VecDeque<Result<ImagePayload, RemoteError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(responses: Vec<Result<ImagePayload, RemoteError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StyleEngine for ScriptedEngine {
        async fn stylize(
            &self,
            _image: &ImagePayload,
            instruction: &str,
            _reference: Option<&ImagePayload>,
            _aspect_ratio: Option<&str>,
        ) -> Result<ImagePayload, RemoteError> {
            self.calls.lock().unwrap().push(instruction.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::Api("script exhausted".to_string())))
        }

        async fn generate(
            &self,
            _prompt: &str,
            _aspect_ratio: Option<&str>,
        ) -> Result<ImagePayload, RemoteError> {
            Err(RemoteError::Api("not scripted".to_string()))
        }

        async fn animate(&self, _image: &ImagePayload) -> Result<String, RemoteError> {
            Err(RemoteError::Api("not scripted".to_string()))
        }

        async fn upscale(
            &self,
            _image: &ImagePayload,
            _target: crate::remote::client::UpscaleTarget,
        ) -> Result<ImagePayload, RemoteError> {
            Err(RemoteError::Api("not scripted".to_string()))
        }
    }

    fn payload(tag: u8) -> ImagePayload {
        ImagePayload::new("image/png", vec![tag; 4])
    }

    fn photo(id: &str) -> PhotoState {
        PhotoState::new(id.to_string(), format!("{}.png", id), payload(0))
    }

    fn run_of_styles(count: usize) -> BatchRun {
        let catalog = builtin_styles();
        let styles: Vec<&StyleEntry> = catalog.iter().take(count).collect();
        BatchRun::styles_on_photo(&photo("img_1"), &styles, 50, "auto")
    }

    #[tokio::test]
    async fn test_every_slot_resolves() {
        let engine = ScriptedEngine::new(vec![
            Ok(payload(1)),
            Ok(payload(2)),
            Ok(payload(3)),
        ]);
        let mut run = run_of_styles(3);
        run.run(&engine).await;

        assert!(run.is_done());
        assert_eq!(run.total(), 3);
        assert!(run
            .items()
            .iter()
            .all(|item| !matches!(item.slot, Slot::Pending)));
        // Output order matches input order
        assert_eq!(run.items()[0].slot, Slot::Filled(payload(1)));
        assert_eq!(run.items()[2].slot, Slot::Filled(payload(3)));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let engine = ScriptedEngine::new(vec![
            Ok(payload(1)),
            Err(RemoteError::Api("500: boom".to_string())),
            Ok(payload(3)),
        ]);
        let mut run = run_of_styles(3);
        run.run(&engine).await;

        // All three calls went out despite the failure in the middle
        assert_eq!(engine.calls().len(), 3);
        assert!(matches!(run.items()[0].slot, Slot::Filled(_)));
        assert!(matches!(run.items()[2].slot, Slot::Filled(_)));
        match &run.items()[1].slot {
            Slot::Failed(failure) => assert!(failure.message.contains("boom")),
            other => panic!("expected a failed slot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_recorded_on_its_item_only() {
        let engine = ScriptedEngine::new(vec![
            Err(RemoteError::RateLimited {
                retry_after: Some(12),
            }),
            Ok(payload(2)),
        ]);
        let mut run = run_of_styles(2);
        run.run(&engine).await;

        match &run.items()[0].slot {
            Slot::Failed(failure) => {
                assert!(failure.rate_limited);
                assert_eq!(failure.retry_after, Some(12));
            }
            other => panic!("expected a rate-limited slot, got {:?}", other),
        }
        assert!(matches!(run.items()[1].slot, Slot::Filled(_)));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut run = run_of_styles(3);
        assert_eq!(run.progress(), (1, 3));

        let mut seen = vec![run.progress().0];
        while let Some((index, _)) = run.next_request() {
            run.record(index, Ok(payload(9)));
            seen.push(run.progress().0);
        }

        assert_eq!(run.progress(), (3, 3));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_style_over_photos_shares_one_instruction() {
        let photos = vec![photo("img_1"), photo("img_2")];
        let run = BatchRun::style_over_photos(&photos, "Watercolor", "wet paint", 80, None, "3:4");

        assert_eq!(run.total(), 2);
        assert_eq!(run.items()[0].instruction, run.items()[1].instruction);
        assert!(run.items()[0]
            .instruction
            .starts_with("Apply the style with high intensity."));
        assert_eq!(run.items()[0].photo_id, "img_1");
        assert_eq!(run.items()[1].photo_id, "img_2");
    }

    #[test]
    fn test_intensity_thresholds() {
        assert!(intensity_instruction(95).contains("COMPLETELY"));
        assert!(intensity_instruction(70).contains("high intensity"));
        assert!(intensity_instruction(50).contains("balanced"));
        assert_eq!(intensity_instruction(30), "Apply the style subtly.");
        assert!(intensity_instruction(5).contains("EXTREMELY SUBTLY"));
    }

    #[test]
    fn test_blend_prompt_folds_both_styles() {
        let catalog = builtin_styles();
        let blended = blend_prompt(&catalog[0], &catalog[1]);
        assert!(blended.contains(&catalog[0].prompt));
        assert!(blended.contains(&catalog[1].prompt));
    }
}
