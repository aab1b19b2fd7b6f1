//! OCR page images into Label Studio pre-annotated tasks.
//!
//! Each text line becomes two regions sharing an ID: a `rectangle` on the
//! `bbox` control and a `textarea` on the `transcription` control. Coordinates
//! are percentages of the image size, as Label Studio expects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use uuid::Uuid;

use self::tesseract::{OcrPage, TesseractSettings};
use super::ProcessOptions;
use crate::{
    engine::ItemProcessor,
    prelude::*,
    remote::{IMAGE_MIME_TYPES, RemoteItem, RemoteSource},
};

pub mod tesseract;

/// A Label Studio task with OCR predictions.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct LabelStudioTask {
    pub data: TaskData,
    pub predictions: Vec<Prediction>,
    pub meta: TaskMeta,
}

/// The data Label Studio displays.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct TaskData {
    /// A URL for the image.
    pub ocr: String,
}

/// A set of pre-annotations.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct Prediction {
    pub result: Vec<Region>,
    /// Mean confidence of the transcriptions, or 0 if there are none.
    pub score: f64,
}

/// A single labeled region.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct Region {
    /// Shared by the rectangle and transcription for one line.
    pub id: String,
    pub from_name: String,
    pub to_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: RegionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Region geometry, in percent of the image size, plus any text.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct RegionValue {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,
}

/// Bookkeeping for a task.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct TaskMeta {
    /// The remote item ID of the image.
    pub source_id: String,
    pub image_name: String,
    /// The folders containing the image.
    pub folders: Vec<String>,
    pub processed_at: DateTime<Utc>,
    /// The number of text lines found.
    pub num_detections: usize,
}

/// Build a task from OCR output.
pub fn build_task(
    item: &RemoteItem,
    image_url: String,
    page: &OcrPage,
    processed_at: DateTime<Utc>,
) -> LabelStudioTask {
    let pct = |value: u32, total: u32| 100.0 * f64::from(value) / f64::from(total);
    let mut result = vec![];
    let mut scores = vec![];
    for line in &page.lines {
        if line.text.trim().is_empty() {
            continue;
        }
        let id = Uuid::new_v4().simple().to_string()[..10].to_owned();
        let geometry = RegionValue {
            x: pct(line.left, page.width),
            y: pct(line.top, page.height),
            width: pct(line.width, page.width),
            height: pct(line.height, page.height),
            rotation: 0.0,
            text: None,
        };
        result.push(Region {
            id: id.clone(),
            from_name: "bbox".to_owned(),
            to_name: "image".to_owned(),
            kind: "rectangle".to_owned(),
            value: geometry.clone(),
            score: None,
        });
        result.push(Region {
            id,
            from_name: "transcription".to_owned(),
            to_name: "image".to_owned(),
            kind: "textarea".to_owned(),
            value: RegionValue {
                text: Some(vec![line.text.clone()]),
                ..geometry
            },
            score: Some(line.confidence),
        });
        scores.push(line.confidence);
    }
    let score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    LabelStudioTask {
        data: TaskData { ocr: image_url },
        predictions: vec![Prediction { result, score }],
        meta: TaskMeta {
            source_id: item.id.clone(),
            image_name: item.name.clone(),
            folders: item.path.clone(),
            processed_at,
            num_detections: scores.len(),
        },
    }
}

/// OCRs images with `tesseract`.
pub struct OcrProcessor {
    source: Arc<dyn RemoteSource>,
    settings: TesseractSettings,
}

impl OcrProcessor {
    /// Create a processor. Reads the `lang` (default `spa`) and `psm`
    /// (default 3) options. Options named `tesseract.NAME` are passed to
    /// tesseract as config variables.
    pub fn new(source: Arc<dyn RemoteSource>, opts: &ProcessOptions) -> Result<Self> {
        let settings = TesseractSettings {
            lang: opts.get_or("lang", "spa".to_owned())?,
            psm: opts.get_or("psm", 3u32)?,
            config_vars: opts
                .with_prefix("tesseract.")
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        };
        Ok(Self { source, settings })
    }
}

#[async_trait]
impl ItemProcessor for OcrProcessor {
    fn mime_types(&self) -> &'static [&'static str] {
        IMAGE_MIME_TYPES
    }

    #[instrument(level = "debug", skip_all, fields(id = %item.id))]
    async fn process(&self, item: &RemoteItem, content: Vec<u8>) -> Result<Value> {
        let extension = image_extension(item);
        let page = tesseract::recognize(&self.settings, extension, content)
            .await
            .with_context(|| format!("cannot OCR {}", item.name))?;
        let task = build_task(item, self.source.item_url(item), &page, Utc::now());
        Ok(serde_json::to_value(task)?)
    }
}

/// Pick a file extension tesseract will recognize.
fn image_extension(item: &RemoteItem) -> &'static str {
    let mime = match item.mime_type.as_deref() {
        Some(mime) => Some(mime),
        None => mime_guess::from_path(&item.name).first_raw(),
    };
    match mime {
        Some("image/jpeg") => "jpg",
        Some("image/tiff") => "tif",
        _ => "png",
    }
}
