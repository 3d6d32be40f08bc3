use crate::config::ClassifierConfig;
use image::RgbImage;
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
    sync::Mutex,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Classifier expects a {expected_w}x{expected_h} patch, got {got_w}x{got_h}")]
    BadPatchDimensions {
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },
    #[error("Classifier inference failed: {0}")]
    Inference(String),
    #[error("Classifier produced no scores")]
    EmptyScores,
    #[error("Classifier session mutex poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ClassifierInitError {
    #[error("Failed to load classification model: {0}")]
    Model(#[from] ort::Error),
    #[error("Failed to load classifier labels: {0}")]
    Labels(#[from] io::Error),
    #[error("Classification model declares no outputs")]
    NoOutputs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

/// Boundary contract for the external sign classifier. The caller must hand
/// over a patch already resized to `input_dimensions`; the adapter owns the
/// pixel-value scaling to [0, 1].
pub trait Classifier: Send + Sync {
    fn input_dimensions(&self) -> (u32, u32);

    fn classify(&self, patch: &RgbImage) -> Result<Classification, ClassificationError>;
}

/// Keras-style NHWC ONNX classifier backed by an `ort` session. Output is a
/// `[1, N]` score vector; the label is the argmax index mapped through the
/// optional labels file.
pub struct OrtClassifier {
    session: Mutex<Session>,
    output_name: String,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
}

impl OrtClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self, ClassifierInitError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(config.get_model_path())?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or(ClassifierInitError::NoOutputs)?;

        let labels = match config.get_labels_path() {
            Some(path) => load_labels(&path)?,
            None => Vec::new(),
        };
        tracing::info!(
            "Loaded classification model from {:?} ({} labels)",
            config.get_model_path(),
            labels.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            labels,
            input_width: config.input_width,
            input_height: config.input_height,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ClassificationError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassificationError::Poisoned)?;

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassificationError::Inference(format!("failed to build tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassificationError::Inference(format!("inference failed: {e}")))?;

        let (_, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassificationError::Inference(format!("failed to extract tensor: {e}")))?;

        Ok(data.to_vec())
    }
}

impl Classifier for OrtClassifier {
    fn input_dimensions(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn classify(&self, patch: &RgbImage) -> Result<Classification, ClassificationError> {
        if patch.dimensions() != (self.input_width, self.input_height) {
            return Err(ClassificationError::BadPatchDimensions {
                expected_w: self.input_width,
                expected_h: self.input_height,
                got_w: patch.width(),
                got_h: patch.height(),
            });
        }

        let input = to_input_tensor(patch);
        let scores = self.run_inference(&input)?;
        let (index, score) = top_score(&scores).ok_or(ClassificationError::EmptyScores)?;

        let label = self
            .labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string());

        Ok(Classification {
            label,
            confidence: score,
        })
    }
}

/// Packs the fixed-size patch into an NHWC `[1, H, W, 3]` tensor scaled to
/// [0, 1], the layout the classifier was trained with.
fn to_input_tensor(patch: &RgbImage) -> Array<f32, Ix4> {
    let (width, height) = patch.dimensions();
    let mut input = Array::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in patch.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = (r as f32) / 255.;
        input[[0, y as usize, x as usize, 1]] = (g as f32) / 255.;
        input[[0, y as usize, x as usize, 2]] = (b as f32) / 255.;
    }
    input
}

fn top_score(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
}

fn load_labels(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            labels.push(trimmed.to_string());
        }
    }

    Ok(labels)
}
