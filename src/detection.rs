use crate::config::DetectorConfig;
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, Axis, Ix4};
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

const IOU_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector inference failed: {0}")]
    Inference(String),
    #[error("Detector session mutex poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum DetectorInitError {
    #[error("Failed to load detection model: {0}")]
    Model(#[from] ort::Error),
    #[error("Failed to load detector labels: {0}")]
    Labels(#[from] io::Error),
    #[error("Detection model declares no outputs")]
    NoOutputs,
}

/// Pixel-coordinate bounding box, clamped to the frame it was detected in.
/// A clamped box may still be degenerate (`xmin == xmax`); callers must skip
/// degenerate boxes before cropping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

/// Boundary contract for the external object-detection model. Implementations
/// must be safe for shared read-only use across concurrent sessions.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

/// YOLOv5-style single-output ONNX detector backed by an `ort` session.
pub struct OrtDetector {
    session: Mutex<Session>,
    output_name: String,
    labels: Vec<String>,
    input_size: u32,
    min_probability: f32,
}

impl OrtDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectorInitError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(config.get_model_path())?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or(DetectorInitError::NoOutputs)?;

        let labels = load_labels(&config.get_labels_path())?;
        tracing::info!(
            "Loaded detection model with {} class labels from {:?}",
            labels.len(),
            config.get_model_path()
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            labels,
            input_size: config.input_size,
            min_probability: config.min_probability,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectionError> {
        let mut session = self.session.lock().map_err(|_| DetectionError::Poisoned)?;

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(format!("failed to build tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectionError::Inference(format!("inference failed: {e}")))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("failed to extract tensor: {e}")))?;

        let ix = shape.to_ixdyn();
        ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectionError::Inference(format!("invalid tensor shape: {e}")))
    }
}

impl Detector for OrtDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        let input = to_input_tensor(frame, self.input_size);
        let output = self.run_inference(&input)?;

        let detections = decode_output(
            &output,
            frame.width(),
            frame.height(),
            self.input_size,
            self.min_probability,
            &self.labels,
        );

        tracing::debug!("Detector returned {} boxes", detections.len());
        Ok(detections)
    }
}

/// Resizes the frame to the model's square input and packs it into an NCHW
/// tensor scaled to [0, 1]. The decoded frame is already in RGB channel
/// order, matching the order the model was trained on.
fn to_input_tensor(frame: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(frame, input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, 0, y as usize, x as usize]] = (r as f32) / 255.;
        input[[0, 1, y as usize, x as usize]] = (g as f32) / 255.;
        input[[0, 2, y as usize, x as usize]] = (b as f32) / 255.;
    }
    input
}

#[derive(Debug, Clone, Copy)]
struct RawBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

fn intersection(box1: &RawBox, box2: &RawBox) -> f32 {
    let w = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let h = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    w * h
}

fn union(box1: &RawBox, box2: &RawBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

/// Parses a YOLOv5 output tensor of shape `[1, rows, 5 + classes]`. Each row
/// is `[cx, cy, w, h, objectness, class scores...]` in input-tensor
/// coordinates; candidate confidence is objectness times the best class
/// score. Surviving boxes are rescaled to the source frame and clamped.
fn decode_output(
    output: &ndarray::ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    input_size: u32,
    min_probability: f32,
    labels: &[String],
) -> Vec<Detection> {
    let mut boxes = Vec::new();
    let rows = output.slice(s![0, .., ..]);

    for row in rows.axis_iter(Axis(0)) {
        let row: Vec<f32> = row.iter().copied().collect();
        if row.len() < 6 {
            continue;
        }
        let objectness = row[4];
        let best_class = row
            .iter()
            .skip(5)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum });
        let Some((class_id, class_score)) = best_class else {
            continue;
        };

        let confidence = objectness * class_score;
        if confidence < min_probability {
            continue;
        }

        let scale = input_size as f32;
        let xc = row[0] / scale * (img_width as f32);
        let yc = row[1] / scale * (img_height as f32);
        let w = row[2] / scale * (img_width as f32);
        let h = row[3] / scale * (img_height as f32);

        boxes.push(RawBox {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            class_id,
            confidence,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut kept = Vec::new();
    while !boxes.is_empty() {
        kept.push(boxes[0]);
        boxes = boxes
            .iter()
            .filter(|candidate| {
                intersection(&boxes[0], candidate) / union(&boxes[0], candidate) < IOU_THRESHOLD
            })
            .copied()
            .collect();
    }

    kept.into_iter()
        .map(|raw| to_detection(raw, img_width, img_height, labels))
        .collect()
}

fn to_detection(raw: RawBox, img_width: u32, img_height: u32, labels: &[String]) -> Detection {
    let label = labels
        .get(raw.class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", raw.class_id));

    Detection {
        bbox: BoundingBox {
            xmin: raw.x1.max(0.).round() as u32,
            ymin: raw.y1.max(0.).round() as u32,
            xmax: raw.x2.min(img_width as f32).max(0.).round() as u32,
            ymax: raw.y2.min(img_height as f32).max(0.).round() as u32,
        },
        label,
        confidence: raw.confidence,
    }
}

/// Reads class labels, one name per line, blank lines ignored.
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
