use crate::annotation;
use crate::classification::Classifier;
use crate::codec::{self, CodecError};
use crate::config::PipelineConfig;
use crate::detection::{DetectionError, Detector};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),
}

/// Drives one encoded frame through decode -> detect -> per-detection
/// crop/resize/classify/annotate -> encode. Holds no state between frames;
/// the two adapters are shared read-only across every session.
pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    target_class: String,
    confidence_threshold: f32,
}

impl FramePipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            detector,
            classifier,
            target_class: config.target_class.clone(),
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn process(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut frame = codec::decode(bytes)?;
        let detections = self.detector.detect(&frame)?;

        for detection in detections.iter().filter(|d| {
            d.label == self.target_class && d.confidence > self.confidence_threshold
        }) {
            let Some(patch) = codec::crop(&frame, &detection.bbox) else {
                tracing::debug!("Skipping degenerate crop at {:?}", detection.bbox);
                continue;
            };

            let (input_w, input_h) = self.classifier.input_dimensions();
            let patch = codec::resize(&patch, input_w, input_h);

            match self.classifier.classify(&patch) {
                Ok(classification) => {
                    let text =
                        format!("{}: {:.2}", classification.label, classification.confidence);
                    annotation::annotate(&mut frame, &detection.bbox, &text);
                }
                Err(e) => {
                    tracing::warn!("Classification failed, skipping annotation: {e}");
                }
            }
        }

        Ok(codec::encode(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{Classification, ClassificationError};
    use crate::detection::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDetector {
        detections: Vec<Detection>,
    }

    impl Detector for StubDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
            Ok(self.detections.clone())
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
            Err(DetectionError::Inference("model exploded".into()))
        }
    }

    /// Counts classify calls; fails every call whose ordinal is in
    /// `fail_on` (1-based).
    struct CountingClassifier {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl CountingClassifier {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail_on: vec![] }
        }

        fn failing_on(fail_on: Vec<usize>) -> Self {
            Self { calls: AtomicUsize::new(0), fail_on }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for CountingClassifier {
        fn input_dimensions(&self) -> (u32, u32) {
            (100, 100)
        }

        fn classify(&self, patch: &RgbImage) -> Result<Classification, ClassificationError> {
            assert_eq!(patch.dimensions(), (100, 100));
            let ordinal = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&ordinal) {
                return Err(ClassificationError::Inference("bad patch".into()));
            }
            Ok(Classification { label: "A".into(), confidence: 0.97 })
        }
    }

    fn detection(bbox: BoundingBox, label: &str, confidence: f32) -> Detection {
        Detection { bbox, label: label.into(), confidence }
    }

    fn hand_box() -> BoundingBox {
        BoundingBox { xmin: 10, ymin: 10, xmax: 50, ymax: 50 }
    }

    fn test_frame_bytes() -> Vec<u8> {
        let frame = RgbImage::from_fn(120, 80, |x, y| {
            Rgb([(x * 2 % 256) as u8, (y * 3 % 256) as u8, 128])
        });
        codec::encode(&frame).unwrap()
    }

    fn pipeline_with(
        detections: Vec<Detection>,
        classifier: Arc<CountingClassifier>,
    ) -> FramePipeline {
        FramePipeline::new(
            Arc::new(StubDetector { detections }),
            classifier,
            &PipelineConfig { target_class: "hand".into(), confidence_threshold: 0.5 },
        )
    }

    /// Reference output: the decoded input re-encoded with the given boxes
    /// annotated, using the same label format the pipeline emits.
    fn annotated_reference(input: &[u8], boxes: &[BoundingBox]) -> Vec<u8> {
        let mut frame = codec::decode(input).unwrap();
        for bbox in boxes {
            annotation::annotate(&mut frame, bbox, "A: 0.97");
        }
        codec::encode(&frame).unwrap()
    }

    #[test]
    fn zero_detections_yields_plain_reencode() {
        let input = test_frame_bytes();
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline = pipeline_with(vec![], classifier.clone());

        let output = pipeline.process(&input).unwrap();

        assert_eq!(output, annotated_reference(&input, &[]));
        assert_eq!(classifier.call_count(), 0);
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let input = test_frame_bytes();

        // At exactly the threshold: excluded.
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(hand_box(), "hand", 0.50)], classifier.clone());
        let output = pipeline.process(&input).unwrap();
        assert_eq!(classifier.call_count(), 0);
        assert_eq!(output, annotated_reference(&input, &[]));

        // Just below: excluded.
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(hand_box(), "hand", 0.49)], classifier.clone());
        pipeline.process(&input).unwrap();
        assert_eq!(classifier.call_count(), 0);

        // Just above: included.
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(hand_box(), "hand", 0.51)], classifier.clone());
        let output = pipeline.process(&input).unwrap();
        assert_eq!(classifier.call_count(), 1);
        assert_eq!(output, annotated_reference(&input, &[hand_box()]));
    }

    #[test]
    fn non_target_class_is_ignored() {
        let input = test_frame_bytes();
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(hand_box(), "face", 0.99)], classifier.clone());

        let output = pipeline.process(&input).unwrap();

        assert_eq!(classifier.call_count(), 0);
        assert_eq!(output, annotated_reference(&input, &[]));
    }

    #[test]
    fn full_frame_box_produces_valid_classification_call() {
        let input = test_frame_bytes();
        let full = BoundingBox { xmin: 0, ymin: 0, xmax: 120, ymax: 80 };
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(full.clone(), "hand", 0.9)], classifier.clone());

        let output = pipeline.process(&input).unwrap();

        assert_eq!(classifier.call_count(), 1);
        assert_eq!(output, annotated_reference(&input, &[full]));
    }

    #[test]
    fn degenerate_crop_is_skipped_before_classification() {
        let input = test_frame_bytes();
        let degenerate = BoundingBox { xmin: 30, ymin: 10, xmax: 30, ymax: 40 };
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline =
            pipeline_with(vec![detection(degenerate, "hand", 0.9)], classifier.clone());

        let output = pipeline.process(&input).unwrap();

        assert_eq!(classifier.call_count(), 0);
        assert_eq!(output, annotated_reference(&input, &[]));
    }

    #[test]
    fn one_qualifying_of_two_detections_draws_one_box() {
        let input = test_frame_bytes();
        let other = BoundingBox { xmin: 60, ymin: 20, xmax: 110, ymax: 70 };
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline = pipeline_with(
            vec![
                detection(hand_box(), "hand", 0.8),
                detection(other, "hand", 0.3),
            ],
            classifier.clone(),
        );

        let output = pipeline.process(&input).unwrap();

        assert_eq!(classifier.call_count(), 1);
        assert_eq!(output, annotated_reference(&input, &[hand_box()]));
    }

    #[test]
    fn classifier_failure_skips_only_that_annotation() {
        let input = test_frame_bytes();
        let second = BoundingBox { xmin: 60, ymin: 20, xmax: 110, ymax: 70 };
        let classifier = Arc::new(CountingClassifier::failing_on(vec![1]));
        let pipeline = pipeline_with(
            vec![
                detection(hand_box(), "hand", 0.8),
                detection(second.clone(), "hand", 0.8),
            ],
            classifier.clone(),
        );

        let output = pipeline.process(&input).unwrap();

        // Both detections reached the classifier, only the second annotated.
        assert_eq!(classifier.call_count(), 2);
        assert_eq!(output, annotated_reference(&input, &[second]));
    }

    #[test]
    fn decode_error_drops_the_frame() {
        let classifier = Arc::new(CountingClassifier::new());
        let pipeline = pipeline_with(vec![], classifier);

        let result = pipeline.process(b"not an image");
        assert!(matches!(result, Err(PipelineError::Codec(_))));
    }

    #[test]
    fn detection_error_drops_the_frame() {
        let pipeline = FramePipeline::new(
            Arc::new(FailingDetector),
            Arc::new(CountingClassifier::new()),
            &PipelineConfig { target_class: "hand".into(), confidence_threshold: 0.5 },
        );

        let result = pipeline.process(&test_frame_bytes());
        assert!(matches!(result, Err(PipelineError::Detection(_))));
    }
}
