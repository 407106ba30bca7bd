use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use helmwatch::{
    provider::{BoxError, HelmetClassifier, PlateLocator, TextReader},
    render::{PLATE_COLOR, VIOLATION_COLOR},
    util, BoundingBox, Detection, EvidenceRenderer, PipelineError, PipelineOptions,
    RecognizedText, ViolationPipeline, PLATE_LABEL, WITHOUT_PROTECTION_LABEL,
    WITH_PROTECTION_LABEL,
};
use image::{ImageFormat, Rgb, RgbImage};

struct ScriptedClassifier(Vec<Detection>);

impl HelmetClassifier for ScriptedClassifier {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, BoxError> {
        Ok(self.0.clone())
    }
}

struct ScriptedLocator(Vec<Detection>);

impl PlateLocator for ScriptedLocator {
    fn locate(
        &self,
        _frame: &RgbImage,
        _confidence_floor: f32,
    ) -> Result<Vec<Detection>, BoxError> {
        Ok(self.0.clone())
    }
}

struct ScriptedReader(Vec<RecognizedText>);

impl TextReader for ScriptedReader {
    fn read(&self, _crop: &RgbImage) -> Result<Vec<RecognizedText>, BoxError> {
        Ok(self.0.clone())
    }
}

struct FailingReader;

impl TextReader for FailingReader {
    fn read(&self, _crop: &RgbImage) -> Result<Vec<RecognizedText>, BoxError> {
        Err("ocr backend crashed".into())
    }
}

struct CountingReader {
    spans: Vec<RecognizedText>,
    calls: Arc<AtomicUsize>,
}

impl TextReader for CountingReader {
    fn read(&self, _crop: &RgbImage) -> Result<Vec<RecognizedText>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.spans.clone())
    }
}

fn detection(label: &str, confidence: f32, bounds: BoundingBox) -> Detection {
    Detection {
        label: label.to_string(),
        confidence,
        bounds,
    }
}

fn span(text: &str, confidence: f32) -> RecognizedText {
    RecognizedText {
        text: text.to_string(),
        confidence,
    }
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(640, 480, Rgb([40, 40, 40]))
}

fn pipeline(
    detections: Vec<Detection>,
    candidates: Vec<Detection>,
    reader: Box<dyn TextReader>,
) -> ViolationPipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    ViolationPipeline::from_providers(
        Box::new(ScriptedClassifier(detections)),
        Box::new(ScriptedLocator(candidates)),
        reader,
        EvidenceRenderer::new(None),
        PipelineOptions::default(),
    )
}

#[test]
fn empty_classifier_output_yields_clean_verdict() {
    let pipeline = pipeline(vec![], vec![], Box::new(ScriptedReader(vec![])));
    let input = frame();

    let verdict = pipeline.evaluate(&input).expect("evaluation failed");

    assert!(!verdict.violation_detected());
    assert_eq!(verdict.violation_type(), None);
    assert_eq!(verdict.plate_text(), None);
    // Clean frames pass through pixel-identical.
    assert_eq!(verdict.annotated_frame().as_raw(), input.as_raw());
}

#[test]
fn first_violation_label_wins_over_later_detections() {
    let pipeline = pipeline(
        vec![
            detection(WITH_PROTECTION_LABEL, 0.95, BoundingBox::new(5, 5, 40, 40)),
            detection(
                WITHOUT_PROTECTION_LABEL,
                0.6,
                BoundingBox::new(200, 50, 260, 150),
            ),
            detection(
                WITHOUT_PROTECTION_LABEL,
                0.9,
                BoundingBox::new(400, 50, 460, 150),
            ),
        ],
        vec![],
        Box::new(ScriptedReader(vec![])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.violation_type(), Some(WITHOUT_PROTECTION_LABEL));
    // The first matching detection is the one annotated, not the later
    // higher-confidence one.
    assert_eq!(*verdict.annotated_frame().get_pixel(200, 50), VIOLATION_COLOR);
    assert_eq!(*verdict.annotated_frame().get_pixel(400, 50), Rgb([40, 40, 40]));
}

#[test]
fn violation_without_plate_candidates_keeps_plate_absent() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![],
        Box::new(ScriptedReader(vec![span("never read", 0.9)])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.violation_type(), Some(WITHOUT_PROTECTION_LABEL));
    assert_eq!(verdict.plate_text(), None);
}

#[test]
fn plate_read_is_normalized() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(ScriptedReader(vec![span("rj10 ab-1234", 0.8)])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");

    assert_eq!(verdict.plate_text(), Some("RJ10AB1234"));
}

#[test]
fn reader_failure_degrades_to_no_plate() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(FailingReader),
    );

    let verdict = pipeline.evaluate(&frame()).expect("reader failure escaped evaluate");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.plate_text(), None);
}

#[test]
fn empty_normalized_read_counts_as_no_plate() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(ScriptedReader(vec![span("--- !!", 0.5)])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.plate_text(), None);
    // No plate box is drawn when nothing was read.
    let has_green = verdict
        .annotated_frame()
        .pixels()
        .any(|pixel| *pixel == PLATE_COLOR);
    assert!(!has_green);
}

#[test]
fn reader_runs_at_most_once_per_violation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![
            detection(PLATE_LABEL, 0.7, BoundingBox::new(100, 100, 180, 130)),
            detection(PLATE_LABEL, 0.6, BoundingBox::new(300, 100, 380, 130)),
        ],
        Box::new(CountingReader {
            spans: vec![],
            calls: Arc::clone(&calls),
        }),
    );

    pipeline.evaluate(&frame()).expect("evaluation failed");

    // Only the first candidate crop is ever read, with no retry.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn degenerate_locator_box_is_tolerated() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(PLATE_LABEL, 0.2, BoundingBox::new(30, 30, 30, 30))],
        Box::new(ScriptedReader(vec![])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.plate_text(), None);
}

#[test]
fn source_frame_is_never_mutated() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(ScriptedReader(vec![span("ka01cd9876", 0.9)])),
    );
    let input = frame();
    let pristine = input.clone();

    let verdict = pipeline.evaluate(&input).expect("evaluation failed");

    assert_eq!(input.as_raw(), pristine.as_raw());
    // ... while the annotated copy did change.
    assert_ne!(verdict.annotated_frame().as_raw(), pristine.as_raw());
}

#[test]
fn evidence_colors_follow_convention() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(ScriptedReader(vec![span("rj10ab1234", 0.8)])),
    );

    let verdict = pipeline.evaluate(&frame()).expect("evaluation failed");
    let annotated = verdict.annotated_frame();

    // Red on the violation box corner, green on the padded plate box corner.
    assert_eq!(*annotated.get_pixel(10, 10), VIOLATION_COLOR);
    assert_eq!(*annotated.get_pixel(95, 95), PLATE_COLOR);
}

#[test]
fn undecodable_upload_is_a_terminal_input_error() {
    let pipeline = pipeline(vec![], vec![], Box::new(ScriptedReader(vec![])));

    let err = pipeline
        .evaluate_bytes(b"definitely not an image")
        .unwrap_err();

    assert!(matches!(err, PipelineError::InputDecode(_)));
}

#[test]
fn decoded_upload_runs_the_full_workflow() {
    let pipeline = pipeline(
        vec![detection(
            WITHOUT_PROTECTION_LABEL,
            0.8,
            BoundingBox::new(10, 10, 50, 60),
        )],
        vec![detection(
            PLATE_LABEL,
            0.7,
            BoundingBox::new(100, 100, 180, 130),
        )],
        Box::new(ScriptedReader(vec![span("rj10 ab-1234", 0.8)])),
    );
    let mut bytes = Vec::new();
    frame()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("failed to encode frame");

    let verdict = pipeline.evaluate_bytes(&bytes).expect("evaluation failed");

    assert!(verdict.violation_detected());
    assert_eq!(verdict.violation_type(), Some(WITHOUT_PROTECTION_LABEL));
    assert_eq!(verdict.plate_text(), Some("RJ10AB1234"));
}

#[test]
fn model_boxes_keep_edge_pixels() {
    // Half-open clipping: a detection reaching the right or bottom edge
    // keeps its last pixel line instead of losing it to the clamp.
    let at_extent = BoundingBox::from_model_output(600.0, 400.0, 700.0, 520.0, 640, 480);
    assert_eq!(at_extent, BoundingBox::new(600, 400, 640, 480));

    let negative = BoundingBox::from_model_output(-10.0, -5.0, 20.5, 20.5, 640, 480);
    assert_eq!(negative, BoundingBox::new(0, 0, 20, 20));
}

#[test]
fn plate_padding_clamps_at_frame_bounds() {
    let near_origin = BoundingBox::new(0, 0, 20, 20).expanded(5, 100, 100);
    assert_eq!(near_origin, BoundingBox::new(0, 0, 25, 25));

    let near_extent = BoundingBox::new(90, 90, 99, 99).expanded(5, 100, 100);
    assert_eq!(near_extent, BoundingBox::new(85, 85, 100, 100));

    let interior = BoundingBox::new(40, 40, 60, 60).expanded(5, 100, 100);
    assert_eq!(interior, BoundingBox::new(35, 35, 65, 65));
}

#[test]
fn normalization_is_idempotent() {
    let samples = [
        "rj10 ab-1234",
        "--- !!",
        "KA01cd9876",
        "mh 12 de 1433",
        "",
        "日本-123",
    ];
    for raw in samples {
        let once = util::normalize_plate(raw);
        assert_eq!(util::normalize_plate(&once), once, "sample {raw:?}");
    }
}

#[test]
fn normalization_strips_and_uppercases() {
    assert_eq!(util::normalize_plate("rj10 ab-1234"), "RJ10AB1234");
    assert_eq!(util::normalize_plate("--- !!"), "");
    assert_eq!(util::normalize_plate("dl.3.c.ab. 1111"), "DL3CAB1111");
}

#[test]
fn evidence_file_name_honors_extension_hint() {
    assert!(util::evidence_file_name(Some("png")).ends_with(".png"));
    assert!(util::evidence_file_name(Some(".jpeg")).ends_with(".jpeg"));
    assert!(util::evidence_file_name(None).ends_with(".jpg"));
    assert!(util::evidence_file_name(Some("")).ends_with(".jpg"));
}
