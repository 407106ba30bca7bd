use std::path::{Path, PathBuf};

use helmwatch::{util, ViolationPipelineBuilder};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

const EVIDENCE_DIR: &str = "evidence_uploads";

fn main() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let image_path = std::env::args()
        .nth(1)
        .expect("Usage: helmwatch <image-file>");
    let bytes = std::fs::read(&image_path).expect("Failed to read input image");

    let pipeline = ViolationPipelineBuilder::new()
        .helmet_model("models/helmet_detector.onnx")
        .plate_model("models/license_plate_detector.onnx")
        .reader_model("models/plate_rec.onnx", "models/plate_keys.txt")
        .build()
        .expect("Failed to build pipeline");

    let verdict = pipeline
        .evaluate_bytes(&bytes)
        .expect("Failed to evaluate frame");

    match (verdict.violation_type(), verdict.plate_text()) {
        (None, _) => println!("No violation was detected."),
        (Some(kind), None) => {
            println!("Violation ({kind}) detected, but the license plate was unreadable.")
        }
        (Some(kind), Some(plate)) => {
            let extension = Path::new(&image_path)
                .extension()
                .and_then(|ext| ext.to_str());
            let file_name = util::evidence_file_name(extension);
            let save_path = PathBuf::from(EVIDENCE_DIR).join(&file_name);
            std::fs::create_dir_all(EVIDENCE_DIR).expect("Failed to create evidence directory");
            verdict
                .annotated_frame()
                .save(&save_path)
                .expect("Failed to save evidence image");
            println!(
                "Violation ({kind}) by plate {plate}. Evidence saved to {}.",
                save_path.display()
            );
        }
    }
}
