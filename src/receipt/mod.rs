//! Payment-proof classification

mod classifier;
mod model;
mod ocr;

pub use classifier::{hash_image, ReceiptClassifier};
pub use model::*;
pub use ocr::{HttpOcr, NoopOcr, OcrEngine};
