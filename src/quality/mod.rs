//! Image quality gate: a pure blur check plus AI-assisted quality and
//! condition scoring, both advisory. Failures fail open so an upload is
//! never rejected because an external call went down.

pub mod blur;
pub mod score;

use crate::genai::ModelClient;
use crate::models::{Photo, PhotoAssessment};

pub use blur::{BlurVerdict, detect_blur};
pub use score::assess_photo;

/// Run both checks for one photo.
pub async fn gate_photo(
    model: &ModelClient,
    photo: &Photo,
    index: usize,
    blur_threshold: f64,
) -> PhotoAssessment {
    let verdict = detect_blur(&photo.bytes, blur_threshold);
    let report = assess_photo(model, photo).await;
    PhotoAssessment {
        index,
        is_blurry: verdict.is_blurry,
        laplacian_variance: verdict.variance,
        report,
    }
}
