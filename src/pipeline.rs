use crate::config::PipelineConfig;
use crate::evidence::{read_tags, recognize_visual};
use crate::fusion::{self, FusionHints};
use crate::genai::ModelClient;
use crate::market::MarketClient;
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, EnrichRequest, EnrichResponse, Photo, PhotoAssessment,
    PhotoPayload, QualityReport, StageReport,
};
use crate::pricing::{self, PricingInput};
use crate::quality;
use crate::stockimage::{self, StockImageInput};
use crate::websearch::SearchClient;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    model: Arc<ModelClient>,
    market: Arc<MarketClient>,
    search: Arc<SearchClient>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        model: ModelClient,
        market: MarketClient,
        search: SearchClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            model: Arc::new(model),
            market: Arc::new(market),
            search: Arc::new(search),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            PipelineConfig::from_env(),
            ModelClient::from_env(),
            MarketClient::from_env(),
            SearchClient::from_env(),
        )
    }

    /// Photos -> quality gate -> concurrent evidence extraction -> fusion.
    /// Ends in auto-accept or needs-disambiguation; enrichment runs
    /// separately once a candidate is fixed. The only fatal preconditions
    /// are malformed input and the complete absence of usable photos.
    pub async fn analyze(
        &self,
        request: AnalyzeRequest,
        cancel: CancellationToken,
    ) -> Result<AnalyzeResponse, PipelineError> {
        let mut stages = Vec::new();

        let photos = self
            .capture_stage("prepare_photos", &mut stages, async {
                let photos = decode_photos(&request.photos, self.config.max_photos)?;
                let output = json!({
                    "count": photos.len(),
                    "mime_types": photos.iter().map(|p| p.mime_type.as_str()).collect::<Vec<_>>(),
                });
                Ok(StageOutcome::new(photos, output))
            })
            .await?;

        let quality = self
            .capture_stage("quality_gate", &mut stages, async {
                let mut assessments = Vec::with_capacity(photos.len());
                for (index, photo) in photos.iter().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(PipelineError::cancelled("quality_gate"));
                    }
                    let assessment = tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(PipelineError::cancelled("quality_gate"));
                        }
                        assessment = self.gate_photo_with_timeout(photo, index) => assessment,
                    };
                    assessments.push(assessment);
                }
                let blurry = assessments.iter().filter(|a| a.is_blurry).count();
                let output = json!({
                    "photos": assessments.len(),
                    "blurry": blurry,
                    "scores": assessments.iter().map(|a| a.report.overall_score).collect::<Vec<_>>(),
                });
                Ok(StageOutcome::new(assessments, output))
            })
            .await?;

        // Tag reading and visual recognition have no data dependency on
        // each other; fusion is the join point.
        let (tags, visual) = self
            .capture_stage("extract_evidence", &mut stages, async {
                let dur = self.config.stage_timeout;
                let pair = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(PipelineError::cancelled("extract_evidence"));
                    }
                    pair = async {
                        tokio::join!(
                            stage_or(dur, "tag_reader", read_tags(&self.model, &photos), Default::default),
                            stage_or(dur, "visual_recognizer", recognize_visual(&self.model, &photos), Default::default),
                        )
                    } => pair,
                };
                let output = json!({
                    "tag_brand": pair.0.brand.clone(),
                    "tag_codes": pair.0.model_codes.len(),
                    "visual_brand": pair.1.visual_brand.clone(),
                    "visual_confidence": pair.1.confidence,
                });
                Ok(StageOutcome::new(pair, output))
            })
            .await?;

        let hints = FusionHints {
            condition_hint: request.condition_hint.clone(),
            marketplace: request.marketplace,
            tone: request.tone,
        };

        let outcome = self
            .capture_stage("fuse_listing", &mut stages, async {
                let dur = self.config.stage_timeout;
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(PipelineError::cancelled("fuse_listing"));
                    }
                    outcome = stage_or(
                        dur,
                        "fusion",
                        fusion::fuse(&self.model, &photos, &tags, &visual, &hints),
                        || fusion::fallback_outcome(&tags, &visual, &hints),
                    ) => outcome,
                };
                let output = json!({
                    "candidates": outcome.candidates.len(),
                    "state": outcome.state,
                    "top_title": outcome.candidates.first().map(|c| c.title.clone()),
                    "top_confidence": outcome.candidates.first().map(|c| c.confidence),
                });
                Ok(StageOutcome::new(outcome, output))
            })
            .await?;

        Ok(AnalyzeResponse {
            request_id: new_request_id(),
            state: outcome.state,
            candidates: outcome.candidates,
            quality,
            stages,
        })
    }

    /// Enrich a fixed candidate: market pricing and stock image resolution
    /// run concurrently; either failing or timing out leaves the other's
    /// result intact.
    pub async fn enrich(
        &self,
        request: EnrichRequest,
        cancel: CancellationToken,
    ) -> Result<EnrichResponse, PipelineError> {
        if request.brand.trim().is_empty() && request.title.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "enrich",
                "brand or title required",
            ));
        }

        let mut stages = Vec::new();
        let dur = self.config.stage_timeout;

        let pricing_input = PricingInput {
            brand: request.brand.clone(),
            title: request.title.clone(),
            category: request.category.clone(),
            ai_estimated_price: request.ai_estimated_price,
        };
        let stock_input = StockImageInput {
            brand: request.brand.clone(),
            title: request.title.clone(),
            model_code: request.model_code.clone(),
        };

        let ai_price = request.ai_estimated_price;
        let pricing_fut = timed(stage_or(
            dur,
            "market_pricing",
            pricing::analyze(&self.market, &pricing_input),
            move || pricing::snapshot_from_samples(&[], &[], ai_price),
        ));
        let stock_fut = timed(stage_or(
            dur,
            "stock_image",
            stockimage::resolve(&self.model, &self.search, &stock_input),
            Default::default,
        ));

        let ((pricing, pricing_ms), (stock, stock_ms)) = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PipelineError::cancelled("enrich"));
            }
            pair = async { tokio::join!(pricing_fut, stock_fut) } => pair,
        };

        crate::metrics::stage_elapsed("market_pricing", pricing_ms);
        stages.push(StageReport::new(
            "market_pricing",
            pricing_ms,
            json!({
                "sold_count": pricing.sold_count,
                "competitor_count": pricing.competitor_count,
                "has_stats": pricing.sold_prices.is_some(),
            }),
        ));
        crate::metrics::stage_elapsed("stock_image", stock_ms);
        stages.push(StageReport::new(
            "stock_image",
            stock_ms,
            json!({
                "found": stock.stock_image_url.is_some(),
                "source": stock.source.clone(),
                "confidence": stock.confidence,
            }),
        ));

        Ok(EnrichResponse {
            request_id: new_request_id(),
            pricing,
            stock_image: stock,
            stages,
        })
    }

    /// Quality gate only, for callers that pre-filter before the full run.
    pub async fn quality_only(
        &self,
        payloads: &[PhotoPayload],
        cancel: CancellationToken,
    ) -> Result<Vec<PhotoAssessment>, PipelineError> {
        let photos = decode_photos(payloads, self.config.max_photos)?;
        let mut assessments = Vec::with_capacity(photos.len());
        for (index, photo) in photos.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled("quality_gate"));
            }
            assessments.push(self.gate_photo_with_timeout(photo, index).await);
        }
        Ok(assessments)
    }

    /// Gate one photo; a scoring timeout keeps the pure blur verdict and
    /// falls back to the passing report.
    async fn gate_photo_with_timeout(&self, photo: &Photo, index: usize) -> PhotoAssessment {
        let threshold = self.config.blur_variance_threshold;
        match timeout(
            self.config.stage_timeout,
            quality::gate_photo(&self.model, photo, index, threshold),
        )
        .await
        {
            Ok(assessment) => assessment,
            Err(_) => {
                warn!(
                    target = "snaplist.pipeline",
                    index, "quality scoring timed out, failing open"
                );
                let verdict = quality::detect_blur(&photo.bytes, threshold);
                PhotoAssessment {
                    index,
                    is_blurry: verdict.is_blurry,
                    laplacian_variance: verdict.variance,
                    report: QualityReport::passing_default(),
                }
            }
        }
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

/// Await a stage future with a deadline; on timeout, log and substitute
/// the stage's documented fallback value instead of failing the request.
async fn stage_or<T>(
    dur: std::time::Duration,
    stage: &'static str,
    fut: impl Future<Output = T>,
    fallback: impl FnOnce() -> T,
) -> T {
    match timeout(dur, fut).await {
        Ok(value) => value,
        Err(_) => {
            warn!(
                target = "snaplist.pipeline",
                stage, "stage timed out, using fallback value"
            );
            fallback()
        }
    }
}

async fn timed<T>(fut: impl Future<Output = T>) -> (T, u128) {
    let started = Instant::now();
    let value = fut.await;
    (value, started.elapsed().as_millis())
}

fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

fn decode_photos(payloads: &[PhotoPayload], max_photos: usize) -> Result<Vec<Photo>, PipelineError> {
    if payloads.is_empty() {
        return Err(PipelineError::invalid_input(
            "prepare_photos",
            "no photos provided",
        ));
    }
    if payloads.len() > max_photos {
        return Err(PipelineError::invalid_input(
            "prepare_photos",
            "too_many_photos",
        ));
    }

    let mut photos = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let mime = payload.mime_type.trim().to_lowercase();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(PipelineError::invalid_input(
                "prepare_photos",
                format!("unsupported_mime_type: {mime}"),
            ));
        }
        let bytes = STANDARD
            .decode(payload.data.trim())
            .map_err(|_| PipelineError::invalid_input("prepare_photos", "invalid_base64_photo"))?;
        if bytes.is_empty() {
            return Err(PipelineError::invalid_input(
                "prepare_photos",
                "empty_photo",
            ));
        }
        photos.push(Photo {
            mime_type: mime,
            bytes,
        });
    }
    Ok(photos)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
    Cancelled,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn cancelled(stage: &'static str) -> Self {
        Self {
            stage,
            message: "request cancelled".into(),
            kind: PipelineErrorKind::Cancelled,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
