use crate::{
    cost::{self, SessionCost},
    error::{ImageGenError, Result},
    gemini::ImageBackend,
    logger,
    models::{
        find_model, CostBreakdown, GenerateContentResponse, GeneratedImage, GenerationRequest,
        InputImage, ModelDescriptor, Part,
    },
};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Inline image parts at or below this many bytes are treated as placeholders.
/// Empirical guard against stub parts from the endpoint; tune via [`GeneratorConfig`].
pub const MIN_IMAGE_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    pub min_image_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_image_bytes: MIN_IMAGE_BYTES,
        }
    }
}

/// What an attempt was charged, recorded before the endpoint is called.
#[derive(Debug, Clone, Copy)]
pub struct Charge {
    pub model: &'static ModelDescriptor,
    pub cost: CostBreakdown,
    pub session_total: f64,
}

pub struct ImageGenerator {
    backend: Arc<dyn ImageBackend>,
    session: Arc<SessionCost>,
    config: GeneratorConfig,
    in_flight: AtomicBool,
}

impl ImageGenerator {
    pub fn new(backend: Arc<dyn ImageBackend>, session: Arc<SessionCost>) -> Self {
        Self {
            backend,
            session,
            config: GeneratorConfig::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn session(&self) -> &Arc<SessionCost> {
        &self.session
    }

    /// Claims the generator for one interactive generation. Returns `None`
    /// while another claim is alive; the claim is released on drop.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage> {
        let charge = self.charge(request)?;
        self.execute(request, charge).await
    }

    /// Validates the request and adds its estimated cost to the session.
    /// The charge stands whether or not the generation later succeeds.
    pub fn charge(&self, request: &GenerationRequest) -> Result<Charge> {
        let model = find_model(&request.model_id)?;
        if request.prompt.trim().is_empty() {
            return Err(ImageGenError::InputValidationError(
                "Prompt is required".into(),
            ));
        }

        let cost = cost::estimate(&request.prompt, model, request.input_image.is_some());
        let session_total = self.session.charge(&cost);
        log::debug!(
            "Charged ${:.6} for {} ({} chars), session total ${:.6}",
            cost.total_cost,
            model.id,
            cost.input_chars,
            session_total
        );

        Ok(Charge {
            model,
            cost,
            session_total,
        })
    }

    pub async fn execute(&self, request: &GenerationRequest, charge: Charge) -> Result<GeneratedImage> {
        let parts = match &request.input_image {
            Some(path) => {
                let image = InputImage::load(path).await?;
                log::debug!(
                    "Loaded input image {} ({} bytes, {})",
                    path.display(),
                    image.data.len(),
                    image.mime_type
                );
                vec![
                    Part::image(image.data, image.mime_type),
                    Part::text(request.prompt.clone()),
                ]
            }
            None => vec![Part::text(request.prompt.clone())],
        };

        let response = {
            let _timer = logger::timer("generateContent");
            self.backend
                .generate_content(charge.model.id, parts)
                .await
                .map_err(|e| ImageGenError::GenerationFailed(e.to_string()))?
        };

        let image = find_image(&response, self.config.min_image_bytes)
            .ok_or(ImageGenError::NoImageProduced)?;
        tokio::fs::write(&request.output_path, image.as_ref()).await?;
        log::info!(
            "Image generated and saved to: {}",
            request.output_path.display()
        );

        Ok(GeneratedImage {
            path: request.output_path.clone(),
            model: charge.model.id.to_string(),
            cost: charge.cost,
            session_total: charge.session_total,
        })
    }
}

pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// First inline `image/*` part, across all candidates, whose decoded bytes
/// exceed `min_bytes`. Parts whose payload does not decode are skipped.
pub fn find_image(response: &GenerateContentResponse, min_bytes: usize) -> Option<Cow<'_, [u8]>> {
    response
        .candidates
        .iter()
        .flat_map(|candidate| candidate.parts())
        .filter_map(|part| part.inline_data.as_ref())
        .filter(|inline| inline.mime_type.starts_with("image/"))
        .filter_map(|inline| inline.data.decode())
        .find(|bytes| bytes.len() > min_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, Content, InlineData, InlinePayload};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Mutex;

    struct FakeBackend {
        response: Mutex<Option<Result<GenerateContentResponse>>>,
        seen: Mutex<Vec<(String, Vec<Part>)>>,
    }

    impl FakeBackend {
        fn replying(response: Result<GenerateContentResponse>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ImageBackend for FakeBackend {
        async fn generate_content(
            &self,
            model_id: &str,
            parts: Vec<Part>,
        ) -> Result<GenerateContentResponse> {
            self.seen.lock().unwrap().push((model_id.to_string(), parts));
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(GenerateContentResponse::default()))
        }
    }

    fn inline(mime: &str, data: InlinePayload) -> Part {
        Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime.to_string(),
                data,
            }),
        }
    }

    fn response_of(candidates: Vec<Vec<Part>>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: candidates
                .into_iter()
                .map(|parts| Candidate {
                    content: Some(Content { role: None, parts }),
                    finish_reason: None,
                })
                .collect(),
        }
    }

    fn generator(backend: Arc<FakeBackend>) -> ImageGenerator {
        ImageGenerator::new(backend, Arc::new(SessionCost::new()))
    }

    #[tokio::test]
    async fn test_writes_first_real_image() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.png");
        let image = vec![7u8; 1500];
        let backend = FakeBackend::replying(Ok(response_of(vec![vec![
            Part::text("Here is your image"),
            inline("image/png", InlinePayload::Raw(image.clone())),
        ]])));

        let generator = generator(backend.clone());
        let request = GenerationRequest::new("a red circle").with_output(&output);
        let result = generator.generate(&request).await.unwrap();

        assert_eq!(result.path, output);
        assert_eq!(std::fs::read(&output).unwrap(), image);
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].0, "gemini-2.5-flash-image-preview");
        assert_eq!(seen[0].1.len(), 1);
        assert_eq!(seen[0].1[0].text.as_deref(), Some("a red circle"));
    }

    #[tokio::test]
    async fn test_small_image_part_is_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::replying(Ok(response_of(vec![vec![inline(
            "image/png",
            InlinePayload::Raw(vec![1u8; 999]),
        )]])));

        let generator = generator(backend);
        let request = GenerationRequest::new("tiny").with_output(dir.path().join("out.png"));
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, ImageGenError::NoImageProduced));
        assert!(!dir.path().join("out.png").exists());
        // Charged for the attempt anyway.
        assert!(generator.session().total() > 0.0);
    }

    #[tokio::test]
    async fn test_scans_past_bad_parts_and_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let good = vec![42u8; 2048];
        let backend = FakeBackend::replying(Ok(response_of(vec![
            vec![
                inline("text/plain", InlinePayload::Raw(vec![0u8; 5000])),
                inline("image/png", InlinePayload::Base64("%%%%".repeat(400))),
            ],
            vec![inline("image/jpeg", InlinePayload::Base64(STANDARD.encode(&good)))],
        ])));

        let generator = generator(backend);
        let request = GenerationRequest::new("scan").with_output(dir.path().join("out.jpg"));
        generator.generate(&request).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("out.jpg")).unwrap(), good);
    }

    #[tokio::test]
    async fn test_backend_error_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::replying(Err(ImageGenError::TransportError(
            "connection reset".into(),
        )));

        let generator = generator(backend);
        let request = GenerationRequest::new("x").with_output(dir.path().join("out.png"));
        match generator.generate(&request).await.unwrap_err() {
            ImageGenError::GenerationFailed(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_image_goes_before_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.gif");
        std::fs::write(&input, b"GIF89a\x01\x00\x01\x00\x00\x00\x00").unwrap();
        let backend = FakeBackend::replying(Ok(response_of(vec![vec![inline(
            "image/png",
            InlinePayload::Raw(vec![9u8; 1001]),
        )]])));

        let generator = generator(backend.clone());
        let request = GenerationRequest::new("make it snow")
            .with_input_image(&input)
            .with_output(dir.path().join("out.png"));
        let result = generator.generate(&request).await.unwrap();

        assert!(result.cost.input_image_cost > 0.0);
        let seen = backend.seen.lock().unwrap();
        let parts = &seen[0].1;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].inline_data.as_ref().unwrap().mime_type, "image/gif");
        assert_eq!(parts[1].text.as_deref(), Some("make it snow"));
    }

    #[tokio::test]
    async fn test_validation_happens_before_charging() {
        let backend = FakeBackend::replying(Ok(GenerateContentResponse::default()));
        let generator = generator(backend);

        let err = generator
            .generate(&GenerationRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::InputValidationError(_)));

        let err = generator
            .generate(&GenerationRequest::new("ok").with_model("unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::ConfigError(_)));
        assert_eq!(generator.session().total(), 0.0);
    }

    #[tokio::test]
    async fn test_session_accumulates_successes() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(SessionCost::new());
        let mut expected = 0.0;
        for i in 0..3 {
            let backend = FakeBackend::replying(Ok(response_of(vec![vec![inline(
                "image/png",
                InlinePayload::Raw(vec![1u8; 1200]),
            )]])));
            let generator = ImageGenerator::new(backend, session.clone());
            let request = GenerationRequest::new("p".repeat(10 * (i + 1)))
                .with_output(dir.path().join(format!("{}.png", i)));
            expected += generator.generate(&request).await.unwrap().cost.total_cost;
        }
        assert!((session.total() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_flight_guard() {
        let generator = generator(FakeBackend::replying(Ok(GenerateContentResponse::default())));
        let guard = generator.try_begin();
        assert!(guard.is_some());
        assert!(generator.try_begin().is_none());
        drop(guard);
        assert!(generator.try_begin().is_some());
    }

    #[test]
    fn test_threshold_is_tunable() {
        let response = response_of(vec![vec![inline("image/png", InlinePayload::Raw(vec![1; 10]))]]);
        assert!(find_image(&response, MIN_IMAGE_BYTES).is_none());
        assert!(find_image(&response, 5).is_some());
    }
}
