use crate::{
    cost::SessionCost,
    error::Result,
    gemini::BackendFactory,
    generator::{GeneratorConfig, ImageGenerator},
    models::{GenerationRequest, TaskStatus},
    tasks::TaskStore,
};
use std::sync::Arc;

/// Everything a background generation needs besides its own job.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<TaskStore>,
    pub session: Arc<SessionCost>,
    pub factory: Arc<dyn BackendFactory>,
    pub generator_config: GeneratorConfig,
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub task_id: String,
    pub api_key: String,
    pub request: GenerationRequest,
}

/// Runs the job on its own tokio task. The store keeps the handle and the
/// output path so the task can be aborted and its file removed when it is
/// cleaned up.
pub fn spawn(ctx: WorkerContext, job: GenerationJob) {
    let store = Arc::clone(&ctx.store);
    let task_id = job.task_id.clone();
    store.reserve_output(&task_id, job.request.output_path.clone());
    let handle = tokio::spawn(run(ctx, job));
    store.attach_handle(&task_id, handle);
}

pub async fn run(ctx: WorkerContext, job: GenerationJob) {
    let task_id = job.task_id.clone();
    let outcome = generate(&ctx, &job).await;

    if let Some(input) = &job.request.input_image {
        match tokio::fs::remove_file(input).await {
            Ok(()) => ctx.store.clear_input(&task_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ctx.store.clear_input(&task_id),
            Err(e) => log::warn!("Failed to remove upload {}: {}", input.display(), e),
        }
    }

    let recorded = match outcome {
        Ok(()) => ctx.store.complete(&task_id, job.request.output_path.clone()),
        Err(e) => {
            log::error!("Task {} failed: {}", task_id, e);
            ctx.store.fail(&task_id, e.to_string())
        }
    };

    if let Err(e) = recorded {
        // The task was cleaned up while we were running; nobody will fetch the output.
        log::warn!("Task {} finished but could not be recorded: {}", task_id, e);
        let _ = tokio::fs::remove_file(&job.request.output_path).await;
    } else {
        log::info!("Task {} finished", task_id);
    }
}

async fn generate(ctx: &WorkerContext, job: &GenerationJob) -> Result<()> {
    let task_id = job.task_id.as_str();
    ctx.store
        .advance(task_id, TaskStatus::Initializing, 10, "Initializing generator...")?;

    let backend = ctx.factory.connect(&job.api_key)?;
    let generator = ImageGenerator::new(backend, Arc::clone(&ctx.session))
        .with_config(ctx.generator_config);

    ctx.store
        .advance(task_id, TaskStatus::Generating, 30, "Generating image...")?;

    let charge = generator.charge(&job.request)?;
    ctx.store.record_cost(task_id, charge.cost)?;

    let message = if job.request.input_image.is_some() {
        "Generating image with input..."
    } else {
        "Generating image from prompt..."
    };
    ctx.store.set_message(task_id, message)?;

    generator.execute(&job.request, charge).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageGenError;
    use crate::gemini::ImageBackend;
    use crate::models::{
        Candidate, Content, GenerateContentResponse, InlineData, InlinePayload, Part,
    };
    use async_trait::async_trait;

    struct StaticBackend {
        image_len: usize,
    }

    #[async_trait]
    impl ImageBackend for StaticBackend {
        async fn generate_content(
            &self,
            _model_id: &str,
            _parts: Vec<Part>,
        ) -> Result<GenerateContentResponse> {
            Ok(GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Some(Content {
                        role: None,
                        parts: vec![Part {
                            text: None,
                            inline_data: Some(InlineData {
                                mime_type: "image/png".into(),
                                data: InlinePayload::Raw(vec![3u8; self.image_len]),
                            }),
                        }],
                    }),
                    finish_reason: None,
                }],
            })
        }
    }

    struct StaticFactory {
        image_len: usize,
    }

    impl BackendFactory for StaticFactory {
        fn connect(&self, api_key: &str) -> Result<Arc<dyn ImageBackend>> {
            if api_key == "bad" {
                return Err(ImageGenError::ConfigError("rejected key".into()));
            }
            Ok(Arc::new(StaticBackend {
                image_len: self.image_len,
            }))
        }
    }

    fn context(image_len: usize) -> WorkerContext {
        WorkerContext {
            store: Arc::new(TaskStore::new()),
            session: Arc::new(SessionCost::new()),
            factory: Arc::new(StaticFactory { image_len }),
            generator_config: GeneratorConfig::default(),
        }
    }

    fn job(ctx: &WorkerContext, dir: &std::path::Path, api_key: &str, input: Option<std::path::PathBuf>) -> GenerationJob {
        let task_id = ctx.store.create(input.clone());
        let mut request = GenerationRequest::new("a fox in the snow")
            .with_output(dir.join(format!("generated_{}.png", task_id)));
        request.input_image = input;
        GenerationJob {
            task_id,
            api_key: api_key.to_string(),
            request,
        }
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(2000);
        let job = job(&ctx, dir.path(), "key", None);
        let task_id = job.task_id.clone();
        let output = job.request.output_path.clone();

        run(ctx.clone(), job).await;

        let task = ctx.store.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.result_path.as_ref(), Some(&output));
        assert!(task.cost.is_some());
        assert_eq!(std::fs::read(&output).unwrap().len(), 2000);
        assert!(ctx.session.total() > 0.0);
    }

    #[tokio::test]
    async fn test_no_image_fails_and_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(10);
        let job = job(&ctx, dir.path(), "key", None);
        let task_id = job.task_id.clone();

        run(ctx.clone(), job).await;

        let task = ctx.store.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, 30);
        assert_eq!(task.error.as_deref(), Some("No image generated in response"));
        // Billed for the attempt.
        assert!(ctx.session.total() > 0.0);
    }

    #[tokio::test]
    async fn test_bad_key_fails_while_initializing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(2000);
        let job = job(&ctx, dir.path(), "bad", None);
        let task_id = job.task_id.clone();

        run(ctx.clone(), job).await;

        let task = ctx.store.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, 10);
        assert!(task.cost.is_none());
        assert_eq!(ctx.session.total(), 0.0);
    }

    #[tokio::test]
    async fn test_upload_removed_on_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        for (image_len, expected) in [(2000, TaskStatus::Completed), (10, TaskStatus::Error)] {
            let ctx = context(image_len);
            let input = dir.path().join(format!("upload_{}.png", image_len));
            std::fs::write(&input, b"\x89PNG\r\n\x1a\n").unwrap();
            let job = job(&ctx, dir.path(), "key", Some(input.clone()));
            let task_id = job.task_id.clone();

            run(ctx.clone(), job).await;

            assert_eq!(ctx.store.get(&task_id).unwrap().status, expected);
            assert!(!input.exists());
        }
    }

    #[tokio::test]
    async fn test_spawned_worker_is_pollable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(2000);
        let job = job(&ctx, dir.path(), "key", None);
        let task_id = job.task_id.clone();

        spawn(ctx.clone(), job);

        let mut status = ctx.store.get(&task_id).unwrap().status;
        for _ in 0..200 {
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            status = ctx.store.get(&task_id).unwrap().status;
        }
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cleanup_during_write_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(64 * 1024 * 1024);
        let job = job(&ctx, dir.path(), "key", None);
        let task_id = job.task_id.clone();
        let output = job.request.output_path.clone();

        spawn(ctx.clone(), job);
        for _ in 0..1000 {
            if output.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(output.exists());

        ctx.store.remove(&task_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        assert!(ctx.store.get(&task_id).is_err());
        assert!(!output.exists());
    }
}
