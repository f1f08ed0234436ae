use crate::{
    error::{ImageGenError, Result},
    models::{catalog_json, find_model, sniff_image_mime, GenerationRequest, TaskSnapshot, TaskStatus},
    server::{upload, AppState},
    tasks::{self, GenerationJob},
};
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::json;
use std::path::PathBuf;

pub async fn models() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "models": catalog_json(),
    }))
}

pub async fn generate(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let form = upload::read_generate_form(&req, payload, &state.config).await?;
    let input_image = form.input_image.clone();

    match accept(&state, form) {
        Ok(task_id) => Ok(HttpResponse::Accepted().json(json!({
            "success": true,
            "task_id": task_id,
            "message": "Generation started",
        }))),
        Err(e) => {
            if let Some(path) = input_image {
                let _ = tokio::fs::remove_file(path).await;
            }
            Err(e)
        }
    }
}

fn accept(state: &AppState, form: upload::GenerateForm) -> Result<String> {
    let api_key = form
        .api_key
        .filter(|key| !key.trim().is_empty())
        .or_else(|| state.gemini.api_key.clone())
        .ok_or_else(|| ImageGenError::ConfigError("API key is required".into()))?;
    let prompt = form
        .prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or_else(|| ImageGenError::InputValidationError("Prompt is required".into()))?;
    let model = form
        .model
        .filter(|model| !model.trim().is_empty())
        .unwrap_or_else(|| state.gemini.model.clone());
    find_model(&model)?;

    let task_id = state.store.create(form.input_image.clone());
    let mut request = GenerationRequest::new(prompt)
        .with_model(model)
        .with_output(state.output_path(&task_id));
    request.input_image = form.input_image;

    log::info!(
        "Task {} accepted ({}, input image: {})",
        task_id,
        request.model_id,
        request.input_image.is_some()
    );
    tasks::spawn(
        state.worker_context(),
        GenerationJob {
            task_id: task_id.clone(),
            api_key,
            request,
        },
    );
    Ok(task_id)
}

pub async fn status(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let task = state.store.get(&path.into_inner())?;

    let mut body = json!({
        "success": true,
        "task_id": task.task_id,
        "status": task.status,
        "progress": task.progress,
        "message": task.message,
        "session_total": state.session.total(),
    });
    if task.status == TaskStatus::Completed && task.result_path.is_some() {
        body["download_url"] = json!(format!("/api/download/{}", task.task_id));
        body["preview_url"] = json!(format!("/api/preview/{}", task.task_id));
    } else if task.status == TaskStatus::Error {
        body["error"] = json!(task.error);
    }
    if let Some(cost) = task.cost {
        body["cost_info"] = json!(cost);
    }
    Ok(HttpResponse::Ok().json(body))
}

pub async fn download(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    serve_image(&state, &path.into_inner(), true).await
}

pub async fn preview(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    serve_image(&state, &path.into_inner(), false).await
}

async fn serve_image(state: &AppState, task_id: &str, attachment: bool) -> Result<HttpResponse> {
    let task = state.store.get(task_id)?;
    let result_path = ready_path(&task)?;

    let bytes = match tokio::fs::read(&result_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImageGenError::NotFound("File".into()))
        }
        Err(e) => return Err(e.into()),
    };

    let mime = sniff_image_mime(&bytes).unwrap_or("image/png");
    let mut response = HttpResponse::Ok();
    response.insert_header((header::CONTENT_TYPE, mime));
    if attachment {
        let filename = result_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("generated_{}.png", task_id));
        response.insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ));
    }
    Ok(response.body(bytes))
}

fn ready_path(task: &TaskSnapshot) -> Result<PathBuf> {
    match (&task.status, &task.result_path) {
        (TaskStatus::Completed, Some(path)) => Ok(path.clone()),
        _ => Err(ImageGenError::NotReady("Image".into())),
    }
}

pub async fn cleanup(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let task = state.store.remove(&path.into_inner()).await?;
    log::info!("Task {} cleaned up", task.task_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task cleaned up",
    })))
}

pub async fn session(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "session_total": state.session.total(),
    }))
}

pub async fn reset_session(state: web::Data<AppState>) -> HttpResponse {
    state.session.reset();
    log::info!("Session cost reset");
    HttpResponse::Ok().json(json!({
        "success": true,
        "session_total": 0.0,
    }))
}
