use crate::{
    config::ServerConfig,
    error::{ImageGenError, Result},
};
use actix_multipart::Multipart;
use actix_web::{web, HttpMessage, HttpRequest};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

/// Fields of `POST /api/generate`. The uploaded image, if any, is already
/// saved under the upload folder.
#[derive(Debug, Default)]
pub struct GenerateForm {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub input_image: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct GenerateJson {
    api_key: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
}

struct UploadedFile {
    filename: String,
    data: Vec<u8>,
}

pub async fn read_generate_form(
    req: &HttpRequest,
    payload: web::Payload,
    config: &ServerConfig,
) -> Result<GenerateForm> {
    let content_type = req.content_type().to_ascii_lowercase();
    if content_type.starts_with("multipart/form-data") {
        read_multipart(req, payload, config).await
    } else if content_type.is_empty() || content_type.contains("json") {
        let body = read_body(payload, config.max_upload_bytes).await?;
        let json: GenerateJson = serde_json::from_slice(&body)
            .map_err(|e| ImageGenError::InputValidationError(format!("Invalid JSON body: {}", e)))?;
        Ok(GenerateForm {
            api_key: json.api_key,
            model: json.model,
            prompt: json.prompt,
            input_image: None,
        })
    } else {
        Err(ImageGenError::InputValidationError(format!(
            "Unsupported content type: {}",
            content_type
        )))
    }
}

async fn read_body(mut payload: web::Payload, limit: usize) -> Result<web::BytesMut> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            ImageGenError::InputValidationError(format!("Failed to read request body: {}", e))
        })?;
        if body.len() + chunk.len() > limit {
            return Err(ImageGenError::InputValidationError(
                "Request body too large".into(),
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn read_multipart(
    req: &HttpRequest,
    payload: web::Payload,
    config: &ServerConfig,
) -> Result<GenerateForm> {
    let mut multipart = Multipart::new(req.headers(), payload);
    let mut form = GenerateForm::default();
    let mut upload: Option<UploadedFile> = None;
    let mut total = 0usize;

    while let Some(mut field) = multipart.try_next().await.map_err(multipart_error)? {
        let name = field.name().to_string();
        let filename = field
            .content_disposition()
            .get_filename()
            .map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            total += chunk.len();
            if total > config.max_upload_bytes {
                return Err(ImageGenError::InputValidationError(
                    "Request body too large".into(),
                ));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "input_image" | "image" => match filename {
                Some(filename) if allowed_file(&filename) && !data.is_empty() => {
                    upload = Some(UploadedFile { filename, data });
                }
                Some(filename) if !filename.is_empty() => {
                    log::warn!("Ignoring upload with unsupported extension: {}", filename);
                }
                _ => {}
            },
            "api_key" => form.api_key = Some(text_field(data)),
            "model" => form.model = Some(text_field(data)),
            "prompt" => form.prompt = Some(text_field(data)),
            other => log::debug!("Ignoring form field {}", other),
        }
    }

    if let Some(file) = upload {
        form.input_image = Some(save_upload(&config.upload_dir, &file.filename, &file.data).await?);
    }
    Ok(form)
}

fn text_field(data: Vec<u8>) -> String {
    String::from_utf8_lossy(&data).into_owned()
}

fn multipart_error(e: actix_multipart::MultipartError) -> ImageGenError {
    ImageGenError::InputValidationError(format!("Invalid multipart body: {}", e))
}

async fn save_upload(dir: &Path, filename: &str, data: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}", Uuid::new_v4(), secure_filename(filename)));
    tokio::fs::write(&path, data).await?;
    log::debug!("Saved upload {} ({} bytes)", path.display(), data.len());
    Ok(path)
}

pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reduces a client-supplied file name to a safe single path component.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
