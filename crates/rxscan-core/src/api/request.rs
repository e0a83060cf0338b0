//! Outbound request descriptions.
//!
//! A request is kept as plain data rather than a `reqwest::Request` so it can
//! be rebuilt and resent after a credential refresh. Multipart bodies are
//! streams and cannot be cloned once built.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;

use super::{ApiError, ApiResult};

/// Body of an outbound request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(FileUpload),
}

/// An outbound call plus its one-shot retry marker.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> ApiResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode JSON body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn multipart(mut self, upload: FileUpload) -> Self {
        self.body = RequestBody::Multipart(upload);
        self
    }

    /// Whether this request has already been resent after a refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Build a fresh `reqwest` request against `base_url`.
    pub(crate) fn build(
        &self,
        client: &Client,
        base_url: &str,
        bearer: Option<&str>,
    ) -> ApiResult<RequestBuilder> {
        let url = format!("{}{}", base_url, self.path);
        let mut builder = client.request(self.method.clone(), &url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart(upload) => builder.multipart(upload.to_form()?),
        };
        Ok(builder)
    }
}

/// An image file ready to be uploaded for analysis.
#[derive(Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: mime::Mime,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FileUpload {
    /// Wrap in-memory bytes. Only image content types are accepted.
    pub fn new(
        file_name: impl Into<String>,
        mime_type: mime::Mime,
        bytes: Vec<u8>,
    ) -> ApiResult<Self> {
        if mime_type.type_() != mime::IMAGE {
            return Err(ApiError::InvalidRequest("File must be an image".to_string()));
        }
        Ok(Self {
            file_name: file_name.into(),
            mime_type,
            bytes,
        })
    }

    /// Read an image from disk, inferring its content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let mime_type = image_mime_for(path)
            .ok_or_else(|| ApiError::InvalidRequest("File must be an image".to_string()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("prescription")
            .to_string();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::InvalidRequest(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidRequest(format!(
                "{} is empty",
                path.display()
            )));
        }
        Self::new(file_name, mime_type, bytes)
    }

    fn to_form(&self) -> ApiResult<Form> {
        let part = Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(self.mime_type.as_ref())
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid content type: {}", e)))?;
        Ok(Form::new().part("file", part))
    }
}

/// Content type for an image path, or `None` for anything that is not an image.
pub fn image_mime_for(path: &Path) -> Option<mime::Mime> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "webp" => "image/webp".parse().ok()?,
        "tif" | "tiff" => "image/tiff".parse().ok()?,
        "heic" => "image/heic".parse().ok()?,
        _ => return None,
    };
    Some(mime)
}
