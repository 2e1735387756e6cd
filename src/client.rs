use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::{ClientConfig, PresetValues};
use crate::operations::{OperationId, OperationRequest};

pub const FALLBACK_FILE_NAME: &str = "input.png";
pub const FALLBACK_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error("{}", service_message(.status, .body))]
    Service { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid service url: {0}")]
    InvalidServiceUrl(String),
}

fn service_message(status: &u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("service error (HTTP {})", status)
    } else {
        format!("service error (HTTP {}): {}", status, body)
    }
}

impl From<url::ParseError> for RestoreError {
    fn from(value: url::ParseError) -> Self {
        RestoreError::InvalidServiceUrl(value.to_string())
    }
}

impl From<reqwest::Error> for RestoreError {
    fn from(value: reqwest::Error) -> Self {
        RestoreError::Transport(value.to_string())
    }
}

/// Image payload uploaded as the `file` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImage {
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde(skip)]
    pub bytes: Bytes,
}

impl UploadImage {
    /// A blank content type is treated as unknown.
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.filter(|value| !value.trim().is_empty()),
            bytes,
        }
    }

    /// A produced artifact re-uploaded as the base of the next operation.
    pub fn from_artifact(bytes: Bytes) -> Self {
        Self::new(FALLBACK_FILE_NAME, Some(FALLBACK_CONTENT_TYPE.to_string()), bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub image: UploadImage,
    pub preset: PresetValues,
    pub operation: Option<OperationRequest>,
}

impl RestoreRequest {
    pub fn restore(image: UploadImage, preset: PresetValues) -> Self {
        Self {
            image,
            preset,
            operation: None,
        }
    }

    pub fn with_operation(image: UploadImage, preset: PresetValues, operation: OperationRequest) -> Self {
        Self {
            image,
            preset,
            operation: Some(operation),
        }
    }

    pub fn op(&self) -> Option<OperationId> {
        self.operation.as_ref().map(|operation| operation.op)
    }

    /// Text fields of the form, in send order. An operation parameter that
    /// shares a name with a preset field replaces the preset value.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let operation = self.operation.as_ref();
        let preset_value = |name: &str, fallback: f64| {
            operation
                .and_then(|operation| operation.param(name))
                .unwrap_or(fallback)
        };

        let mut fields = vec![
            ("h".to_string(), format_value(preset_value("h", self.preset.h))),
            ("clahe".to_string(), format_value(preset_value("clahe", self.preset.clahe))),
            ("sharp".to_string(), format_value(preset_value("sharp", self.preset.sharp))),
        ];

        if let Some(operation) = operation {
            fields.push(("op".to_string(), operation.op.as_str().to_string()));
            for (name, value) in &operation.params {
                if fields.iter().any(|(existing, _)| existing == name) {
                    continue;
                }
                fields.push((name.clone(), format_value(*value)));
            }
        }

        fields
    }

    fn to_form(&self) -> Form {
        let mut form = Form::new().part("file", self.file_part());
        for (name, value) in self.form_fields() {
            form = form.text(name, value);
        }
        form
    }

    /// The upload part. A content type reqwest cannot parse is left off
    /// rather than failing the request.
    fn file_part(&self) -> Part {
        let part = || Part::bytes(self.image.bytes.to_vec()).file_name(self.image.file_name.clone());
        match self.image.content_type.as_deref() {
            Some(content_type) => part().mime_str(content_type).unwrap_or_else(|err| {
                log::warn!("sending {} without content type {:?}: {}", self.image.file_name, content_type, err);
                part()
            }),
            None => part(),
        }
    }
}

fn format_value(value: f64) -> String {
    format!("{}", value)
}

/// The one outbound call: upload plus parameters in, image bytes out.
pub trait RestoreService {
    fn send(&self, request: &RestoreRequest) -> impl Future<Output = Result<Bytes, RestoreError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpRestoreClient {
    client: Client,
    endpoint: Url,
}

impl HttpRestoreClient {
    pub fn new(config: &ClientConfig) -> Result<Self, RestoreError> {
        let endpoint = build_service_endpoint(&config.service_url, &config.endpoint_path)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn restore(&self, image: UploadImage, preset: PresetValues) -> Result<Bytes, RestoreError> {
        self.post(&RestoreRequest::restore(image, preset)).await
    }

    pub async fn apply_operation(
        &self,
        image: UploadImage,
        preset: PresetValues,
        operation: OperationRequest,
    ) -> Result<Bytes, RestoreError> {
        self.post(&RestoreRequest::with_operation(image, preset, operation))
            .await
    }

    async fn post(&self, request: &RestoreRequest) -> Result<Bytes, RestoreError> {
        let form = request.to_form();
        log::debug!(
            "POST {} file={} ({} bytes) op={:?}",
            self.endpoint,
            request.image.file_name,
            request.image.bytes.len(),
            request.op()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        log::debug!("response from {}: {}", self.endpoint, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("service rejected request with {}: {}", status, body);
            return Err(RestoreError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes)
    }
}

impl RestoreService for HttpRestoreClient {
    fn send(&self, request: &RestoreRequest) -> impl Future<Output = Result<Bytes, RestoreError>> + Send {
        self.post(request)
    }
}

fn build_service_endpoint(base: &str, path: &str) -> Result<Url, RestoreError> {
    if base.trim().is_empty() {
        return Err(RestoreError::InvalidServiceUrl("service url is empty".to_string()));
    }

    let mut url = Url::parse(base.trim())?;
    ensure_trailing_slash(&mut url);
    let joined = url.join(path.trim().trim_start_matches('/'))?;
    Ok(joined)
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}
