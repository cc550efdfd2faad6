use crate::error::ApiError;
use axum::extract::{multipart::MultipartRejection, Multipart};
use joblib::Upload;
use std::collections::HashMap;
use std::time::Duration;

/// A fully read multipart/form-data request.
///
/// Everything is buffered before a workspace is opened, so malformed requests are rejected
/// without touching the filesystem.
#[derive(Debug, Default)]
pub struct UploadForm {
    files: Vec<Upload>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, ApiError> {
        let mut multipart =
            multipart.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await.map_err(bad_multipart)?;
                    // uploads are known by their field name; the client's file name is only a
                    // fallback for unnamed fields
                    let upload_name = if name.is_empty() { file_name } else { name };
                    form.files.push(Upload::new(upload_name, bytes));
                }
                None => {
                    let value = field.text().await.map_err(bad_multipart)?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// The one and only uploaded file.
    pub fn single_file(&mut self) -> Result<Upload, ApiError> {
        if self.files.len() != 1 {
            return Err(ApiError::InvalidRequest("Missing file parameter".to_string()));
        }
        Ok(self.files.remove(0))
    }

    /// The file uploaded under `field`.
    pub fn take_file(&mut self, field: &str) -> Option<Upload> {
        let position = self.files.iter().position(|file| file.name == field)?;
        Some(self.files.remove(position))
    }

    /// Optional `timeout` field, in (possibly fractional) seconds.
    pub fn timeout(&self) -> Result<Option<Duration>, ApiError> {
        let Some(raw) = self.field("timeout") else {
            return Ok(None);
        };
        let invalid = || ApiError::InvalidRequest(format!("Invalid timeout {:?}", raw));
        let seconds: f64 = raw.parse().map_err(|_| invalid())?;
        let timeout = Duration::try_from_secs_f64(seconds).map_err(|_| invalid())?;
        if timeout.is_zero() {
            return Err(invalid());
        }
        Ok(Some(timeout))
    }

    /// Optional boolean field.
    pub fn flag(&self, name: &str, default: bool) -> Result<bool, ApiError> {
        match self.field(name).map(|raw| raw.to_ascii_lowercase()) {
            None => Ok(default),
            Some(raw) => match raw.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ApiError::InvalidRequest(format!(
                    "Invalid value {:?} for {}",
                    raw, name
                ))),
            },
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::InvalidRequest(format!("Malformed upload: {}", err.body_text()))
}
