use reqwest::{header, multipart, Client, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("server answered {status}: {message}")]
    Server { status: StatusCode, message: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Form fields sent along with the uploaded files.
#[derive(Clone, Debug, Default)]
pub struct JobOptions {
    pub timeout: Option<f64>,
    pub is_64_bit: Option<bool>,
}

pub struct ClientCli {
    inner: Client,
    server: String,
}

impl ClientCli {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        Ok(Self {
            inner: Client::builder().build()?,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    /// Uploads `file` to an export route and saves the result.
    ///
    /// The server names the download after the form field, so the field carries the file name.
    pub async fn export(
        &self,
        route: &str,
        file: &Path,
        options: &JobOptions,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, ClientError> {
        let form = with_options(
            multipart::Form::new().part(upload_name(file), file_part(file).await?),
            options,
        );
        self.submit(route, form, output).await
    }

    pub async fn compare(
        &self,
        primary: &Path,
        secondary: &Path,
        options: &JobOptions,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, ClientError> {
        let form = multipart::Form::new()
            .part("primary", file_part(primary).await?)
            .part("secondary", file_part(secondary).await?);
        let form = with_options(form, options);
        self.submit("/bindiff/compare", form, output).await
    }

    async fn submit(
        &self,
        route: &str,
        form: multipart::Form,
        output: Option<PathBuf>,
    ) -> Result<PathBuf, ClientError> {
        let url = format!("{}{}", self.server, route);
        info!(%url, "submitting job");
        let response = self.inner.post(&url).multipart(form).send().await?;
        let response = check_status(response).await?;
        let output = match output {
            Some(path) => path,
            None => PathBuf::from(attachment_name(&response).unwrap_or_else(|| "output".into())),
        };
        save(response, &output).await?;
        Ok(output)
    }
}

fn with_options(mut form: multipart::Form, options: &JobOptions) -> multipart::Form {
    if let Some(timeout) = options.timeout {
        form = form.text("timeout", timeout.to_string());
    }
    if let Some(is_64_bit) = options.is_64_bit {
        form = form.text("is_64_bit", is_64_bit.to_string());
    }
    form
}

async fn file_part(path: &Path) -> Result<multipart::Part, ClientError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(file = %path.display(), size = bytes.len(), "uploading");
    Ok(multipart::Part::bytes(bytes).file_name(upload_name(path)))
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|body| body.error)
        .unwrap_or(body);
    Err(ClientError::Server { status, message })
}

fn attachment_name(response: &Response) -> Option<String> {
    let disposition = response.headers().get(header::CONTENT_DISPOSITION)?;
    parse_attachment_name(disposition.to_str().ok()?)
}

/// Extracts `filename="..."` from a Content-Disposition value, keeping only the last path
/// component.
fn parse_attachment_name(disposition: &str) -> Option<String> {
    let (_, rest) = disposition.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    let name = Path::new(name).file_name()?.to_string_lossy().into_owned();
    (!name.is_empty()).then_some(name)
}

async fn save(mut response: Response, path: &Path) -> Result<(), ClientError> {
    let io_err = |source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut written = 0usize;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len();
    }
    file.flush().await.map_err(io_err)?;
    debug!(file = %path.display(), written, "download complete");
    Ok(())
}
