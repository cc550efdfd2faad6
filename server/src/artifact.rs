use crate::error::ApiError;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::Stream;
use joblib::Workspace;
use pin_project_lite::pin_project;
use std::{
    io,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

pin_project! {
    /// Streams a file out of a workspace and keeps the workspace alive until the stream is
    /// dropped, i.e. after the last chunk was sent or the client went away.
    pub struct ArtifactStream {
        #[pin]
        inner: ReaderStream<File>,
        _workspace: Workspace,
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Builds a download response for `path`, handing ownership of `workspace` to the body.
pub async fn artifact_response(
    workspace: Workspace,
    path: &Path,
    attachment_name: &str,
    content_type: &'static str,
    tool: &'static str,
) -> Result<Response, ApiError> {
    let missing = || ApiError::MissingOutput {
        tool,
        output: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let file = File::open(path).await.map_err(|_| missing())?;
    let metadata = file.metadata().await.map_err(|err| ApiError::Internal(err.into()))?;
    if !metadata.is_file() {
        return Err(missing());
    }

    let stream = ArtifactStream {
        inner: ReaderStream::new(file),
        _workspace: workspace,
    };
    let disposition = format!("attachment; filename=\"{}\"", quote_filename(attachment_name));
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    Ok(response)
}

/// Keeps the header value printable and the quoted string closed.
fn quote_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use joblib::WorkspaceConfig;

    #[test]
    fn attachment_names_are_quoted_safely() {
        assert_eq!(quote_filename("sample.exe.BinExport"), "sample.exe.BinExport");
        assert_eq!(quote_filename("a\"b\\c\r\n.bin"), "a_b_c__.bin");
        assert_eq!(quote_filename("résumé"), "r_sum_");
    }

    #[tokio::test]
    async fn workspace_lives_until_the_body_is_consumed() {
        let parent = tempfile::tempdir().expect("tempdir");
        let workspace = joblib::Workspace::open(&WorkspaceConfig {
            root: Some(parent.path().to_path_buf()),
            ..WorkspaceConfig::default()
        })
        .expect("open");
        let root = workspace.path().to_path_buf();
        let output = workspace
            .stage_bytes("output.BinExport", b"artifact bytes")
            .await
            .expect("stage");

        let response = artifact_response(
            workspace,
            &output,
            "sample.BinExport",
            "application/binary",
            "IDA",
        )
        .await
        .expect("response");
        assert!(root.exists());
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"sample.BinExport\""
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"artifact bytes");
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn missing_output_is_reported_and_cleaned_up() {
        let parent = tempfile::tempdir().expect("tempdir");
        let workspace = joblib::Workspace::open(&WorkspaceConfig {
            root: Some(parent.path().to_path_buf()),
            ..WorkspaceConfig::default()
        })
        .expect("open");
        let output = workspace.resolve("output.pickle").unwrap();
        let err = artifact_response(workspace, &output, "x.pickle", "application/binary", "IDA")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingOutput { .. }));
        assert!(std::fs::read_dir(parent.path()).unwrap().next().is_none());
    }
}
