//! Report documents: where they live and how to open them as a byte stream.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fbaops_core::UnsupportedFormatError;
use fbaops_storage::HttpFetcher;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::AdapterError;

/// Handle returned by the reports API for a finished report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub report_document_id: String,
    pub url: String,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
}

impl ReportDocument {
    pub fn compression(&self) -> Result<Compression, UnsupportedFormatError> {
        Compression::from_tag(self.compression_algorithm.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// `None` and `"GZIP"` are the only tags the reports API emits.
    pub fn from_tag(tag: Option<&str>) -> Result<Self, UnsupportedFormatError> {
        match tag.map(str::trim) {
            None | Some("") => Ok(Compression::None),
            Some(t) if t.eq_ignore_ascii_case("GZIP") => Ok(Compression::Gzip),
            Some(other) => Err(UnsupportedFormatError::Compression(other.to_string())),
        }
    }

    pub fn tag(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("GZIP"),
        }
    }
}

/// Raw (still compressed) document bytes.
pub type ReportReader = Box<dyn AsyncBufRead + Send + Unpin>;

#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn report_document(&self, report_document_id: &str) -> Result<ReportDocument, AdapterError>;

    async fn open_document(&self, document: &ReportDocument) -> Result<ReportReader, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct SpApiConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
}

impl SpApiConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone)]
pub struct SpApiClient {
    http: HttpFetcher,
    config: SpApiConfig,
}

impl SpApiClient {
    pub fn new(http: HttpFetcher, config: SpApiConfig) -> Self {
        Self { http, config }
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    pub fn config(&self) -> &SpApiConfig {
        &self.config
    }
}

#[async_trait]
impl ReportSource for SpApiClient {
    async fn report_document(&self, report_document_id: &str) -> Result<ReportDocument, AdapterError> {
        let url = self
            .config
            .url(&format!("/reports/2021-06-30/documents/{report_document_id}"));
        let document: ReportDocument = self
            .http
            .get_json(&url, self.config.access_token.as_deref())
            .await?;
        debug!(
            report_document_id,
            compression = document.compression_algorithm.as_deref().unwrap_or("none"),
            "resolved report document"
        );
        Ok(document)
    }

    async fn open_document(&self, document: &ReportDocument) -> Result<ReportReader, AdapterError> {
        // The document URL is pre-signed; no access token is sent.
        let resp = self.http.get_stream(&document.url).await?;
        let stream = resp.bytes_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}

/// Reads report documents from local files; the document id is a path under `root`.
#[derive(Debug, Clone)]
pub struct FileReportSource {
    root: PathBuf,
    compression: Option<Compression>,
}

impl FileReportSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: None,
        }
    }

    /// Overrides compression detection by file extension.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    fn detect(&self, path: &Path) -> Compression {
        self.compression.unwrap_or_else(|| match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
            _ => Compression::None,
        })
    }
}

#[async_trait]
impl ReportSource for FileReportSource {
    async fn report_document(&self, report_document_id: &str) -> Result<ReportDocument, AdapterError> {
        let path = self.root.join(report_document_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(AdapterError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("report file {} does not exist", path.display()),
            )));
        }
        Ok(ReportDocument {
            report_document_id: report_document_id.to_string(),
            url: path.to_string_lossy().into_owned(),
            compression_algorithm: self.detect(&path).tag().map(str::to_string),
        })
    }

    async fn open_document(&self, document: &ReportDocument) -> Result<ReportReader, AdapterError> {
        let file = tokio::fs::File::open(&document.url).await?;
        info!(path = %document.url, "opened report file");
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn compression_tags() {
        assert_eq!(Compression::from_tag(None).unwrap(), Compression::None);
        assert_eq!(Compression::from_tag(Some("GZIP")).unwrap(), Compression::Gzip);
        assert_eq!(
            Compression::from_tag(Some("ZSTD")).unwrap_err(),
            UnsupportedFormatError::Compression("ZSTD".into())
        );
    }

    #[test]
    fn report_document_payload_shape() {
        let doc: ReportDocument = serde_json::from_str(
            r#"{"reportDocumentId":"amzn1.doc.1","url":"https://s3.example/doc","compressionAlgorithm":"GZIP"}"#,
        )
        .unwrap();
        assert_eq!(doc.compression().unwrap(), Compression::Gzip);

        let plain: ReportDocument =
            serde_json::from_str(r#"{"reportDocumentId":"amzn1.doc.2","url":"https://s3.example/doc2"}"#)
                .unwrap();
        assert_eq!(plain.compression().unwrap(), Compression::None);
    }

    #[tokio::test]
    async fn file_source_resolves_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("inventory.tsv"), b"sku\tasin\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("inventory.tsv.gz"), b"\x1f\x8b")
            .await
            .unwrap();

        let source = FileReportSource::new(dir.path());
        let doc = source.report_document("inventory.tsv").await.unwrap();
        assert_eq!(doc.compression_algorithm, None);
        let gz = source.report_document("inventory.tsv.gz").await.unwrap();
        assert_eq!(gz.compression_algorithm.as_deref(), Some("GZIP"));

        let mut body = String::new();
        source
            .open_document(&doc)
            .await
            .unwrap()
            .read_to_string(&mut body)
            .await
            .unwrap();
        assert_eq!(body, "sku\tasin\n");

        assert!(source.report_document("missing.tsv").await.is_err());
    }
}
