//! High-level entry points that wire adapters into engines

use crate::engine::{
    local_path, DownloadEngine, DownloadEngineFile, DownloadEngineMultiDownload, FetchStream,
    FileWriteStream, HttpFetchStream, LocalFileFetchStream,
};
use crate::error::{TransferError, TransferResult};
use rangeflow_types::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_FILE_NAME: &str = "download";

/// Where bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchStrategy {
    /// HTTP(S) ranged requests
    #[default]
    Fetch,
    /// Plain path or `file://` URL on this machine
    LocalFile,
}

/// Everything needed to download one source into a directory
#[derive(Debug, Clone)]
pub struct DownloadFileOptions {
    pub url: String,
    pub directory: PathBuf,
    /// Destination file name; derived from the source when absent
    pub file_name: Option<String>,
    pub fetch_strategy: FetchStrategy,
    pub engine: EngineOptions,
}

impl DownloadFileOptions {
    pub fn new(url: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            directory: directory.into(),
            file_name: None,
            fetch_strategy: FetchStrategy::default(),
            engine: EngineOptions::default(),
        }
    }

    /// Full destination path
    pub fn destination(&self) -> PathBuf {
        let name = self
            .file_name
            .clone()
            .unwrap_or_else(|| file_name_from_source(&self.url, self.fetch_strategy));
        self.directory.join(name)
    }
}

/// Derive a file name from the last segment of a URL or path
pub fn file_name_from_source(source: &str, strategy: FetchStrategy) -> String {
    let from_url = match strategy {
        FetchStrategy::Fetch => url::Url::parse(source).ok().and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        }),
        FetchStrategy::LocalFile => local_path(source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    };

    from_url
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

/// Probe the source and build an engine writing into `options.directory`.
/// The engine is returned ready to `download()`.
pub async fn download_file(options: DownloadFileOptions) -> TransferResult<Arc<DownloadEngineFile>> {
    let fetch_stream: Arc<dyn FetchStream> = match options.fetch_strategy {
        FetchStrategy::Fetch => Arc::new(
            HttpFetchStream::new(&options.engine)
                .map_err(|e| TransferError::InvalidOptions(e.to_string()))?,
        ),
        FetchStrategy::LocalFile => Arc::new(LocalFileFetchStream::new(&options.engine)),
    };

    let info = fetch_stream
        .fetch_download_info(&options.url, &CancellationToken::new())
        .await?;

    let destination = options.destination();
    info!(
        "Prepared {} -> {} ({} bytes, ranges: {})",
        options.url,
        destination.display(),
        info.length,
        info.accept_range
    );

    let write_stream = Arc::new(FileWriteStream::new(destination));
    let engine = DownloadEngineFile::new(options.url, options.engine, fetch_stream, write_stream)?
        .with_download_info(info);

    Ok(Arc::new(engine))
}

/// Run `engines` strictly one after another as a single engine
pub fn download_sequence(engines: Vec<Arc<dyn DownloadEngine>>) -> DownloadEngineMultiDownload {
    DownloadEngineMultiDownload::new(engines)
}
