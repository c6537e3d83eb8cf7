use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use thiserror::Error;

use crate::flac::io::CatalogConfig;

pub(crate) mod entries;

use entries::{CatalogEntry, FileUrlResponse, SearchResponse};

/// Header the resolve API reads the unlock credential from.
const UNLOCK_HEADER: &str = "unlockcode";

#[derive(Error, Debug)]
pub(crate) enum ApiError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API responded with an error: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// A paged catalog search. An empty page means the keyword is exhausted.
pub(crate) trait CatalogSource: Send + Sync {
    fn search(&self, keyword: &str, page: u32, page_size: u32) -> ApiResult<Vec<CatalogEntry>>;
}

/// Turns an entry id and quality tier into a direct download URL.
///
/// An empty string with no error means the tier is not available for this entry.
pub(crate) trait ResolveEndpoint: Send + Sync {
    fn resolve_url(&self, entry_id: &str, quality: &str, unlock_code: &str) -> ApiResult<String>;
}

/// Downloads `url` to `destination`. Succeeds without a request when the destination exists.
pub(crate) trait Fetcher: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> ApiResult<()>;
}

/// The sender used for every call to the catalog, the resolver and the CDN.
#[derive(Debug, Clone)]
pub(crate) struct RequestSender {
    client: Client,
    base_url: String,
    search_api: String,
    resolve_api: String,
}

impl RequestSender {
    pub(crate) fn new(catalog: &CatalogConfig, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .user_agent(catalog.user_agent.clone())
            .timeout(timeout)
            .build()?;

        Ok(RequestSender {
            client,
            base_url: catalog.base_url.trim_end_matches('/').to_string(),
            search_api: catalog.search_api.trim_matches('/').to_string(),
            resolve_api: catalog.resolve_api.trim_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turns any non-success status into [ApiError::Status], keeping the body for the log.
    fn check_status(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl CatalogSource for RequestSender {
    fn search(&self, keyword: &str, page: u32, page_size: u32) -> ApiResult<Vec<CatalogEntry>> {
        let url = self.endpoint(&self.search_api);
        trace!("Searching \"{}\" page {} (size {})", keyword, page, page_size);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("keyword", keyword.to_string()),
                ("page", page.to_string()),
                ("size", page_size.to_string()),
            ])
            .header(ACCEPT, "application/json")
            .send()?;

        let envelope: SearchResponse = Self::check_status(response)?.json()?;
        if !envelope.success {
            return Err(ApiError::Api(envelope.message));
        }

        Ok(envelope.result.map(|result| result.list).unwrap_or_default())
    }
}

impl ResolveEndpoint for RequestSender {
    fn resolve_url(&self, entry_id: &str, quality: &str, unlock_code: &str) -> ApiResult<String> {
        let url = format!("{}/{}/{}", self.endpoint(&self.resolve_api), entry_id, quality);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(UNLOCK_HEADER, unlock_code)
            .send()?;

        let envelope: FileUrlResponse = Self::check_status(response)?.json()?;
        if !envelope.success {
            return Err(ApiError::Api(format!("{url}: {}", envelope.message)));
        }

        Ok(envelope.result.unwrap_or_default())
    }
}

impl Fetcher for RequestSender {
    fn download(&self, url: &str, destination: &Path) -> ApiResult<()> {
        if destination.exists() {
            trace!("{} already exists, skipping download", destination.display());
            return Ok(());
        }

        let response = Self::check_status(self.client.get(url).send()?)?;

        // Stream into a sibling `.part` file so a dropped connection never leaves a
        // truncated file under the final name.
        let partial = partial_path(destination);
        if let Err(err) = write_response(response, &partial) {
            remove_partial(&partial);
            return Err(err);
        }

        finish_partial(&partial, destination)
    }
}

/// Moves a completed `.part` file to its final name, removing it when the move fails.
fn finish_partial(partial: &Path, destination: &Path) -> ApiResult<()> {
    if let Err(err) = fs::rename(partial, destination) {
        remove_partial(partial);
        return Err(err.into());
    }
    Ok(())
}

fn remove_partial(partial: &Path) {
    if let Err(err) = fs::remove_file(partial) {
        warn!("Failed to remove partial download {}: {}", partial.display(), err);
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

fn write_response(mut response: Response, path: &Path) -> ApiResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    let bytes = response.copy_to(&mut file)?;
    file.flush()?;
    trace!("Wrote {} bytes to {}", bytes, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flac::io::Config;
    use mockito::{Matcher, Server};
    use tempfile::tempdir;

    fn sender_for(server: &Server) -> RequestSender {
        let mut config = Config::default();
        config.catalog.base_url = format!("{}/", server.url());
        config.catalog.search_api = "/music/search".to_string();
        config.catalog.resolve_api = "music/url/qq".to_string();
        RequestSender::new(&config.catalog, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_search_returns_page_entries() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/music/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("keyword".into(), "周杰伦".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("size".into(), "10".into()),
            ]))
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"message":"","code":200,"timestamp":0,
                    "result":{"total":2,"list":[
                        {"id":"a1","name":"晴天","singers":["周杰伦"],"albumName":"叶惠美","picUrl":""},
                        {"id":"a2","name":"七里香","singers":["周杰伦"],"albumName":"七里香","picUrl":"http://x/c.jpg"}
                    ]}}"#,
            )
            .create();

        let entries = sender_for(&server).search("周杰伦", 2, 10).unwrap();

        mock.assert();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "七里香");
    }

    #[test]
    fn test_search_unsuccessful_envelope_is_api_error() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/music/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"success":false,"message":"quota exceeded","code":429,"result":null}"#)
            .create();

        let result = sender_for(&server).search("x", 1, 10);
        assert!(matches!(result, Err(ApiError::Api(message)) if message == "quota exceeded"));
    }

    #[test]
    fn test_search_bad_status_keeps_body() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/music/search")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .create();

        let result = sender_for(&server).search("x", 1, 10);
        assert!(matches!(result, Err(ApiError::Status { status: 502, ref body }) if body == "bad gateway"));
    }

    #[test]
    fn test_resolve_sends_unlock_code() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/music/url/qq/a1/flac")
            .match_header("unlockcode", "secret")
            .with_status(200)
            .with_body(r#"{"success":true,"message":"","code":200,"result":"http://cdn/a1.flac"}"#)
            .create();

        let url = sender_for(&server).resolve_url("a1", "flac", "secret").unwrap();

        mock.assert();
        assert_eq!(url, "http://cdn/a1.flac");
    }

    #[test]
    fn test_resolve_null_result_is_empty_url() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/music/url/qq/a1/320")
            .with_status(200)
            .with_body(r#"{"success":true,"message":"","code":200,"result":null}"#)
            .create();

        assert_eq!(sender_for(&server).resolve_url("a1", "320", "").unwrap(), "");
    }

    #[test]
    fn test_download_writes_file() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/cdn/a1.flac")
            .with_status(200)
            .with_body(b"fLaC-bytes")
            .create();
        let dir = tempdir().unwrap();
        let destination = dir.path().join("晴天.flac");

        sender_for(&server)
            .download(&format!("{}/cdn/a1.flac", server.url()), &destination)
            .unwrap();

        mock.assert();
        assert_eq!(fs::read(&destination).unwrap(), b"fLaC-bytes");
        assert!(!partial_path(&destination).exists());
    }

    #[test]
    fn test_download_skips_existing_destination() {
        let mut server = Server::new();
        let mock = server.mock("GET", "/cdn/a1.flac").expect(0).create();
        let dir = tempdir().unwrap();
        let destination = dir.path().join("晴天.flac");
        fs::write(&destination, b"already here").unwrap();

        sender_for(&server)
            .download(&format!("{}/cdn/a1.flac", server.url()), &destination)
            .unwrap();

        mock.assert();
        assert_eq!(fs::read(&destination).unwrap(), b"already here");
    }

    #[test]
    fn test_download_error_status_leaves_nothing_behind() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/cdn/gone.flac").with_status(404).create();
        let dir = tempdir().unwrap();
        let destination = dir.path().join("gone.flac");

        let result = sender_for(&server).download(&format!("{}/cdn/gone.flac", server.url()), &destination);

        assert!(matches!(result, Err(ApiError::Status { status: 404, .. })));
        assert!(!destination.exists());
        assert!(!partial_path(&destination).exists());
    }

    #[test]
    fn test_download_creates_missing_parent() {
        let mut server = Server::new();
        let _mock = server.mock("GET", "/cdn/a1.flac").with_status(200).with_body(b"fLaC").create();
        let dir = tempdir().unwrap();
        let destination = dir.path().join("周杰伦").join("叶惠美").join("晴天.flac");

        sender_for(&server)
            .download(&format!("{}/cdn/a1.flac", server.url()), &destination)
            .unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"fLaC");
    }

    #[test]
    fn test_failed_rename_removes_partial() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("晴天.flac");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("occupied"), b"").unwrap();
        let partial = partial_path(&destination);
        fs::write(&partial, b"fLaC").unwrap();

        let result = finish_partial(&partial, &destination);

        assert!(matches!(result, Err(ApiError::Io(_))));
        assert!(!partial.exists());
    }
}
