use serde::Deserialize;

/// One track as listed by the catalog search API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct CatalogEntry {
    /// Opaque identifier, only meaningful to the resolve API.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub singers: Vec<String>,
    #[serde(rename = "albumName", default)]
    pub album_name: String,
    #[serde(rename = "picUrl", default)]
    pub pic_url: String,
}

impl CatalogEntry {
    /// Performers joined the way the artist folder is named.
    pub(crate) fn joined_singers(&self) -> String {
        self.singers.join(" & ")
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchResult {
    #[serde(default)]
    pub list: Vec<CatalogEntry>,
}

/// Envelope returned by the search endpoint. `code`, `timestamp` and `total` are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Option<SearchResult>,
}

/// Envelope returned by the resolve endpoint; `result` is the download URL.
#[derive(Debug, Deserialize)]
pub(crate) struct FileUrlResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Option<String>,
}
