//! Thin WebDAV client for ownCloud/Nextcloud document roots.
//!
//! Paths given to the client are relative to the user's document root
//! (`<host>/remote.php/dav/files/<user>/`). Collections are reported with a
//! trailing `/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dualstore_core::normalize::normalize_modified;
use dualstore_core::paths::{join_path, normalize_path, segments};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::error::DavError;
use crate::multistatus::{parse_multistatus, DavResponse};
use crate::options::CloudOptions;

pub const DAV_FILES_SEGMENT: &str = "/remote.php/dav/files/";

/// Keys tried, in order, for a resource's modification time.
pub const MODIFIED_KEYS: &[&str] = &[
    "getlastmodified",
    "modified",
    "last_modified",
    "lastmodified",
    "mtime",
    "updated_at",
    "date",
    "creationdate",
];

const SIZE_KEYS: &[&str] = &["getcontentlength", "size", "content_length", "contentlength"];

/// Characters escaped in a path segment (RFC 3986 unreserved are kept).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const LIST_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

const INFO_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:allprop/></d:propfind>"#;

/// Resolve the document-root URL for `username`.
///
/// Endpoints that already point inside `/remote.php/dav/files/` are kept;
/// bare server URLs get the ownCloud path appended.
pub fn dav_base_url(endpoint: &str, username: &str) -> String {
    let endpoint = endpoint.trim();
    let mut base = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{}/", endpoint)
    };
    if !base.contains(DAV_FILES_SEGMENT) {
        base = format!(
            "{}{}{}/",
            base.trim_end_matches('/'),
            DAV_FILES_SEGMENT,
            utf8_percent_encode(username.trim(), SEGMENT)
        );
    }
    base
}

/// Metadata of one resource from a `Depth: 0` PROPFIND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub is_collection: bool,
    pub props: BTreeMap<String, String>,
}

impl ResourceInfo {
    pub fn from_props<K: Into<String>, V: Into<String>>(
        props: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            is_collection: false,
            props: props
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    fn first_present(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.props.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    pub fn size(&self) -> Option<u64> {
        let raw = self.first_present(SIZE_KEYS)?;
        raw.parse::<u64>().ok().or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        MODIFIED_KEYS
            .iter()
            .filter_map(|k| self.props.get(*k))
            .find_map(|v| normalize_modified(v.as_str()))
    }
}

/// Source of per-resource metadata for the enrichment pass.
#[async_trait]
pub trait ResourceInspector: Send + Sync {
    async fn info(&self, path: &str) -> Result<ResourceInfo, DavError>;
}

/// OCS envelope: `{"ocs": {"data": ...}}`.
#[derive(Debug, Deserialize)]
struct OcsEnvelope {
    ocs: OcsBody,
}

#[derive(Debug, Deserialize)]
struct OcsBody {
    #[serde(default)]
    data: serde_json::Value,
}

/// Storage quota as reported by the OCS user endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub used: Option<i64>,
    #[serde(default)]
    pub free: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub relative: Option<f64>,
}

/// Totals of one [`DavClient::mirror_down`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub files: usize,
    /// Local files left alone because overwriting was off.
    pub skipped: usize,
    pub bytes: u64,
}

pub struct DavClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        options: &CloudOptions,
    ) -> Result<Self, DavError> {
        let base_str = dav_base_url(endpoint, username);
        let base = Url::parse(&base_str).map_err(|_| DavError::InvalidUrl(base_str.clone()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(DavError::InvalidUrl(base_str));
        }
        let http = Client::builder()
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| DavError::transport(&base_str, e))?;
        Ok(Self {
            http,
            base,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Absolute URL for a root-relative path.
    pub fn url_for(&self, path: &str, collection: bool) -> String {
        let encoded: Vec<String> = segments(path)
            .iter()
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect();
        let mut url = format!("{}{}", self.base, encoded.join("/"));
        if collection && !encoded.is_empty() {
            url.push('/');
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        builder: RequestBuilder,
    ) -> Result<Response, DavError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| DavError::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DavError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        Ok(resp)
    }

    async fn propfind(
        &self,
        url: &str,
        depth: &'static str,
        body: &'static str,
    ) -> Result<Vec<DavResponse>, DavError> {
        let method = propfind_method()?;
        let builder = self
            .request(method.clone(), url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"))
            .body(body);
        let resp = self.send(&method, url, builder).await?;
        let text = resp.text().await.map_err(|e| DavError::transport(url, e))?;
        parse_multistatus(&text)
    }

    /// Names one level below `dir`; collections end with `/`.
    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self, dir: &str) -> Result<Vec<String>, DavError> {
        let url = self.url_for(dir, true);
        let responses = self.propfind(&url, "1", LIST_BODY).await?;
        let own_path = decoded_path(&url);

        let mut names = Vec::with_capacity(responses.len());
        for response in responses {
            let href_path = decoded_path(&response.href);
            if href_path.trim_end_matches('/') == own_path.trim_end_matches('/') {
                continue;
            }
            let collection = response.is_collection || href_path.ends_with('/');
            let Some(name) = href_path.trim_end_matches('/').rsplit('/').next() else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            names.push(if collection {
                format!("{}/", name)
            } else {
                name.to_string()
            });
        }
        debug!("PROPFIND {} returned {} children", url, names.len());
        Ok(names)
    }

    /// Properties of a single resource.
    #[instrument(skip(self), level = "debug")]
    pub async fn info(&self, path: &str) -> Result<ResourceInfo, DavError> {
        let url = self.url_for(path, path.ends_with('/'));
        let responses = self.propfind(&url, "0", INFO_BODY).await?;
        let response = responses
            .into_iter()
            .next()
            .ok_or_else(|| DavError::Xml(format!("no response element for {}", url)))?;
        Ok(ResourceInfo {
            is_collection: response.is_collection,
            props: response.props,
        })
    }

    /// Stream a file to `local_path`, returning the bytes written.
    #[instrument(skip(self), level = "debug")]
    pub async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, DavError> {
        let url = self.url_for(remote_path, false);
        let mut resp = self
            .send(&Method::GET, &url, self.request(Method::GET, &url))
            .await?;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(local_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await.map_err(|e| DavError::transport(&url, e))? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    /// Download the tree under `remote_dir` into `local_dir`, creating local
    /// directories as it goes. Existing local files are replaced only when
    /// `overwrite` is set.
    #[instrument(skip(self), level = "debug")]
    pub async fn mirror_down(
        &self,
        remote_dir: &str,
        local_dir: &Path,
        overwrite: bool,
    ) -> Result<MirrorStats, DavError> {
        let mut stats = MirrorStats::default();
        let mut pending: Vec<(String, PathBuf)> =
            vec![(normalize_path(remote_dir), local_dir.to_path_buf())];

        while let Some((remote, local)) = pending.pop() {
            tokio::fs::create_dir_all(&local).await?;
            for name in self.list(&remote).await? {
                let (child, collection) = match name.strip_suffix('/') {
                    Some(dir) => (dir, true),
                    None => (name.as_str(), false),
                };
                if matches!(child, "." | "..") {
                    continue;
                }
                let child_remote = join_path(&remote, child);
                let child_local = local.join(child);

                if collection {
                    pending.push((child_remote, child_local));
                } else if !overwrite && tokio::fs::try_exists(&child_local).await? {
                    debug!("Keeping existing {}", child_local.display());
                    stats.skipped += 1;
                } else {
                    stats.bytes += self.download(&child_remote, &child_local).await?;
                    stats.files += 1;
                }
            }
        }
        debug!(
            "Mirrored {} files ({} bytes, {} kept) from '{}'",
            stats.files, stats.bytes, stats.skipped, remote_dir
        );
        Ok(stats)
    }

    /// PUT a local file, creating missing parent collections first.
    #[instrument(skip(self), level = "debug")]
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), DavError> {
        let remote = normalize_path(remote_path);
        if let Some((parent, _)) = remote.rsplit_once('/') {
            self.makedirs(parent).await;
        }
        let data = tokio::fs::read(local_path).await?;
        let url = self.url_for(&remote, false);
        let len = data.len();
        self.send(&Method::PUT, &url, self.request(Method::PUT, &url).body(data))
            .await?;
        debug!("Uploaded {} bytes to {}", len, url);
        Ok(())
    }

    /// MKCOL one collection. An existing collection (405) is not an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn mkdir(&self, path: &str) -> Result<(), DavError> {
        let url = self.url_for(path, true);
        let method = mkcol_method()?;
        match self.send(&method, &url, self.request(method.clone(), &url)).await {
            Ok(_) => Ok(()),
            Err(e) if e.status_code() == Some(StatusCode::METHOD_NOT_ALLOWED.as_u16()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create every collection along `path`, root first. Failures are
    /// logged; the request that needs the collection reports the real error.
    pub async fn makedirs(&self, path: &str) {
        let mut current = String::new();
        for segment in segments(path) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(&segment);
            if let Err(e) = self.mkdir(&current).await {
                warn!("MKCOL {} failed: {}", current, e);
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, path: &str) -> Result<(), DavError> {
        let url = self.url_for(path, path.ends_with('/'));
        self.send(&Method::DELETE, &url, self.request(Method::DELETE, &url))
            .await?;
        Ok(())
    }

    /// Server root, without the DAV document-root suffix.
    fn server_root(&self) -> String {
        let base = self.base.as_str();
        match base.find(DAV_FILES_SEGMENT) {
            Some(idx) => base[..idx].to_string(),
            None => base.trim_end_matches('/').to_string(),
        }
    }

    async fn ocs(&self, path: &str) -> Result<serde_json::Value, DavError> {
        let url = format!("{}/ocs/v1.php/{}?format=json", self.server_root(), path);
        let builder = self
            .request(Method::GET, &url)
            .header("OCS-APIRequest", "true");
        let resp = self.send(&Method::GET, &url, builder).await?;
        let envelope: OcsEnvelope = resp
            .json()
            .await
            .map_err(|e| DavError::transport(&url, e))?;
        Ok(envelope.ocs.data)
    }

    /// Server capabilities (`version`, `capabilities`, ...).
    #[instrument(skip(self), level = "debug")]
    pub async fn capabilities(&self) -> Result<serde_json::Value, DavError> {
        self.ocs("cloud/capabilities").await
    }

    /// Quota of the connected user.
    #[instrument(skip(self), level = "debug")]
    pub async fn quota(&self) -> Result<Quota, DavError> {
        let user = utf8_percent_encode(&self.username, SEGMENT).to_string();
        let data = self.ocs(&format!("cloud/users/{}", user)).await?;
        let quota = data
            .get("quota")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        serde_json::from_value(quota).map_err(|e| DavError::Xml(format!("invalid quota: {}", e)))
    }
}

#[async_trait]
impl ResourceInspector for DavClient {
    async fn info(&self, path: &str) -> Result<ResourceInfo, DavError> {
        DavClient::info(self, path).await
    }
}

fn propfind_method() -> Result<Method, DavError> {
    Method::from_bytes(b"PROPFIND").map_err(|e| DavError::Xml(e.to_string()))
}

fn mkcol_method() -> Result<Method, DavError> {
    Method::from_bytes(b"MKCOL").map_err(|e| DavError::Xml(e.to_string()))
}

/// Percent-decoded path component of an href or URL.
fn decoded_path(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    percent_decode_str(&path).decode_utf8_lossy().into_owned()
}
