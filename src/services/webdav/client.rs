use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RANGE, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder};
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;

use super::auth::WebDAVAuth;
use super::common::{build_user_agent, PROPFIND_ACCEPT, PROPFIND_BODY};
use super::xml_parser::{parse_multistatus, DavResponse, Multistatus};
use crate::storage::{ByteStream, FileStatType, StorageError, StorageResult};

/// Options for [`WebDAVClient::new`]
#[derive(Debug, Clone)]
pub struct WebDAVClientOptions {
    pub auth: WebDAVAuth,
    pub timeout: Duration,
}

impl Default for WebDAVClientOptions {
    fn default() -> Self {
        Self {
            auth: WebDAVAuth::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryOptions {
    /// Recurse with `Depth: infinity` instead of listing direct children
    pub deep: bool,
    /// Keep the entry describing the requested directory itself
    pub include_self: bool,
}

/// One resource as reported by PROPFIND, with paths relative to the server base
#[derive(Debug, Clone, PartialEq)]
pub struct DavEntry {
    /// Decoded path relative to the server base, always starting with `/`
    pub filename: String,
    pub basename: String,
    pub entry_type: FileStatType,
    pub size: u64,
    pub last_modified: Option<String>,
    /// ETag with surrounding quotes removed
    pub etag: Option<String>,
    /// Content type up to the first `;`
    pub mime: Option<String>,
}

impl DavEntry {
    pub fn last_modified_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_modified
            .as_deref()
            .and_then(|lm| chrono::DateTime::parse_from_rfc2822(lm.trim()).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

/// Minimal WebDAV client: PROPFIND based metadata and range aware downloads
#[derive(Debug, Clone)]
pub struct WebDAVClient {
    http: Client,
    base_url: Url,
    /// Decoded path component of `base_url` without trailing slash ("" for root)
    base_path: String,
    authorization: Option<String>,
    user_agent: String,
}

impl WebDAVClient {
    pub fn new(server_url: &str, options: WebDAVClientOptions) -> StorageResult<Self> {
        let base_url = Url::parse(server_url.trim())
            .map_err(|e| StorageError::InvalidConfig(format!("invalid WebDAV url '{}': {}", server_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(StorageError::InvalidConfig(format!(
                "WebDAV url '{}' must use http or https",
                server_url
            )));
        }

        let authorization = options.auth.header_value()?;

        let base_path = decode_path(base_url.path()).trim_end_matches('/').to_string();

        let http = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            http,
            base_url,
            base_path,
            authorization,
            user_agent: build_user_agent(),
        })
    }

    /// Full request URL for a path relative to the server base
    pub fn url_for(&self, path: &str) -> String {
        let mut encoded = self
            .base_path
            .split('/')
            .chain(path.split('/'))
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        encoded.insert(0, '/');
        if path.ends_with('/') && encoded.len() > 1 {
            encoded.push('/');
        }

        let mut url = self.base_url.clone();
        url.set_path(&encoded);
        url.set_query(None);
        url.to_string()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url_for(path);
        debug!("WebDAV {} {}", method, url);

        let request = self.http.request(method, url).header(USER_AGENT, &self.user_agent);
        match &self.authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    async fn propfind(&self, path: &str, depth: &str) -> StorageResult<Multistatus> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| StorageError::Unsupported(e.to_string()))?;

        let response = self
            .request(method, path)
            .header(ACCEPT, PROPFIND_ACCEPT)
            .header(CONTENT_TYPE, "application/xml")
            .header("Depth", depth)
            .body(PROPFIND_BODY)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!("PROPFIND {} returned {}", path, status);
            return Err(StorageError::protocol(
                status.as_u16(),
                format!("PROPFIND '{}' failed", path),
                body,
            ));
        }

        if body.trim().is_empty() {
            return Err(StorageError::protocol(
                status.as_u16(),
                format!("PROPFIND '{}' returned an empty body", path),
                body,
            ));
        }

        match parse_multistatus(&body) {
            Ok(multistatus) => Ok(multistatus),
            Err(e) => {
                warn!("Invalid multistatus for '{}': {}", path, e);
                Err(StorageError::protocol(status.as_u16(), format!("invalid multistatus response: {}", e), body))
            }
        }
    }

    /// Metadata of a single resource (`Depth: 0`)
    pub async fn stat(&self, path: &str) -> StorageResult<DavEntry> {
        let multistatus = self.propfind(path, "0").await?;

        multistatus
            .responses
            .iter()
            .find_map(|response| self.to_entry(response))
            .ok_or_else(|| StorageError::protocol(207, format!("no properties returned for '{}'", path), String::new()))
    }

    pub async fn get_directory_contents(&self, path: &str, options: DirectoryOptions) -> StorageResult<Vec<DavEntry>> {
        let depth = if options.deep { "infinity" } else { "1" };
        let multistatus = self.propfind(path, depth).await?;
        let requested = normalize_relative(path);

        let entries = multistatus
            .responses
            .iter()
            .filter_map(|response| self.to_entry(response))
            .filter(|entry| options.include_self || entry.filename != requested)
            .collect();

        Ok(entries)
    }

    /// `true` if the resource exists; only a 404 maps to `false`
    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.status() == Some(404) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Download a resource, optionally restricted to the inclusive `[start, end]` window
    pub async fn create_readable_stream(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StorageResult<ByteStream> {
        let mut request = self.request(Method::GET, path);
        if let Some(start) = start {
            let end = end.map(|e| e.to_string()).unwrap_or_default();
            request = request.header(RANGE, format!("bytes={}-{}", start, end));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let ignored_range = match start {
            // A server that ignores the range still answers correctly for a read from 0
            Some(0) if status == 200 => true,
            Some(0) if status == 206 => false,
            Some(_) if status == 206 => false,
            Some(_) => {
                let body = response.text().await.unwrap_or_default();
                return Err(StorageError::protocol(status, "server does not support Range requests", body));
            }
            None if response.status().is_success() => false,
            None => {
                let body = response.text().await.unwrap_or_default();
                return Err(StorageError::protocol(status, format!("GET '{}' failed", path), body));
            }
        };

        if response.content_length() == Some(0) {
            return Err(StorageError::protocol(status, format!("GET '{}' returned an empty body", path), String::new()));
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);

        match (ignored_range, end) {
            (true, Some(end)) => {
                let limited = StreamReader::new(body).take(end + 1);
                Ok(Box::pin(ReaderStream::new(limited)))
            }
            _ => Ok(Box::pin(body)),
        }
    }

    fn to_entry(&self, response: &DavResponse) -> Option<DavEntry> {
        let props = response.props()?;
        let filename = self.relative_filename(&response.href);
        let basename = filename.rsplit('/').next().unwrap_or_default().to_string();

        Some(DavEntry {
            basename,
            entry_type: if props.is_collection {
                FileStatType::Directory
            } else {
                FileStatType::File
            },
            size: props.content_length.unwrap_or(0),
            last_modified: props.last_modified.clone(),
            etag: props.etag.as_deref().map(|etag| etag.trim().trim_matches('"').to_string()),
            mime: props
                .content_type
                .as_deref()
                .and_then(|ct| ct.split(';').next())
                .map(|ct| ct.trim().to_string()),
            filename,
        })
    }

    /// Map an href from a multistatus response to a decoded path relative to the base
    fn relative_filename(&self, href: &str) -> String {
        let path = match Url::parse(href) {
            Ok(url) => url.path().to_string(),
            Err(_) => href.to_string(),
        };
        let decoded = decode_path(&path);
        let trimmed = decoded.trim_end_matches('/');

        let relative = match trimmed.strip_prefix(&self.base_path) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => trimmed,
        };

        normalize_relative(relative)
    }
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// `"a/b/"` -> `"/a/b"`, `""` -> `"/"`
fn normalize_relative(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> WebDAVClient {
        WebDAVClient::new(url, WebDAVClientOptions::default()).unwrap()
    }

    #[test]
    fn test_url_for_encodes_segments() {
        let client = client("https://dav.example.com/remote.php/webdav/");
        assert_eq!(
            client.url_for("/RJ123456/track 01#1.flac"),
            "https://dav.example.com/remote.php/webdav/RJ123456/track%2001%231.flac"
        );
        assert_eq!(client.url_for(""), "https://dav.example.com/remote.php/webdav");
        assert_eq!(client.url_for("/music/"), "https://dav.example.com/remote.php/webdav/music/");
    }

    #[test]
    fn test_relative_filename() {
        let client = client("https://dav.example.com/remote.php/webdav");
        assert_eq!(client.relative_filename("/remote.php/webdav/RJ01/a%20b.mp3"), "/RJ01/a b.mp3");
        assert_eq!(client.relative_filename("/remote.php/webdav/"), "/");
        assert_eq!(
            client.relative_filename("https://dav.example.com/remote.php/webdav/RJ01/"),
            "/RJ01"
        );
        // Prefix match must stop on a segment boundary
        assert_eq!(client.relative_filename("/remote.php/webdavx/a"), "/remote.php/webdavx/a");
    }

    #[test]
    fn test_rejects_invalid_urls() {
        assert!(matches!(
            WebDAVClient::new("not a url", WebDAVClientOptions::default()),
            Err(StorageError::InvalidConfig(_))
        ));
        assert!(matches!(
            WebDAVClient::new("ftp://example.com", WebDAVClientOptions::default()),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
