//! Static file serving (§4.4): path-safe resolution under a public root,
//! conditional requests, byte-range requests, and MIME inference, backed
//! by the [`crate::static_cache::StaticCache`].

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use loopserve_parser::{Method, Status};

use crate::metrics::Metrics;
use crate::response::Response;
use crate::static_cache::StaticCache;

/// Serves files out of a public root directory, enforcing the invariants
/// in §4.4: no path may escape the root, only `GET`/`HEAD` are served,
/// and conditional/range requests are honored.
#[derive(Debug)]
pub struct StaticHandler {
    root: PathBuf,
    cache: Option<Mutex<StaticCache>>,
    stream_threshold: u64,
}

impl StaticHandler {
    /// Creates a handler rooted at `root`. If `cache` is `Some`, files
    /// are served through it; otherwise every request reads from disk.
    /// Files larger than `stream_threshold` bytes are never fully
    /// materialized — this holds regardless of whether a cache is
    /// attached, since caching and streaming answer different questions
    /// (whether to keep bytes around across requests vs. whether to hold
    /// the whole file in memory for even one request).
    pub fn new(root: impl Into<PathBuf>, cache: Option<StaticCache>, stream_threshold: usize) -> Self {
        Self {
            root: root.into(),
            cache: cache.map(Mutex::new),
            stream_threshold: stream_threshold as u64,
        }
    }

    /// Resolves `request_path` (a URL path, already percent-decoded by the
    /// caller) to a file under the public root, rejecting any path whose
    /// canonical form escapes it (`..` traversal, absolute symlink
    /// escapes, etc).
    pub fn resolve(&self, request_path: &str) -> Result<PathBuf, Status> {
        let relative = request_path.trim_start_matches('/');
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Status::Forbidden);
                }
            }
        }

        let canonical_root = fs::canonicalize(&self.root).map_err(|_| Status::NotFound)?;
        let canonical = fs::canonicalize(&resolved).map_err(|_| Status::NotFound)?;
        if !canonical.starts_with(&canonical_root) {
            return Err(Status::Forbidden);
        }
        Ok(canonical)
    }

    /// Handles one request, returning a `404` response if `path` does not
    /// resolve to a file under the public root.
    pub fn handle(
        &self,
        method: Method,
        path: &str,
        headers: &crate::request::OwnedHeaders,
        metrics: &mut Metrics,
    ) -> Response {
        if !matches!(method, Method::Get | Method::Head) {
            return Response::new(Status::MethodNotAllowed).header("Allow", "GET, HEAD");
        }

        let resolved = match self.resolve(path) {
            Ok(p) => p,
            Err(status) => return Response::new(status),
        };

        if !resolved.is_file() {
            return Response::new(Status::NotFound);
        }

        let loaded = match self.load(&resolved, metrics) {
            Ok(v) => v,
            Err(_) => return Response::new(Status::InternalServerError),
        };
        let (total, content_type, last_modified, etag) = loaded.info();

        if is_not_modified(headers, etag, last_modified) {
            return Response::new(Status::NotModified)
                .header("ETag", etag.to_string())
                .header("Last-Modified", httpdate::fmt_http_date(last_modified));
        }

        let response = Response::new(Status::Ok)
            .header("Content-Type", content_type.to_string())
            .header("ETag", etag.to_string())
            .header("Last-Modified", httpdate::fmt_http_date(last_modified))
            .header("Accept-Ranges", "bytes");

        if let Some(range_header) = headers.get("range") {
            return self.serve_range(response, range_header, &resolved, total, loaded, method);
        }

        if matches!(method, Method::Head) {
            return response.header("Content-Length", total.to_string());
        }

        match loaded {
            Loaded::Bytes(bytes, ..) => response.with_body(bytes),
            Loaded::Stream { .. } => match stream_file(&resolved, 0) {
                Ok(reader) => response.header("Content-Length", total.to_string()).with_stream(reader),
                Err(_) => Response::new(Status::InternalServerError),
            },
        }
    }

    /// Loads a file's bytes and metadata, or — for files larger than
    /// [`Self::stream_threshold`] — just its metadata, leaving the bytes to
    /// be streamed from disk on demand rather than held in memory. A
    /// streamed file is never cache-eligible (§4.4: streaming and caching
    /// answer different questions).
    fn load(&self, path: &Path, metrics: &mut Metrics) -> std::io::Result<Loaded> {
        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().unwrap();
            if let Some(entry) = guard.get(path) {
                metrics.record_cache_hit();
                return Ok(Loaded::Bytes(
                    entry.bytes.as_ref().clone(),
                    entry.content_type,
                    entry.last_modified,
                    entry.etag,
                ));
            }
            metrics.record_cache_miss();
        }

        let meta = fs::metadata(path)?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let size = meta.len();
        let content_type = guess_mime_type(path).to_string();
        let etag = make_etag(size, modified);

        if size > self.stream_threshold {
            return Ok(Loaded::Stream {
                size,
                content_type,
                last_modified: modified,
                etag,
            });
        }

        let bytes = fs::read(path)?;
        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().unwrap();
            guard.insert(path.to_path_buf(), bytes.clone(), content_type.clone(), modified, etag.clone());
        }
        Ok(Loaded::Bytes(bytes, content_type, modified, etag))
    }

    fn serve_range(
        &self,
        response: Response,
        range_header: &str,
        path: &Path,
        total: u64,
        loaded: Loaded,
        method: Method,
    ) -> Response {
        let Some((start, end)) = parse_range(range_header, total) else {
            return response
                .with_status(Status::RangeNotSatisfiable)
                .header("Content-Range", format!("bytes */{total}"));
        };
        let len = end - start + 1;

        let response = response
            .with_status(Status::PartialContent)
            .header("Content-Range", format!("bytes {start}-{end}/{total}"))
            .header("Content-Length", len.to_string());

        if matches!(method, Method::Head) {
            return response;
        }

        match loaded {
            Loaded::Bytes(bytes, ..) => {
                let slice = &bytes[start as usize..=end as usize];
                response.with_body(slice.to_vec())
            }
            Loaded::Stream { .. } => match stream_file(path, start) {
                Ok(reader) => response.with_stream(reader.take(len)),
                Err(_) => Response::new(Status::InternalServerError),
            },
        }
    }
}

/// The outcome of [`StaticHandler::load`]: either the file's bytes are
/// already in hand, or it was too large to materialize and must be
/// streamed from disk when the body is actually written.
enum Loaded {
    Bytes(Vec<u8>, String, SystemTime, String),
    Stream {
        size: u64,
        content_type: String,
        last_modified: SystemTime,
        etag: String,
    },
}

impl Loaded {
    fn info(&self) -> (u64, &str, SystemTime, &str) {
        match self {
            Loaded::Bytes(bytes, content_type, last_modified, etag) => {
                (bytes.len() as u64, content_type, *last_modified, etag)
            }
            Loaded::Stream {
                size,
                content_type,
                last_modified,
                etag,
            } => (*size, content_type, *last_modified, etag),
        }
    }
}

/// A stream-backed file reader, used when a file is too large to be
/// cache-eligible and should not be fully materialized up front.
pub fn stream_file(path: &Path, start: u64) -> std::io::Result<impl Read> {
    let mut file = fs::File::open(path)?;
    if start > 0 {
        file.seek(SeekFrom::Start(start))?;
    }
    Ok(file)
}

fn is_not_modified(
    headers: &crate::request::OwnedHeaders,
    etag: &str,
    last_modified: SystemTime,
) -> bool {
    if let Some(inm) = headers.get("if-none-match") {
        if inm.split(',').any(|tag| tag.trim() == etag) {
            return true;
        }
    }
    if let Some(ims) = headers.get("if-modified-since") {
        if let Ok(since) = httpdate::parse_http_date(ims) {
            // HTTP-date has 1-second resolution.
            let truncated = httpdate::parse_http_date(&httpdate::fmt_http_date(last_modified))
                .unwrap_or(last_modified);
            if truncated <= since {
                return true;
            }
        }
    }
    false
}

fn make_etag(size: u64, modified: SystemTime) -> String {
    let secs = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{size:x}-{secs:x}\"")
}

/// Parses a single-range `Range: bytes=a-b` / `bytes=a-` / `bytes=-n`
/// header into an inclusive `(start, end)` byte range, per RFC 9110
/// §14.1.2. Returns `None` for anything unsatisfiable or malformed
/// (multi-range requests are not supported; the whole file is returned).
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') || total == 0 {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        let suffix_len: u64 = end_s.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        let start = total.saturating_sub(suffix_len);
        return Some((start, total - 1));
    }

    let start: u64 = start_s.parse().ok()?;
    if start >= total {
        return None;
    }
    let end = if end_s.is_empty() {
        total - 1
    } else {
        end_s.parse::<u64>().ok()?.min(total - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

/// Infers a MIME type from a file extension, matching the common set a
/// static file server is expected to know (RFC 9110 leaves the mapping
/// outside the wire format entirely).
fn guess_mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loopserve-static-test-{}",
            std::time::SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let root = temp_root();
        let handler = StaticHandler::new(&root, None, usize::MAX);
        assert_eq!(handler.resolve("../../etc/passwd"), Err(Status::Forbidden));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn resolves_a_normal_file() {
        let root = temp_root();
        let file = root.join("index.html");
        fs::write(&file, b"hi").unwrap();
        let handler = StaticHandler::new(&root, None, usize::MAX);
        let resolved = handler.resolve("/index.html").unwrap();
        assert_eq!(resolved, fs::canonicalize(&file).unwrap());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn parses_suffix_and_bounded_ranges() {
        assert_eq!(parse_range("bytes=0-99", 200), Some((0, 99)));
        assert_eq!(parse_range("bytes=100-", 200), Some((100, 199)));
        assert_eq!(parse_range("bytes=-50", 200), Some((150, 199)));
        assert_eq!(parse_range("bytes=500-600", 200), None);
        assert_eq!(parse_range("bytes=0-0,10-20", 200), None);
    }

    #[test]
    fn mime_table_covers_common_extensions() {
        assert_eq!(guess_mime_type(Path::new("a.html")), "text/html; charset=utf-8");
        assert_eq!(guess_mime_type(Path::new("a.png")), "image/png");
        assert_eq!(guess_mime_type(Path::new("a.unknown")), "application/octet-stream");
    }

    #[test]
    fn serves_full_file_and_honors_range() {
        let root = temp_root();
        let file = root.join("data.bin");
        let mut f = fs::File::create(&file).unwrap();
        f.write_all(&[0u8; 1000]).unwrap();
        let handler = StaticHandler::new(&root, Some(StaticCache::new(usize::MAX, usize::MAX, usize::MAX)), usize::MAX);
        let mut metrics = Metrics::new();
        let headers = crate::request::OwnedHeaders::default();
        let resp = handler.handle(Method::Get, "/data.bin", &headers, &mut metrics);
        assert_eq!(resp.status(), Status::Ok);
        fs::remove_dir_all(&root).unwrap();
    }
}
