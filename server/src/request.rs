//! The parsed request handed to the host (§3's "Parsed request").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use loopserve_parser::h1::headers::Headers as WireHeaders;
use loopserve_parser::{Method, Version};

use crate::tempfile::TempFileManager;

/// An owned, ordered, case-insensitive multimap of headers — the owned
/// counterpart of [`loopserve_parser::h1::headers::Headers`], needed
/// because a [`Request`] outlives the read-buffer borrow it was parsed
/// out of (it sits in the request queue until the host pulls it).
#[derive(Debug, Clone, Default)]
pub struct OwnedHeaders {
    entries: Vec<(String, String)>,
}

impl OwnedHeaders {
    /// Copies a borrowed wire [`WireHeaders`] multimap into an owned one.
    pub fn from_wire(wire: &WireHeaders<'_>) -> Self {
        let entries = wire
            .iter()
            .map(|h| (h.name_str().to_string(), h.value_str().into_owned()))
            .collect();
        Self { entries }
    }

    /// All values for `name`, in the order they appeared.
    pub fn get_all<'s, 'n>(&'s self, name: &'n str) -> impl Iterator<Item = &'s str> + 's
    where
        'n: 's,
    {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The first value for `name`, if present.
    pub fn get<'s>(&'s self, name: &'s str) -> Option<&'s str> {
        self.get_all(name).next()
    }

    /// Iterates every `(name, value)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Status of an uploaded file's temp-file write (§3's "status").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// The part was fully written to its temp file.
    Ok,
    /// Writing the temp file failed; `client_filename`/`size` may be
    /// incomplete.
    Error(String),
}

/// A file uploaded via `multipart/form-data`.
#[derive(Debug)]
pub struct UploadedFile {
    client_filename: String,
    client_media_type: Option<String>,
    temp_path: PathBuf,
    size: u64,
    status: UploadStatus,
}

impl UploadedFile {
    /// Constructs a record for a part whose payload was written to
    /// `temp_path`.
    pub fn new(
        client_filename: String,
        client_media_type: Option<String>,
        temp_path: PathBuf,
        size: u64,
        status: UploadStatus,
    ) -> Self {
        Self {
            client_filename,
            client_media_type,
            temp_path,
            size,
            status,
        }
    }

    /// The filename the client declared (`filename=` on
    /// `Content-Disposition`); untrusted, never used directly as a
    /// filesystem path.
    pub fn client_filename(&self) -> &str {
        &self.client_filename
    }

    /// The part's declared `Content-Type`, if any.
    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }

    /// The temp-file path currently holding the payload.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// The payload size, in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the upload completed successfully.
    pub fn status(&self) -> &UploadStatus {
        &self.status
    }

    /// Atomically renames the temp file to `dest` and tells `manager` to
    /// stop tracking it (§9: "`move_to` transfers ownership"). After this
    /// call the temp-file manager will no longer delete the file on
    /// cleanup.
    pub fn move_to(&mut self, dest: impl AsRef<Path>, manager: &TempFileManager) -> std::io::Result<()> {
        let dest = dest.as_ref();
        std::fs::rename(&self.temp_path, dest)?;
        manager.untrack(&self.temp_path);
        self.temp_path = dest.to_path_buf();
        Ok(())
    }
}

/// The body parsed according to its `Content-Type` (§4.1).
#[derive(Debug, Default)]
pub struct ParsedBody {
    /// `application/x-www-form-urlencoded` fields, or the non-file fields
    /// of a `multipart/form-data` body.
    pub form: HashMap<String, String>,
    /// `application/json`, if the body parsed as valid JSON.
    pub json: Option<serde_json::Value>,
}

/// Per-request server-side parameters (§3's "server params").
#[derive(Debug, Clone, Copy)]
pub struct ServerParams {
    /// The client's remote address and port.
    pub remote_addr: SocketAddr,
}

/// A fully parsed HTTP request, ready for the host to act on.
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: OwnedHeaders,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    parsed_body: ParsedBody,
    uploaded_files: HashMap<String, UploadedFile>,
    server_params: ServerParams,
}

impl Request {
    /// Constructs a request from its fully parsed parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        target: String,
        version: Version,
        headers: OwnedHeaders,
        parsed_body: ParsedBody,
        uploaded_files: HashMap<String, UploadedFile>,
        server_params: ServerParams,
    ) -> Self {
        let (path, query_str) = split_query(&target);
        let query = parse_query_string(query_str);
        let cookies = headers
            .get("cookie")
            .map(parse_cookies)
            .unwrap_or_default();
        let _ = path;
        Self {
            method,
            target,
            version,
            headers,
            query,
            cookies,
            parsed_body,
            uploaded_files,
            server_params,
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The full request target, e.g. `/search?q=rust`.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Just the path component of the target, without the query string.
    pub fn path(&self) -> &str {
        split_query(&self.target).0
    }

    /// The declared protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers.
    pub fn headers(&self) -> &OwnedHeaders {
        &self.headers
    }

    /// Parsed query-string parameters.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Parsed `Cookie` header values.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// The body parsed according to `Content-Type`.
    pub fn parsed_body(&self) -> &ParsedBody {
        &self.parsed_body
    }

    /// Uploaded files, keyed by their multipart field name.
    pub fn uploaded_files(&self) -> &HashMap<String, UploadedFile> {
        &self.uploaded_files
    }

    /// Mutable access to uploaded files, needed to call
    /// [`UploadedFile::move_to`].
    pub fn uploaded_files_mut(&mut self) -> &mut HashMap<String, UploadedFile> {
        &mut self.uploaded_files
    }

    /// Server-observed parameters (remote address, etc).
    pub fn server_params(&self) -> ServerParams {
        self.server_params
    }
}

fn split_query(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses a query string (`a=1&b=2`) into a map, matching the teacher's
/// percent-decoding rules for form bodies.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let key = loopserve_parser::h1::body::percent_decode(it.next().unwrap_or(""));
        let value = loopserve_parser::h1::body::percent_decode(it.next().unwrap_or(""));
        map.insert(key, value);
    }
    map
}
