//! Push / pull / status against the update server.
//!
//! Only request intent and response outcome cross the [`Transport`] seam;
//! the HTTP implementation lives in `http_client`. Transport failures are
//! always `Connection`, never `Upload`.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::{FwpackError, Result};
use crate::installation_set::InstallationSetManager;
use crate::object::{sha256_file, ObjectTemplate};
use crate::package::{Package, PackageMetadata};
use crate::progress::{NoProgress, Progress};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }

    /// Whether repeating the request cannot create a second resource.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Method::Get | Method::Put)
    }
}

/// Request intent: method, server path (or absolute URL) and optional body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<&'static str>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            content_type: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            ..Self::get(path)
        }
    }

    pub fn with_body(mut self, content_type: &'static str, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }
}

/// Any answer from the server, whatever its status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server message: JSON `error`/`errors`, else the raw body, else the status.
    pub fn message(&self) -> String {
        if let Ok(v) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            if let Some(s) = v.get("error").and_then(|e| e.as_str()) {
                return s.to_string();
            }
            if let Some(errors) = v.get("errors") {
                return match errors.as_str() {
                    Some(s) => s.to_string(),
                    None => errors.to_string(),
                };
            }
        }
        let text = String::from_utf8_lossy(&self.body).trim().to_string();
        if text.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            text
        }
    }

    fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| FwpackError::UnexpectedResponse {
            status: self.status,
            message: format!("invalid response body: {}", e),
        })
    }

    fn unexpected(&self) -> FwpackError {
        FwpackError::UnexpectedResponse {
            status: self.status,
            message: self.message(),
        }
    }
}

/// The server could not be reached at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one request and returns the server's answer, or fails when no
/// answer could be obtained.
pub trait Transport {
    fn send(&self, request: Request) -> std::result::Result<Response, TransportError>;
}

/// Remote commit state of a pushed package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitStatus {
    Queued,
    Building,
    Finished,
    Failed,
    /// Any status this client does not know about.
    Other(String),
}

impl From<&str> for CommitStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => CommitStatus::Queued,
            "building" => CommitStatus::Building,
            "finished" => CommitStatus::Finished,
            "failed" => CommitStatus::Failed,
            other => CommitStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStatus::Queued => f.write_str("queued"),
            CommitStatus::Building => f.write_str("building"),
            CommitStatus::Finished => f.write_str("finished"),
            CommitStatus::Failed => f.write_str("failed"),
            CommitStatus::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PushCreated {
    uid: String,
    #[serde(default)]
    uploads: Vec<UploadRequest>,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    sha256sum: String,
    #[serde(default)]
    exists: bool,
    url: String,
}

/// Outcome of a pull.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Objects per installation set in the pulled package.
    pub objects: usize,
    pub downloaded: usize,
    /// Artifacts already present locally with the expected digest.
    pub skipped: usize,
}

/// Transport plus the settings push and pull need.
pub struct Remote<'a> {
    transport: &'a dyn Transport,
    chunk_size: usize,
}

impl<'a> Remote<'a> {
    pub fn new(transport: &'a dyn Transport, config: &Config) -> Self {
        Self {
            transport,
            chunk_size: config.chunk_size.max(1),
        }
    }

    fn send(&self, request: Request) -> Result<Response> {
        tracing::debug!("{} {}", request.method.as_str(), request.path);
        self.transport
            .send(request)
            .map_err(|e| FwpackError::Connection(e.0))
    }
}

fn require_product(package: &Package) -> Result<String> {
    package
        .product
        .clone()
        .ok_or_else(|| FwpackError::usage("product not set"))
}

fn require_uid(package: &Package) -> Result<String> {
    package
        .uid
        .clone()
        .ok_or_else(|| FwpackError::usage("package uid not set"))
}

/// `filename` must be a bare file name so downloads stay in `dest`.
fn local_path(dest: &Path, filename: &str) -> Result<PathBuf> {
    let name = Path::new(filename);
    match name.file_name() {
        Some(base) if base == name.as_os_str() && filename != ".." => {
            if dest.as_os_str().is_empty() || dest == Path::new(".") {
                Ok(name.to_path_buf())
            } else {
                Ok(dest.join(name))
            }
        }
        _ => Err(FwpackError::UnexpectedResponse {
            status: 200,
            message: format!("refusing object filename \"{}\"", filename),
        }),
    }
}

/// Rebuild the installation sets a pull would install, with filenames
/// pointing into `dest`. Nothing is written.
fn pulled_objects(metadata: &PackageMetadata, dest: &Path) -> Result<InstallationSetManager> {
    let sets = metadata
        .objects
        .iter()
        .map(|set| {
            set.iter()
                .map(|m| {
                    Ok(ObjectTemplate {
                        filename: local_path(dest, &m.filename)?,
                        mode: m.mode,
                        options: m.options.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    InstallationSetManager::from_templates(sets)
}

impl Package {
    /// Upload the loaded package. Returns the uid the server assigned.
    pub fn push(&mut self, remote: &Remote<'_>, progress: Option<&mut dyn Progress>) -> Result<String> {
        let product = require_product(self)?;
        if !self.is_loaded() {
            return Err(FwpackError::usage("the package must be loaded before it is pushed"));
        }
        if self.is_empty() {
            return Err(FwpackError::usage("the package has no objects"));
        }
        let mut silent = NoProgress;
        let progress: &mut dyn Progress = match progress {
            Some(p) => p,
            None => &mut silent,
        };

        let body = serde_json::to_vec(&self.metadata())
            .map_err(|e| FwpackError::Upload(e.to_string()))?;
        let resp = remote.send(
            Request::post(format!("/products/{}/packages", product)).with_body(CONTENT_TYPE_JSON, body),
        )?;
        if !resp.is_success() {
            return Err(FwpackError::Upload(resp.message()));
        }
        let created: PushCreated = resp.json()?;
        tracing::info!("package {} created, {} upload(s) requested", created.uid, created.uploads.len());

        let mut sent = HashSet::new();
        for upload in created.uploads.iter().filter(|u| !u.exists) {
            if !sent.insert(upload.sha256sum.as_str()) {
                continue;
            }
            let object = self
                .objects()
                .all()
                .find(|o| o.sha256sum() == Some(upload.sha256sum.as_str()))
                .ok_or_else(|| FwpackError::UnexpectedResponse {
                    status: resp.status,
                    message: format!("server requested unknown object {}", upload.sha256sum),
                })?;
            upload_object(
                remote,
                object.filename(),
                object.size().unwrap_or(0),
                &upload.sha256sum,
                &upload.url,
                progress,
            )?;
        }

        let resp = remote.send(Request::post(format!(
            "/products/{}/packages/{}/finish",
            product, created.uid
        )))?;
        if !resp.is_success() {
            return Err(FwpackError::Upload(resp.message()));
        }
        tracing::info!("package {} pushed", created.uid);
        progress.push_finished(&created.uid);
        self.uid = Some(created.uid.clone());
        Ok(created.uid)
    }

    /// Download the package named by `uid` into this (empty) package.
    /// With `full`, artifacts are written to `dest` as well.
    pub fn pull(&mut self, remote: &Remote<'_>, full: bool, dest: &Path) -> Result<PullReport> {
        let product = require_product(self)?;
        if !self.is_empty() {
            return Err(FwpackError::usage(
                "you have a local package that would be overwritten by this action",
            ));
        }
        let uid = require_uid(self)?;

        let resp = remote.send(Request::get(format!("/products/{}/packages/{}", product, uid)))?;
        match resp.status {
            404 => return Err(FwpackError::not_found(format!("package {}", uid))),
            _ if !resp.is_success() => return Err(resp.unexpected()),
            _ => {}
        }
        let metadata: PackageMetadata = resp.json()?;
        let objects = pulled_objects(&metadata, dest)?;

        let mut report = PullReport {
            objects: metadata.objects.first().map(Vec::len).unwrap_or(0),
            ..PullReport::default()
        };
        if full {
            // check every target before downloading anything
            let mut seen = HashSet::new();
            let mut wanted = Vec::new();
            let pulled = metadata.objects.iter().flatten().zip(objects.all());
            for (object, target) in pulled {
                let sha = object.sha256sum.clone().ok_or_else(|| FwpackError::UnexpectedResponse {
                    status: resp.status,
                    message: format!("object {} has no sha256sum", object.filename),
                })?;
                if !seen.insert(sha.clone()) {
                    continue;
                }
                let path = target.filename().to_path_buf();
                if path.exists() {
                    if sha256_file(&path)? == sha {
                        report.skipped += 1;
                        continue;
                    }
                    return Err(FwpackError::FileExists(path));
                }
                wanted.push((sha, path));
            }
            for (sha, path) in wanted {
                download_object(remote, &product, &uid, &sha, &path)?;
                report.downloaded += 1;
            }
        }

        self.replace_contents(metadata.version, metadata.active_backup_backend, objects);
        tracing::info!(
            "pulled package {} ({} object(s), {} downloaded)",
            uid,
            report.objects,
            report.downloaded
        );
        Ok(report)
    }

    /// Commit status of the package named by `uid`.
    pub fn get_status(&self, remote: &Remote<'_>) -> Result<CommitStatus> {
        let product = require_product(self)?;
        let uid = require_uid(self)?;
        let resp = remote.send(Request::get(format!("/products/{}/commits/{}/status", product, uid)))?;
        match resp.status {
            404 => Err(FwpackError::not_found(format!("commit {}", uid))),
            _ if !resp.is_success() => Err(resp.unexpected()),
            _ => {
                let body: StatusBody = resp.json()?;
                Ok(CommitStatus::from(body.status.as_str()))
            }
        }
    }
}

/// Send one artifact as `chunk_size` parts to `{url}/parts/{n}`. The parts
/// must hash to `sha256sum`, the digest the package was loaded with.
fn upload_object(
    remote: &Remote<'_>,
    filename: &Path,
    size: u64,
    sha256sum: &str,
    url: &str,
    progress: &mut dyn Progress,
) -> Result<()> {
    let file_access = |source| FwpackError::FileAccess {
        path: filename.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(filename).map_err(file_access)?);
    progress.pre_object_upload(filename, size);
    let url = url.trim_end_matches('/');
    let mut hasher = Sha256::new();
    let mut part = 0usize;
    loop {
        let mut chunk = Vec::with_capacity(remote.chunk_size);
        (&mut reader)
            .take(remote.chunk_size as u64)
            .read_to_end(&mut chunk)
            .map_err(file_access)?;
        if chunk.is_empty() && part > 0 {
            break;
        }
        let len = chunk.len();
        hasher.update(&chunk);
        let resp = remote.send(
            Request::put(format!("{}/parts/{}", url, part)).with_body(CONTENT_TYPE_OCTET_STREAM, chunk),
        )?;
        if !resp.is_success() {
            return Err(FwpackError::Upload(resp.message()));
        }
        progress.object_upload_progress(len as u64);
        part += 1;
        if len < remote.chunk_size {
            break;
        }
    }
    progress.post_object_upload();
    let actual = format!("{:x}", hasher.finalize());
    if actual != sha256sum {
        // changed on disk since load; the server must not finish this package
        return Err(FwpackError::Integrity {
            path: filename.to_path_buf(),
            expected: sha256sum.to_string(),
            actual,
        });
    }
    tracing::debug!("uploaded {} in {} part(s)", filename.display(), part);
    Ok(())
}

/// Fetch one artifact next to the manifest, verifying its digest before it
/// takes its final name.
fn download_object(remote: &Remote<'_>, product: &str, uid: &str, sha: &str, path: &Path) -> Result<()> {
    let resp = remote.send(Request::get(format!(
        "/products/{}/packages/{}/objects/{}",
        product, uid, sha
    )))?;
    match resp.status {
        404 => return Err(FwpackError::not_found(format!("object {}", sha))),
        _ if !resp.is_success() => return Err(resp.unexpected()),
        _ => {}
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    let write_err = |source| FwpackError::FileAccess {
        path: tmp.clone(),
        source,
    };
    std::fs::write(&tmp, &resp.body).map_err(write_err)?;
    let actual = sha256_file(&tmp)?;
    if actual != sha {
        let _ = std::fs::remove_file(&tmp);
        return Err(FwpackError::Integrity {
            path: path.to_path_buf(),
            expected: sha.to_string(),
            actual,
        });
    }
    std::fs::rename(&tmp, path).map_err(|source| FwpackError::FileAccess {
        path: path.to_path_buf(),
        source,
    })
}
