//! Installable objects: an artifact file plus its install metadata.
//!
//! Size, digests and version are computed by [`Object::load`] and shared
//! through a [`LoadCache`] scoped to one load call, so an artifact referenced
//! by several objects (typically the same image in both installation sets)
//! is read and hashed once.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FwpackError, Result};
use crate::options::{Mode, OptionSpec, OptionValue, FILENAME_OPTION};
use crate::progress::Progress;

const READ_BUF_SIZE: usize = 64 * 1024;
const UIMAGE_MAGIC: [u8; 4] = [0x27, 0x05, 0x19, 0x56];
const UIMAGE_NAME_OFFSET: usize = 32;
const UIMAGE_NAME_LEN: usize = 32;
const UIMAGE_HEADER_LEN: usize = UIMAGE_NAME_OFFSET + UIMAGE_NAME_LEN;
const MAX_VERSION_LEN: usize = 128;

/// What the editor asks for when adding an object. Options are raw text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSpec {
    pub filename: PathBuf,
    pub mode: Mode,
    pub options: BTreeMap<String, String>,
}

impl ObjectSpec {
    pub fn new(filename: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            filename: filename.into(),
            mode,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }
}

/// Edit-time form persisted in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTemplate {
    pub filename: PathBuf,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, OptionValue>,
}

/// Upload form: base file name, options and the loaded digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub filename: String,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Result of reading an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDigest {
    pub size: u64,
    pub md5: String,
    pub sha256sum: String,
    pub version: Option<String>,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    digest: ObjectDigest,
    // version pattern the cached version was extracted with
    pattern: Option<String>,
}

/// Digests computed during one load call, keyed by filename.
#[derive(Debug, Default)]
pub struct LoadCache {
    entries: HashMap<PathBuf, CacheEntry>,
    hashed: usize,
    reused: usize,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files read and hashed.
    pub fn hashed(&self) -> usize {
        self.hashed
    }

    /// Number of objects served from an earlier entry.
    pub fn reused(&self) -> usize {
        self.reused
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    filename: PathBuf,
    mode: Mode,
    options: BTreeMap<String, OptionValue>,
    digest: Option<ObjectDigest>,
}

impl Object {
    /// Build an object, validating every option against the mode's schema.
    pub fn new(spec: &ObjectSpec) -> Result<Self> {
        if spec.filename.as_os_str().is_empty() {
            return Err(FwpackError::InvalidValue {
                option: FILENAME_OPTION.name.to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            filename: spec.filename.clone(),
            mode: spec.mode,
            options: spec.mode.parse_options(&spec.options)?,
            digest: None,
        })
    }

    /// Rebuild from the manifest or server metadata. Names and values are
    /// checked against the schema exactly as an edit would check them.
    pub fn from_template(template: ObjectTemplate) -> Result<Self> {
        for (name, value) in &template.options {
            let spec = template.mode.option(name)?;
            if spec.name == FILENAME_OPTION.name {
                return Err(FwpackError::InvalidOption {
                    mode: template.mode.name().to_string(),
                    option: name.clone(),
                });
            }
            // stored values must already be in parsed form
            if spec.parse(&value.to_string())? != *value {
                return Err(FwpackError::InvalidValue {
                    option: name.clone(),
                    value: value.to_string(),
                    reason: "stored with the wrong type".to_string(),
                });
            }
        }
        Ok(Self {
            filename: template.filename,
            mode: template.mode,
            options: template.options,
            digest: None,
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn is_loaded(&self) -> bool {
        self.digest.is_some()
    }

    pub fn digest(&self) -> Option<&ObjectDigest> {
        self.digest.as_ref()
    }

    pub fn size(&self) -> Option<u64> {
        self.digest.as_ref().map(|d| d.size)
    }

    pub fn md5(&self) -> Option<&str> {
        self.digest.as_ref().map(|d| d.md5.as_str())
    }

    pub fn sha256sum(&self) -> Option<&str> {
        self.digest.as_ref().map(|d| d.sha256sum.as_str())
    }

    pub fn version(&self) -> Option<&str> {
        self.digest.as_ref().and_then(|d| d.version.as_deref())
    }

    /// Validate `value` for `option` without touching the object.
    pub fn parse_update(&self, option: &str, value: &str) -> Result<(&'static OptionSpec, OptionValue)> {
        let spec = self.mode.option(option)?;
        let parsed = spec.parse(value)?;
        Ok((spec, parsed))
    }

    /// Set an already validated value.
    pub(crate) fn apply(&mut self, spec: &OptionSpec, value: OptionValue) {
        if spec.name == FILENAME_OPTION.name {
            self.filename = PathBuf::from(value.to_string());
            self.digest = None;
        } else {
            self.options.insert(spec.name.to_string(), value);
        }
    }

    pub fn update(&mut self, option: &str, value: &str) -> Result<()> {
        let (spec, parsed) = self.parse_update(option, value)?;
        self.apply(spec, parsed);
        Ok(())
    }

    pub fn template(&self) -> ObjectTemplate {
        ObjectTemplate {
            filename: self.filename.clone(),
            mode: self.mode,
            options: self.options.clone(),
        }
    }

    pub fn metadata(&self) -> ObjectMetadata {
        let filename = self
            .filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.to_string_lossy().into_owned());
        ObjectMetadata {
            filename,
            mode: self.mode,
            options: self.options.clone(),
            size: self.size(),
            md5: self.md5().map(String::from),
            sha256sum: self.sha256sum().map(String::from),
            version: self.version().map(String::from),
        }
    }

    /// Version pattern named by `install-if-different`, if any.
    fn version_pattern(&self) -> Option<String> {
        match self.options.get("install-if-different") {
            Some(OptionValue::Text(p)) if p != "sha256sum" => Some(p.clone()),
            _ => None,
        }
    }

    /// Compute (or reuse from `cache`) size, digests and version.
    /// Invokes `package_load` once, cached or not.
    pub fn load(&mut self, cache: &mut LoadCache, progress: &mut dyn Progress) -> Result<()> {
        let pattern = self.version_pattern();
        let digest = match cache.entries.get_mut(&self.filename) {
            Some(entry) => {
                tracing::debug!("cache hit for {}", self.filename.display());
                cache.reused += 1;
                if entry.pattern != pattern {
                    entry.digest.version = read_version(&self.filename, pattern.as_deref())?;
                    entry.pattern = pattern;
                }
                entry.digest.clone()
            }
            None => {
                tracing::debug!("hashing {}", self.filename.display());
                let digest = compute_digest(&self.filename, pattern.as_deref())?;
                cache.hashed += 1;
                cache.entries.insert(
                    self.filename.clone(),
                    CacheEntry {
                        digest: digest.clone(),
                        pattern,
                    },
                );
                digest
            }
        };
        self.digest = Some(digest);
        progress.package_load(self);
        Ok(())
    }
}

fn file_access(path: &Path) -> impl FnOnce(std::io::Error) -> FwpackError + '_ {
    move |source| FwpackError::FileAccess {
        path: path.to_path_buf(),
        source,
    }
}

/// Single streaming pass for size, MD5, SHA-256 and the version marker.
pub fn compute_digest(path: &Path, version_pattern: Option<&str>) -> Result<ObjectDigest> {
    let file = File::open(path).map_err(file_access(path))?;
    let mut reader = BufReader::new(file);
    let mut md5 = Md5::new();
    let mut sha256 = Sha256::new();
    let mut scanner = version_pattern.and_then(VersionScanner::new);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(file_access(path))?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha256.update(&buf[..n]);
        if let Some(scanner) = scanner.as_mut() {
            scanner.update(&buf[..n]);
        }
        size += n as u64;
    }
    Ok(ObjectDigest {
        size,
        md5: format!("{:x}", md5.finalize()),
        sha256sum: format!("{:x}", sha256.finalize()),
        version: scanner.and_then(VersionScanner::finish),
    })
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(file_access(path))?;
    let mut reader = BufReader::new(file);
    let mut sha256 = Sha256::new();
    std::io::copy(&mut reader, &mut sha256).map_err(file_access(path))?;
    Ok(format!("{:x}", sha256.finalize()))
}

/// Version only; stops reading once the marker has been resolved.
fn read_version(path: &Path, pattern: Option<&str>) -> Result<Option<String>> {
    let Some(mut scanner) = pattern.and_then(VersionScanner::new) else {
        return Ok(None);
    };
    let mut reader = BufReader::new(File::open(path).map_err(file_access(path))?);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    while !scanner.is_done() {
        let n = reader.read(&mut buf).map_err(file_access(path))?;
        if n == 0 {
            break;
        }
        scanner.update(&buf[..n]);
    }
    Ok(scanner.finish())
}

/// Version string embedded in an image; `None` when the pattern does not match.
pub fn extract_version(pattern: &str, content: &[u8]) -> Option<String> {
    let mut scanner = VersionScanner::new(pattern)?;
    scanner.update(content);
    scanner.finish()
}

/// Incremental version search over an artifact fed chunk by chunk.
///
/// Only a bounded window (marker plus at most `MAX_VERSION_LEN` token bytes)
/// is kept between chunks, so memory does not grow with the artifact.
struct VersionScanner {
    marker: &'static [u8],
    uimage: bool,
    head: Vec<u8>,
    window: Vec<u8>,
    version: Option<String>,
    done: bool,
}

impl VersionScanner {
    fn new(pattern: &str) -> Option<Self> {
        let (marker, uimage): (&'static [u8], bool) = match pattern {
            "u-boot" => (b"U-Boot ", false),
            "linux-kernel" => (b"Linux version ", true),
            _ => return None,
        };
        Some(Self {
            marker,
            uimage,
            head: Vec::with_capacity(UIMAGE_HEADER_LEN),
            window: Vec::new(),
            version: None,
            done: false,
        })
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn update(&mut self, chunk: &[u8]) {
        if self.done {
            return;
        }
        if self.uimage && self.head.len() < UIMAGE_HEADER_LEN {
            let need = UIMAGE_HEADER_LEN - self.head.len();
            self.head.extend_from_slice(&chunk[..need.min(chunk.len())]);
            if self.head.len() == UIMAGE_HEADER_LEN && self.head[..4] == UIMAGE_MAGIC {
                self.version = uimage_name(&self.head);
                self.done = true;
                return;
            }
        }
        self.window.extend_from_slice(chunk);
        self.scan(false);
    }

    fn scan(&mut self, eof: bool) {
        let Some(pos) = find_subslice(&self.window, self.marker) else {
            // keep just enough to match a marker split across chunks
            let keep = self.marker.len() - 1;
            if self.window.len() > keep {
                self.window.drain(..self.window.len() - keep);
            }
            return;
        };
        let start = pos + self.marker.len();
        let token_len = self.window[start..]
            .iter()
            .take_while(|b| is_token_byte(**b))
            .count();
        if eof || token_len >= MAX_VERSION_LEN || start + token_len < self.window.len() {
            let len = token_len.min(MAX_VERSION_LEN);
            self.version = (len > 0)
                .then(|| String::from_utf8_lossy(&self.window[start..start + len]).into_owned());
            self.done = true;
        } else {
            // token may continue in the next chunk
            self.window.drain(..pos);
        }
    }

    fn finish(mut self) -> Option<String> {
        if !self.done {
            self.scan(true);
        }
        self.version
    }
}

/// NUL-trimmed image name from a uImage header.
fn uimage_name(header: &[u8]) -> Option<String> {
    let raw = &header[UIMAGE_NAME_OFFSET..UIMAGE_NAME_OFFSET + UIMAGE_NAME_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    (end > 0).then(|| String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn is_token_byte(b: u8) -> bool {
    (0x21..=0x7e).contains(&b)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    #[derive(Default)]
    struct Counter(usize);

    impl Progress for Counter {
        fn package_load(&mut self, _object: &Object) {
            self.0 += 1;
        }
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_new_validates_options() {
        let spec = ObjectSpec::new("fw.bin", Mode::Raw).with_option("count", "abc");
        assert!(matches!(Object::new(&spec), Err(FwpackError::InvalidValue { .. })));

        let spec = ObjectSpec::new("fw.bin", Mode::Raw).with_option("volume", "rootfs");
        assert!(matches!(Object::new(&spec), Err(FwpackError::InvalidOption { .. })));

        let spec = ObjectSpec::new("fw.bin", Mode::Raw).with_option("count", "8");
        let obj = Object::new(&spec).unwrap();
        assert_eq!(obj.option("count"), Some(&OptionValue::Int(8)));
        assert!(!obj.is_loaded());
        assert_eq!(obj.size(), None);
    }

    #[test]
    fn test_load_computes_known_digests() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "hello.bin", b"hello world");
        let mut obj = Object::new(&ObjectSpec::new(&path, Mode::Raw)).unwrap();
        let mut cache = LoadCache::new();
        obj.load(&mut cache, &mut NoProgress).unwrap();

        assert_eq!(obj.size(), Some(11));
        assert_eq!(obj.md5(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert_eq!(
            obj.sha256sum(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        assert_eq!(obj.version(), None);
        assert_eq!(sha256_file(&path).unwrap(), obj.sha256sum().unwrap());
    }

    #[test]
    fn test_same_filename_hashed_once_per_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "fw.bin", b"firmware payload");
        let spec = ObjectSpec::new(&path, Mode::Raw);
        let mut a = Object::new(&spec).unwrap();
        let mut b = Object::new(&spec).unwrap();
        let mut cache = LoadCache::new();
        let mut counter = Counter::default();

        a.load(&mut cache, &mut counter).unwrap();
        b.load(&mut cache, &mut counter).unwrap();

        assert_eq!(cache.hashed(), 1);
        assert_eq!(cache.reused(), 1);
        assert_eq!(counter.0, 2);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_missing_file_is_file_access_error() {
        let mut obj = Object::new(&ObjectSpec::new("/nonexistent/fw.bin", Mode::Flash)).unwrap();
        let err = obj.load(&mut LoadCache::new(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, FwpackError::FileAccess { .. }));
        assert!(!obj.is_loaded());
    }

    #[test]
    fn test_update_filename_clears_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "a.bin", b"a");
        let mut obj = Object::new(&ObjectSpec::new(&path, Mode::Raw)).unwrap();
        obj.load(&mut LoadCache::new(), &mut NoProgress).unwrap();
        obj.update("filename", "b.bin").unwrap();
        assert_eq!(obj.filename(), Path::new("b.bin"));
        assert!(!obj.is_loaded());
        assert!(matches!(obj.update("mode", "copy"), Err(FwpackError::InvalidOption { .. })));
    }

    #[test]
    fn test_u_boot_version_extraction() {
        let content = b"\x00\x01junkU-Boot 2017.01-rc2 (Jan 01 2017)\x00";
        assert_eq!(extract_version("u-boot", content), Some("2017.01-rc2".to_string()));
        assert_eq!(extract_version("u-boot", b"nothing here"), None);
        assert_eq!(extract_version("sha256sum", content), None);
    }

    #[test]
    fn test_linux_kernel_version_extraction() {
        let mut uimage = vec![0u8; 64];
        uimage[..4].copy_from_slice(&UIMAGE_MAGIC);
        uimage[32..44].copy_from_slice(b"Linux-4.1.15");
        assert_eq!(extract_version("linux-kernel", &uimage), Some("Linux-4.1.15".to_string()));

        let zimage = b"....Linux version 5.10.0-arm (builder@host) #1 SMP";
        assert_eq!(extract_version("linux-kernel", zimage), Some("5.10.0-arm".to_string()));
    }

    #[test]
    fn test_version_marker_split_across_chunks() {
        let content = b"0123456789U-Boot 2019.07-00042 (Jul 2019)";
        for size in 1..content.len() {
            let mut scanner = VersionScanner::new("u-boot").unwrap();
            for chunk in content.chunks(size) {
                scanner.update(chunk);
            }
            assert_eq!(scanner.finish().as_deref(), Some("2019.07-00042"), "chunk size {}", size);
        }

        let mut scanner = VersionScanner::new("linux-kernel").unwrap();
        scanner.update(b"junk Linux vers");
        scanner.update(b"ion 6.1.0");
        assert_eq!(scanner.finish().as_deref(), Some("6.1.0"));
    }

    #[test]
    fn test_version_scan_memory_is_bounded() {
        let mut scanner = VersionScanner::new("u-boot").unwrap();
        let filler = vec![b'x'; READ_BUF_SIZE];
        for _ in 0..16 {
            scanner.update(&filler);
        }
        assert!(scanner.window.len() < 16);
        scanner.update(b" U-Boot ");
        scanner.update(&filler);
        assert!(scanner.is_done());
        assert_eq!(scanner.version.as_ref().map(String::len), Some(MAX_VERSION_LEN));
    }

    #[test]
    fn test_version_extracted_from_large_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let mut content = vec![0u8; 3 * READ_BUF_SIZE + 17];
        content.extend_from_slice(b"U-Boot 2022.10 ");
        content.extend(vec![0u8; READ_BUF_SIZE]);
        let path = write(tmp.path(), "u-boot.img", &content);
        let digest = compute_digest(&path, Some("u-boot")).unwrap();
        assert_eq!(digest.version.as_deref(), Some("2022.10"));
        assert_eq!(digest.size, content.len() as u64);
        assert_eq!(read_version(&path, Some("u-boot")).unwrap().as_deref(), Some("2022.10"));
    }

    #[test]
    fn test_from_template_rejects_badly_typed_values() {
        let template = |name: &str, value: OptionValue| ObjectTemplate {
            filename: PathBuf::from("fw.bin"),
            mode: Mode::Raw,
            options: [(name.to_string(), value)].into_iter().collect(),
        };
        assert!(Object::from_template(template("count", OptionValue::Int(4))).is_ok());
        assert!(matches!(
            Object::from_template(template("count", OptionValue::Text("abc".into()))),
            Err(FwpackError::InvalidValue { .. })
        ));
        assert!(matches!(
            Object::from_template(template("count", OptionValue::Text("4".into()))),
            Err(FwpackError::InvalidValue { .. })
        ));
        assert!(matches!(
            Object::from_template(template("target-device", OptionValue::Text("relative".into()))),
            Err(FwpackError::InvalidValue { .. })
        ));
        assert!(matches!(
            Object::from_template(template("truncate", OptionValue::Int(1))),
            Err(FwpackError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_version_loaded_through_option() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "u-boot.bin", b"headerU-Boot 2020.04 more");
        let spec = ObjectSpec::new(&path, Mode::Raw).with_option("install-if-different", "u-boot");
        let mut obj = Object::new(&spec).unwrap();
        obj.load(&mut LoadCache::new(), &mut NoProgress).unwrap();
        assert_eq!(obj.version(), Some("2020.04"));
        assert_eq!(obj.metadata().version.as_deref(), Some("2020.04"));
        assert_eq!(obj.metadata().filename, "u-boot.bin");
    }
}
