//! Package aggregate and its manifest file.
//!
//! The manifest is JSON with one object array per installation set, so the
//! installation-set mode is recovered from the number of arrays. Writes go
//! to a temp file renamed over the manifest, and [`open_package`] only writes
//! back when the caller's closure succeeded.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{FwpackError, Result};
use crate::installation_set::{InstallationSetManager, InstallationSetMode, LoadReport};
use crate::object::{ObjectMetadata, ObjectTemplate};
use crate::progress::Progress;

/// Bootloader that flips between active and inactive slots on the device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveBackupBackend {
    #[default]
    UBoot,
    Grub,
}

pub const ACTIVE_BACKUP_BACKENDS: [ActiveBackupBackend; 2] =
    [ActiveBackupBackend::UBoot, ActiveBackupBackend::Grub];

impl ActiveBackupBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ActiveBackupBackend::UBoot => "u-boot",
            ActiveBackupBackend::Grub => "grub",
        }
    }
}

impl fmt::Display for ActiveBackupBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActiveBackupBackend {
    type Err = FwpackError;

    fn from_str(s: &str) -> Result<Self> {
        ACTIVE_BACKUP_BACKENDS
            .iter()
            .copied()
            .find(|b| b.name() == s)
            .ok_or_else(|| FwpackError::usage(format!("unknown active-backup backend \"{}\"", s)))
    }
}

/// On-disk manifest layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Manifest {
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    active_backup_backend: ActiveBackupBackend,
    objects: Vec<Vec<ObjectTemplate>>,
}

/// What push sends and pull receives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub active_backup_backend: ActiveBackupBackend,
    pub objects: Vec<Vec<ObjectMetadata>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub product: Option<String>,
    pub version: Option<String>,
    pub uid: Option<String>,
    pub active_backup_backend: ActiveBackupBackend,
    objects: InstallationSetManager,
    // set by load(), cleared by any mutable access to the objects
    loaded: bool,
}

impl Package {
    pub fn new(mode: InstallationSetMode) -> Self {
        Self {
            product: None,
            version: None,
            uid: None,
            active_backup_backend: ActiveBackupBackend::default(),
            objects: InstallationSetManager::new(mode),
            loaded: false,
        }
    }

    pub fn objects(&self) -> &InstallationSetManager {
        &self.objects
    }

    /// Mutable access invalidates a previous load.
    pub fn objects_mut(&mut self) -> &mut InstallationSetManager {
        self.loaded = false;
        &mut self.objects
    }

    pub fn mode(&self) -> InstallationSetMode {
        self.objects.mode()
    }

    /// Objects per installation set.
    pub fn len(&self) -> usize {
        self.objects.object_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Switch between single and active/inactive; only while no object exists.
    pub fn set_mode(&mut self, mode: InstallationSetMode) -> Result<()> {
        if !self.is_empty() {
            return Err(FwpackError::usage(
                "the installation set mode can only be changed while the package has no objects",
            ));
        }
        self.objects = InstallationSetManager::new(mode);
        self.loaded = false;
        Ok(())
    }

    /// Hash every object; see [`InstallationSetManager::load`].
    pub fn load(&mut self, progress: Option<&mut dyn Progress>) -> Result<LoadReport> {
        self.loaded = false;
        let report = self.objects.load(progress)?;
        self.loaded = true;
        Ok(report)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn metadata(&self) -> PackageMetadata {
        PackageMetadata {
            product: self.product.clone(),
            uid: self.uid.clone(),
            version: self.version.clone(),
            active_backup_backend: self.active_backup_backend,
            objects: self.objects.metadata(),
        }
    }

    /// Swap in objects pulled from the server; they still need a load.
    pub(crate) fn replace_contents(
        &mut self,
        version: Option<String>,
        active_backup_backend: ActiveBackupBackend,
        objects: InstallationSetManager,
    ) {
        self.objects = objects;
        self.version = version;
        self.active_backup_backend = active_backup_backend;
        self.loaded = false;
    }

    pub fn to_json(&self) -> Result<String> {
        let manifest = Manifest {
            product: self.product.clone(),
            version: self.version.clone(),
            uid: self.uid.clone(),
            active_backup_backend: self.active_backup_backend,
            objects: self.objects.template(),
        };
        serde_json::to_string_pretty(&manifest)
            .map_err(|e| FwpackError::manifest("<memory>", e))
    }

    pub fn from_json(path: &Path, json: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(json).map_err(|e| FwpackError::manifest(path, e))?;
        Ok(Self {
            product: manifest.product,
            version: manifest.version,
            uid: manifest.uid,
            active_backup_backend: manifest.active_backup_backend,
            objects: InstallationSetManager::from_templates(manifest.objects)?,
            loaded: false,
        })
    }

    /// Read a manifest; a missing file is NotFound.
    pub fn read(path: &Path) -> Result<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FwpackError::not_found(format!(
                    "package file {}",
                    path.display()
                )))
            }
            Err(e) => return Err(FwpackError::manifest(path, e)),
        };
        Self::from_json(path, &json)
    }

    /// Write the manifest atomically (temp file, then rename).
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let mut tmp = OsString::from(path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json.as_bytes()).map_err(|e| FwpackError::manifest(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            FwpackError::manifest(path, e)
        })
    }

    /// Export a copy of the manifest.
    pub fn dump(&self, path: &Path) -> Result<()> {
        self.write(path)
    }
}

/// Create a fresh manifest; refuses to overwrite an existing one.
pub fn create_package(
    config: &Config,
    product: Option<String>,
    mode: InstallationSetMode,
) -> Result<Package> {
    let path = &config.package_file;
    if path.exists() {
        return Err(FwpackError::FileExists(path.clone()));
    }
    let mut package = Package::new(mode);
    package.product = product;
    package.write(path)?;
    tracing::info!("created {} ({})", path.display(), mode.name());
    Ok(package)
}

/// Scoped access to the manifest: read, run `f`, then write back unless
/// `read_only` or `f` failed. On error the file is left untouched.
pub fn open_package<T, F>(config: &Config, read_only: bool, f: F) -> Result<T>
where
    F: FnOnce(&mut Package) -> Result<T>,
{
    let path = &config.package_file;
    let mut package = Package::read(path)?;
    let value = f(&mut package)?;
    if !read_only {
        package.write(path)?;
        tracing::debug!("wrote {}", path.display());
    }
    Ok(value)
}
