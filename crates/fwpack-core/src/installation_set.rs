//! Installation sets: N parallel, equally long object lists.
//!
//! Single mode owns one set; active/inactive mode owns two, one per storage
//! slot. Objects are created and removed in every set at once, so an index
//! names the same logical object in each set. Symmetric options are updated
//! in every set; asymmetric ones (the slot-specific targets) in one named set.

use serde::{Deserialize, Serialize};

use crate::error::{FwpackError, Result};
use crate::object::{LoadCache, Object, ObjectMetadata, ObjectSpec, ObjectTemplate};
use crate::progress::{NoProgress, Progress};

/// One complete, self-sufficient list of objects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallationSet {
    objects: Vec<Object>,
}

impl InstallationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object built from `spec`; returns its index.
    pub fn create(&mut self, spec: &ObjectSpec) -> Result<usize> {
        let object = Object::new(spec)?;
        Ok(self.push(object))
    }

    pub(crate) fn push(&mut self, object: Object) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<&Object> {
        self.objects
            .get(index)
            .ok_or_else(|| FwpackError::not_found(format!("object {}", index)))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Object> {
        self.objects
            .get_mut(index)
            .ok_or_else(|| FwpackError::not_found(format!("object {}", index)))
    }

    /// Validate then set `option` on the object at `index`.
    pub fn update(&mut self, index: usize, option: &str, value: &str) -> Result<()> {
        self.get_mut(index)?.update(option, value)
    }

    /// Remove the object at `index`; later objects shift down by one.
    pub fn remove(&mut self, index: usize) -> Result<Object> {
        if index >= self.objects.len() {
            return Err(FwpackError::not_found(format!("object {}", index)));
        }
        Ok(self.objects.remove(index))
    }

    pub fn metadata(&self) -> impl Iterator<Item = ObjectMetadata> + '_ {
        self.objects.iter().map(Object::metadata)
    }

    pub fn template(&self) -> impl Iterator<Item = ObjectTemplate> + '_ {
        self.objects.iter().map(Object::template)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Object> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<'a> IntoIterator for &'a InstallationSet {
    type Item = &'a Object;
    type IntoIter = std::slice::Iter<'a, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

/// How many parallel installation sets a package carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallationSetMode {
    Single,
    ActiveInactive,
}

impl InstallationSetMode {
    pub fn set_count(&self) -> usize {
        match self {
            InstallationSetMode::Single => 1,
            InstallationSetMode::ActiveInactive => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstallationSetMode::Single => "single",
            InstallationSetMode::ActiveInactive => "active-inactive",
        }
    }

    /// Mode from a number of sets: 1 is Single, 2 is ActiveInactive.
    pub fn from_set_count(count: usize) -> Result<Self> {
        match count {
            0 => Err(FwpackError::usage("there are no objects in this package")),
            1 => Ok(InstallationSetMode::Single),
            2 => Ok(InstallationSetMode::ActiveInactive),
            n => Err(FwpackError::usage(format!(
                "{} installation sets found, expected 1 (single) or 2 (active-inactive)",
                n
            ))),
        }
    }

    /// Mode from persisted per-set object lists.
    pub fn from_objects<T>(sets: &[T]) -> Result<Self> {
        Self::from_set_count(sets.len())
    }
}

impl std::str::FromStr for InstallationSetMode {
    type Err = FwpackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(InstallationSetMode::Single),
            "active-inactive" => Ok(InstallationSetMode::ActiveInactive),
            other => Err(FwpackError::usage(format!(
                "unknown installation set mode \"{}\" (expected single or active-inactive)",
                other
            ))),
        }
    }
}

/// Digest work done by one load call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Objects loaded in total.
    pub objects: usize,
    /// Files actually read and hashed.
    pub hashed: usize,
    /// Objects served from the per-call cache.
    pub reused: usize,
}

/// Owns `mode.set_count()` installation sets of equal length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallationSetManager {
    mode: InstallationSetMode,
    sets: Vec<InstallationSet>,
}

impl InstallationSetManager {
    pub fn new(mode: InstallationSetMode) -> Self {
        Self {
            mode,
            sets: (0..mode.set_count()).map(|_| InstallationSet::new()).collect(),
        }
    }

    /// Rebuild from persisted templates; set count picks the mode and
    /// every set must have the same length.
    pub fn from_templates(sets: Vec<Vec<ObjectTemplate>>) -> Result<Self> {
        let mode = InstallationSetMode::from_objects(&sets)?;
        let expected = sets[0].len();
        if let Some(bad) = sets.iter().position(|s| s.len() != expected) {
            return Err(FwpackError::usage(format!(
                "installation set {} has {} objects, expected {}",
                bad,
                sets[bad].len(),
                expected
            )));
        }
        let mut manager = Self::new(mode);
        for (set, templates) in manager.sets.iter_mut().zip(sets) {
            for template in templates {
                set.push(Object::from_template(template)?);
            }
        }
        Ok(manager)
    }

    pub fn mode(&self) -> InstallationSetMode {
        self.mode
    }

    pub fn is_single(&self) -> bool {
        self.mode == InstallationSetMode::Single
    }

    /// Number of installation sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Objects per set (identical in every set).
    pub fn object_count(&self) -> usize {
        self.sets.first().map(InstallationSet::len).unwrap_or(0)
    }

    pub fn get_installation_set(&self, index: usize) -> Result<&InstallationSet> {
        self.sets
            .get(index)
            .ok_or_else(|| FwpackError::not_found(format!("installation set {}", index)))
    }

    fn get_installation_set_mut(&mut self, index: usize) -> Result<&mut InstallationSet> {
        self.sets
            .get_mut(index)
            .ok_or_else(|| FwpackError::not_found(format!("installation set {}", index)))
    }

    /// Create the same object at the same index in every set.
    pub fn create(&mut self, spec: &ObjectSpec) -> Result<usize> {
        let object = Object::new(spec)?;
        let expected = self.object_count();
        for set in &mut self.sets {
            let index = set.push(object.clone());
            assert_eq!(index, expected, "installation sets diverged on create");
        }
        tracing::debug!("created object {} ({})", expected, spec.filename.display());
        Ok(expected)
    }

    pub fn get(&self, index: usize, installation_set: usize) -> Result<&Object> {
        self.get_installation_set(installation_set)?.get(index)
    }

    /// Update one option. Asymmetric options need exactly one target set;
    /// symmetric ones are applied to every set and must not name one.
    /// Everything is validated before any set is touched.
    pub fn update(
        &mut self,
        index: usize,
        option: &str,
        value: &str,
        installation_set: Option<usize>,
    ) -> Result<()> {
        let (spec, parsed) = self.get(index, 0)?.parse_update(option, value)?;
        match (spec.is_asymmetric(), installation_set) {
            (true, None) => Err(FwpackError::usage(format!(
                "an installation set is required for option \"{}\"",
                option
            ))),
            (true, Some(set)) => {
                self.get_installation_set_mut(set)?.get_mut(index)?.apply(spec, parsed);
                Ok(())
            }
            (false, Some(_)) => Err(FwpackError::usage(format!(
                "an installation set must not be specified for option \"{}\"",
                option
            ))),
            (false, None) => {
                for set in &mut self.sets {
                    set.get_mut(index)?.apply(spec, parsed.clone());
                }
                Ok(())
            }
        }
    }

    /// Remove the object at `index` from every set.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.object_count() {
            return Err(FwpackError::not_found(format!("object {}", index)));
        }
        for set in &mut self.sets {
            set.remove(index)?;
        }
        Ok(())
    }

    /// Load every object, set-major then index-minor, hashing each distinct
    /// filename once. The first unreadable file aborts the load.
    pub fn load(&mut self, progress: Option<&mut dyn Progress>) -> Result<LoadReport> {
        let mut silent = NoProgress;
        let progress: &mut dyn Progress = match progress {
            Some(p) => p,
            None => &mut silent,
        };
        let mut cache = LoadCache::new();
        let total: usize = self.sets.iter().map(InstallationSet::len).sum();
        progress.pre_package_load(total);
        for set in &mut self.sets {
            for object in &mut set.objects {
                object.load(&mut cache, progress)?;
            }
        }
        progress.post_package_load();
        let report = LoadReport {
            objects: total,
            hashed: cache.hashed(),
            reused: cache.reused(),
        };
        tracing::debug!(
            "loaded {} objects ({} hashed, {} reused)",
            report.objects,
            report.hashed,
            report.reused
        );
        Ok(report)
    }

    /// Every object, set-major then index-minor.
    pub fn all(&self) -> impl Iterator<Item = &Object> + '_ {
        self.sets.iter().flat_map(InstallationSet::iter)
    }

    pub fn metadata(&self) -> Vec<Vec<ObjectMetadata>> {
        self.sets.iter().map(|s| s.metadata().collect()).collect()
    }

    pub fn template(&self) -> Vec<Vec<ObjectTemplate>> {
        self.sets.iter().map(|s| s.template().collect()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InstallationSet> {
        self.sets.iter()
    }
}

impl<'a> IntoIterator for &'a InstallationSetManager {
    type Item = &'a InstallationSet;
    type IntoIter = std::slice::Iter<'a, InstallationSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}
