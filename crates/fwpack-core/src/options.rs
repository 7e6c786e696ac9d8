//! Install modes and the option schema of each mode.
//!
//! Every option carries its symmetry (same value in every installation set, or
//! per-set) and a value kind used to parse the raw text coming from the editor.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FwpackError, Result};

/// How an object is installed on the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Copy,
    Flash,
    Imxkobs,
    Raw,
    Tarball,
    Ubifs,
}

pub const MODES: [Mode; 6] = [
    Mode::Copy,
    Mode::Flash,
    Mode::Imxkobs,
    Mode::Raw,
    Mode::Tarball,
    Mode::Ubifs,
];

/// Whether an option must agree across installation sets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Symmetry {
    /// Same value in every set; updated in all sets at once.
    Symmetric,
    /// Set-specific; updated in one named set only.
    Asymmetric,
}

/// Parsed option value as stored in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(n) => write!(f, "{}", n),
            OptionValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Value validator of an option.
#[derive(Clone, Copy, Debug)]
pub enum ValueKind {
    Text,
    AbsolutePath,
    Bool,
    Int { min: i64, max: i64 },
    Choice(&'static [&'static str]),
}

/// One entry of the schema.
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub symmetry: Symmetry,
    pub kind: ValueKind,
}

pub const FILESYSTEMS: &[&str] = &[
    "btrfs", "ext2", "ext3", "ext4", "f2fs", "jffs2", "ubifs", "vfat", "xfs",
];

/// `install-if-different` values; every one but `sha256sum` is a version pattern.
pub const INSTALL_IF_DIFFERENT: &[&str] = &["sha256sum", "u-boot", "linux-kernel"];

const fn asym(name: &'static str, kind: ValueKind) -> OptionSpec {
    OptionSpec { name, symmetry: Symmetry::Asymmetric, kind }
}

const fn sym(name: &'static str, kind: ValueKind) -> OptionSpec {
    OptionSpec { name, symmetry: Symmetry::Symmetric, kind }
}

const TARGET_DEVICE: OptionSpec = asym("target-device", ValueKind::AbsolutePath);
const TARGET_PATH: OptionSpec = asym("target-path", ValueKind::Text);
const VOLUME: OptionSpec = asym("volume", ValueKind::Text);
const CHIP_0: OptionSpec = asym("chip-0-device-path", ValueKind::AbsolutePath);
const CHIP_1: OptionSpec = asym("chip-1-device-path", ValueKind::AbsolutePath);
const FILESYSTEM: OptionSpec = sym("filesystem", ValueKind::Choice(FILESYSTEMS));
const FORMAT: OptionSpec = sym("format", ValueKind::Bool);
const FORMAT_OPTIONS: OptionSpec = sym("format-options", ValueKind::Text);
const MOUNT_OPTIONS: OptionSpec = sym("mount-options", ValueKind::Text);
const CHUNK_SIZE: OptionSpec = sym("chunk-size", ValueKind::Int { min: 1, max: i64::MAX });
const SKIP: OptionSpec = sym("skip", ValueKind::Int { min: 0, max: i64::MAX });
const SEEK: OptionSpec = sym("seek", ValueKind::Int { min: 0, max: i64::MAX });
const COUNT: OptionSpec = sym("count", ValueKind::Int { min: -1, max: i64::MAX });
const TRUNCATE: OptionSpec = sym("truncate", ValueKind::Bool);
const PADDING_1K: OptionSpec = sym("1k-padding", ValueKind::Bool);
const SEARCH_EXPONENT: OptionSpec = sym("search-exponent", ValueKind::Int { min: 1, max: 4 });
const COMPRESSED: OptionSpec = sym("compressed", ValueKind::Bool);
const UNCOMPRESSED_SIZE: OptionSpec =
    sym("required-uncompressed-size", ValueKind::Int { min: 0, max: i64::MAX });
const INSTALL_IF: OptionSpec = sym("install-if-different", ValueKind::Choice(INSTALL_IF_DIFFERENT));

/// Pseudo-option accepted by every mode: re-points the object at another file.
pub static FILENAME_OPTION: OptionSpec = sym("filename", ValueKind::Text);

const COPY: &[OptionSpec] = &[
    TARGET_DEVICE, TARGET_PATH, FILESYSTEM, FORMAT, FORMAT_OPTIONS, MOUNT_OPTIONS,
    COMPRESSED, UNCOMPRESSED_SIZE, INSTALL_IF,
];
const FLASH: &[OptionSpec] = &[TARGET_DEVICE, COMPRESSED, UNCOMPRESSED_SIZE, INSTALL_IF];
const IMXKOBS: &[OptionSpec] = &[CHIP_0, CHIP_1, PADDING_1K, SEARCH_EXPONENT];
const RAW: &[OptionSpec] = &[
    TARGET_DEVICE, CHUNK_SIZE, SKIP, SEEK, COUNT, TRUNCATE, COMPRESSED, UNCOMPRESSED_SIZE,
    INSTALL_IF,
];
const TARBALL: &[OptionSpec] = &[
    TARGET_DEVICE, TARGET_PATH, FILESYSTEM, FORMAT, FORMAT_OPTIONS, MOUNT_OPTIONS,
    COMPRESSED, UNCOMPRESSED_SIZE,
];
const UBIFS: &[OptionSpec] = &[VOLUME, COMPRESSED, UNCOMPRESSED_SIZE];

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Copy => "copy",
            Mode::Flash => "flash",
            Mode::Imxkobs => "imxkobs",
            Mode::Raw => "raw",
            Mode::Tarball => "tarball",
            Mode::Ubifs => "ubifs",
        }
    }

    /// Options legal for this mode (without the `filename` pseudo-option).
    pub fn options(&self) -> &'static [OptionSpec] {
        match self {
            Mode::Copy => COPY,
            Mode::Flash => FLASH,
            Mode::Imxkobs => IMXKOBS,
            Mode::Raw => RAW,
            Mode::Tarball => TARBALL,
            Mode::Ubifs => UBIFS,
        }
    }

    /// Schema lookup; `filename` resolves for every mode.
    pub fn option(&self, name: &str) -> Result<&'static OptionSpec> {
        if name == FILENAME_OPTION.name {
            return Ok(&FILENAME_OPTION);
        }
        self.options()
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| FwpackError::InvalidOption {
                mode: self.name().to_string(),
                option: name.to_string(),
            })
    }

    /// Parse and validate every raw option of a new object.
    pub fn parse_options(&self, raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, OptionValue>> {
        let mut out = BTreeMap::new();
        for (name, value) in raw {
            let spec = self.option(name)?;
            if spec.name == FILENAME_OPTION.name {
                return Err(FwpackError::InvalidOption {
                    mode: self.name().to_string(),
                    option: name.clone(),
                });
            }
            out.insert(name.clone(), spec.parse(value)?);
        }
        Ok(out)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = FwpackError;

    fn from_str(s: &str) -> Result<Self> {
        MODES
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| FwpackError::usage(format!("unknown install mode \"{}\"", s)))
    }
}

impl OptionSpec {
    pub fn is_asymmetric(&self) -> bool {
        self.symmetry == Symmetry::Asymmetric
    }

    /// Parse raw text into a typed value, or fail with InvalidValue.
    pub fn parse(&self, raw: &str) -> Result<OptionValue> {
        let invalid = |reason: String| FwpackError::InvalidValue {
            option: self.name.to_string(),
            value: raw.to_string(),
            reason,
        };
        let value = raw.trim();
        match self.kind {
            ValueKind::Text => {
                if value.is_empty() {
                    return Err(invalid("must not be empty".to_string()));
                }
                Ok(OptionValue::Text(value.to_string()))
            }
            ValueKind::AbsolutePath => {
                if !value.starts_with('/') {
                    return Err(invalid("must be an absolute path".to_string()));
                }
                Ok(OptionValue::Text(value.to_string()))
            }
            ValueKind::Bool => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(OptionValue::Bool(true)),
                "false" | "no" | "0" => Ok(OptionValue::Bool(false)),
                _ => Err(invalid("expected a boolean".to_string())),
            },
            ValueKind::Int { min, max } => {
                let n = value
                    .parse::<i64>()
                    .map_err(|_| invalid("expected an integer".to_string()))?;
                if n < min || n > max {
                    return Err(invalid(format!("must be between {} and {}", min, max)));
                }
                Ok(OptionValue::Int(n))
            }
            ValueKind::Choice(choices) => {
                if choices.contains(&value) {
                    Ok(OptionValue::Text(value.to_string()))
                } else {
                    Err(invalid(format!("expected one of: {}", choices.join(", "))))
                }
            }
        }
    }
}
