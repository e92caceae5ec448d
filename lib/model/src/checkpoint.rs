//! Checkpoint loading with parameter-name remapping
//!
//! Trained checkpoints come in several layouts: saved from the bare
//! backbone, from this embedding network, or from a larger multi-branch
//! training model that nests the network one level deeper and carries
//! auxiliary heads. [`KeyRemapper`] maps every layout onto this network's
//! `embeddingnet.` namespace with an ordered list of rules; the first rule
//! whose predicate matches decides the key's fate.
//!
//! Loading is non-strict. Keys that name no parameter, or whose tensor has
//! a different shape, are skipped and reported. A checkpoint that cannot
//! be read, or that matches nothing, leaves the current weights in place.

use crate::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Namespace of every parameter in the embedding network
pub const NETWORK_PREFIX: &str = "embeddingnet.";

/// Namespace produced by the multi-branch training model
pub const NESTED_PREFIX: &str = "embeddingnet.embeddingnet.";

/// Prefixes of auxiliary training heads that have no counterpart here
pub const EXCLUDED_PREFIXES: [&str; 3] = ["masks", "metric", "text"];

/// Entry holding the weights inside a pickled training checkpoint
const STATE_DICT_KEY: &str = "state_dict";

/// A single remapping rule
#[derive(Clone, Copy)]
pub struct RemapRule {
    pub name: &'static str,
    matches: fn(&str) -> bool,
    transform: fn(&str) -> Option<String>,
}

impl RemapRule {
    pub const fn new(
        name: &'static str,
        matches: fn(&str) -> bool,
        transform: fn(&str) -> Option<String>,
    ) -> Self {
        Self { name, matches, transform }
    }
}

impl fmt::Debug for RemapRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemapRule").field("name", &self.name).finish()
    }
}

fn is_nested(key: &str) -> bool {
    key.starts_with(NESTED_PREFIX)
}

fn collapse_nested(key: &str) -> Option<String> {
    key.strip_prefix(NESTED_PREFIX)
        .map(|rest| format!("{}{}", NETWORK_PREFIX, rest))
}

fn is_network(key: &str) -> bool {
    key.starts_with(NETWORK_PREFIX)
}

fn keep(key: &str) -> Option<String> {
    Some(key.to_string())
}

fn is_auxiliary(key: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

fn drop_key(_key: &str) -> Option<String> {
    None
}

fn any_key(_key: &str) -> bool {
    true
}

fn add_prefix(key: &str) -> Option<String> {
    Some(format!("{}{}", NETWORK_PREFIX, key))
}

/// Keys remapped into the network namespace, plus the keys that were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Remapped<V> {
    pub kept: Vec<(String, V)>,
    pub dropped: Vec<String>,
}

/// Ordered rule list turning checkpoint keys into network parameter names
#[derive(Debug, Clone)]
pub struct KeyRemapper {
    rules: Vec<RemapRule>,
}

impl Default for KeyRemapper {
    fn default() -> Self {
        Self::new(vec![
            RemapRule::new("collapse-nested", is_nested, collapse_nested),
            RemapRule::new("keep-network", is_network, keep),
            RemapRule::new("drop-auxiliary", is_auxiliary, drop_key),
            RemapRule::new("prefix-backbone", any_key, add_prefix),
        ])
    }
}

impl KeyRemapper {
    pub fn new(rules: Vec<RemapRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RemapRule] {
        &self.rules
    }

    /// Map one checkpoint key; `None` means the key is dropped
    pub fn remap_key(&self, key: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(key))
            .and_then(|rule| (rule.transform)(key))
    }

    /// Map every entry, preserving order
    pub fn remap<V, I>(&self, entries: I) -> Remapped<V>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (key, value) in entries {
            match self.remap_key(&key) {
                Some(mapped) => kept.push((mapped, value)),
                None => dropped.push(key),
            }
        }
        Remapped { kept, dropped }
    }
}

/// How a weight source ended up being used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// At least one parameter was overwritten
    Applied,
    /// The source was read but none of its keys fit the network
    NoCompatibleWeights,
    /// The configured path does not exist
    Missing,
    /// The source could not be read or applied
    Failed(String),
}

/// Outcome of applying one weight source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: PathBuf,
    pub status: LoadStatus,
    /// Parameters overwritten from the source
    pub applied: usize,
    /// Remapped keys that name no network parameter
    pub unknown: Vec<String>,
    /// Remapped keys whose tensor shape differs from the parameter
    pub mismatched: Vec<String>,
    /// Source keys removed by the remapping rules
    pub dropped: Vec<String>,
}

impl LoadReport {
    fn new(source: &Path, status: LoadStatus) -> Self {
        Self {
            source: source.to_path_buf(),
            status,
            applied: 0,
            unknown: Vec::new(),
            mismatched: Vec::new(),
            dropped: Vec::new(),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == LoadStatus::Applied
    }
}

/// Read every named tensor from a checkpoint file onto the CPU
///
/// `.safetensors` files are read directly. Anything else is treated as a
/// PyTorch pickle; a nested `state_dict` entry is preferred over the
/// top-level mapping.
pub fn read_checkpoint(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let checkpoint_error = |e: candle_core::Error| Error::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let is_safetensors = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));

    let mut entries: Vec<(String, Tensor)> = if is_safetensors {
        candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(checkpoint_error)?
            .into_iter()
            .collect()
    } else {
        match candle_core::pickle::read_all_with_key(path, Some(STATE_DICT_KEY)) {
            Ok(entries) if !entries.is_empty() => entries,
            _ => candle_core::pickle::read_all(path).map_err(checkpoint_error)?,
        }
    };

    if is_safetensors {
        // HashMap order is arbitrary
        entries.sort_by(|a, b| a.0.cmp(&b.0));
    }
    Ok(entries)
}

/// Applies weight files to a network's variables
#[derive(Debug, Clone, Default)]
pub struct CheckpointLoader {
    remapper: KeyRemapper,
}

impl CheckpointLoader {
    pub fn new(remapper: KeyRemapper) -> Self {
        Self { remapper }
    }

    pub fn remapper(&self) -> &KeyRemapper {
        &self.remapper
    }

    /// Load a weight file into `varmap`, degrading instead of failing
    ///
    /// Never returns an error: a missing, unreadable or incompatible file
    /// leaves every variable untouched and is described in the report.
    pub fn load_file(&self, varmap: &VarMap, path: &Path) -> LoadReport {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "weight file not found, keeping current weights");
            return LoadReport::new(path, LoadStatus::Missing);
        }

        let entries = match read_checkpoint(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read weight file, keeping current weights");
                return LoadReport::new(path, LoadStatus::Failed(e.to_string()));
            }
        };

        match self.apply(varmap, path, entries) {
            Ok(report) => {
                match report.status {
                    LoadStatus::Applied => tracing::info!(
                        path = %path.display(),
                        applied = report.applied,
                        unknown = report.unknown.len(),
                        mismatched = report.mismatched.len(),
                        dropped = report.dropped.len(),
                        "loaded weights"
                    ),
                    _ => tracing::warn!(
                        path = %path.display(),
                        "no compatible weights found, keeping current weights"
                    ),
                }
                report
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to apply weights, keeping current weights");
                LoadReport::new(path, LoadStatus::Failed(e.to_string()))
            }
        }
    }

    /// Remap `entries` and copy the matching tensors into `varmap`
    ///
    /// Every tensor is converted before any variable is written, so an
    /// error leaves the variables exactly as they were.
    pub fn apply(
        &self,
        varmap: &VarMap,
        source: &Path,
        entries: Vec<(String, Tensor)>,
    ) -> Result<LoadReport> {
        let remapped = self.remapper.remap(entries);
        let mut report = LoadReport::new(source, LoadStatus::NoCompatibleWeights);
        report.dropped = remapped.dropped;

        let vars = varmap.data().lock().map_err(|_| Error::Checkpoint {
            path: source.to_path_buf(),
            reason: "variable map lock poisoned".to_string(),
        })?;

        let mut staged = Vec::new();
        for (name, tensor) in remapped.kept {
            let Some(var) = vars.get(&name) else {
                tracing::debug!(%name, "checkpoint key has no matching parameter");
                report.unknown.push(name);
                continue;
            };
            if var.shape() != tensor.shape() {
                tracing::debug!(
                    %name,
                    expected = ?var.shape(),
                    actual = ?tensor.shape(),
                    "checkpoint tensor shape mismatch"
                );
                report.mismatched.push(name);
                continue;
            }
            let converted = tensor.to_dtype(DType::F32)?.to_device(var.device())?;
            staged.push((var, converted));
        }

        for (var, tensor) in &staged {
            var.set(tensor)?;
        }

        report.applied = staged.len();
        if report.applied > 0 {
            report.status = LoadStatus::Applied;
        }
        Ok(report)
    }
}
