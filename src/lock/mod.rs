//! The machine-generated lock (`lockfile.json`).
//!
//! A lock pins every package of a solve to an exact version, channel,
//! build, and artifact hash, keyed by `(manager, name)`. It records the
//! content hash of the requirements it was solved from, so staleness is a
//! hash comparison rather than a re-solve.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::error::{OpsError, SolveError};
use crate::ports::{InstallItem, ResolvedPackage, SolveRequest};
use crate::reference::{Manager, PackageKey, PackageReference, DEFAULT_CHANNEL};
use crate::requirements::RequirementsDocument;
use crate::version::{Version, VersionSpec, Violation};

/// Current on-disk format version.
pub const LOCK_FORMAT: u32 = 1;

/// One pinned package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Owning manager.
    pub manager: Manager,
    /// Package name as reported by the solver.
    pub name: String,
    /// Exact version.
    pub version: String,
    /// Source channel (conda only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Build string (conda only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Artifact hash as `<algorithm>:<hex>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Artifact download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Raw requirement for editable and VCS installs, which have no index
    /// artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LockEntry {
    /// The `(manager, normalized name)` identity.
    #[must_use]
    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.manager, &self.name)
    }

    /// The install argument for this entry: the source requirement, the
    /// artifact URL (with hash fragment for conda), or an exact pin.
    #[must_use]
    pub fn install_spec(&self) -> String {
        if let Some(source) = &self.source {
            return source.clone();
        }
        match self.manager {
            Manager::Conda => match (&self.url, &self.hash) {
                (Some(url), Some(hash)) => {
                    format!("{url}#{}", hash.split_once(':').map_or(hash.as_str(), |(_, h)| h))
                }
                (Some(url), None) => url.clone(),
                _ => {
                    let channel =
                        self.channel.as_deref().map(|c| format!("{c}::")).unwrap_or_default();
                    match &self.build {
                        Some(b) => format!("{channel}{}=={}={b}", self.name, self.version),
                        None => format!("{channel}{}=={}", self.name, self.version),
                    }
                }
            },
            Manager::Pip => match (&self.url, &self.hash) {
                (Some(url), Some(hash)) => {
                    format!("{} @ {url} --hash={hash}", self.name)
                }
                (Some(url), None) => format!("{} @ {url}", self.name),
                _ => format!("{}=={}", self.name, self.version),
            },
        }
    }

    /// The runtime install item for this entry.
    #[must_use]
    pub fn install_item(&self) -> InstallItem {
        InstallItem {
            manager: self.manager,
            name: self.name.clone(),
            version: self.version.clone(),
            spec: self.install_spec(),
        }
    }
}

impl From<ResolvedPackage> for LockEntry {
    fn from(p: ResolvedPackage) -> Self {
        Self {
            manager: p.manager,
            name: p.name,
            version: p.version,
            channel: p.channel,
            build: p.build,
            hash: p.hash,
            url: p.url,
            source: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LockFile {
    format: u32,
    requirements_hash: String,
    generated_at: DateTime<Utc>,
    packages: Vec<LockEntry>,
}

/// A resolved, pinned package set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDocument {
    /// Content hash of the requirements this lock was solved from.
    pub requirements_hash: String,
    /// When the lock was generated.
    pub generated_at: DateTime<Utc>,
    entries: BTreeMap<PackageKey, LockEntry>,
}

/// How a lock falls short of the requirements it should satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGap {
    /// The declared package.
    pub key: PackageKey,
    /// Channel of the declared reference, if any.
    pub channel: Option<String>,
    /// Declared version constraint, if any.
    pub required: Option<String>,
    /// Version pinned by the lock, if the lock has the package.
    pub locked: Option<String>,
    /// Constraint the lock violates; `None` when the package is missing.
    pub violation: Option<Violation>,
}

impl LockDocument {
    /// Builds a lock, rejecting duplicate `(manager, name)` keys.
    ///
    /// # Errors
    ///
    /// Returns the first duplicated key.
    pub fn from_entries(
        requirements_hash: String,
        generated_at: DateTime<Utc>,
        entries: impl IntoIterator<Item = LockEntry>,
    ) -> Result<Self, PackageKey> {
        let mut map = BTreeMap::new();
        for entry in entries {
            let key = entry.key();
            if map.insert(key.clone(), entry).is_some() {
                return Err(key);
            }
        }
        Ok(Self { requirements_hash, generated_at, entries: map })
    }

    /// Parses `lockfile.json`.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::LockFile`] for malformed JSON, an unsupported
    /// format version, or duplicate keys.
    pub fn from_json(raw: &str) -> Result<Self, OpsError> {
        let file: LockFile =
            serde_json::from_str(raw).map_err(|e| OpsError::LockFile(e.to_string()))?;
        if file.format != LOCK_FORMAT {
            return Err(OpsError::LockFile(format!(
                "unsupported format {} (expected {LOCK_FORMAT})",
                file.format
            )));
        }
        Self::from_entries(file.requirements_hash, file.generated_at, file.packages)
            .map_err(|key| OpsError::LockFile(format!("duplicate entry for {key}")))
    }

    /// Serializes to pretty JSON, entries sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::LockFile`] if serialization fails.
    pub fn to_json(&self) -> Result<String, OpsError> {
        let file = LockFile {
            format: LOCK_FORMAT,
            requirements_hash: self.requirements_hash.clone(),
            generated_at: self.generated_at,
            packages: self.entries.values().cloned().collect(),
        };
        let mut out =
            serde_json::to_string_pretty(&file).map_err(|e| OpsError::LockFile(e.to_string()))?;
        out.push('\n');
        Ok(out)
    }

    /// Entries keyed by `(manager, name)`.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<PackageKey, LockEntry> {
        &self.entries
    }

    /// Looks up one entry.
    #[must_use]
    pub fn get(&self, key: &PackageKey) -> Option<&LockEntry> {
        self.entries.get(key)
    }

    /// Whether the lock was solved from different requirements content.
    #[must_use]
    pub fn is_stale(&self, requirements: &RequirementsDocument) -> bool {
        self.requirements_hash != requirements.content_hash()
    }

    /// Declared packages the lock is missing or pins outside their
    /// declared constraint.
    #[must_use]
    pub fn coverage_gaps(&self, requirements: &RequirementsDocument) -> Vec<CoverageGap> {
        requirements
            .references()
            .filter_map(|reference| self.coverage_gap(reference))
            .collect()
    }

    fn coverage_gap(&self, reference: &PackageReference) -> Option<CoverageGap> {
        if reference.is_source_install() {
            let source = reference.render(DEFAULT_CHANNEL);
            if self.entries.values().any(|e| e.source.as_deref() == Some(source.as_str())) {
                return None;
            }
        }
        let key = reference.key();
        let channel = reference.channel().map(str::to_string);
        let required = reference.version_spec().map(str::to_string);
        let Some(entry) = self.entries.get(&key) else {
            return Some(CoverageGap { key, channel, required, locked: None, violation: None });
        };
        let constraint = required.as_deref()?;
        let spec = match VersionSpec::parse(constraint) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(package = %key, constraint, error = %e, "skipping unparseable constraint");
                return None;
            }
        };
        let version = match Version::parse(&entry.version) {
            Ok(version) => version,
            Err(e) => {
                warn!(
                    package = %key,
                    version = %entry.version,
                    error = %e,
                    "skipping unparseable locked version"
                );
                return None;
            }
        };
        let violation = spec.violation(&version)?;
        Some(CoverageGap {
            key,
            channel,
            required,
            locked: Some(entry.version.clone()),
            violation: Some(violation),
        })
    }

    /// Entries missing a download URL or hash; editable and VCS sources are
    /// exempt.
    #[must_use]
    pub fn integrity_warnings(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.source.is_none())
            .filter_map(|e| match (&e.url, &e.hash) {
                (None, _) => Some(format!("{} {} has no download url", e.key(), e.version)),
                (Some(_), None) => Some(format!("{} {} has no artifact hash", e.key(), e.version)),
                _ => None,
            })
            .collect()
    }
}

/// Builds the solver input for `requirements` under `config`.
#[must_use]
pub fn solve_request(requirements: &RequirementsDocument, config: &ProjectConfig) -> SolveRequest {
    SolveRequest {
        env_name: config.env_name.clone(),
        channels: requirements.channel_order().to_vec(),
        conda_specs: requirements.conda_specs_by_priority(),
        pip_specs: requirements.pip_specs(),
        settings: config.solver_settings(),
    }
}

/// Runs the external solver under the configured timeout.
///
/// # Errors
///
/// Returns [`SolveError`] with the solver's diagnostic, or with
/// `timed_out` set when the solver does not answer in time.
pub async fn solve(
    requirements: &RequirementsDocument,
    ctx: &ServiceContext,
    config: &ProjectConfig,
) -> Result<Vec<ResolvedPackage>, SolveError> {
    let request = solve_request(requirements, config);
    let secs = config.solver.timeout_secs;
    info!(
        conda = request.conda_specs.len(),
        pip = request.pip_specs.len(),
        solver = %request.settings.solver,
        "solving requirements"
    );
    match tokio::time::timeout(Duration::from_secs(secs), ctx.solver.solve(&request)).await {
        Err(_) => {
            Err(SolveError { diagnostic: format!("no result after {secs}s"), timed_out: true })
        }
        Ok(Err(e)) => Err(SolveError { diagnostic: e.to_string(), timed_out: false }),
        Ok(Ok(response)) => Ok(response.packages),
    }
}

/// Solves `requirements` and builds a fresh lock.
///
/// Editable and VCS references are recorded with their source requirement.
/// When `pip.fetch_hashes` is set, pip entries without a hash are enriched
/// from the package index; index failures only warn.
///
/// # Errors
///
/// Returns [`OpsError::Solve`] when the solver fails, times out, or reports
/// the same package twice.
pub async fn generate(
    requirements: &RequirementsDocument,
    ctx: &ServiceContext,
    config: &ProjectConfig,
) -> Result<LockDocument, OpsError> {
    let packages = solve(requirements, ctx, config).await?;

    let sources: Vec<&PackageReference> =
        requirements.pip().iter().filter(|r| r.is_source_install()).collect();

    let mut entries: Vec<LockEntry> = packages.into_iter().map(LockEntry::from).collect();
    for entry in &mut entries {
        if entry.manager == Manager::Pip {
            if let Some(reference) = source_for(entry, &sources) {
                entry.source = Some(reference.render(DEFAULT_CHANNEL));
            }
        }
    }
    if config.pip.fetch_hashes {
        enrich_pip_hashes(ctx, &mut entries).await;
    }

    let lock = LockDocument::from_entries(requirements.content_hash(), ctx.clock.now(), entries)
        .map_err(|key| SolveError {
            diagnostic: format!("solver returned {key} more than once"),
            timed_out: false,
        })?;
    info!(packages = lock.entries.len(), "generated lock");
    Ok(lock)
}

/// The source install a resolved pip entry came from, matched by name or
/// else by artifact URL against the declared location.
fn source_for<'r>(
    entry: &LockEntry,
    sources: &[&'r PackageReference],
) -> Option<&'r PackageReference> {
    let key = entry.key();
    sources.iter().copied().find(|r| r.key() == key).or_else(|| {
        let url = entry.url.as_deref()?;
        sources
            .iter()
            .copied()
            .find(|r| r.source_location().is_some_and(|location| same_source(location, url)))
    })
}

fn same_source(location: &str, url: &str) -> bool {
    let declared = normalize_location(location);
    let resolved = normalize_location(url);
    if declared.is_empty() || resolved.is_empty() {
        return false;
    }
    declared == resolved
        || (!location.contains("://") && resolved.ends_with(&format!("/{declared}")))
}

/// Reduces a path or URL to the part both sides of a match share.
fn normalize_location(raw: &str) -> &str {
    let mut text = raw.trim();
    for prefix in ["git+", "hg+", "svn+", "bzr+", "file://"] {
        text = text.strip_prefix(prefix).unwrap_or(text);
    }
    text = text.split(['#', '?']).next().unwrap_or(text);
    if let Some((before, after)) = text.rsplit_once('@') {
        if before.contains('/') && !after.contains('/') {
            text = before;
        }
    }
    loop {
        match text.strip_prefix("./").or_else(|| text.strip_prefix("../")) {
            Some(rest) => text = rest,
            None => break,
        }
    }
    text.trim_end_matches('/')
}

async fn enrich_pip_hashes(ctx: &ServiceContext, entries: &mut [LockEntry]) {
    for entry in entries.iter_mut() {
        if entry.manager != Manager::Pip || entry.hash.is_some() || entry.source.is_some() {
            continue;
        }
        match ctx.index.release_files(&entry.name, &entry.version).await {
            Ok(files) => {
                let chosen = files
                    .iter()
                    .find(|f| entry.url.as_deref() == Some(f.url.as_str()))
                    .or_else(|| files.iter().find(|f| f.packagetype == "bdist_wheel"))
                    .or_else(|| files.first());
                if let Some(file) = chosen {
                    debug!(package = %entry.name, file = %file.filename, "recorded index hash");
                    entry.url = Some(file.url.clone());
                    entry.hash = Some(format!("sha256:{}", file.sha256));
                }
            }
            Err(e) => {
                warn!(
                    package = %entry.name,
                    version = %entry.version,
                    error = %e,
                    "index lookup failed"
                );
            }
        }
    }
}
