//! Package references as declared in the requirements document.
//!
//! A reference is a tagged variant: conda references carry a channel, pip
//! references carry extras and markers, and editable, VCS, and URL sources
//! keep their raw payload. Every variant maps to a [`PackageKey`] of
//! `(manager, normalized name)`, which is the identity the classifier and
//! planner work with.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::version::VersionSpec;

/// The channel unqualified conda references resolve from.
pub const DEFAULT_CHANNEL: &str = "defaults";

/// Which package manager owns a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Manager {
    /// Managed by conda from a channel.
    Conda,
    /// Managed by pip inside the environment.
    Pip,
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Manager::Conda => "conda",
            Manager::Pip => "pip",
        })
    }
}

/// Identity of a package across requirements, lock, and environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageKey {
    /// Owning manager.
    pub manager: Manager,
    /// Normalized package name.
    pub name: String,
}

impl PackageKey {
    /// Builds a key, normalizing `name` for the given manager.
    #[must_use]
    pub fn new(manager: Manager, name: &str) -> Self {
        Self { manager, name: normalize_name(manager, name) }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manager, self.name)
    }
}

/// Normalizes a package name: lowercase for conda; lowercase with runs of
/// `-`, `_`, `.` collapsed to `-` for pip.
#[must_use]
pub fn normalize_name(manager: Manager, name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match manager {
        Manager::Conda => lower,
        Manager::Pip => {
            let mut out = String::with_capacity(lower.len());
            let mut in_sep = false;
            for c in lower.chars() {
                if matches!(c, '-' | '_' | '.') {
                    if !in_sep {
                        out.push('-');
                    }
                    in_sep = true;
                } else {
                    out.push(c);
                    in_sep = false;
                }
            }
            out
        }
    }
}

/// A single declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageReference {
    /// A conda package from a channel.
    Conda {
        /// Source channel; never empty.
        channel: String,
        /// Package name as written.
        name: String,
        /// Version constraint, operator included.
        version: Option<String>,
        /// Build string constraint.
        build: Option<String>,
    },
    /// A pip requirement resolved from the package index.
    Pip {
        /// Package name as written.
        name: String,
        /// Requested extras.
        extras: Vec<String>,
        /// Version specifier, operator included.
        version: Option<String>,
        /// Environment marker after `;`.
        markers: Option<String>,
    },
    /// A local source tree installed in development mode (`-e path`).
    Editable {
        /// Derived package name.
        name: String,
        /// Path or URL after `-e`.
        path: String,
    },
    /// A version-control source (`git+https://...`).
    Vcs {
        /// Derived package name.
        name: String,
        /// The raw requirement string.
        spec: String,
    },
    /// A direct archive or wheel URL.
    Url {
        /// Derived package name.
        name: String,
        /// The raw requirement string.
        spec: String,
    },
}

const VCS_PREFIXES: [&str; 4] = ["git+", "hg+", "svn+", "bzr+"];
const OPERATOR_CHARS: &[char] = &['=', '<', '>', '!', '~'];

impl PackageReference {
    /// Parses a conda dependency such as `numpy`, `conda-forge::numpy>=1.2`,
    /// `numpy=1.21=py38_0`, or `numpy 1.21 py38_0`.
    ///
    /// Unqualified references take `default_channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidReference`] for empty channels, invalid
    /// names, or unparseable version constraints.
    pub fn parse_conda(raw: &str, default_channel: &str) -> Result<Self, ParseError> {
        let invalid = |reason: &str| ParseError::InvalidReference {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        let text = raw.trim();
        let (channel, spec) = match text.split_once("::") {
            Some((c, s)) => (c.trim(), s.trim()),
            None => (default_channel, text),
        };
        if channel.is_empty() {
            return Err(invalid("empty channel"));
        }

        let (name, rest) = split_name(spec);
        if !valid_name(name) {
            return Err(invalid("missing or invalid package name"));
        }
        let rest = rest.trim();

        let (version, build) = if rest.is_empty() {
            (None, None)
        } else if spec[name.len()..].starts_with(char::is_whitespace) {
            let mut fields = rest.split_whitespace();
            let version = fields.next().map(|v| {
                if v.starts_with(OPERATOR_CHARS) {
                    v.to_string()
                } else {
                    format!("={v}")
                }
            });
            let build = fields.next().map(String::from);
            if fields.next().is_some() {
                return Err(invalid("too many fields"));
            }
            (version, build)
        } else if rest.starts_with('=') && !rest.starts_with("==") && rest[1..].contains('=') {
            let (v, b) = rest[1..].split_once('=').unwrap_or((&rest[1..], ""));
            (Some(format!("={v}")), Some(b.to_string()).filter(|b| !b.is_empty()))
        } else {
            (Some(rest.to_string()), None)
        };

        let (version, build) = match build {
            Some(b) => (version.map(|v| format!("={}", v.trim_start_matches('='))), Some(b)),
            None => (version, None),
        };
        if let Some(v) = &version {
            VersionSpec::parse(v).map_err(|e| invalid(&e.to_string()))?;
        }

        Ok(PackageReference::Conda {
            channel: channel.to_string(),
            name: name.to_string(),
            version,
            build,
        })
    }

    /// Parses a pip requirement: a named specifier with optional extras and
    /// markers, `-e <path>`, a VCS URL, or a direct URL.
    ///
    /// A single `=` is accepted as shorthand for `==`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidReference`] when no package name can be
    /// derived or the version specifier is invalid.
    pub fn parse_pip(raw: &str) -> Result<Self, ParseError> {
        let invalid = |reason: &str| ParseError::InvalidReference {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        let text = raw.trim();

        let editable = text
            .strip_prefix("-e ")
            .or_else(|| text.strip_prefix("--editable "))
            .or_else(|| text.strip_prefix("--editable="));
        if let Some(path) = editable {
            let path = path.trim();
            let name = name_from_location(path).ok_or_else(|| invalid("cannot derive name"))?;
            return Ok(PackageReference::Editable { name, path: path.to_string() });
        }

        if let Some((name, url)) = text.split_once(" @ ") {
            let name = name.trim();
            if !valid_name(name) {
                return Err(invalid("invalid package name"));
            }
            let spec = text.to_string();
            let name = name.to_string();
            return Ok(if VCS_PREFIXES.iter().any(|p| url.trim().starts_with(p)) {
                PackageReference::Vcs { name, spec }
            } else {
                PackageReference::Url { name, spec }
            });
        }
        if VCS_PREFIXES.iter().any(|p| text.starts_with(p)) {
            let name = name_from_location(text).ok_or_else(|| invalid("cannot derive name"))?;
            return Ok(PackageReference::Vcs { name, spec: text.to_string() });
        }
        if text.contains("://") || text.starts_with("file:") {
            let name = name_from_location(text).ok_or_else(|| invalid("cannot derive name"))?;
            return Ok(PackageReference::Url { name, spec: text.to_string() });
        }

        let (requirement, markers) = match text.split_once(';') {
            Some((r, m)) => (r.trim(), Some(m.trim().to_string()).filter(|m| !m.is_empty())),
            None => (text, None),
        };
        let (name, rest) = split_name(requirement);
        if !valid_name(name) {
            return Err(invalid("missing or invalid package name"));
        }
        let mut rest = rest.trim();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let (inner, tail) = after.split_once(']').ok_or_else(|| invalid("unclosed extras"))?;
            extras = inner
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
            rest = tail.trim();
        }

        let version = if rest.is_empty() {
            None
        } else {
            let spec: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
            let spec = if spec.starts_with('=') && !spec.starts_with("==") {
                format!("={spec}")
            } else {
                spec
            };
            VersionSpec::parse(&spec).map_err(|e| invalid(&e.to_string()))?;
            Some(spec)
        };

        Ok(PackageReference::Pip { name: name.to_string(), extras, version, markers })
    }

    /// The manager that installs this reference.
    #[must_use]
    pub fn manager(&self) -> Manager {
        match self {
            PackageReference::Conda { .. } => Manager::Conda,
            _ => Manager::Pip,
        }
    }

    /// Package name as written or derived.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            PackageReference::Conda { name, .. }
            | PackageReference::Pip { name, .. }
            | PackageReference::Editable { name, .. }
            | PackageReference::Vcs { name, .. }
            | PackageReference::Url { name, .. } => name,
        }
    }

    /// The `(manager, normalized name)` identity.
    #[must_use]
    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.manager(), self.name())
    }

    /// Source channel for conda references.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            PackageReference::Conda { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Version constraint for conda and named pip references.
    #[must_use]
    pub fn version_spec(&self) -> Option<&str> {
        match self {
            PackageReference::Conda { version, .. } | PackageReference::Pip { version, .. } => {
                version.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the installed artifact comes from a local or VCS source that
    /// carries no index hash.
    #[must_use]
    pub fn is_source_install(&self) -> bool {
        matches!(self, PackageReference::Editable { .. } | PackageReference::Vcs { .. })
    }

    /// Where a source install comes from: the path after `-e`, or the URL
    /// of a VCS requirement.
    #[must_use]
    pub fn source_location(&self) -> Option<&str> {
        match self {
            PackageReference::Editable { path, .. } => Some(path.as_str()),
            PackageReference::Vcs { spec, .. } => {
                Some(spec.split_once(" @ ").map_or(spec.as_str(), |(_, url)| url.trim()))
            }
            _ => None,
        }
    }

    /// Renders the reference as written in the requirements document;
    /// conda references from `default_channel` are left unqualified.
    #[must_use]
    pub fn render(&self, default_channel: &str) -> String {
        match self {
            PackageReference::Conda { channel, .. } if channel != default_channel => {
                format!("{channel}::{}", self.render_bare())
            }
            _ => self.render_bare(),
        }
    }

    /// Renders a conda reference always channel-qualified, as the solver
    /// expects; other variants render as written.
    #[must_use]
    pub fn render_qualified(&self) -> String {
        match self {
            PackageReference::Conda { channel, .. } => format!("{channel}::{}", self.render_bare()),
            _ => self.render_bare(),
        }
    }

    fn render_bare(&self) -> String {
        match self {
            PackageReference::Conda { name, version, build, .. } => match (version, build) {
                (None, _) => name.clone(),
                (Some(v), None) => format!("{name}{v}"),
                (Some(v), Some(b)) => format!("{name}={}={b}", v.trim_start_matches('=')),
            },
            PackageReference::Pip { name, extras, version, markers } => {
                let mut out = name.clone();
                if !extras.is_empty() {
                    out.push('[');
                    out.push_str(&extras.join(","));
                    out.push(']');
                }
                if let Some(v) = version {
                    out.push_str(v);
                }
                if let Some(m) = markers {
                    out.push_str("; ");
                    out.push_str(m);
                }
                out
            }
            PackageReference::Editable { path, .. } => format!("-e {path}"),
            PackageReference::Vcs { spec, .. } | PackageReference::Url { spec, .. } => {
                spec.clone()
            }
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_qualified())
    }
}

fn split_name(spec: &str) -> (&str, &str) {
    let end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    spec.split_at(end)
}

fn valid_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Derives a package name from a path or URL: the `#egg=` fragment if
/// present, otherwise the last path component without archive or `.git`
/// suffixes (wheel and sdist names stop at the first `-`).
fn name_from_location(location: &str) -> Option<String> {
    if let Some((_, fragment)) = location.split_once('#') {
        for pair in fragment.split('&') {
            if let Some(egg) = pair.strip_prefix("egg=") {
                let (name, _) = split_name(egg);
                return valid_name(name).then(|| name.to_string());
            }
        }
    }
    let path = location.split(['#', '?']).next().unwrap_or(location);
    let path = match path.rsplit_once('@') {
        Some((before, after)) if path.contains("://") && !after.contains('/') => before,
        _ => path,
    };
    let last = path.trim_end_matches('/').rsplit(['/', '\\']).next()?;
    let stem = [".git", ".whl", ".tar.gz", ".tar.bz2", ".zip", ".tgz"]
        .iter()
        .find_map(|s| last.strip_suffix(s))
        .unwrap_or(last);
    let is_archive = stem.len() != last.len() && !last.ends_with(".git");
    let name = if is_archive { stem.split('-').next().unwrap_or(stem) } else { stem };
    valid_name(name).then(|| name.to_string())
}
