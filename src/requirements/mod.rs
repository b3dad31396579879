//! The human-edited requirements document (`environment.yml`).
//!
//! Layout:
//!
//! ```yaml
//! name: myproject
//! channels: [defaults, conda-forge]
//! channel-order: [defaults, conda-forge]
//! dependencies:
//!   - python=3.11
//!   - conda-forge::xarray
//!   - pip:
//!       - requests>=2
//!       - -e ./src
//! ```
//!
//! `channel-order` is the channel priority list; `channels` is rewritten from
//! it on every save. Top-level keys this module does not understand, and
//! dependency items that are neither strings nor the `pip:` block, are kept
//! verbatim and in their original position.

use std::fmt::Write as _;

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::reference::{normalize_name, Manager, PackageReference, DEFAULT_CHANNEL};

const KEY_NAME: &str = "name";
const KEY_CHANNELS: &str = "channels";
const KEY_CHANNEL_ORDER: &str = "channel-order";
const KEY_DEPENDENCIES: &str = "dependencies";
const KNOWN_KEYS: [&str; 4] = [KEY_NAME, KEY_CHANNELS, KEY_CHANNEL_ORDER, KEY_DEPENDENCIES];

/// Parsed requirements: channel priority plus ordered conda and pip references.
#[derive(Debug, Clone)]
pub struct RequirementsDocument {
    /// Environment name recorded in the document.
    pub name: Option<String>,
    channel_order: Vec<String>,
    conda: Vec<PackageReference>,
    pip: Vec<PackageReference>,
    extra_dependencies: Vec<Value>,
    unknown: Mapping,
    key_order: Vec<Value>,
}

impl PartialEq for RequirementsDocument {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.channel_order == other.channel_order
            && self.conda == other.conda
            && self.pip == other.pip
            && self.extra_dependencies == other.extra_dependencies
            && self.unknown == other.unknown
    }
}

/// Key used for the one-entry-per-name rule, which spans both managers.
fn bare_name(name: &str) -> String {
    normalize_name(Manager::Pip, name)
}

impl RequirementsDocument {
    /// A fresh document for `env_name`: channel `defaults` and
    /// dependencies `pip` and `python`.
    #[must_use]
    pub fn create_default(env_name: &str) -> Self {
        let conda = ["pip", "python"]
            .iter()
            .map(|n| PackageReference::Conda {
                channel: DEFAULT_CHANNEL.to_string(),
                name: (*n).to_string(),
                version: None,
                build: None,
            })
            .collect();
        Self {
            name: Some(env_name.to_string()),
            channel_order: vec![DEFAULT_CHANNEL.to_string()],
            conda,
            pip: Vec::new(),
            extra_dependencies: Vec::new(),
            unknown: Mapping::new(),
            key_order: Vec::new(),
        }
    }

    /// Parses a requirements document.
    ///
    /// `defaults` is always part of the priority list; it is prepended when
    /// the document does not list it.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when `channel-order` is absent or malformed,
    /// a conda reference names an undeclared channel, a reference is
    /// invalid, or a package name is declared twice.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let value: Value = serde_yaml::from_str(raw).map_err(|e| ParseError::Yaml(e.to_string()))?;
        let Value::Mapping(mut map) = value else {
            return Err(ParseError::Yaml("top level is not a mapping".into()));
        };
        let key_order: Vec<Value> = map.keys().cloned().collect();

        let name = match map.remove(KEY_NAME) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                return Err(ParseError::MalformedSection {
                    section: KEY_NAME.into(),
                    reason: "expected a string".into(),
                })
            }
        };
        map.remove(KEY_CHANNELS);

        let channel_order = parse_channel_order(map.remove(KEY_CHANNEL_ORDER))?;

        let mut doc = Self {
            name,
            channel_order,
            conda: Vec::new(),
            pip: Vec::new(),
            extra_dependencies: Vec::new(),
            unknown: Mapping::new(),
            key_order,
        };

        match map.remove(KEY_DEPENDENCIES) {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(items)) => {
                for item in items {
                    doc.parse_dependency(item)?;
                }
            }
            Some(_) => {
                return Err(ParseError::MalformedSection {
                    section: KEY_DEPENDENCIES.into(),
                    reason: "expected a list".into(),
                })
            }
        }
        doc.unknown = map;
        doc.check_duplicates()?;
        debug!(
            conda = doc.conda.len(),
            pip = doc.pip.len(),
            channels = doc.channel_order.len(),
            "parsed requirements"
        );
        Ok(doc)
    }

    fn parse_dependency(&mut self, item: Value) -> Result<(), ParseError> {
        match item {
            Value::String(s) => {
                let reference = PackageReference::parse_conda(&s, DEFAULT_CHANNEL)?;
                if let Some(channel) = reference.channel() {
                    if !self.channel_order.iter().any(|c| c == channel) {
                        return Err(ParseError::UndeclaredChannel {
                            package: reference.name().to_string(),
                            channel: channel.to_string(),
                        });
                    }
                }
                self.conda.push(reference);
            }
            Value::Mapping(m) if m.len() == 1 && m.contains_key("pip") => {
                self.parse_pip_block(m.get("pip"))?;
            }
            Value::Mapping(m) => self.extra_dependencies.push(Value::Mapping(m)),
            other => {
                return Err(ParseError::InvalidReference {
                    raw: format!("{other:?}"),
                    reason: "dependency is not a string".into(),
                })
            }
        }
        Ok(())
    }

    fn parse_pip_block(&mut self, block: Option<&Value>) -> Result<(), ParseError> {
        match block {
            Some(Value::Sequence(items)) => {
                for item in items {
                    let Value::String(s) = item else {
                        return Err(ParseError::MalformedSection {
                            section: "dependencies.pip".into(),
                            reason: format!("expected a string, found {item:?}"),
                        });
                    };
                    self.pip.push(PackageReference::parse_pip(s)?);
                }
                Ok(())
            }
            Some(Value::Null) | None => Ok(()),
            Some(_) => Err(ParseError::MalformedSection {
                section: "dependencies.pip".into(),
                reason: "expected a list".into(),
            }),
        }
    }

    fn check_duplicates(&self) -> Result<(), ParseError> {
        let mut seen = std::collections::HashSet::new();
        for reference in self.conda.iter().chain(&self.pip) {
            if !seen.insert(bare_name(reference.name())) {
                return Err(ParseError::DuplicatePackage(reference.name().to_string()));
            }
        }
        Ok(())
    }

    /// Serializes the document back to YAML.
    ///
    /// Unknown keys keep their original position; known keys missing from
    /// the original are appended in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Serialize`] if the YAML emitter rejects the
    /// document.
    pub fn serialize(&self) -> Result<String, ParseError> {
        let mut out = Mapping::new();
        let known = |key: &str| -> Option<Value> {
            match key {
                KEY_NAME => self.name.clone().map(Value::String),
                KEY_CHANNELS | KEY_CHANNEL_ORDER => Some(string_seq(&self.channel_order)),
                KEY_DEPENDENCIES => Some(self.dependencies_value()),
                _ => None,
            }
        };
        for key in &self.key_order {
            match key.as_str().filter(|k| KNOWN_KEYS.contains(k)) {
                Some(k) => {
                    if let Some(v) = known(k) {
                        out.insert(key.clone(), v);
                    }
                }
                None => {
                    if let Some(v) = self.unknown.get(key) {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
        }
        for k in KNOWN_KEYS {
            if !out.contains_key(k) {
                if let Some(v) = known(k) {
                    out.insert(Value::String(k.to_string()), v);
                }
            }
        }
        for (k, v) in &self.unknown {
            if !out.contains_key(k) {
                out.insert(k.clone(), v.clone());
            }
        }
        serde_yaml::to_string(&Value::Mapping(out))
            .map_err(|e| ParseError::Serialize(e.to_string()))
    }

    fn dependencies_value(&self) -> Value {
        let mut items: Vec<Value> =
            self.conda.iter().map(|r| Value::String(r.render(DEFAULT_CHANNEL))).collect();
        if !self.pip.is_empty() {
            let pip: Vec<String> = self.pip.iter().map(|r| r.render(DEFAULT_CHANNEL)).collect();
            let mut block = Mapping::new();
            block.insert(Value::String("pip".into()), string_seq(&pip));
            items.push(Value::Mapping(block));
        }
        items.extend(self.extra_dependencies.iter().cloned());
        Value::Sequence(items)
    }

    /// Channel priority list; rank is position.
    #[must_use]
    pub fn channel_order(&self) -> &[String] {
        &self.channel_order
    }

    /// Conda-managed references in declaration order.
    #[must_use]
    pub fn conda(&self) -> &[PackageReference] {
        &self.conda
    }

    /// Pip-managed references in install order.
    #[must_use]
    pub fn pip(&self) -> &[PackageReference] {
        &self.pip
    }

    /// All references, conda first.
    pub fn references(&self) -> impl Iterator<Item = &PackageReference> {
        self.conda.iter().chain(&self.pip)
    }

    /// Conda references sorted by channel priority (stable within a channel),
    /// rendered channel-qualified for the solver.
    #[must_use]
    pub fn conda_specs_by_priority(&self) -> Vec<String> {
        let rank = |r: &PackageReference| {
            r.channel()
                .and_then(|c| self.channel_order.iter().position(|o| o == c))
                .unwrap_or(usize::MAX)
        };
        let mut refs: Vec<&PackageReference> = self.conda.iter().collect();
        refs.sort_by_key(|r| rank(r));
        refs.into_iter().map(PackageReference::render_qualified).collect()
    }

    /// Pip references rendered in install order.
    #[must_use]
    pub fn pip_specs(&self) -> Vec<String> {
        self.pip.iter().map(|r| r.render(DEFAULT_CHANNEL)).collect()
    }

    /// Adds references. An existing entry with the same bare name, under any
    /// channel or manager, is replaced; new conda channels are appended to
    /// the priority list.
    pub fn add(&mut self, refs: impl IntoIterator<Item = PackageReference>) {
        for reference in refs {
            let name = bare_name(reference.name());
            let replaced = self.remove_name(&name);
            for old in &replaced {
                warn!(old = %old, new = %reference, "replacing existing requirement");
            }
            if let Some(channel) = reference.channel() {
                if !self.channel_order.iter().any(|c| c == channel) {
                    self.channel_order.push(channel.to_string());
                }
            }
            match reference.manager() {
                Manager::Conda => self.conda.push(reference),
                Manager::Pip => self.pip.push(reference),
            }
        }
    }

    /// Removes every entry, conda or pip, whose bare name matches one of
    /// `names`. Channels are never removed. Returns the removed references.
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<PackageReference> {
        names.iter().flat_map(|n| self.remove_name(&bare_name(n.as_ref()))).collect()
    }

    fn remove_name(&mut self, bare: &str) -> Vec<PackageReference> {
        let mut removed = Vec::new();
        for list in [&mut self.conda, &mut self.pip] {
            let (gone, kept): (Vec<_>, Vec<_>) =
                std::mem::take(list).into_iter().partition(|r| bare_name(r.name()) == bare);
            *list = kept;
            removed.extend(gone);
        }
        removed
    }

    /// Hex SHA-256 over the content that affects a solve: channel priority
    /// and the rendered conda and pip references. The document name,
    /// formatting, and unknown keys do not contribute.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut canonical = String::new();
        for channel in &self.channel_order {
            let _ = writeln!(canonical, "channel {channel}");
        }
        for r in &self.conda {
            let _ = writeln!(canonical, "conda {}", r.render_qualified());
        }
        for r in &self.pip {
            let _ = writeln!(canonical, "pip {}", r.render(DEFAULT_CHANNEL));
        }
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Consistency warnings that do not prevent use of the document.
    #[must_use]
    pub fn check(&self, env_name: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        match &self.name {
            Some(name) if name != env_name => warnings.push(format!(
                "requirements name `{name}` does not match the managed environment `{env_name}`"
            )),
            None => warnings.push("requirements document has no `name`".to_string()),
            _ => {}
        }
        if self.conda.is_empty() && self.pip.is_empty() {
            warnings.push("requirements document declares no dependencies".to_string());
        }
        for extra in &self.extra_dependencies {
            warnings.push(format!("ignoring unrecognized dependency entry {extra:?}"));
        }
        warnings
    }
}

fn parse_channel_order(value: Option<Value>) -> Result<Vec<String>, ParseError> {
    let Some(value) = value else {
        return Err(ParseError::MissingChannelOrder);
    };
    let Value::Sequence(items) = value else {
        return Err(ParseError::MalformedChannelOrder("expected a list of channel names".into()));
    };
    let mut order: Vec<String> = Vec::with_capacity(items.len() + 1);
    for item in items {
        let Value::String(channel) = item else {
            return Err(ParseError::MalformedChannelOrder(format!(
                "expected a channel name, found {item:?}"
            )));
        };
        let channel = channel.trim().to_string();
        if channel.is_empty() {
            return Err(ParseError::MalformedChannelOrder("empty channel name".into()));
        }
        if channel == "pip" {
            return Err(ParseError::MalformedChannelOrder(
                "`pip` is a package manager, not a channel".into(),
            ));
        }
        if order.contains(&channel) {
            return Err(ParseError::MalformedChannelOrder(format!("`{channel}` listed twice")));
        }
        order.push(channel);
    }
    if !order.iter().any(|c| c == DEFAULT_CHANNEL) {
        order.insert(0, DEFAULT_CHANNEL.to_string());
    }
    Ok(order)
}

fn string_seq<S: AsRef<str>>(items: &[S]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::String(s.as_ref().to_string())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
name: demo
x-team: analytics
channel-order:
  - defaults
  - conda-forge
dependencies:
  - python=3.11
  - conda-forge::xarray
  - pip:
      - requests>=2
      - -e ./src
";

    fn conda(spec: &str) -> PackageReference {
        PackageReference::parse_conda(spec, DEFAULT_CHANNEL).unwrap()
    }

    #[test]
    fn parses_channels_and_both_managers() {
        let doc = RequirementsDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.name.as_deref(), Some("demo"));
        assert_eq!(doc.channel_order(), ["defaults", "conda-forge"]);
        assert_eq!(doc.conda().len(), 2);
        assert_eq!(doc.pip().len(), 2);
        assert!(matches!(doc.pip()[1], PackageReference::Editable { .. }));
    }

    #[test]
    fn missing_channel_order_is_rejected() {
        let err = RequirementsDocument::parse("name: x\ndependencies: [numpy]\n").unwrap_err();
        assert_eq!(err, ParseError::MissingChannelOrder);
    }

    #[test]
    fn malformed_channel_order_is_rejected() {
        let err = RequirementsDocument::parse("channel-order: defaults\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedChannelOrder(_)));
        let err = RequirementsDocument::parse("channel-order: [defaults, '']\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedChannelOrder(_)));
    }

    #[test]
    fn undeclared_channel_is_rejected() {
        let raw = "channel-order: [defaults]\ndependencies: [bioconda::samtools]\n";
        let err = RequirementsDocument::parse(raw).unwrap_err();
        assert_eq!(
            err,
            ParseError::UndeclaredChannel { package: "samtools".into(), channel: "bioconda".into() }
        );
    }

    #[test]
    fn defaults_is_always_declared() {
        let raw = "channel-order: [conda-forge]\ndependencies: [numpy]\n";
        let doc = RequirementsDocument::parse(raw).unwrap();
        assert_eq!(doc.channel_order(), ["defaults", "conda-forge"]);
    }

    #[test]
    fn duplicate_names_across_managers_are_rejected() {
        let raw = "channel-order: [defaults]\ndependencies:\n  - numpy\n  - pip: [NumPy]\n";
        let err = RequirementsDocument::parse(raw).unwrap_err();
        assert_eq!(err, ParseError::DuplicatePackage("NumPy".into()));
    }

    #[test]
    fn round_trip_is_semantically_stable() {
        let doc = RequirementsDocument::parse(SAMPLE).unwrap();
        let again = RequirementsDocument::parse(&doc.serialize().unwrap()).unwrap();
        assert_eq!(doc, again);
        assert_eq!(doc.content_hash(), again.content_hash());
    }

    #[test]
    fn unknown_keys_survive_edits_in_place() {
        let mut doc = RequirementsDocument::parse(SAMPLE).unwrap();
        doc.add([conda("scipy")]);
        let text = doc.serialize().unwrap();
        assert!(text.contains("x-team: analytics"));
        let name_pos = text.find("name:").unwrap();
        let team_pos = text.find("x-team:").unwrap();
        let order_pos = text.find("channel-order:").unwrap();
        assert!(name_pos < team_pos && team_pos < order_pos);
        assert!(text.contains("channels:"));
    }

    #[test]
    fn add_replaces_same_name_under_other_channel() {
        let mut doc = RequirementsDocument::parse(SAMPLE).unwrap();
        doc.add([conda("bioconda::xarray")]);
        assert_eq!(doc.channel_order(), ["defaults", "conda-forge", "bioconda"]);
        let xarrays: Vec<_> = doc.conda().iter().filter(|r| r.name() == "xarray").collect();
        assert_eq!(xarrays.len(), 1);
        assert_eq!(xarrays[0].channel(), Some("bioconda"));
    }

    #[test]
    fn add_moves_package_between_managers() {
        let mut doc = RequirementsDocument::parse(SAMPLE).unwrap();
        doc.add([PackageReference::parse_pip("xarray==2024.1").unwrap()]);
        assert!(doc.conda().iter().all(|r| r.name() != "xarray"));
        assert!(doc.pip().iter().any(|r| r.name() == "xarray"));
    }

    #[test]
    fn remove_keeps_channels() {
        let mut doc = RequirementsDocument::parse(SAMPLE).unwrap();
        let removed = doc.remove(&["xarray", "REQUESTS"]);
        assert_eq!(removed.len(), 2);
        assert_eq!(doc.channel_order(), ["defaults", "conda-forge"]);
        assert_eq!(doc.pip().len(), 1);
    }

    #[test]
    fn add_then_remove_restores_document() {
        let original = RequirementsDocument::parse(SAMPLE).unwrap();
        let mut doc = original.clone();
        doc.add([conda("pytorch::torch")]);
        doc.remove(&["torch"]);
        assert_eq!(doc.conda(), original.conda());
        assert_eq!(doc.pip(), original.pip());
        assert!(original.channel_order().iter().all(|c| doc.channel_order().contains(c)));
        assert!(doc.channel_order().contains(&"pytorch".to_string()));
    }

    #[test]
    fn hash_changes_with_mutation() {
        let mut doc = RequirementsDocument::parse(SAMPLE).unwrap();
        let before = doc.content_hash();
        doc.remove(&["python"]);
        assert_ne!(before, doc.content_hash());
    }

    #[test]
    fn hash_ignores_name_and_unknown_keys() {
        let a = RequirementsDocument::parse(SAMPLE).unwrap();
        let b = RequirementsDocument::parse(&SAMPLE.replace("demo", "other").replace("x-team", "y"))
            .unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn priority_order_for_solver() {
        let raw = "channel-order: [conda-forge, defaults]\n\
                   dependencies: [numpy, conda-forge::xarray]\n";
        let doc = RequirementsDocument::parse(raw).unwrap();
        assert_eq!(doc.conda_specs_by_priority(), ["conda-forge::xarray", "defaults::numpy"]);
    }

    #[test]
    fn serialize_keeps_non_string_unknown_keys() {
        let raw = "channel-order: [defaults]\ndependencies: [numpy]\n7: lucky\n";
        let doc = RequirementsDocument::parse(raw).unwrap();
        let text = doc.serialize().unwrap();
        assert!(text.contains("7: lucky"));
        assert_eq!(RequirementsDocument::parse(&text).unwrap(), doc);
    }

    #[test]
    fn default_document_matches_init_layout() {
        let doc = RequirementsDocument::create_default("proj");
        let text = doc.serialize().unwrap();
        let parsed = RequirementsDocument::parse(&text).unwrap();
        assert_eq!(parsed, doc);
        assert!(text.starts_with("name: proj"));
        assert!(doc.check("proj").is_empty());
        assert_eq!(doc.check("other").len(), 1);
    }
}
