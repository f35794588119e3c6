//! Profile loading and domain registration
//!
//! Loads a profile directory (`manifest.yaml`, `policy.yaml`,
//! `domains/<name>.yaml`) into an immutable [`LoadedProfile`]. Profiles are
//! data, not code: the coordinator is profile-aware but profile-agnostic and
//! never hardcodes domain names.
//!
//! The loader is the sole interpreter of the on-disk shape. It produces a
//! fully-formed object graph; no lazy loading, no I/O after `load_profile`
//! returns. A missing required domain or policy is a fatal load error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::policy::Importance;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading a profile. Fatal at load time; never raised
/// on the decision path.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("file not found: {0}")]
    MissingFile(PathBuf),

    #[error("domain file not found: {0}")]
    DomainNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("invalid importance '{0}'")]
    InvalidImportance(String),
}

// ============================================================================
// Loaded Object Model
// ============================================================================

/// Scope at which a domain operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainScope {
    House,
    PerRoom,
}

/// Immutable metadata for one registered domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSchema {
    pub name: String,
    pub scope: DomainScope,
    /// Legal state values for this domain.
    pub states: Vec<String>,
    /// Legal event types for this domain.
    pub events: Vec<String>,
    /// Output field definitions (name -> type string).
    pub outputs: HashMap<String, String>,
}

/// Quiet hours window. Overnight windows (start > end) wrap midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Whether quiet hours are active at `current`.
    pub fn is_active(&self, current: NaiveTime) -> bool {
        if self.start <= self.end {
            // Same-day window (e.g. 14:00 to 18:00).
            self.start <= current && current <= self.end
        } else {
            // Overnight window (e.g. 22:00 to 07:00).
            current >= self.start || current <= self.end
        }
    }
}

/// The `when` pattern that triggers a rule. Absent state/event means "any".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCondition {
    pub domain: String,
    pub state: Option<String>,
    pub event: Option<String>,
}

/// Classification output from a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyClassification {
    pub importance: Importance,
    pub interrupt: bool,
    pub bypass_quiet_hours: bool,
}

/// Side effects a rule contributes while its `when` pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEffects {
    pub suppress_below_importance: Option<Importance>,
}

/// A single policy rule. Rules without `classify` only contribute effects.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRule {
    pub rule_id: String,
    pub when: PolicyCondition,
    pub classify: Option<PolicyClassification>,
    pub effects: Option<PolicyEffects>,
    /// Other-domain equality conditions that must all hold.
    pub conditions: HashMap<String, String>,
    /// Other-domain equality conditions that suppress the rule.
    pub suppress_if: HashMap<String, String>,
}

/// Loaded policy: quiet hours plus rules in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPolicy {
    pub quiet_hours: Option<QuietHours>,
    pub rules: Vec<PolicyRule>,
}

/// A fully loaded profile. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProfile {
    pub profile_id: String,
    pub profile_version: String,
    pub profile_name: String,
    pub domains: HashMap<String, DomainSchema>,
    pub policy: LoadedPolicy,
}

// ============================================================================
// On-Disk Documents
// ============================================================================

#[derive(Debug, Deserialize)]
struct ManifestDoc {
    #[serde(default = "default_profile_id")]
    profile_id: String,
    #[serde(default = "default_profile_version")]
    profile_version: String,
    #[serde(default)]
    profile_name: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
}

fn default_profile_id() -> String {
    "unknown".to_string()
}

fn default_profile_version() -> String {
    "0.0.0".to_string()
}

#[derive(Debug, Deserialize)]
struct DomainDoc {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    outputs: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PolicyDoc {
    #[serde(default)]
    quiet_hours: Option<QuietHoursDoc>,
    #[serde(default)]
    rules: Vec<RuleDoc>,
}

#[derive(Debug, Deserialize)]
struct QuietHoursDoc {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct RuleDoc {
    #[serde(default = "default_rule_id")]
    id: String,
    #[serde(default)]
    when: WhenDoc,
    #[serde(default)]
    classify: Option<ClassifyDoc>,
    #[serde(default)]
    effects: Option<EffectsDoc>,
    #[serde(default)]
    conditions: HashMap<String, String>,
    #[serde(default)]
    suppress_if: HashMap<String, String>,
}

fn default_rule_id() -> String {
    "unknown".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct WhenDoc {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyDoc {
    #[serde(default = "default_importance")]
    importance: String,
    #[serde(default)]
    interrupt: bool,
    #[serde(default)]
    bypass_quiet_hours: bool,
}

fn default_importance() -> String {
    "low".to_string()
}

#[derive(Debug, Deserialize)]
struct EffectsDoc {
    #[serde(default)]
    suppress_below_importance: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

/// Parse an `HH:MM` time-of-day value.
fn parse_time(s: &str) -> Result<NaiveTime, ProfileError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ProfileError::InvalidTime(s.to_string()))
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ProfileError> {
    if !path.exists() {
        return Err(ProfileError::MissingFile(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a single domain schema from `domains_dir/<name>.yaml`.
pub fn load_domain(domains_dir: &Path, domain_name: &str) -> Result<DomainSchema, ProfileError> {
    let domain_file = domains_dir.join(format!("{domain_name}.yaml"));
    if !domain_file.exists() {
        return Err(ProfileError::DomainNotFound(domain_file));
    }

    let doc: DomainDoc = load_yaml(&domain_file)?;
    let scope = match doc.scope.as_deref() {
        Some("per_room") => DomainScope::PerRoom,
        _ => DomainScope::House,
    };

    Ok(DomainSchema {
        name: doc.domain.unwrap_or_else(|| domain_name.to_string()),
        scope,
        states: doc.states,
        events: doc.events,
        outputs: doc.outputs,
    })
}

/// Load the policy document from `policy_path`.
pub fn load_policy(policy_path: &Path) -> Result<LoadedPolicy, ProfileError> {
    let doc: PolicyDoc = load_yaml(policy_path)?;

    let quiet_hours = match doc.quiet_hours {
        Some(qh) => Some(QuietHours {
            start: parse_time(&qh.start)?,
            end: parse_time(&qh.end)?,
        }),
        None => None,
    };

    let mut rules = Vec::with_capacity(doc.rules.len());
    for rule in doc.rules {
        let classify = match rule.classify {
            Some(c) => Some(PolicyClassification {
                importance: Importance::from_str(&c.importance)
                    .ok_or_else(|| ProfileError::InvalidImportance(c.importance.clone()))?,
                interrupt: c.interrupt,
                bypass_quiet_hours: c.bypass_quiet_hours,
            }),
            None => None,
        };

        let effects = match rule.effects {
            Some(e) => Some(PolicyEffects {
                suppress_below_importance: e
                    .suppress_below_importance
                    .map(|s| {
                        Importance::from_str(&s).ok_or(ProfileError::InvalidImportance(s))
                    })
                    .transpose()?,
            }),
            None => None,
        };

        rules.push(PolicyRule {
            rule_id: rule.id,
            when: PolicyCondition {
                domain: rule.when.domain,
                state: rule.when.state,
                event: rule.when.event,
            },
            classify,
            effects,
            conditions: rule.conditions,
            suppress_if: rule.suppress_if,
        });
    }

    Ok(LoadedPolicy { quiet_hours, rules })
}

/// Load a complete profile from a directory containing `manifest.yaml`,
/// `policy.yaml`, and a `domains/` subdirectory with one file per domain
/// listed in the manifest.
pub fn load_profile(profile_dir: &Path) -> Result<LoadedProfile, ProfileError> {
    let manifest: ManifestDoc = load_yaml(&profile_dir.join("manifest.yaml"))?;

    let domains_dir = profile_dir.join("domains");
    let mut domains = HashMap::with_capacity(manifest.domains.len());
    for domain_name in &manifest.domains {
        domains.insert(domain_name.clone(), load_domain(&domains_dir, domain_name)?);
    }

    let policy = load_policy(&profile_dir.join("policy.yaml"))?;

    debug!(
        profile_id = %manifest.profile_id,
        domains = domains.len(),
        rules = policy.rules.len(),
        "profile loaded"
    );

    Ok(LoadedProfile {
        profile_name: manifest
            .profile_name
            .unwrap_or_else(|| manifest.profile_id.clone()),
        profile_id: manifest.profile_id,
        profile_version: manifest.profile_version,
        domains,
        policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_profile(dir: &Path) {
        fs::write(
            dir.join("manifest.yaml"),
            "profile_id: home\nprofile_version: 1.2.0\nprofile_name: Home\ndomains:\n  - doorbell\n  - occupancy\n",
        )
        .unwrap();
        fs::create_dir(dir.join("domains")).unwrap();
        fs::write(
            dir.join("domains/doorbell.yaml"),
            "domain: doorbell\nscope: house\nevents:\n  - ring\noutputs:\n  doorbell_last_ring: timestamp\n",
        )
        .unwrap();
        fs::write(
            dir.join("domains/occupancy.yaml"),
            "domain: occupancy\nscope: per_room\nstates:\n  - occupied\n  - vacant\n",
        )
        .unwrap();
        fs::write(
            dir.join("policy.yaml"),
            concat!(
                "quiet_hours:\n  start: \"22:00\"\n  end: \"07:00\"\n",
                "rules:\n",
                "  - id: doorbell_ring\n",
                "    when:\n      domain: doorbell\n      event: ring\n",
                "    classify:\n      importance: HIGH\n      interrupt: true\n",
                "  - id: media_softens\n",
                "    when:\n      domain: media_activity\n      state: playing\n",
                "    effects:\n      suppress_below_importance: medium\n",
            ),
        )
        .unwrap();
    }

    #[test]
    fn loads_complete_profile() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());

        let profile = load_profile(dir.path()).unwrap();
        assert_eq!(profile.profile_id, "home");
        assert_eq!(profile.profile_name, "Home");
        assert_eq!(profile.domains.len(), 2);
        assert_eq!(profile.domains["occupancy"].scope, DomainScope::PerRoom);
        assert_eq!(profile.policy.rules.len(), 2);

        // Importance parsed case-insensitively.
        let classify = profile.policy.rules[0].classify.unwrap();
        assert_eq!(classify.importance, Importance::High);
        assert!(classify.interrupt);

        // Effects-only rule has no classification.
        assert!(profile.policy.rules[1].classify.is_none());
        assert_eq!(
            profile.policy.rules[1].effects.unwrap().suppress_below_importance,
            Some(Importance::Medium)
        );
    }

    #[test]
    fn missing_domain_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());
        fs::remove_file(dir.path().join("domains/occupancy.yaml")).unwrap();

        let err = load_profile(dir.path()).unwrap_err();
        assert!(matches!(err, ProfileError::DomainNotFound(_)));
    }

    #[test]
    fn missing_policy_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());
        fs::remove_file(dir.path().join("policy.yaml")).unwrap();

        let err = load_profile(dir.path()).unwrap_err();
        assert!(matches!(err, ProfileError::MissingFile(_)));
    }

    #[test]
    fn bad_quiet_hours_time_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());
        fs::write(
            dir.path().join("policy.yaml"),
            "quiet_hours:\n  start: \"25:99\"\n  end: \"07:00\"\nrules: []\n",
        )
        .unwrap();

        let err = load_profile(dir.path()).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidTime(_)));
    }

    #[test]
    fn unknown_importance_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());
        fs::write(
            dir.path().join("policy.yaml"),
            concat!(
                "rules:\n",
                "  - id: r1\n",
                "    when:\n      domain: doorbell\n",
                "    classify:\n      importance: urgent\n",
            ),
        )
        .unwrap();

        let err = load_profile(dir.path()).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidImportance(_)));
    }

    #[test]
    fn unknown_scope_defaults_to_house() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path());
        fs::write(
            dir.path().join("domains/doorbell.yaml"),
            "domain: doorbell\nscope: galaxy\n",
        )
        .unwrap();

        let profile = load_profile(dir.path()).unwrap();
        assert_eq!(profile.domains["doorbell"].scope, DomainScope::House);
    }

    #[test]
    fn same_day_quiet_hours_window() {
        let qh = QuietHours {
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        assert!(qh.is_active(NaiveTime::from_hms_opt(15, 30, 0).unwrap()));
        assert!(!qh.is_active(NaiveTime::from_hms_opt(19, 0, 0).unwrap()));
        assert!(!qh.is_active(NaiveTime::from_hms_opt(13, 59, 0).unwrap()));
    }

    #[test]
    fn overnight_quiet_hours_window() {
        let qh = QuietHours {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        };
        // Active iff now >= start or now <= end.
        assert!(qh.is_active(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(qh.is_active(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(qh.is_active(NaiveTime::from_hms_opt(22, 0, 0).unwrap()));
        assert!(qh.is_active(NaiveTime::from_hms_opt(7, 0, 0).unwrap()));
        assert!(!qh.is_active(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }
}
