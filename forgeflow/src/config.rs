//! Parameter resolution for a pipeline run.
//!
//! A [`ParameterResolver`] folds built-in defaults, an allowlisted set of
//! environment variables, and explicit overrides into one immutable
//! [`BuildConfiguration`]. Resolution is a pure function of its inputs; the
//! core never reads the ambient process environment on its own.

use crate::errors::ConfigurationError;
use crate::retry::RetryConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// The build profile, selecting the shape of the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    /// Build the core framework only.
    Framework,
    /// Build the framework plus the vision and audio extensions.
    FrameworkVisionAudio,
}

impl Profile {
    /// Returns the canonical CLI spelling of the profile.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Framework => "framework",
            Self::FrameworkVisionAudio => "framework+vision+audio",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "framework" => Ok(Self::Framework),
            "framework+vision+audio" => Ok(Self::FrameworkVisionAudio),
            other => Err(ConfigurationError::invalid_value(
                "profile",
                other,
                "expected 'framework' or 'framework+vision+audio'",
            )),
        }
    }
}

/// Recognized string-valued parameters and their built-in defaults.
///
/// Version-shaped values are interpolated into download URLs and filesystem
/// paths, so they must never contain path separators.
const PARAMETER_DEFAULTS: &[(&str, &str)] = &[
    ("framework_version", "2.4.0"),
    ("vision_version", "0.19.0"),
    ("audio_version", "2.4.0"),
    ("toolkit_version", "12.4"),
    ("runtime_version", "9.1.0"),
    ("arch_list", "sm_70,sm_80,sm_90"),
    ("source_base", "https://downloads.forgeflow.dev/sources"),
    ("toolchain_root", "/usr/local/toolchain"),
    ("jobs", "4"),
    ("fetch_retries", "3"),
];

/// Recognized boolean toggles and their defaults.
///
/// `strict_extras`: when enabled, vision/audio stage failures halt the run
/// instead of being recorded as best-effort warnings. `debug_build`: passes
/// a debug flag through to compile stages.
const TOGGLE_DEFAULTS: &[(&str, bool)] = &[("strict_extras", false), ("debug_build", false)];

/// Environment variables the resolver recognizes, mapped to parameter names.
/// Everything else in the environment is ignored by the core.
const ENV_ALLOWLIST: &[(&str, &str)] = &[
    ("FORGEFLOW_TOOLCHAIN_ROOT", "toolchain_root"),
    ("FORGEFLOW_JOBS", "jobs"),
];

/// Parameters that must look like a version or identifier: non-empty, no
/// path separators, no whitespace.
const SHAPE_CHECKED: &[&str] = &[
    "framework_version",
    "vision_version",
    "audio_version",
    "toolkit_version",
    "runtime_version",
];

fn version_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._+-]*$").unwrap()
    })
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\{([a-z_]+)\}").unwrap()
    })
}

/// The fully resolved, immutable parameter set for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfiguration {
    profile: Profile,
    params: BTreeMap<String, String>,
    toggles: BTreeMap<String, bool>,
    working_dir: PathBuf,
    output_dir: PathBuf,
}

impl BuildConfiguration {
    /// Returns the build profile.
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Returns a parameter value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns a toggle value; unrecognized toggles read as disabled.
    #[must_use]
    pub fn toggle(&self, name: &str) -> bool {
        self.toggles.get(name).copied().unwrap_or(false)
    }

    /// Returns the working directory owned by this run.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Returns the output directory artifacts are collected into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the target architecture list.
    #[must_use]
    pub fn arch_list(&self) -> Vec<String> {
        self.params
            .get("arch_list")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Returns the parallel job count for compile stages.
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.params
            .get("jobs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// Returns the retry configuration for fetch stages.
    #[must_use]
    pub fn fetch_retry_config(&self) -> RetryConfig {
        let attempts = self
            .params
            .get("fetch_retries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        RetryConfig::new().with_max_attempts(attempts)
    }

    /// Interpolates `{name}` placeholders in a template.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the template references a
    /// parameter this configuration does not carry.
    pub fn interpolate(&self, template: &str) -> Result<String, ConfigurationError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in placeholder().captures_iter(template) {
            #[allow(clippy::unwrap_used)]
            let whole = caps.get(0).unwrap();
            let name = &caps[1];
            let value = self.params.get(name).ok_or_else(|| {
                ConfigurationError::new(format!(
                    "template references unknown parameter '{name}'"
                ))
                .with_option(name)
            })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Checks that every `{name}` placeholder in a template is resolvable.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] naming the first unresolvable
    /// placeholder.
    pub fn validate_template(&self, template: &str) -> Result<(), ConfigurationError> {
        for name in Self::template_refs(template) {
            if !self.params.contains_key(&name) {
                return Err(ConfigurationError::new(format!(
                    "template '{template}' references unknown parameter '{name}'"
                ))
                .with_option(name));
            }
        }
        Ok(())
    }

    /// Lists the parameter names a template references.
    #[must_use]
    pub fn template_refs(template: &str) -> Vec<String> {
        placeholder()
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .collect()
    }
}

/// Builds a [`BuildConfiguration`] from defaults, environment, and overrides.
///
/// Precedence, lowest to highest: built-in defaults, allowlisted environment
/// variables, explicit overrides.
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    profile: Profile,
    overrides: Vec<(String, String)>,
    env: HashMap<String, String>,
    working_dir: PathBuf,
    output_dir: PathBuf,
}

impl ParameterResolver {
    /// Creates a resolver for the given profile.
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            overrides: Vec::new(),
            env: HashMap::new(),
            working_dir: PathBuf::from("work"),
            output_dir: PathBuf::from("dist"),
        }
    }

    /// Adds a single `name=value` override.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((name.into(), value.into()));
        self
    }

    /// Supplies the process environment. Only allowlisted variables are
    /// consulted; the rest are ignored.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory for the run.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the output directory artifacts are collected into.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Resolves the final configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for unknown option names or values
    /// that fail shape validation.
    pub fn resolve(self) -> Result<BuildConfiguration, ConfigurationError> {
        let mut params: BTreeMap<String, String> = PARAMETER_DEFAULTS
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut toggles: BTreeMap<String, bool> = TOGGLE_DEFAULTS
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect();

        for (var, param) in ENV_ALLOWLIST {
            if let Some(value) = self.env.get(*var) {
                params.insert((*param).to_string(), value.clone());
            }
        }

        for (name, value) in &self.overrides {
            if params.contains_key(name) {
                params.insert(name.clone(), value.clone());
            } else if toggles.contains_key(name) {
                let parsed = match value.as_str() {
                    "true" | "1" | "on" => true,
                    "false" | "0" | "off" => false,
                    other => {
                        return Err(ConfigurationError::invalid_value(
                            name,
                            other,
                            "expected a boolean (true/false)",
                        ))
                    }
                };
                toggles.insert(name.clone(), parsed);
            } else {
                return Err(ConfigurationError::unknown_option(name));
            }
        }

        validate_params(&params)?;

        Ok(BuildConfiguration {
            profile: self.profile,
            params,
            toggles,
            working_dir: self.working_dir,
            output_dir: self.output_dir,
        })
    }
}

fn validate_params(params: &BTreeMap<String, String>) -> Result<(), ConfigurationError> {
    for name in SHAPE_CHECKED {
        if let Some(value) = params.get(*name) {
            if value.is_empty() {
                return Err(ConfigurationError::invalid_value(name, value, "empty"));
            }
            if value.contains('/') || value.contains('\\') {
                return Err(ConfigurationError::invalid_value(
                    name,
                    value,
                    "must not contain path separators",
                ));
            }
            if !version_shape().is_match(value) {
                return Err(ConfigurationError::invalid_value(
                    name,
                    value,
                    "does not look like a version string",
                ));
            }
        }
    }

    for numeric in ["jobs", "fetch_retries"] {
        if let Some(value) = params.get(numeric) {
            if value.parse::<usize>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    numeric,
                    value,
                    "expected a non-negative integer",
                ));
            }
        }
    }

    if let Some(archs) = params.get("arch_list") {
        for arch in archs.split(',') {
            if arch.is_empty() || !version_shape().is_match(arch) {
                return Err(ConfigurationError::invalid_value(
                    "arch_list",
                    archs,
                    "architecture entries must be non-empty identifiers",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_resolve_without_overrides() {
        let config = ParameterResolver::new(Profile::Framework)
            .resolve()
            .expect("defaults must resolve");

        assert_eq!(config.profile(), Profile::Framework);
        assert_eq!(config.get("framework_version"), Some("2.4.0"));
        assert_eq!(config.jobs(), 4);
        assert!(!config.toggle("strict_extras"));
    }

    #[test]
    fn overrides_win_over_env_which_wins_over_defaults() {
        let mut env = HashMap::new();
        env.insert("FORGEFLOW_JOBS".to_string(), "8".to_string());
        env.insert("IGNORED_VARIABLE".to_string(), "noise".to_string());

        let config = ParameterResolver::new(Profile::Framework)
            .with_env(env)
            .with_override("framework_version", "1.0.0")
            .resolve()
            .expect("must resolve");

        assert_eq!(config.jobs(), 8);
        assert_eq!(config.get("framework_version"), Some("1.0.0"));

        let config = ParameterResolver::new(Profile::Framework)
            .with_env(HashMap::from([(
                "FORGEFLOW_JOBS".to_string(),
                "8".to_string(),
            )]))
            .with_override("jobs", "2")
            .resolve()
            .expect("must resolve");
        assert_eq!(config.jobs(), 2);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = ParameterResolver::new(Profile::Framework)
            .with_override("no_such_option", "x")
            .resolve()
            .expect_err("must fail");
        assert_eq!(err.option.as_deref(), Some("no_such_option"));
    }

    #[test]
    fn version_with_path_separator_is_rejected() {
        let err = ParameterResolver::new(Profile::Framework)
            .with_override("framework_version", "../../etc")
            .resolve()
            .expect_err("must fail");
        assert!(err.to_string().contains("path separator"));
    }

    #[test]
    fn empty_version_is_rejected() {
        let err = ParameterResolver::new(Profile::Framework)
            .with_override("toolkit_version", "")
            .resolve()
            .expect_err("must fail");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn toggles_parse_booleans() {
        let config = ParameterResolver::new(Profile::FrameworkVisionAudio)
            .with_override("strict_extras", "true")
            .resolve()
            .expect("must resolve");
        assert!(config.toggle("strict_extras"));

        let err = ParameterResolver::new(Profile::Framework)
            .with_override("debug_build", "sometimes")
            .resolve()
            .expect_err("must fail");
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn interpolation_substitutes_parameters() {
        let config = ParameterResolver::new(Profile::Framework)
            .with_override("framework_version", "1.2.3")
            .resolve()
            .expect("must resolve");

        let url = config
            .interpolate("{source_base}/framework-{framework_version}.tar.gz")
            .expect("must interpolate");
        assert_eq!(
            url,
            "https://downloads.forgeflow.dev/sources/framework-1.2.3.tar.gz"
        );
    }

    #[test]
    fn interpolation_rejects_unknown_placeholders() {
        let config = ParameterResolver::new(Profile::Framework)
            .resolve()
            .expect("must resolve");
        let err = config
            .interpolate("{never_declared}")
            .expect_err("must fail");
        assert_eq!(err.option.as_deref(), Some("never_declared"));

        assert!(config.validate_template("{framework_version}").is_ok());
        assert!(config.validate_template("{never_declared}").is_err());
    }

    #[test]
    fn arch_list_splits_entries() {
        let config = ParameterResolver::new(Profile::Framework)
            .with_override("arch_list", "a,b")
            .resolve()
            .expect("must resolve");
        assert_eq!(config.arch_list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn profile_round_trips_through_strings() {
        assert_eq!(
            "framework".parse::<Profile>().expect("parses"),
            Profile::Framework
        );
        assert_eq!(
            "framework+vision+audio".parse::<Profile>().expect("parses"),
            Profile::FrameworkVisionAudio
        );
        assert!("desktop".parse::<Profile>().is_err());
    }
}
