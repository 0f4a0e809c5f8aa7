//! Resolution of the legacy single-dash command line into a
//! [BuildConfiguration].
//!
//! Tokens are read left to right. `-D...` tokens are Gradle system properties
//! that are forwarded untouched, any other `-name` token takes the next token
//! as its value, e.g.
//!
//! ```text
//! -couch couchdb2.0 -platform android -Dtest.couch.use.cookies=false
//! ```

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Tokens with this prefix are forwarded to Gradle verbatim
pub const BUILD_OPTION_PREFIX: &str = "-D";
pub const FLAG_MARKER: char = '-';
pub const TARGET_KEY: &str = "couch";
pub const PLATFORM_KEY: &str = "platform";

pub const CONTAINER_NAME: &str = "couchdb";
pub const CONTAINER_HOST_NAME: &str = "couchdb";
/// Every non-local target is published here so the tests always find it on
/// the CouchDB default port
pub const HOST_PORT: u16 = 5984;
pub const DEFAULT_CONTAINER_PORT: u16 = 5984;
/// The 2.0 developer image runs a dev cluster whose node listens here
pub const COUCHDB2_CONTAINER_PORT: u16 = 15984;

/// Connection properties that the fixed local instance overrides
pub const RESERVED_CREDENTIAL_KEYS: [&str; 4] = [
    "test.couch.username",
    "test.couch.password",
    "test.couch.host",
    "test.couch.port",
];

/// Appended for [Target::CloudantLocal]. The port is not 5984 so that the
/// instance can coexist with a CouchDB on the same machine.
pub const LOCAL_INSTANCE_OPTIONS: [&str; 6] = [
    "-Dtest.couch.username=admin",
    "-Dtest.couch.password=pass",
    "-Dtest.couch.host=127.0.0.1",
    "-Dtest.couch.port=8080",
    "-Dtest.couch.ignore.auth.headers=true",
    "-Dtest.couch.ignore.compaction=true",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown value {value:?} for -{key}, expected one of: {expected}")]
    UnknownVariant {
        key: &'static str,
        value: String,
        expected: String,
    },
}

/// The database the integration tests run against
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Target {
    #[default]
    #[serde(rename = "couchdb1.6")]
    CouchDb16,
    #[serde(rename = "couchdb2.0")]
    CouchDb20,
    #[serde(rename = "cloudant")]
    Cloudant,
    /// Externally managed and always running, never started or stopped here
    #[serde(rename = "cloudantlocal")]
    CloudantLocal,
}

impl Target {
    pub const ALL: [Target; 4] = [
        Target::CouchDb16,
        Target::CouchDb20,
        Target::Cloudant,
        Target::CloudantLocal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Target::CouchDb16 => "couchdb1.6",
            Target::CouchDb20 => "couchdb2.0",
            Target::Cloudant => "cloudant",
            Target::CloudantLocal => "cloudantlocal",
        }
    }

    pub fn is_local_instance(self) -> bool {
        self == Target::CloudantLocal
    }

    /// The container to run for this target, `None` for the local instance
    pub fn container_plan(self) -> Option<ContainerPlan> {
        let (image, container_port, container_args): (&str, u16, &[&str]) = match self {
            Target::CouchDb16 => ("klaemo/couchdb:1.6", DEFAULT_CONTAINER_PORT, &[]),
            Target::CouchDb20 => (
                "klaemo/couchdb:2.0-dev",
                COUCHDB2_CONTAINER_PORT,
                &["--with-admin-party-please"],
            ),
            Target::Cloudant => (
                "ibmcom/cloudant-developer:latest",
                DEFAULT_CONTAINER_PORT,
                &[],
            ),
            Target::CloudantLocal => return None,
        };
        Some(ContainerPlan {
            container_name: CONTAINER_NAME.to_owned(),
            host_name: CONTAINER_HOST_NAME.to_owned(),
            image: image.to_owned(),
            host_port: HOST_PORT,
            container_port,
            container_args: container_args.iter().map(|s| (*s).to_owned()).collect(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .into_iter()
            .find(|target| target.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownVariant {
                key: TARGET_KEY,
                value: s.to_owned(),
                expected: join_variants(Target::ALL.map(Target::as_str)),
            })
    }
}

/// Which Gradle build gets run
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Java,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Java, Platform::Android];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Java => "java",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownVariant {
                key: PLATFORM_KEY,
                value: s.to_owned(),
                expected: join_variants(Platform::ALL.map(Platform::as_str)),
            })
    }
}

fn join_variants<const N: usize>(variants: [&str; N]) -> String {
    variants.join(", ")
}

/// The database container derived from a [Target]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerPlan {
    pub container_name: String,
    pub host_name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    /// Passed to the image entrypoint
    pub container_args: Vec<String>,
}

/// What a single command line token is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind<'a> {
    /// A `-D` system property
    BuildOption,
    /// A flag with the marker stripped, the next token is its value
    Key(&'a str),
    /// Not a flag
    Bare,
}

impl<'a> OptionKind<'a> {
    pub fn classify(token: &'a str) -> Self {
        if token.starts_with(BUILD_OPTION_PREFIX) {
            OptionKind::BuildOption
        } else if let Some(key) = token.strip_prefix(FLAG_MARKER) {
            OptionKind::Key(key)
        } else {
            OptionKind::Bare
        }
    }
}

/// Returns the property name of a `-Dkey=value` option, or `None` if `option`
/// is not a build option
pub fn build_option_key(option: &str) -> Option<&str> {
    let rest = option.strip_prefix(BUILD_OPTION_PREFIX)?;
    Some(rest.split_once('=').map_or(rest, |(key, _)| key))
}

/// The tokens sorted into flag values and build options, before any defaults
/// are applied. A flag given as the last token maps to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawArgs {
    pub values: BTreeMap<String, Option<String>>,
    pub build_options: Vec<String>,
}

impl RawArgs {
    pub fn parse<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = RawArgs::default();
        // the key still waiting on its value
        let mut pending: Option<String> = None;
        for token in tokens {
            let token = token.as_ref();
            match (OptionKind::classify(token), pending.take()) {
                (OptionKind::BuildOption, pending_key) => {
                    if let Some(key) = pending_key {
                        debug!("-{key} is followed by a build option, leaving it unset");
                        raw.values.insert(key, None);
                    }
                    raw.build_options.push(token.to_owned());
                }
                (_, Some(key)) => {
                    raw.values.insert(key, Some(token.to_owned()));
                }
                (OptionKind::Key(key), None) => pending = Some(key.to_owned()),
                (OptionKind::Bare, None) => {
                    debug!("ignoring stray argument {token:?}");
                }
            }
        }
        if let Some(key) = pending {
            debug!("-{key} is the last argument and has no value");
            raw.values.insert(key, None);
        }
        raw
    }

    /// The value of `key`, `None` if it was never given or given without a
    /// value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|value| value.as_deref())
    }
}

/// Everything a run needs, immutable once resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfiguration {
    pub target: Target,
    pub platform: Platform,
    /// `-D` options in the order Gradle receives them
    pub passthrough_options: Vec<String>,
    /// Flags that are not recognized, they have no effect
    pub extra: BTreeMap<String, Option<String>>,
}

impl BuildConfiguration {
    /// Parses `tokens` (without the program name), applies defaults, and for
    /// the local instance replaces the connection options.
    pub fn resolve<I, S>(tokens: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_raw(RawArgs::parse(tokens))
    }

    pub fn from_raw(raw: RawArgs) -> Result<Self, ConfigError> {
        let target: Target = match raw.get(TARGET_KEY) {
            Some(value) => value.parse()?,
            None => Target::default(),
        };
        let platform: Platform = match raw.get(PLATFORM_KEY) {
            Some(value) => value.parse()?,
            None => Platform::default(),
        };
        let RawArgs {
            mut values,
            build_options,
        } = raw;
        values.remove(TARGET_KEY);
        values.remove(PLATFORM_KEY);
        for key in values.keys() {
            debug!("flag -{key} is not recognized and has no effect");
        }
        let passthrough_options = if target.is_local_instance() {
            with_local_instance_options(build_options)
        } else {
            build_options
        };
        Ok(Self {
            target,
            platform,
            passthrough_options,
            extra: values,
        })
    }

    pub fn container_plan(&self) -> Option<ContainerPlan> {
        self.target.container_plan()
    }
}

/// Drops user supplied connection options and appends the fixed ones for the
/// local instance
pub fn with_local_instance_options(options: Vec<String>) -> Vec<String> {
    let mut options: Vec<String> = options
        .into_iter()
        .filter(|option| {
            let reserved = build_option_key(option)
                .is_some_and(|key| RESERVED_CREDENTIAL_KEYS.contains(&key));
            if reserved {
                debug!("replacing {option} for the local instance");
            }
            !reserved
        })
        .collect();
    options.extend(LOCAL_INSTANCE_OPTIONS.iter().map(|s| (*s).to_owned()));
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(tokens: &[&str]) -> BuildConfiguration {
        BuildConfiguration::resolve(tokens).unwrap()
    }

    #[test]
    fn classify_build_option() {
        assert_eq!(
            OptionKind::classify("-Dtest.couch.host=h"),
            OptionKind::BuildOption
        );
        assert_eq!(OptionKind::classify("-D"), OptionKind::BuildOption);
    }

    #[test]
    fn classify_key() {
        assert_eq!(OptionKind::classify("-couch"), OptionKind::Key("couch"));
        assert_eq!(OptionKind::classify("-platform"), OptionKind::Key("platform"));
        // only the exact `-D` prefix is reserved
        assert_eq!(OptionKind::classify("-d"), OptionKind::Key("d"));
        assert_eq!(OptionKind::classify("--couch"), OptionKind::Key("-couch"));
    }

    #[test]
    fn classify_bare() {
        assert_eq!(OptionKind::classify("cloudant"), OptionKind::Bare);
        assert_eq!(OptionKind::classify(""), OptionKind::Bare);
        assert_eq!(OptionKind::classify("D-x"), OptionKind::Bare);
    }

    #[test]
    fn option_keys() {
        assert_eq!(build_option_key("-Dtest.couch.port=1"), Some("test.couch.port"));
        assert_eq!(build_option_key("-Dflag"), Some("flag"));
        assert_eq!(build_option_key("-Da=b=c"), Some("a"));
        assert_eq!(build_option_key("-couch"), None);
    }

    #[test]
    fn defaults() {
        let config = resolve(&[]);
        assert_eq!(config.target, Target::CouchDb16);
        assert_eq!(config.platform, Platform::Java);
        assert!(config.passthrough_options.is_empty());

        let config = resolve(&["-couch", "cloudant"]);
        assert_eq!(config.platform, Platform::Java);
        let config = resolve(&["-platform", "android"]);
        assert_eq!(config.target, Target::CouchDb16);
        assert_eq!(config.platform, Platform::Android);
    }

    #[test]
    fn flags_in_any_order() {
        let config = resolve(&[
            "-Da=1",
            "-platform",
            "android",
            "-Db=2",
            "-couch",
            "couchdb2.0",
            "-Dc=3",
        ]);
        assert_eq!(config.target, Target::CouchDb20);
        assert_eq!(config.platform, Platform::Android);
        assert_eq!(config.passthrough_options, ["-Da=1", "-Db=2", "-Dc=3"]);
    }

    #[test]
    fn trailing_key_is_unset() {
        let raw = RawArgs::parse(["-Dx=y", "-couch"]);
        assert_eq!(raw.values.get("couch"), Some(&None));
        assert_eq!(raw.get("couch"), None);
        let config = resolve(&["-platform", "android", "-couch"]);
        assert_eq!(config.target, Target::CouchDb16);
    }

    #[test]
    fn build_option_is_never_a_value() {
        let raw = RawArgs::parse(["-couch", "-Dfoo=bar", "cloudant"]);
        assert_eq!(raw.get("couch"), None);
        assert_eq!(raw.build_options, ["-Dfoo=bar"]);
    }

    #[test]
    fn later_flag_wins() {
        let config = resolve(&["-couch", "cloudant", "-couch", "couchdb2.0"]);
        assert_eq!(config.target, Target::CouchDb20);
    }

    #[test]
    fn unknown_flags_are_kept_but_ignored() {
        let config = resolve(&["-verbose", "yes", "-couch", "cloudant", "stray"]);
        assert_eq!(config.target, Target::Cloudant);
        assert_eq!(config.extra.get("verbose"), Some(&Some("yes".to_owned())));
        assert!(config.passthrough_options.is_empty());
    }

    #[test]
    fn unknown_variant_errors() {
        let err = BuildConfiguration::resolve(["-couch", "mongodb"]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownVariant { key: "couch", .. }
        ));
        assert!(err.to_string().contains("cloudantlocal"));
        assert!(BuildConfiguration::resolve(["-platform", "ios"]).is_err());
    }

    #[test]
    fn local_instance_replaces_credentials() {
        let config = resolve(&["-couch", "cloudantlocal", "-Dtest.couch.host=remote", "-Dfoo=bar"]);
        let mut expected = vec!["-Dfoo=bar".to_owned()];
        expected.extend(LOCAL_INSTANCE_OPTIONS.iter().map(|s| s.to_string()));
        assert_eq!(config.passthrough_options, expected);
        assert_eq!(config.container_plan(), None);
    }

    #[test]
    fn local_instance_options_present_once() {
        let config = resolve(&[
            "-Dtest.couch.username=me",
            "-Dtest.couch.password=secret",
            "-Dtest.couch.port=1",
            "-Dtest.couch.port=2",
            "-Dtest.couch.ignore.compaction=true",
            "-Dtest.couch.hostname=kept",
            "-couch",
            "cloudantlocal",
        ]);
        for option in LOCAL_INSTANCE_OPTIONS {
            let count = config
                .passthrough_options
                .iter()
                .filter(|o| o.as_str() == option)
                .count();
            // the compaction flag is not reserved, so the user's copy survives
            let expected = if option == "-Dtest.couch.ignore.compaction=true" {
                2
            } else {
                1
            };
            assert_eq!(count, expected, "{option}");
        }
        for option in &config.passthrough_options {
            let key = build_option_key(option).unwrap();
            if RESERVED_CREDENTIAL_KEYS.contains(&key) {
                assert!(LOCAL_INSTANCE_OPTIONS.contains(&option.as_str()), "{option}");
            }
        }
        assert!(config
            .passthrough_options
            .contains(&"-Dtest.couch.hostname=kept".to_owned()));
    }

    #[test]
    fn other_targets_keep_credentials() {
        let config = resolve(&["-couch", "cloudant", "-Dtest.couch.password=p"]);
        assert_eq!(config.passthrough_options, ["-Dtest.couch.password=p"]);
    }

    #[test]
    fn port_mapping() {
        for target in Target::ALL {
            let Some(plan) = target.container_plan() else {
                assert_eq!(target, Target::CloudantLocal);
                continue
            };
            assert_eq!(plan.host_port, HOST_PORT);
            assert_eq!(plan.container_name, "couchdb");
            assert_eq!(plan.host_name, "couchdb");
            let expected = if target == Target::CouchDb20 {
                15984
            } else {
                5984
            };
            assert_eq!(plan.container_port, expected, "{target}");
        }
    }

    #[test]
    fn names_round_trip() {
        for target in Target::ALL {
            assert_eq!(target.as_str().parse::<Target>().unwrap(), target);
        }
        for platform in Platform::ALL {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
    }
}
