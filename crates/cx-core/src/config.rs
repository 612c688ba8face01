use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::Error as _, Deserialize, Deserializer};
use tracing::warn;

use cx_domain::current_subdir;

pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org/";
pub const DEFAULT_CHANNELS: &[&str] = &[
    "https://repo.continuum.io/pkgs/free",
    "https://repo.continuum.io/pkgs/pro",
];
pub const DEFAULT_PYTHON: &str = "2.7";
/// Python lines the client never injects as a default anchor version.
pub const RESERVED_PYTHON_VERSIONS: &[&str] = &["3.3", "3.4", "3.5"];
pub const ROOT_ENV_NAME: &str = "root";
const RC_FILE_NAME: &str = ".condarc";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("proxy_servers setting in {} is not a mapping", path.display())]
    ProxyServersNotMapping { path: PathBuf },
    #[error("unable to determine home directory; set CX_SYS_PREFIX or CONDA_ROOT")]
    NoHome,
}

/// SSL verification: on/off, or a CA bundle used instead of the system roots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SslVerify {
    Enabled(bool),
    Bundle(PathBuf),
}

impl Default for SslVerify {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
            home: dirs_next::home_dir(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn flag_is_enabled(&self, key: &str) -> bool {
        self.var(key)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .is_some_and(|value| value != 0)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let home = vars.get("HOME").map(PathBuf::from);
        Self { vars, home }
    }
}

/// Raw contents of a `.condarc` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RcFile {
    channels: Option<Vec<String>>,
    default_channels: Option<Vec<String>>,
    channel_alias: Option<String>,
    add_anaconda_token: Option<bool>,
    add_binstar_token: Option<bool>,
    allow_other_channels: Option<bool>,
    proxy_servers: Option<serde_yaml::Value>,
    ssl_verify: Option<SslVerify>,
    envs_dirs: Option<Vec<String>>,
    root_dir: Option<String>,
    #[serde(default, deserialize_with = "version_string")]
    default_python: Option<String>,
    track_features: Option<Vec<String>>,
}

impl RcFile {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let value: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(parse_err)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(parse_err)
    }

    fn proxy_servers(&self, path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
        match &self.proxy_servers {
            None | Some(serde_yaml::Value::Null) => Ok(BTreeMap::new()),
            Some(serde_yaml::Value::Mapping(map)) => Ok(map
                .iter()
                .filter_map(|(key, value)| {
                    Some((key.as_str()?.to_string(), value.as_str()?.to_string()))
                })
                .collect()),
            Some(_) => Err(ConfigError::ProxyServersNotMapping {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Versions may be written unquoted, which YAML reads as numbers.
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(version)) => Ok(Some(version)),
        Some(serde_yaml::Value::Number(number)) => {
            let version = number.to_string();
            warn!(
                %version,
                "unquoted version in rc file; quote it to keep trailing zeros (e.g. '3.10')"
            );
            Ok(Some(version))
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected a version string, found {other:?}"
        ))),
    }
}

/// Immutable client configuration, read once per process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Active rc file, if any. `system` channel expansion depends on it.
    pub rc_path: Option<PathBuf>,
    pub channel_alias: String,
    /// Unnormalized default channel list.
    pub default_channels: Vec<String>,
    /// Unnormalized `channels` list of the active rc file, if it sets one.
    pub rc_channels: Option<Vec<String>>,
    pub add_anaconda_token: bool,
    pub anaconda_domain: Option<String>,
    pub anaconda_token: Option<String>,
    pub subdir: String,
    pub default_python: String,
    pub reserved_python_versions: Vec<String>,
    pub proxy_servers: BTreeMap<String, String>,
    pub ssl_verify: SslVerify,
    pub root_dir: PathBuf,
    pub envs_dirs: Vec<PathBuf>,
    pub pkgs_dirs: Vec<PathBuf>,
    pub default_prefix: PathBuf,
    pub track_features: Option<BTreeSet<String>>,
}

impl Config {
    /// Configuration with built-in defaults for an installation rooted at
    /// `root_dir`, without consulting the environment or any rc file.
    pub fn for_root(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let envs_dirs = vec![root_dir.join("envs")];
        let pkgs_dirs = vec![root_dir.join("pkgs")];
        Self {
            rc_path: None,
            channel_alias: DEFAULT_CHANNEL_ALIAS.to_string(),
            default_channels: DEFAULT_CHANNELS.iter().map(ToString::to_string).collect(),
            rc_channels: None,
            add_anaconda_token: false,
            anaconda_domain: None,
            anaconda_token: None,
            subdir: current_subdir(false),
            default_python: DEFAULT_PYTHON.to_string(),
            reserved_python_versions: RESERVED_PYTHON_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            proxy_servers: BTreeMap::new(),
            ssl_verify: SslVerify::default(),
            default_prefix: root_dir.clone(),
            root_dir,
            envs_dirs,
            pkgs_dirs,
            track_features: None,
        }
    }

    /// Builds a configuration snapshot from the current process environment
    /// and the rc files it points at.
    ///
    /// # Errors
    /// Returns an error if an existing rc file cannot be read or parsed, or if
    /// its `proxy_servers` setting is not a mapping.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let sys_prefix = match snapshot.var("CX_SYS_PREFIX") {
            Some(path) => expand_user(path, snapshot.home.as_deref()),
            None => snapshot
                .home
                .as_ref()
                .map(|home| home.join(".cx"))
                .ok_or(ConfigError::NoHome)?,
        };
        let sys_rc_path = sys_prefix.join(RC_FILE_NAME);
        let rc_path = rc_path(snapshot, &sys_rc_path);
        let rc = match &rc_path {
            Some(path) => RcFile::load(path)?,
            None => RcFile::default(),
        };
        let sys_rc = RcFile::load(&sys_rc_path)?;

        let default_channels = sys_rc.default_channels.clone().unwrap_or_else(|| {
            DEFAULT_CHANNELS.iter().map(ToString::to_string).collect()
        });
        let mut channel_alias = rc
            .channel_alias
            .clone()
            .unwrap_or_else(|| DEFAULT_CHANNEL_ALIAS.to_string());
        if sys_rc.allow_other_channels == Some(false) {
            if let Some(alias) = &sys_rc.channel_alias {
                channel_alias.clone_from(alias);
            }
        }

        let home = snapshot.home.as_deref();
        let root_dir = snapshot
            .var("CONDA_ROOT")
            .map(str::to_string)
            .or_else(|| rc.root_dir.clone())
            .map_or_else(|| sys_prefix.clone(), |path| expand_user(&path, home));
        let root_dir = absolutize(root_dir);

        let default_envs = || {
            rc.envs_dirs.clone().map_or_else(
                || vec![root_dir.join("envs")],
                |dirs| dirs.iter().map(|dir| expand_user(dir, home)).collect(),
            )
        };
        let envs_dirs: Vec<PathBuf> = match snapshot.var("CONDA_ENVS_PATH") {
            Some(raw) if !raw.is_empty() => env::split_paths(raw)
                .flat_map(|path| {
                    if path.as_os_str() == "DEFAULTS" {
                        default_envs()
                    } else {
                        vec![path]
                    }
                })
                .collect(),
            _ => default_envs(),
        }
        .into_iter()
        .map(absolutize)
        .collect();

        let force_32bit = snapshot.flag_is_enabled("CONDA_FORCE_32BIT");
        let pkgs_dirs = envs_dirs
            .iter()
            .map(|envs_dir| pkgs_dir_for_envs_dir(&root_dir, envs_dir, force_32bit))
            .collect();
        let default_prefix = default_prefix(snapshot.var("CONDA_DEFAULT_ENV"), &root_dir, &envs_dirs);

        let proxy_servers = rc.proxy_servers(rc_path.as_deref().unwrap_or(&sys_rc_path))?;

        Ok(Self {
            channel_alias,
            default_channels,
            rc_channels: rc.channels.clone(),
            add_anaconda_token: rc
                .add_anaconda_token
                .or(rc.add_binstar_token)
                .unwrap_or(true),
            anaconda_domain: snapshot.var("CX_ANACONDA_DOMAIN").map(str::to_string),
            anaconda_token: snapshot.var("CX_ANACONDA_TOKEN").map(str::to_string),
            subdir: current_subdir(force_32bit),
            default_python: snapshot
                .var("CX_DEFAULT_PYTHON")
                .map(str::to_string)
                .or_else(|| rc.default_python.clone())
                .unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            reserved_python_versions: RESERVED_PYTHON_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            proxy_servers,
            ssl_verify: rc.ssl_verify.clone().unwrap_or_default(),
            track_features: rc.track_features.clone().map(|features| features.into_iter().collect()),
            rc_path,
            root_dir,
            envs_dirs,
            pkgs_dirs,
            default_prefix,
        })
    }

    /// Package cache that receives downloads and the repodata cache.
    #[must_use]
    pub fn primary_pkgs_dir(&self) -> Option<&Path> {
        self.pkgs_dirs.first().map(PathBuf::as_path)
    }
}

/// `CONDARC=" "` disables rc files, any other value names one; otherwise the
/// first existing of the user and system rc files is used.
fn rc_path(snapshot: &EnvSnapshot, sys_rc_path: &Path) -> Option<PathBuf> {
    match snapshot.var("CONDARC") {
        Some(" ") => return None,
        Some(path) if !path.is_empty() => return Some(PathBuf::from(path)),
        _ => {}
    }
    let user_rc = snapshot.home.as_ref().map(|home| home.join(RC_FILE_NAME));
    user_rc
        .into_iter()
        .chain(std::iter::once(sys_rc_path.to_path_buf()))
        .find(|path| path.is_file())
}

fn pkgs_dir_for_envs_dir(root_dir: &Path, envs_dir: &Path, force_32bit: bool) -> PathBuf {
    if envs_dir == root_dir.join("envs") {
        root_dir.join(if force_32bit { "pkgs32" } else { "pkgs" })
    } else {
        envs_dir.join(".pkgs")
    }
}

fn default_prefix(default_env: Option<&str>, root_dir: &Path, envs_dirs: &[PathBuf]) -> PathBuf {
    match default_env {
        None | Some(ROOT_ENV_NAME) => root_dir.to_path_buf(),
        Some(name) if name.contains(std::path::MAIN_SEPARATOR) => absolutize(PathBuf::from(name)),
        Some(name) => envs_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_dir())
            .or_else(|| envs_dirs.first().map(|dir| dir.join(name)))
            .unwrap_or_else(|| root_dir.join("envs").join(name)),
    }
}

fn expand_user(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
