use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use cfg_if::cfg_if;
use tap::prelude::*;
use url::Url;

cfg_if! {
    if #[cfg(target_os = "windows")] {
        const APPLICATION_DIR: &str = "sc2monitor";
    } else if #[cfg(target_os = "macos")] {
        const APPLICATION_DIR: &str = "SC2 Monitor";
    } else {
        const APPLICATION_DIR: &str = "sc2monitor";
    }
}

const CONF_FILE_NAME: &str = "sc2monitor.json";
const DATA_PATH_ENV: &str = "SC2MONITOR_DATA_PATH";

const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;
const MIN_UPDATE_INTERVAL_SECS: u64 = 10;
const DEFAULT_LOG_RETENTION_DAYS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Conf {
    pub log_file: Utf8PathBuf,
    pub database_file: Utf8PathBuf,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_base_url: Url,
    pub oauth_base_url: Url,
    pub players: Vec<String>,
    pub update_interval: Duration,
    pub db_log_level: dto::DbLogLevel,
    pub log_retention: Duration,
    pub verbosity_profile: dto::VerbosityProfile,
    pub debug: dto::DebugConf,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile, data_dir: &Utf8Path) -> anyhow::Result<Self> {
        let log_file = conf_file
            .log_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("sc2monitor"))
            .pipe_ref(|path| normalize_data_path(path, data_dir));

        let database_file = conf_file
            .database_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("sc2monitor.db"))
            .pipe_ref(|path| normalize_data_path(path, data_dir));

        let api_base_url = conf_file
            .api_base_url
            .as_deref()
            .unwrap_or(sc2_api::DEFAULT_API_BASE_URL)
            .pipe(Url::parse)
            .context("invalid ApiBaseUrl")?;

        let oauth_base_url = conf_file
            .oauth_base_url
            .as_deref()
            .unwrap_or(sc2_api::DEFAULT_OAUTH_BASE_URL)
            .pipe(Url::parse)
            .context("invalid OAuthBaseUrl")?;

        let update_interval_secs = conf_file.update_interval_secs.unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);

        anyhow::ensure!(
            update_interval_secs >= MIN_UPDATE_INTERVAL_SECS,
            "UpdateIntervalSecs must be at least {MIN_UPDATE_INTERVAL_SECS} seconds"
        );

        let log_retention_days = conf_file.log_retention_days.unwrap_or(DEFAULT_LOG_RETENTION_DAYS);

        Ok(Conf {
            log_file,
            database_file,
            api_key: conf_file.api_key.clone().filter(|key| !key.is_empty()),
            api_secret: conf_file.api_secret.clone().filter(|secret| !secret.is_empty()),
            api_base_url,
            oauth_base_url,
            players: conf_file.players.clone().unwrap_or_default(),
            update_interval: Duration::from_secs(update_interval_secs),
            db_log_level: conf_file.db_log_level.unwrap_or_default(),
            log_retention: Duration::from_secs(log_retention_days * 60 * 60 * 24),
            verbosity_profile: conf_file.verbosity_profile.unwrap_or_default(),
            debug: conf_file.debug.clone().unwrap_or_default(),
        })
    }

    pub fn api_conf(&self) -> sc2_api::ApiConf {
        sc2_api::ApiConf {
            api_base_url: self.api_base_url.clone(),
            oauth_base_url: self.oauth_base_url.clone(),
            ..sc2_api::ApiConf::default()
        }
    }
}

/// Configuration Handle, source of truth for current configuration state
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<ConfHandleInner>,
}

struct ConfHandleInner {
    conf: parking_lot::RwLock<Arc<Conf>>,
    conf_file: parking_lot::RwLock<Arc<dto::ConfFile>>,
}

impl ConfHandle {
    /// Initializes configuration for this instance.
    ///
    /// It's best to call this only once to avoid inconsistencies.
    pub fn init() -> anyhow::Result<Self> {
        let conf_file = load_conf_file_or_generate_new()?;
        let conf = Conf::from_conf_file(&conf_file, &get_data_dir()).context("invalid configuration file")?;
        Ok(Self::from_parts(conf, conf_file))
    }

    /// Builds a handle from an in-memory configuration, nothing is read from disk.
    pub fn from_conf_file(conf_file: dto::ConfFile, data_dir: &Utf8Path) -> anyhow::Result<Self> {
        let conf = Conf::from_conf_file(&conf_file, data_dir).context("invalid configuration")?;
        Ok(Self::from_parts(conf, conf_file))
    }

    fn from_parts(conf: Conf, conf_file: dto::ConfFile) -> Self {
        Self {
            inner: Arc::new(ConfHandleInner {
                conf: parking_lot::RwLock::new(Arc::new(conf)),
                conf_file: parking_lot::RwLock::new(Arc::new(conf_file)),
            }),
        }
    }

    /// Returns current configuration state (do not hold it forever as it may become outdated)
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.conf.read().clone()
    }

    /// Returns current configuration file state (do not hold it forever as it may become outdated)
    pub fn get_conf_file(&self) -> Arc<dto::ConfFile> {
        self.inner.conf_file.read().clone()
    }
}

fn save_config(conf: &dto::ConfFile) -> anyhow::Result<()> {
    let conf_file_path = get_conf_file_path();
    let json = serde_json::to_string_pretty(conf).context("failed JSON serialization of configuration")?;
    std::fs::write(&conf_file_path, json).with_context(|| format!("failed to write file at {conf_file_path}"))?;
    Ok(())
}

pub fn get_conf_file_path() -> Utf8PathBuf {
    get_data_dir().join(CONF_FILE_NAME)
}

fn normalize_data_path(path: &Utf8Path, data_dir: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        data_dir.join(path)
    }
}

pub fn load_conf_file(conf_path: &Utf8Path) -> anyhow::Result<Option<dto::ConfFile>> {
    match File::open(conf_path) {
        Ok(file) => BufReader::new(file)
            .pipe(serde_json::from_reader)
            .map(Some)
            .with_context(|| format!("invalid config file at {conf_path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!(e).context(format!("couldn't open config file at {conf_path}"))),
    }
}

#[allow(clippy::print_stdout)] // Logger is likely not yet initialized at this point, so it’s fine to write to stdout.
pub fn load_conf_file_or_generate_new() -> anyhow::Result<dto::ConfFile> {
    let conf_file_path = get_conf_file_path();

    let conf_file = match load_conf_file(&conf_file_path).context("failed to load configuration")? {
        Some(conf_file) => conf_file,
        None => {
            let defaults = dto::ConfFile::generate_new();
            println!("Write default configuration to {conf_file_path}…");
            save_config(&defaults).context("failed to save configuration")?;
            defaults
        }
    };

    Ok(conf_file)
}

pub mod dto {
    use serde::{Deserialize, Serialize};
    use tracing::level_filters::LevelFilter;

    use super::*;

    /// Source of truth for the monitor configuration
    ///
    /// This struct represents the JSON file used for configuration as close as possible
    /// and is not trying to be too smart.
    ///
    /// Unstable options are subject to change
    #[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ConfFile {
        /// Verbosity profile
        #[serde(skip_serializing_if = "Option::is_none")]
        pub verbosity_profile: Option<VerbosityProfile>,

        /// Folder and prefix for log files
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_file: Option<Utf8PathBuf>,

        /// Path to the database file
        #[serde(skip_serializing_if = "Option::is_none")]
        pub database_file: Option<Utf8PathBuf>,

        /// Battle.net API client ID
        #[serde(skip_serializing_if = "Option::is_none")]
        pub api_key: Option<String>,

        /// Battle.net API client secret
        #[serde(skip_serializing_if = "Option::is_none")]
        pub api_secret: Option<String>,

        /// Base URL of the community API
        #[serde(skip_serializing_if = "Option::is_none")]
        pub api_base_url: Option<String>,

        /// Base URL of the OAuth endpoints
        #[serde(rename = "OAuthBaseUrl", skip_serializing_if = "Option::is_none")]
        pub oauth_base_url: Option<String>,

        /// Profile URLs of the players to add at startup
        #[serde(skip_serializing_if = "Option::is_none")]
        pub players: Option<Vec<String>>,

        /// Delay between two polling cycles
        #[serde(skip_serializing_if = "Option::is_none")]
        pub update_interval_secs: Option<u64>,

        /// Minimum level of the log records mirrored into the database
        #[serde(skip_serializing_if = "Option::is_none")]
        pub db_log_level: Option<DbLogLevel>,

        /// Age after which database log records are purged
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_retention_days: Option<u64>,

        /// (Unstable) Unsafe debug options for developers
        #[serde(rename = "__debug__", skip_serializing_if = "Option::is_none")]
        pub debug: Option<DebugConf>,

        /// Other unofficial options.
        /// This field is useful so that we can deserialize
        /// and then losslessly serialize back all root keys of the config file.
        #[serde(flatten)]
        pub rest: serde_json::Map<String, serde_json::Value>,
    }

    impl ConfFile {
        pub fn generate_new() -> Self {
            Self {
                api_key: Some(String::new()),
                api_secret: Some(String::new()),
                players: Some(Vec::new()),
                update_interval_secs: Some(DEFAULT_UPDATE_INTERVAL_SECS),
                ..Self::default()
            }
        }
    }

    /// Verbosity profile (pre-defined tracing directives)
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
    pub enum VerbosityProfile {
        /// The default profile, mostly info records
        #[default]
        Default,
        /// Recommended profile for developers
        Debug,
        /// Show all traces
        All,
        /// Only show warnings and errors
        Quiet,
    }

    impl VerbosityProfile {
        pub fn to_log_filter(self) -> &'static str {
            match self {
                VerbosityProfile::Default => "info",
                VerbosityProfile::Debug => "info,sc2monitor=debug,sc2_api=debug,ladder_store_libsql=debug",
                VerbosityProfile::All => "trace",
                VerbosityProfile::Quiet => "warn",
            }
        }
    }

    /// Level of the records mirrored into the database
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
    pub enum DbLogLevel {
        Off,
        Error,
        Warn,
        #[default]
        Info,
        Debug,
        Trace,
    }

    impl DbLogLevel {
        pub fn to_level_filter(self) -> LevelFilter {
            match self {
                DbLogLevel::Off => LevelFilter::OFF,
                DbLogLevel::Error => LevelFilter::ERROR,
                DbLogLevel::Warn => LevelFilter::WARN,
                DbLogLevel::Info => LevelFilter::INFO,
                DbLogLevel::Debug => LevelFilter::DEBUG,
                DbLogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    /// Unsafe debug options that should only ever be used at development stage
    ///
    /// These options might change or get removed without further notice.
    #[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DebugConf {
        /// Directives string in the same form as the RUST_LOG environment variable
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_directives: Option<String>,

        /// Enable unstable features which may break at any point
        #[serde(default)]
        pub enable_unstable: bool,
    }

    /// Manual Default trait implementation just to make sure default values are deliberates
    #[allow(clippy::derivable_impls)]
    impl Default for DebugConf {
        fn default() -> Self {
            Self {
                log_directives: None,
                enable_unstable: false,
            }
        }
    }

    impl DebugConf {
        pub fn is_default(&self) -> bool {
            Self::default().eq(self)
        }
    }
}

pub fn get_data_dir() -> Utf8PathBuf {
    if let Ok(config_path_env) = std::env::var(DATA_PATH_ENV) {
        Utf8PathBuf::from(config_path_env)
    } else {
        let mut config_path = Utf8PathBuf::new();

        if cfg!(target_os = "windows") {
            if let Ok(program_data_env) = std::env::var("ProgramData") {
                config_path.push(program_data_env);
            }
            config_path.push(APPLICATION_DIR);
        } else if cfg!(target_os = "macos") {
            config_path.push("/Library/Application Support");
            config_path.push(APPLICATION_DIR);
        } else {
            config_path.push("/etc");
            config_path.push(APPLICATION_DIR);
        }

        config_path
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn defaults_are_applied() {
        let data_dir = Utf8Path::new("/var/lib/sc2monitor");
        let conf = Conf::from_conf_file(&dto::ConfFile::generate_new(), data_dir).unwrap();

        assert_eq!(conf.log_file, "/var/lib/sc2monitor/sc2monitor");
        assert_eq!(conf.database_file, "/var/lib/sc2monitor/sc2monitor.db");
        assert_eq!(conf.api_key, None);
        assert_eq!(conf.api_base_url.as_str(), "https://eu.api.blizzard.com/");
        assert_eq!(conf.update_interval, Duration::from_secs(300));
        assert_eq!(conf.db_log_level, dto::DbLogLevel::Info);
        assert_eq!(conf.log_retention, Duration::from_secs(30 * 24 * 3600));
        assert!(conf.debug.is_default());
    }

    #[test]
    fn conf_file_round_trips_unknown_keys() {
        let json = r#"{
            "VerbosityProfile": "Debug",
            "DatabaseFile": "/tmp/ladder.db",
            "ApiKey": "key",
            "OAuthBaseUrl": "http://127.0.0.1:8080/oauth",
            "Players": ["https://starcraft2.com/en-gb/profile/2/1/221986"],
            "UpdateIntervalSecs": 60,
            "DbLogLevel": "Warn",
            "__debug__": {"LogDirectives": "sc2_api=trace", "EnableUnstable": true},
            "Theme": "dark"
        }"#;

        let conf_file: dto::ConfFile = serde_json::from_str(json).unwrap();
        assert_eq!(conf_file.rest.get("Theme").and_then(|v| v.as_str()), Some("dark"));

        let conf = Conf::from_conf_file(&conf_file, Utf8Path::new("/data")).unwrap();
        assert_eq!(conf.database_file, "/tmp/ladder.db");
        assert_eq!(conf.api_key.as_deref(), Some("key"));
        assert_eq!(conf.oauth_base_url.as_str(), "http://127.0.0.1:8080/oauth");
        assert_eq!(conf.players.len(), 1);
        assert_eq!(conf.db_log_level.to_level_filter(), LevelFilter::WARN);
        assert_eq!(conf.debug.log_directives.as_deref(), Some("sc2_api=trace"));
        assert_eq!(
            conf.verbosity_profile.to_log_filter(),
            "info,sc2monitor=debug,sc2_api=debug,ladder_store_libsql=debug"
        );

        let serialized = serde_json::to_value(&conf_file).unwrap();
        assert_eq!(serialized["Theme"], "dark");
        assert_eq!(serialized["OAuthBaseUrl"], "http://127.0.0.1:8080/oauth");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let conf_file = dto::ConfFile {
            update_interval_secs: Some(1),
            ..dto::ConfFile::default()
        };
        assert!(Conf::from_conf_file(&conf_file, Utf8Path::new("/data")).is_err());

        let conf_file = dto::ConfFile {
            api_base_url: Some("not a url".to_owned()),
            ..dto::ConfFile::default()
        };
        assert!(Conf::from_conf_file(&conf_file, Utf8Path::new("/data")).is_err());
    }
}
