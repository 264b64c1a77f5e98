use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use platform_dirs::AppDirs;
use serde::{Deserialize, Serialize};
use sv_system::config::CoreConfig;
use sv_system::services::asr::AsrApiConfig;
use sv_system::services::llm::LlmApiConfig;
use sv_system::services::tts::TtsApiConfig;
use tokio::net::ToSocketAddrs;

pub type SharedConfig = Arc<Config>;

static CONFIG_FILE: &str = "sv_config.toml";

/// Initialise the config file.
///
/// Creates a new config file if it doesn't yet exist, otherwise loads the existing one.
///
/// It follows a simple priority order (from most to least important, which will determine overrides):
/// 1. Environment variables prefixed by `sproutvoice`
/// 2. Local config file (same execution directory as process)
/// 3. Standard config file, located in some `appdata` directory.
pub fn initialise_config() -> eyre::Result<Config> {
    let c_path = get_full_config_path();

    if !c_path.exists() {
        save_config(&Config::default())?;
    }

    let c = config::Config::builder()
        .add_source(config::File::with_name(&c_path.to_string_lossy()).required(true))
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(config::Environment::with_prefix("sproutvoice"))
        .build()?;

    Ok(c.try_deserialize()?)
}

/// Save the provided config to the known config directory.
pub fn save_config(app_settings: &Config) -> eyre::Result<()> {
    std::fs::create_dir_all(get_config_directory())?;

    let mut config_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(get_full_config_path())?;

    let basic_output = toml::to_string_pretty(app_settings)?;

    config_file.write_all(basic_output.as_bytes())?;

    Ok(())
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// Bindings and host address
    #[serde(default)]
    pub app: ServerConfig,
    /// Timing/audio knobs of the coordination core
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub asr: AsrApiConfig,
    #[serde(default)]
    pub tts: TtsApiConfig,
    #[serde(default)]
    pub llm: LlmApiConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Turn the app config settings into a [ToSocketAddrs]
    pub fn bind_address(&self) -> impl ToSocketAddrs {
        (self.host.clone(), self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 4399,
        }
    }
}

/// Retrieve the *full* path to the config file.
///
/// This is just [get_config_directory] + [CONFIG_FILE]
pub fn get_full_config_path() -> PathBuf {
    get_config_directory().join(CONFIG_FILE)
}

/// Retrieve the directory which will be used to locate/save the config file.
pub fn get_config_directory() -> PathBuf {
    get_app_dirs().config_dir
}

fn get_app_dirs() -> AppDirs {
    AppDirs::new("SproutVoice".into(), false).expect("Couldn't find a home directory for config!")
}
