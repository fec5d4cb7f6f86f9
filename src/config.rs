use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Serialize, Clone, Default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Secrets file with a `postgres` section, takes precedence over the fields above
    pub secrets_file: Option<PathBuf>,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

fn default_preview_rows() -> usize {
    3
}

impl DatabaseConfig {
    /// Whether any credential source has been configured at all.
    pub fn is_configured(&self) -> bool {
        self.host.is_some() || self.secrets_file.is_some()
    }
}

// Hand-written so the password never ends up in logs
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("secrets_file", &self.secrets_file)
            .field("preview_rows", &self.preview_rows)
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Idle seconds before a chat session is dropped
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_max_sessions() -> usize {
    1000
}

#[derive(Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    pub backend: String, // "mistral" or "simulation"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    pub fixture: PathBuf,
    /// Artificial "thinking" delay before canned answers
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UiConfig {
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub model: ModelConfig,
    pub simulation: SimulationConfig,
    pub ui: UiConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Answer from the simulation fixture instead of the live model
    #[arg(long, global = true)]
    pub simulation: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the chat web server (default)
    Serve,
    /// Execute a SQL script file against the configured database
    RunScript {
        path: PathBuf,
    },
    /// Bulk load a delimited file into a table
    Copy {
        file: PathBuf,
        #[arg(long, default_value = "public")]
        schema: String,
        #[arg(long)]
        table: String,
        /// Comma separated target columns
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// Run a read query and print the result as JSON
    Query {
        sql: String,
    },
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder =
            Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "reporter.toml",
                "config/reporter.toml",
                "/etc/sql-reporter/reporter.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // REPORTER__MODEL__API_KEY and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("REPORTER")
                .separator("__")
                .try_parsing(true),
        );

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if args.simulation {
            config.model.backend = "simulation".to_string();
        }

        Ok(config)
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                preview_rows: default_preview_rows(),
                ..DatabaseConfig::default()
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8501,
                session_ttl_secs: default_session_ttl_secs(),
                max_sessions: default_max_sessions(),
            },
            model: ModelConfig {
                backend: "simulation".to_string(),
                model: "ft:open-mistral-7b:953eb039:20240629:e98cba77".to_string(),
                api_key: None,
                api_url: None,
                timeout_secs: 60,
            },
            simulation: SimulationConfig {
                fixture: PathBuf::from("data/response.json"),
                delay_ms: 0,
            },
            ui: UiConfig {
                title: "💬 Reporter".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_with(config: Option<PathBuf>) -> CliArgs {
        CliArgs {
            config,
            host: None,
            port: None,
            simulation: false,
            command: None,
        }
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[web]
port = 9000
max_sessions = 50

[database]
host = "db.internal"
database = "omop"
user = "reporter"
password = "hunter2"

[model]
backend = "mistral"
api_key = "abc"
"#
        )
        .unwrap();

        let config = AppConfig::new(&args_with(Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.web.max_sessions, 50);
        assert_eq!(config.web.session_ttl_secs, 1800);
        assert_eq!(config.database.host.as_deref(), Some("db.internal"));
        assert_eq!(config.database.preview_rows, 3);
        assert!(config.database.is_configured());
        assert_eq!(config.model.backend, "mistral");
        assert_eq!(config.model.api_key.as_deref(), Some("abc"));
        assert_eq!(config.simulation.fixture, PathBuf::from("data/response.json"));
    }

    #[test]
    fn cli_flags_win_over_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[model]\nbackend = \"mistral\"").unwrap();

        let mut args = args_with(Some(file.path().to_path_buf()));
        args.port = Some(1234);
        args.simulation = true;

        let config = AppConfig::new(&args).unwrap();
        assert_eq!(config.web.port, 1234);
        assert_eq!(config.model.backend, "simulation");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = AppConfig::default();
        config.database.password = Some("hunter2".to_string());
        config.model.api_key = Some("sk-live".to_string());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("sk-live"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn copy_subcommand_splits_columns() {
        let args = CliArgs::parse_from([
            "sql-reporter",
            "copy",
            "people.csv",
            "--table",
            "person",
            "--columns",
            "id,name",
            "--delimiter",
            ";",
        ]);
        match args.command {
            Some(Command::Copy {
                schema,
                table,
                columns,
                delimiter,
                ..
            }) => {
                assert_eq!(schema, "public");
                assert_eq!(table, "person");
                assert_eq!(columns, vec!["id", "name"]);
                assert_eq!(delimiter, ';');
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
