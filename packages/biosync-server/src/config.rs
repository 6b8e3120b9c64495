use biosync::config::PipelineConfig;
use biosync::streaming::source::SourceConfig;
use biosync::streaming::types::StreamError;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Where samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Generated EEG and PPG waveforms
    Synthetic,
    /// A recorded CSV played back in real time
    Replay,
}

/// biosync server - streams synchronized EEG/PPG datapoints over WebSocket
#[derive(Debug, Parser)]
#[command(name = "biosync-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    #[arg(long, env = "BIOSYNC_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "BIOSYNC_PORT", default_value_t = 8765)]
    pub port: u16,

    #[arg(long, env = "BIOSYNC_SOURCE", value_enum, default_value_t = SourceKind::Synthetic)]
    pub source: SourceKind,

    /// CSV recording for `--source replay`
    #[arg(long, env = "BIOSYNC_REPLAY_FILE")]
    pub replay_file: Option<PathBuf>,

    /// JSON file with pipeline settings; missing fields take defaults
    #[arg(long, env = "BIOSYNC_PIPELINE_CONFIG")]
    pub pipeline_config: Option<PathBuf>,

    /// Noise seed for the synthetic source
    #[arg(long, env = "BIOSYNC_SEED")]
    pub seed: Option<u64>,

    /// Messages queued per connection before new ones are dropped
    #[arg(long, env = "BIOSYNC_SUBSCRIBER_CAPACITY", default_value_t = 256)]
    pub subscriber_capacity: usize,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub subscriber_capacity: usize,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.subscriber_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "subscriber capacity must be at least 1".to_string(),
            ));
        }

        let source = match cli.source {
            SourceKind::Synthetic => SourceConfig::Synthetic { seed: cli.seed },
            SourceKind::Replay => SourceConfig::Replay {
                path: cli.replay_file.ok_or(ConfigError::MissingReplayFile)?,
                eeg_sample_rate: None,
                ppg_sample_rate: None,
            },
        };

        let pipeline = match &cli.pipeline_config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        Ok(Self {
            bind_addr: cli.bind,
            port: cli.port,
            source,
            pipeline,
            subscriber_capacity: cli.subscriber_capacity,
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--source replay requires --replay-file")]
    MissingReplayFile,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Pipeline configuration: {0}")]
    Pipeline(#[from] StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<ServerConfig, ConfigError> {
        let cli = Cli::try_parse_from(std::iter::once("biosync-server").chain(args.iter().copied()))
            .unwrap();
        ServerConfig::from_cli(cli)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--bind", "127.0.0.1", "--port", "9000", "--seed", "3"]).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert!(matches!(config.source, SourceConfig::Synthetic { seed: Some(3) }));
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.subscriber_capacity, 256);
    }

    #[test]
    fn test_replay_requires_file() {
        assert!(matches!(
            parse(&["--source", "replay"]),
            Err(ConfigError::MissingReplayFile)
        ));

        let config = parse(&["--source", "replay", "--replay-file", "session.csv"]).unwrap();
        match config.source {
            SourceConfig::Replay { path, .. } => assert_eq!(path, PathBuf::from("session.csv")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dashboard_interval_ms": 250}}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let config = parse(&["--pipeline-config", &path]).unwrap();
        assert_eq!(config.pipeline.dashboard_interval_ms, 250);

        assert!(matches!(
            parse(&["--pipeline-config", "/nonexistent/pipeline.json"]),
            Err(ConfigError::Pipeline(StreamError::Io(_)))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            parse(&["--subscriber-capacity", "0"]),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
