//! Command-line arguments and engine configuration loading.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pipeline::{EngineConfig, SessionId};

#[derive(Parser, Debug)]
#[command(
    name = "shipyard",
    version,
    about = "Turns a natural-language request into a built, tested and deployed artefact"
)]
/// Flags and environment variables accepted by `shipyard`.
pub struct Args {
    /// What to build
    pub request: String,

    /// Session id to run under (generated when omitted)
    #[arg(long)]
    pub session_id: Option<String>,

    /// Planner agent endpoint
    #[arg(long, env = "SHIPYARD_PLANNER_URL")]
    pub planner_url: String,

    /// Builder agent endpoint
    #[arg(long, env = "SHIPYARD_BUILDER_URL")]
    pub builder_url: String,

    /// Tester agent endpoint
    #[arg(long, env = "SHIPYARD_TESTER_URL")]
    pub tester_url: String,

    /// Deployer agent endpoint; deployment is skipped without one
    #[arg(long, env = "SHIPYARD_DEPLOYER_URL")]
    pub deployer_url: Option<String>,

    /// JSON engine configuration file
    #[arg(long, env = "SHIPYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Append audit records to this JSON-lines file instead of the log
    #[arg(long, env = "SHIPYARD_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Per-request timeout for agent calls, in seconds
    #[arg(long, default_value_t = 300)]
    pub agent_timeout_secs: u64,

    /// Overrides `session_call_budget` from the configuration file
    #[arg(long)]
    pub call_budget: Option<u32>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// OTLP/gRPC endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Do not print progress events
    #[arg(long, short)]
    pub quiet: bool,
}

impl Args {
    /// Loads the configuration file (if any), applies overrides, validates.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                serde_json::from_str::<EngineConfig>(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(budget) = self.call_budget {
            config.session_call_budget = budget;
        }
        config.validate()?;
        Ok(config)
    }

    /// The requested session id, or a fresh random one.
    pub fn session_id(&self) -> Result<SessionId> {
        match &self.session_id {
            Some(raw) => SessionId::new(raw.as_str()).context("--session-id must not be blank"),
            None => Ok(SessionId::new_random()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "shipyard",
            "a todo app",
            "--planner-url",
            "http://planner.test",
            "--builder-url",
            "http://builder.test",
            "--tester-url",
            "http://tester.test",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_need_no_config_file() {
        let args = parse(&[]);
        assert_eq!(args.engine_config().unwrap(), EngineConfig::default());
        assert!(args.deployer_url.is_none());
    }

    #[test]
    fn config_file_and_overrides_combine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_steps": 20, "session_call_budget": 9 }}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = parse(&["--config", &path, "--call-budget", "4"])
            .engine_config()
            .unwrap();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.session_call_budget, 4);
    }

    #[test]
    fn invalid_config_is_refused() {
        let err = parse(&["--call-budget", "0"]).engine_config().unwrap_err();
        assert!(err.to_string().contains("session_call_budget"));
    }

    #[test]
    fn blank_session_id_is_refused() {
        assert!(parse(&["--session-id", "  "]).session_id().is_err());
        assert_eq!(
            parse(&["--session-id", "s-1"]).session_id().unwrap().as_str(),
            "s-1"
        );
    }
}
