use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use parley_engine::tools::create_default_registry;
use parley_engine::{CommandSessionManager, OrchestratorConfig, TurnOrchestrator};
use parley_llm::gemini::{GeminiBackend, GeminiConfig};
use parley_server::{AppState, ReplyService, ServerConfig};
use parley_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Turn generation and command session server")]
struct Args {
    #[arg(long, env = "PARLEY_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "PARLEY_PORT", default_value_t = 9091)]
    port: u16,

    #[arg(long, env = "PARLEY_MODEL", default_value = parley_engine::orchestrator::DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "PARLEY_SYSTEM_INSTRUCTION")]
    system_instruction: Option<String>,

    /// Default cwd for tools and commands.
    #[arg(long, env = "PARLEY_WORKDIR")]
    working_dir: Option<PathBuf>,

    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    /// Per-module override, e.g. `parley_llm=debug`. Repeatable.
    #[arg(long = "log-module")]
    log_modules: Vec<String>,

    #[arg(long, env = "PARLEY_LOG_JSON")]
    log_json: bool,
}

fn parse_module_levels(raw: &[String]) -> anyhow::Result<Vec<(String, Level)>> {
    raw.iter()
        .map(|entry| {
            let Some((module, level)) = entry.split_once('=') else {
                bail!("expected MODULE=LEVEL, got '{entry}'");
            };
            let level = level
                .parse::<Level>()
                .with_context(|| format!("bad level in '{entry}'"))?;
            Ok((module.to_string(), level))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: parse_module_levels(&args.log_modules)?,
        json: args.log_json,
    })?;

    let working_directory = match args.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let mut gemini = GeminiConfig::new(SecretString::from(args.api_key));
    gemini.model = args.model.clone();
    let backend = GeminiBackend::new(gemini).context("failed to build backend client")?;

    let commands = Arc::new(CommandSessionManager::default());
    let registry = create_default_registry(Arc::clone(&commands));
    tracing::info!(tools = registry.names().len(), model = %args.model, "tool registry ready");

    let orchestrator = TurnOrchestrator::new(
        Arc::new(backend),
        Arc::new(registry),
        OrchestratorConfig {
            model: args.model,
            system_instruction: args.system_instruction,
            working_directory: working_directory.clone(),
            ..Default::default()
        },
    );

    let state = AppState {
        commands,
        replies: Arc::new(ReplyService::new(Arc::new(orchestrator))),
        telemetry: Some(Arc::new(telemetry)),
        working_directory,
    };
    let config = ServerConfig {
        host: args.host,
        port: args.port,
    };
    let handle = parley_server::start(config, state)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_levels_parse() {
        let parsed =
            parse_module_levels(&["parley_llm=debug".into(), "hyper=warn".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("parley_llm".to_string(), Level::DEBUG),
                ("hyper".to_string(), Level::WARN)
            ]
        );
        assert!(parse_module_levels(&["parley_llm".into()]).is_err());
        assert!(parse_module_levels(&["x=loud".into()]).is_err());
    }
}
