//! CLI commands implementation

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use llm_core::{Config, OllamaClient, OllamaStatus};
use tracing::{debug, warn};

use crate::agent::{AgentConfig, AgentLoop, AgentState, OllamaBackend, RunOutcome, Step};
use crate::observe::{ConsoleSink, ObservationSink, SilentSink};
use crate::tools::browser::{BrowserOptions, BrowserTool};
use crate::tools::ActionResult;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

/// Load pilot.toml from an explicit path, or find it, or fall back to defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(p),
        None => Ok(Config::try_load().unwrap_or_else(|| {
            debug!("No pilot.toml found, using defaults");
            Config::default_minimal()
        })),
    }
}

fn client_for(config: &Config, ollama_url: Option<String>) -> OllamaClient {
    let url = ollama_url.unwrap_or_else(|| config.ollama_url());
    OllamaClient::new(url).with_chat_timeout(Duration::from_secs(config.ollama.request_timeout_secs))
}

/// Options for `pilot run` that override the config file
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub goal: String,
    pub ollama_url: Option<String>,
    pub model: Option<String>,
    pub max_steps: Option<usize>,
    pub headless: bool,
    pub json: bool,
}

fn agent_config(config: &Config, options: &RunOptions) -> AgentConfig {
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.agent.model.clone());

    AgentConfig::new(model)
        .with_max_steps(options.max_steps.unwrap_or(config.agent.max_steps))
        .with_repeat_tolerance(config.agent.repeat_tolerance)
        .with_action_timeout(Duration::from_secs(config.browser.action_timeout_secs))
        .with_max_wait(Duration::from_secs(config.browser.max_wait_secs))
}

/// Work towards a goal in a fresh browser window
pub async fn run(config: &Config, options: RunOptions) -> Result<()> {
    let client = client_for(config, options.ollama_url.clone());
    let agent_config = agent_config(config, &options);

    if !client.health_check().await.unwrap_or(false) {
        warn!(url = client.base_url(), "Ollama is not responding; steps will fall back to observation");
    }

    let mut browser_options = BrowserOptions::from(&config.browser);
    browser_options.headless |= options.headless;
    let browser = BrowserTool::launch(browser_options)
        .await
        .context("Failed to start the browser")?;

    let backend = OllamaBackend::new(client, agent_config.model.clone());
    let console = ConsoleSink::new();
    let silent = SilentSink;
    let sink: &dyn ObservationSink = if options.json { &silent } else { &console };

    if !options.json {
        println!(
            "{}Goal:{} {} {}({}, {} steps max){}",
            BOLD, RESET, options.goal, DIM, agent_config.model, agent_config.max_steps, RESET
        );
    }

    let state = AgentLoop::new(&backend, &browser, sink, agent_config)
        .run(&options.goal)
        .await;

    if let Err(e) = browser.close().await {
        warn!(error = %e, "Failed to close browser");
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_report(&state);
    }

    Ok(())
}

fn print_report(state: &AgentState) {
    println!();
    for (i, step) in state.steps.iter().enumerate() {
        print_step(i + 1, step);
    }

    println!();
    match state.outcome() {
        RunOutcome::Finished => print_status(
            true,
            &format!("Goal finished in {} step(s)", state.steps.len()),
        ),
        RunOutcome::BudgetExhausted => print_status(
            false,
            &format!("Gave up after {} step(s) without finishing", state.steps.len()),
        ),
    }

    let failed = state.failed_steps();
    if failed > 0 {
        println!("  {}{} action(s) failed along the way{}", YELLOW, failed, RESET);
    }
    let fallbacks = state.fallback_steps();
    if fallbacks > 0 {
        println!("  {}{} step(s) replaced by an observation{}", YELLOW, fallbacks, RESET);
    }
}

fn print_step(n: usize, step: &Step) {
    println!("{}Step {}: {}{}", BOLD, n, step.action, RESET);
    if !step.thought.is_empty() {
        println!("  {}Thought:{} {}", DIM, RESET, step.thought);
    }
    if !step.args.is_empty() {
        println!(
            "  {}Args:{} {}",
            DIM,
            RESET,
            serde_json::Value::Object(step.args.clone())
        );
    }
    if let Some(reason) = step.fallback {
        println!("  {}Fallback:{} {:?}", DIM, RESET, reason);
    }
    match &step.result {
        Some(ActionResult::Ok(output)) => println!(
            "  {}Result:{} {}",
            DIM,
            RESET,
            serde_json::to_string(output).unwrap_or_default()
        ),
        Some(ActionResult::Error { message }) => {
            println!("  {}Error:{} {}", RED, RESET, message)
        }
        None => {}
    }
}

/// Show Ollama status and installed models
pub async fn status(config: &Config, ollama_url: Option<String>) -> Result<()> {
    let client = client_for(config, ollama_url);

    println!("{}Ollama Status{}", BOLD, RESET);
    println!("  Endpoint: {}", client.base_url());
    println!("  Agent model: {}", config.agent.model);

    match client.status().await {
        OllamaStatus::Running => {
            print_status(true, "Ollama is running");
        }
        OllamaStatus::Stopped => {
            print_status(false, "Ollama is not running");
            println!("\n  Start with: {}ollama serve{}", BLUE, RESET);
            return Ok(());
        }
    }

    let models = client.list_models().await?;
    if models.is_empty() {
        println!("\n  No models installed");
        println!("  Pull one with: {}ollama pull {}{}", BLUE, config.agent.model, RESET);
        return Ok(());
    }

    println!("\n{}Models{}", BOLD, RESET);
    let mut has_agent_model = false;
    for model in &models {
        let marker = if model.name == config.agent.model {
            has_agent_model = true;
            format!("{}*{}", GREEN, RESET)
        } else {
            " ".to_string()
        };
        println!("  {} {:<40} {}", marker, model.name, model.size_human());
    }

    if !has_agent_model {
        println!();
        print_status(
            false,
            &format!("Agent model '{}' is not installed", config.agent.model),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            goal: "goal".to_string(),
            ollama_url: None,
            model: None,
            max_steps: None,
            headless: false,
            json: false,
        }
    }

    #[test]
    fn test_agent_config_from_file_values() {
        let mut config = Config::default_minimal();
        config.agent.model = "qwen2.5:7b".to_string();
        config.agent.max_steps = 20;
        config.agent.repeat_tolerance = 4;
        config.browser.action_timeout_secs = 10;
        config.browser.max_wait_secs = 5;

        let agent = agent_config(&config, &options());
        assert_eq!(agent.model, "qwen2.5:7b");
        assert_eq!(agent.max_steps, 20);
        assert_eq!(agent.repeat_tolerance, 4);
        assert_eq!(agent.action_timeout, Duration::from_secs(10));
        assert_eq!(agent.max_wait, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = Config::default_minimal();
        let overrides = RunOptions {
            model: Some("mistral".to_string()),
            max_steps: Some(3),
            ..options()
        };

        let agent = agent_config(&config, &overrides);
        assert_eq!(agent.model, "mistral");
        assert_eq!(agent.max_steps, 3);
    }

    #[test]
    fn test_client_uses_override_url() {
        let config = Config::default_minimal();
        let client = client_for(&config, Some("http://gpu-box:11434/api/chat".to_string()));
        assert_eq!(client.base_url(), "http://gpu-box:11434");

        let client = client_for(&config, None);
        assert_eq!(client.base_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_load_config_explicit_missing_path_errors() {
        let err = load_config(Some(Path::new("/nonexistent/pilot.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
