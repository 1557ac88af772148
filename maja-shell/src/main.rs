mod app;
mod player;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// Terminal voice chat with a Maja backend
#[derive(Parser, Debug)]
#[command(name = "maja-voicechat")]
#[command(about = "Talk to a Maja voice assistant from the terminal", long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides the config file and MAJA_API_BASE)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Player command; `{file}` and `{start}` are substituted
    #[arg(long)]
    pub player: Option<String>,

    /// Read settings from this file instead of ~/.maja/config.json
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Store the effective settings (including --base-url) in ~/.maja/config.json
    #[arg(long)]
    pub save_config: bool,

    #[arg(long)]
    pub username: Option<String>,

    /// Model id; together with --role skips the welcome prompts
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub role: Option<String>,

    /// API key for cloud models
    #[arg(long)]
    pub api_key: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger
    env_logger::init();
    log::info!("Starting Maja VoiceChat");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(app::run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "maja-voicechat",
            "--base-url",
            "http://example.test:9000/",
            "--model",
            "local",
            "--role",
            "default",
            "--save-config",
        ])
        .unwrap();

        assert!(cli.save_config);
        assert_eq!(cli.model.as_deref(), Some("local"));
        assert_eq!(cli.player, None);

        let cli = Cli::try_parse_from(["maja-voicechat"]).unwrap();
        assert!(!cli.save_config);
    }
}
