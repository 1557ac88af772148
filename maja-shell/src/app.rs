//! Terminal front end: welcome prompts, then a chat REPL.
//!
//! The REPL reads stdin through tokio so playback sampling and player exits
//! keep being processed while it waits for the next line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use maja_data::{
    AudioBlob, AudioStore, ClientConfig, MessageId, SelectionRequest, Store, StoreAction,
    TurnOutcome,
};
use maja_widgets::bubble::SYSTEM_ERROR_TEXT;
use maja_widgets::{BubbleKind, ChatViewData, Page, PageRouter};

use crate::player::CommandPlayerBackend;
use crate::Cli;

/// A second `reset` within this window confirms it
const RESET_CONFIRM_WINDOW: Duration = Duration::from_secs(3);

const HELP: &str = "\
Commands:
  send <file>       send a recorded audio file
  play <n>          play or pause message n
  pause <n>         pause message n
  seek <n> <secs>   move message n to a position
  list              show the conversation
  reset             reset the conversation (type twice to confirm)
  back              leave the chat and pick another model or role
  help              show this help
  quit              exit";

// ─── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Send(PathBuf),
    Play(usize),
    Pause(usize),
    Seek(usize, f64),
    List,
    Reset,
    Back,
    Help,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Command::Empty);
    };
    let index = |arg: Option<&str>| -> Result<usize, String> {
        arg.and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("usage: {} <message number>", verb))
    };

    match verb {
        "send" => {
            let rest = line.trim_start()[verb.len()..].trim();
            if rest.is_empty() {
                Err("usage: send <file>".to_string())
            } else {
                Ok(Command::Send(PathBuf::from(rest)))
            }
        }
        "play" => index(words.next()).map(Command::Play),
        "pause" => index(words.next()).map(Command::Pause),
        "seek" => {
            let n = index(words.next())?;
            let secs = words
                .next()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|s| s.is_finite())
                .ok_or_else(|| "usage: seek <n> <secs>".to_string())?;
            Ok(Command::Seek(n, secs))
        }
        "list" | "ls" => Ok(Command::List),
        "reset" => Ok(Command::Reset),
        "back" => Ok(Command::Back),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

/// Mime type for a recording on disk
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        _ => "audio/webm",
    }
}

// ─── App ─────────────────────────────────────────────────────────────────────

struct VoiceChatApp {
    store: Store,
    router: PageRouter,
    audio: AudioStore,
    input: Lines<BufReader<Stdin>>,
    reset_armed: Option<Instant>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ClientConfig::load(),
    };
    config.apply_base_override(cli.base_url.clone());
    config.validate()?;
    log::info!("App: backend at {}", config.base_url);

    if cli.save_config {
        config.save().context("failed to save config")?;
        if let Some(path) = ClientConfig::override_path() {
            println!("Saved settings to {}", path.display());
        }
    }

    let audio = AudioStore::new();
    let players = match &cli.player {
        Some(template) => CommandPlayerBackend::new(audio.clone(), template),
        None => CommandPlayerBackend::with_default_player(audio.clone()),
    };
    let store = Store::new(config, audio.clone(), Arc::new(players));

    let mut app = VoiceChatApp {
        store,
        router: PageRouter::new(),
        audio,
        input: BufReader::new(tokio::io::stdin()).lines(),
        reset_armed: None,
    };
    let result = app.main_loop(cli).await;
    app.store.teardown();
    result
}

impl VoiceChatApp {
    async fn main_loop(&mut self, cli: Cli) -> Result<()> {
        let mut preset = match (&cli.model, &cli.role) {
            (Some(model), Some(role)) => Some(SelectionRequest {
                username: cli.username.clone(),
                model_id: Some(model.clone()),
                role_id: Some(role.clone()),
                api_key: cli.api_key.clone(),
            }),
            _ => None,
        };

        loop {
            self.router.gate(self.store.session.is_started());
            match self.router.current_page() {
                Page::Welcome => {
                    if !self.welcome(preset.take(), &cli).await? {
                        return Ok(());
                    }
                    self.router.navigate_to(Page::Chat);
                }
                Page::Chat => {
                    if !self.chat().await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        use std::io::Write as _;
        print!("{}", prompt);
        std::io::stdout().flush()?;
        Ok(self.input.next_line().await?)
    }

    // ── Welcome ──────────────────────────────────────────────────────────────

    /// Returns false when stdin closed before a session started.
    async fn welcome(&mut self, preset: Option<SelectionRequest>, cli: &Cli) -> Result<bool> {
        println!("\nMaja VoiceChat");
        self.store.load_presets().await;
        if let Some(error) = &self.store.presets_error {
            println!("{}", error);
        }

        let mut preset = preset;
        loop {
            let request = match preset.take() {
                Some(request) => request,
                None => match self.prompt_selection(cli).await? {
                    Some(request) => request,
                    None => return Ok(false),
                },
            };
            match self.store.start_session(request).await {
                Ok(response) => {
                    log::info!("App: {}", response.message);
                    println!(
                        "\nTalking to {} as {}. Type 'help' for commands.",
                        self.store.assistant_name(),
                        self.store.session.display_name()
                    );
                    return Ok(true);
                }
                Err(e) => println!("{}", e),
            }
        }
    }

    async fn prompt_selection(&mut self, cli: &Cli) -> Result<Option<SelectionRequest>> {
        let mut request = self.store.default_selection();
        request.username = cli.username.clone();
        request.api_key = cli.api_key.clone();

        println!("\nModels:");
        for (i, model) in self.store.presets.models.iter().enumerate() {
            match &model.description {
                Some(description) => println!("  {}. {} - {}", i + 1, model.label, description),
                None => println!("  {}. {}", i + 1, model.label),
            }
        }
        let Some(line) = self.read_line("Model [1]: ").await? else {
            return Ok(None);
        };
        if let Some(model) = pick(&line, &self.store.presets.models) {
            request.model_id = Some(model.id.clone());
        }

        println!("\nRoles:");
        for (i, role) in self.store.presets.roles.iter().enumerate() {
            println!("  {}. {}", i + 1, role.label);
        }
        let Some(line) = self.read_line("Role [1]: ").await? else {
            return Ok(None);
        };
        if let Some(role) = pick(&line, &self.store.presets.roles) {
            request.role_id = Some(role.id.clone());
        }

        if request.username.is_none() {
            let Some(line) = self.read_line("Your name (optional): ").await? else {
                return Ok(None);
            };
            request.username = Some(line);
        }
        if request.is_cloud() && !request.has_api_key() {
            let Some(line) = self.read_line("API key: ").await? else {
                return Ok(None);
            };
            request.api_key = Some(line.trim().to_string());
        }
        Ok(Some(request))
    }

    // ── Chat ─────────────────────────────────────────────────────────────────

    /// Runs one REPL command. Returns false on quit or end of input.
    async fn chat(&mut self) -> Result<bool> {
        let Some(line) = self.read_line("> ").await? else {
            return Ok(false);
        };
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{}", usage);
                return Ok(true);
            }
        };
        if command != Command::Reset {
            self.reset_armed = None;
        }

        match command {
            Command::Empty => {}
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
            Command::List => self.render(),
            Command::Send(path) => self.send(&path).await,
            Command::Play(n) => {
                if let Some(id) = self.message_at(n) {
                    self.store.handle_action(&StoreAction::Toggle(id));
                    self.render();
                }
            }
            Command::Pause(n) => {
                if let Some(id) = self.message_at(n) {
                    self.store.handle_action(&StoreAction::Pause(id));
                }
            }
            Command::Seek(n, time) => {
                if let Some(id) = self.message_at(n) {
                    self.store.handle_action(&StoreAction::Seek { id, time });
                    self.render();
                }
            }
            Command::Reset => self.reset().await,
            Command::Back => {
                self.store.go_back().await;
                if self.router.can_go_back() {
                    self.router.navigate_back();
                } else {
                    self.router.set_initial_page(Page::Welcome);
                }
            }
        }
        Ok(true)
    }

    async fn send(&mut self, path: &Path) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                println!("Cannot read {}: {}", path.display(), e);
                return;
            }
        };
        let recording = self.audio.create(AudioBlob::new(bytes, mime_for(path)));
        println!("Processing your message...");

        match self.store.submit_recording(recording.clone()).await {
            TurnOutcome::Replied { user: None, .. } => {
                log::debug!("App: repeated recording was not logged again");
            }
            TurnOutcome::Replied { .. } => {}
            TurnOutcome::Failed(e) => log::warn!("App: turn failed: {}", e),
            TurnOutcome::Dropped => println!("Still waiting for the previous reply."),
        }
        // The log holds its own reference when the recording was kept
        let kept = self
            .store
            .conversation()
            .messages()
            .iter()
            .any(|m| m.audio.as_ref() == Some(&recording));
        if !kept {
            self.audio.revoke(&recording);
        }
        self.render();
    }

    async fn reset(&mut self) {
        match self.reset_armed.take() {
            Some(at) if at.elapsed() <= RESET_CONFIRM_WINDOW => {
                match self.store.reset_conversation().await {
                    Ok(()) => println!("Conversation reset successfully!"),
                    Err(e) => {
                        log::error!("App: reset failed: {}", e);
                        println!("Failed to reset conversation. Please try again.");
                    }
                }
            }
            _ => {
                self.reset_armed = Some(Instant::now());
                println!("Type 'reset' again to confirm");
            }
        }
    }

    fn message_at(&self, n: usize) -> Option<MessageId> {
        let id = self
            .store
            .conversation()
            .messages()
            .get(n.saturating_sub(1))
            .map(|m| m.id);
        if id.is_none() {
            println!("No message {}", n);
        }
        id
    }

    fn render(&self) {
        let view = ChatViewData::from_store(&self.store);
        if let Some((title, hint)) = view.empty_state() {
            println!("{}\n{}", title, hint);
            return;
        }
        for (i, bubble) in view.bubbles.iter().enumerate() {
            let body = match bubble.kind {
                BubbleKind::System => SYSTEM_ERROR_TEXT.to_string(),
                _ => format!(
                    "{} {} [{:>3.0}%]",
                    if bubble.is_playing { "||" } else { "|>" },
                    bubble.transport,
                    bubble.percent
                ),
            };
            println!("{:>3}. {} {:<10} {}", i + 1, bubble.time, bubble.label, body);
        }
        if let Some(hint) = view.loading_hint() {
            println!("{}", hint);
        }
        if let Some(bubble) = view.playing() {
            println!("Playing {} ({})", bubble.label, bubble.transport);
        }
    }
}

/// 1-based choice from a numbered list; blank keeps the default.
fn pick<'a, T>(line: &str, items: &'a [T]) -> Option<&'a T> {
    let n = line.trim().parse::<usize>().ok()?;
    items.get(n.checked_sub(1)?)
}
