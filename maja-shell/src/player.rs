//! Playback through an external player process.
//!
//! Each handle writes its clip to a scratch file and runs the configured
//! command on it. Pausing kills the process; the position is kept by wall
//! clock and handed back through `{start}` when playback resumes.
//!
//! A command without `{start}` (the macOS `afplay` default) cannot start
//! mid-clip: every run starts from 0 and seeking is ignored.

use std::io::Write;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::oneshot;

use maja_data::{
    AudioRef, AudioStore, PlaybackBackend, PlaybackError, PlaybackHandle, PlaybackSignal,
    SignalSink,
};

#[cfg(target_os = "macos")]
pub const DEFAULT_PLAYER: &str = "afplay -t 3600 {file}";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_PLAYER: &str = "ffplay -nodisp -autoexit -loglevel quiet -ss {start} {file}";

/// Creates [`CommandPlayer`]s for a command template.
///
/// `{file}` is replaced by the scratch file path and `{start}` by the
/// position to start from, in seconds.
pub struct CommandPlayerBackend {
    audio: AudioStore,
    template: Vec<String>,
}

impl CommandPlayerBackend {
    pub fn new(audio: AudioStore, template: &str) -> Self {
        let template: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if !is_seekable(&template) {
            log::info!("CommandPlayer: no {{start}} in player command, clips resume from the top");
        }
        Self { audio, template }
    }

    pub fn with_default_player(audio: AudioStore) -> Self {
        Self::new(audio, DEFAULT_PLAYER)
    }
}

impl PlaybackBackend for CommandPlayerBackend {
    fn create(&self, source: &AudioRef) -> Box<dyn PlaybackHandle> {
        Box::new(CommandPlayer {
            audio: self.audio.clone(),
            seekable: is_seekable(&self.template),
            template: self.template.clone(),
            source: source.clone(),
            scratch: None,
            state: Arc::new(Mutex::new(State::default())),
        })
    }
}

fn is_seekable(template: &[String]) -> bool {
    template.iter().any(|arg| arg.contains("{start}"))
}

#[derive(Default)]
struct State {
    /// The last run reached the end of the clip
    ended: bool,
    /// Position when the current run started
    offset: f64,
    started_at: Option<Instant>,
    kill: Option<oneshot::Sender<()>>,
    /// Bumped on every spawn so a stale exit is ignored
    run: u64,
    sink: Option<SignalSink>,
}

impl State {
    fn position(&self) -> f64 {
        match self.started_at {
            Some(at) => self.offset + at.elapsed().as_secs_f64(),
            None => self.offset,
        }
    }

    /// Stop the running process, keeping the position.
    fn halt(&mut self) {
        self.offset = self.position();
        self.started_at = None;
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn emit(&self, signal: PlaybackSignal) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(signal);
        }
    }
}

pub struct CommandPlayer {
    audio: AudioStore,
    template: Vec<String>,
    seekable: bool,
    source: AudioRef,
    scratch: Option<NamedTempFile>,
    state: Arc<Mutex<State>>,
}

impl CommandPlayer {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn scratch_path(&mut self) -> Result<String, PlaybackError> {
        if self.scratch.is_none() {
            let blob = self
                .audio
                .fetch(&self.source)
                .map_err(|e| PlaybackError::Source(e.to_string()))?;
            let suffix = format!(".{}", blob.extension().unwrap_or("bin"));
            let mut file = tempfile::Builder::new()
                .prefix("maja-")
                .suffix(&suffix)
                .tempfile()
                .map_err(|e| PlaybackError::Source(e.to_string()))?;
            file.write_all(blob.bytes())
                .map_err(|e| PlaybackError::Source(e.to_string()))?;
            self.scratch = Some(file);
        }
        match &self.scratch {
            Some(file) => Ok(file.path().to_string_lossy().into_owned()),
            None => Err(PlaybackError::Source(self.source.to_string())),
        }
    }

    fn command(&self, file: &str, start: f64) -> Result<Command, PlaybackError> {
        let mut args = self.template.iter().map(|arg| {
            arg.replace("{file}", file)
                .replace("{start}", &format!("{:.3}", start))
        });
        let program = args
            .next()
            .ok_or_else(|| PlaybackError::Rejected("empty player command".to_string()))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        Ok(command)
    }

    /// Spawn the player at the stored offset and watch it.
    fn spawn(&mut self) -> Result<(), PlaybackError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlaybackError::Rejected(e.to_string()))?;
        let file = self.scratch_path()?;
        let offset = {
            let mut state = self.state();
            if !self.seekable {
                state.offset = 0.0;
            }
            state.offset
        };
        let mut child = self
            .command(&file, offset)?
            .spawn()
            .map_err(|e| PlaybackError::Rejected(e.to_string()))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let run = {
            let mut state = self.state();
            state.run += 1;
            state.kill = Some(kill_tx);
            state.started_at = Some(Instant::now());
            state.ended = false;
            state.run
        };
        log::debug!("CommandPlayer: started {} at {:.2}s", self.source, offset);

        let state = Arc::downgrade(&self.state);
        runtime.spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.kill().await;
                    return;
                }
            };
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
            if state.run != run {
                return;
            }
            state.offset = state.position();
            state.started_at = None;
            state.kill = None;
            match status {
                Ok(status) if status.success() => {
                    state.ended = true;
                    state.emit(PlaybackSignal::Ended);
                }
                Ok(status) => {
                    log::warn!("CommandPlayer: player exited with {}", status);
                    state.emit(PlaybackSignal::Error);
                }
                Err(e) => {
                    log::warn!("CommandPlayer: waiting on player failed: {}", e);
                    state.emit(PlaybackSignal::Error);
                }
            }
        });
        Ok(())
    }
}

impl PlaybackHandle for CommandPlayer {
    fn start(&mut self) -> Result<(), PlaybackError> {
        {
            let mut state = self.state();
            if state.kill.is_some() {
                return Ok(());
            }
            // A finished clip restarts from the top
            if state.ended {
                state.offset = 0.0;
            }
        }
        self.spawn()?;
        self.state().emit(PlaybackSignal::Started);
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.state();
        if state.kill.is_none() {
            return;
        }
        state.halt();
        state.emit(PlaybackSignal::Paused);
    }

    fn is_paused(&self) -> bool {
        self.state().kill.is_none()
    }

    fn current_time(&self) -> f64 {
        self.state().position()
    }

    fn set_current_time(&mut self, secs: f64) {
        if !self.seekable {
            log::warn!("CommandPlayer: player command has no {{start}}, seek ignored");
            return;
        }
        let running = {
            let mut state = self.state();
            let running = state.kill.is_some();
            state.halt();
            state.offset = secs.max(0.0);
            state.ended = false;
            running
        };
        if running {
            if let Err(e) = self.spawn() {
                log::warn!("CommandPlayer: restart after seek failed: {}", e);
                self.state().emit(PlaybackSignal::Error);
            }
        }
    }

    fn source(&self) -> &AudioRef {
        &self.source
    }

    fn set_source(&mut self, source: AudioRef) {
        {
            let mut state = self.state();
            state.halt();
            state.offset = 0.0;
            state.ended = false;
        }
        self.scratch = None;
        self.source = source;
    }

    fn subscribe(&mut self, sink: SignalSink) {
        self.state().sink = Some(sink);
    }

    fn unsubscribe(&mut self) {
        self.state().sink = None;
    }

    fn release(&mut self) {
        let mut state = self.state();
        state.halt();
        state.sink = None;
        drop(state);
        self.scratch = None;
    }
}
