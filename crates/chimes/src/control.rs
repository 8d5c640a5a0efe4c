//! Line-oriented control surface for the daemon
//!
//! One command per line, e.g. `play hour 7`, `focus half-hour off`,
//! `set volume 0.6`. Replies are single lines; errors are reported and the
//! session continues.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chimeconf::{ChimesConfig, ConfigError, KNOBS};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::chime::{Chime, ChimeError, ChimeFamily};
use crate::focus::FocusGate;
use crate::player::{PlayOutcome, PlaybackError, Player, Trigger};
use crate::scheduler::{SchedulerGone, SchedulerHandle, TickState};

const HELP: &str = "commands: enable, disable, play <chime>, stop, focus [<kind> <on|off>], \
                    sleep, wake, set <knob> <value>, reload, status, quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Enable,
    Disable,
    Play(Chime),
    Stop,
    /// Bare `focus` shows the gate; with arguments it flips one switch.
    Focus(Option<(ChimeFamily, bool)>),
    Sleep,
    Wake,
    Set { key: String, value: String },
    Reload,
    Status,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Chime(#[from] ChimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerGone),
}

fn parse_switch(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl FromStr for Command {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "" => return Err(ControlError::Empty),
            "enable" => Command::Enable,
            "disable" => Command::Disable,
            "play" if rest.is_empty() => return Err(ControlError::Usage("play <chime>")),
            "play" => Command::Play(rest.parse::<Chime>()?),
            "stop" => Command::Stop,
            "focus" if rest.is_empty() => Command::Focus(None),
            "focus" => {
                const USAGE: &str = "focus <kind> <on|off>";
                let (kind, switch) = rest
                    .rsplit_once(char::is_whitespace)
                    .ok_or(ControlError::Usage(USAGE))?;
                let allowed = parse_switch(switch.trim()).ok_or(ControlError::Usage(USAGE))?;
                Command::Focus(Some((kind.parse::<ChimeFamily>()?, allowed)))
            }
            "sleep" => Command::Sleep,
            "wake" => Command::Wake,
            "set" => {
                let (key, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ControlError::Usage("set <knob> <value>"))?;
                Command::Set {
                    key: key.to_ascii_lowercase(),
                    value: value.trim().to_string(),
                }
            }
            "reload" => Command::Reload,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(ControlError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done(String),
    Quit,
}

/// Executes commands against the running daemon.
pub struct Controller {
    player: Arc<Player>,
    scheduler: SchedulerHandle,
    focus: FocusGate,
    config_path: Option<PathBuf>,
}

impl Controller {
    /// `config_path` is the `--config` override used again on `reload`.
    pub fn new(
        player: Arc<Player>,
        scheduler: SchedulerHandle,
        focus: FocusGate,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            player,
            scheduler,
            focus,
            config_path,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Reply, ControlError> {
        debug!(?command, "control command");
        let message = match command {
            Command::Enable => {
                self.scheduler.set_enabled(true).await?;
                "chimes enabled".to_string()
            }
            Command::Disable => {
                self.scheduler.set_enabled(false).await?;
                "chimes disabled".to_string()
            }
            Command::Play(chime) => match self.player.play(chime, Trigger::Manual)? {
                PlayOutcome::Started(session) => {
                    format!("playing {} (session {})", chime, session.generation)
                }
                PlayOutcome::Skipped => format!("{} skipped", chime),
            },
            Command::Stop => {
                self.player.stop();
                "stopped".to_string()
            }
            Command::Focus(None) => format!("focus: {}", self.focus.summary()),
            Command::Focus(Some((family, allowed))) => {
                self.focus.set(family, allowed);
                info!(%family, allowed, "focus switch changed");
                format!("focus: {}", self.focus.summary())
            }
            Command::Sleep => {
                self.scheduler.will_sleep().await?;
                "sleeping".to_string()
            }
            Command::Wake => {
                self.scheduler.screens_woke().await?;
                "awake".to_string()
            }
            Command::Set { key, value } => {
                self.player
                    .settings()
                    .update(|settings| settings.set(&key, &value))?;
                info!(%key, %value, "setting changed");
                format!("{} = {}", key, value)
            }
            Command::Reload => {
                let config = ChimesConfig::load_from(self.config_path.as_deref())?;
                self.player.settings().replace(config.chime);
                info!("settings reloaded");
                "settings reloaded".to_string()
            }
            Command::Status => self.status_line(),
            Command::Help => format!("{}\nknobs: {}", HELP, KNOBS.join(", ")),
            Command::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Done(message))
    }

    fn status_line(&self) -> String {
        let status = self.scheduler.status();
        let enabled = if status.enabled { "enabled" } else { "disabled" };
        let tick = match &status.state {
            TickState::Armed(plan) => format!(
                "next {} at {} (starts {})",
                plan.chime,
                plan.target.format("%H:%M"),
                plan.fire_at().format("%H:%M:%S%.3f")
            ),
            TickState::Firing(plan) => format!("firing {}", plan.chime),
            TickState::Disabled if !status.awake => "asleep".to_string(),
            TickState::Disabled => "not armed".to_string(),
        };
        let audio = if self.player.is_playing() {
            "chiming"
        } else {
            "silent"
        };
        format!("{}, {}, {}", enabled, tick, audio)
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    Quit,
    InputClosed,
}

/// Read commands from `input` until `quit` or end of input, writing one
/// reply per command to `output`.
pub async fn serve<R, W>(
    controller: &Controller,
    input: R,
    mut output: W,
) -> std::io::Result<ServeEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match line.parse::<Command>() {
            Ok(command) => controller.execute(command).await,
            Err(e) => Err(e),
        };
        match reply {
            Ok(Reply::Done(message)) => {
                output.write_all(message.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            Ok(Reply::Quit) => return Ok(ServeEnd::Quit),
            Err(e) => {
                output.write_all(format!("error: {}\n", e).as_bytes()).await?;
            }
        }
        output.flush().await?;
    }
    Ok(ServeEnd::InputClosed)
}
