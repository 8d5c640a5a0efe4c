//! MPRIS media control through the `playerctl` command
//!
//! Works with any player exposing MPRIS on the session bus (Spotify, mpv,
//! browsers, mpd with mpDris2). Volume is ramped with [`ramp_volume`] so fades
//! take the configured wall time even though each step spawns a process.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::media::{ramp_volume, MediaController, MediaError};
use crate::settings::SettingsHandle;

pub struct PlayerctlMedia {
    program: String,
    base_args: Vec<String>,
    steps: u32,
    settings: SettingsHandle,
}

impl PlayerctlMedia {
    /// `player` selects one MPRIS player by name; `None` lets playerctl pick.
    pub fn new(player: Option<String>, steps: u32, settings: SettingsHandle) -> Self {
        let base_args = match player {
            Some(name) => vec!["--player".to_string(), name],
            None => Vec::new(),
        };
        Self::with_command("playerctl", base_args, steps, settings)
    }

    /// Use a different executable speaking the playerctl command set.
    pub fn with_command(
        program: impl Into<String>,
        base_args: Vec<String>,
        steps: u32,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            steps,
            settings,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, MediaError> {
        let command = format!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn set_volume(&self, percent: u8) -> Result<(), MediaError> {
        let level = format!("{:.2}", f64::from(percent) / 100.0);
        self.run(&["volume", &level]).await.map(|_| ())
    }

    async fn ramp(&self, from: u8, to: u8, duration: Duration) -> Result<(), MediaError> {
        let slack = self.settings.snapshot().media_fade_slack();
        ramp_volume(from, to, duration, slack, self.steps, |level| {
            self.set_volume(level)
        })
        .await
    }
}

#[async_trait]
impl MediaController for PlayerctlMedia {
    async fn is_playing(&self) -> bool {
        match self.run(&["status"]).await {
            Ok(status) => status.eq_ignore_ascii_case("playing"),
            Err(e) => {
                debug!(error = %e, "media status unavailable");
                false
            }
        }
    }

    async fn fade_out(&self, duration: Duration) -> Result<(), MediaError> {
        self.ramp(100, 0, duration).await?;
        self.run(&["pause"]).await?;
        Ok(())
    }

    async fn fade_in(&self, duration: Duration) -> Result<(), MediaError> {
        // Resume first so the ramp is audible
        self.run(&["play"]).await?;
        self.ramp(0, 100, duration).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell stand-in for playerctl that appends its arguments to `log`.
    fn fake_playerctl(log: &std::path::Path, status: &str, steps: u32) -> PlayerctlMedia {
        let script = format!(
            r#"echo "$@" >> '{}'; case "$1" in status) echo {} ;; esac"#,
            log.display(),
            status
        );
        let mut settings = chimeconf::ChimeSettings::default();
        settings.media_fade_slack = 0.0;
        PlayerctlMedia::with_command(
            "sh",
            vec!["-c".to_string(), script, "playerctl".to_string()],
            steps,
            SettingsHandle::new(settings),
        )
    }

    fn logged(log: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn status_playing_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");

        assert!(fake_playerctl(&log, "Playing", 2).is_playing().await);
        assert!(!fake_playerctl(&log, "Paused", 2).is_playing().await);
    }

    #[tokio::test]
    async fn missing_program_reads_as_not_playing() {
        let media = PlayerctlMedia::with_command(
            "/nonexistent/playerctl",
            Vec::new(),
            2,
            SettingsHandle::default(),
        );
        assert!(!media.is_playing().await);
        assert!(matches!(
            media.fade_out(Duration::ZERO).await,
            Err(MediaError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn fade_out_ramps_down_then_pauses() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let media = fake_playerctl(&log, "Playing", 2);

        media.fade_out(Duration::ZERO).await.unwrap();

        assert_eq!(
            logged(&log),
            vec!["volume 1.00", "volume 0.50", "volume 0.00", "pause"]
        );
    }

    #[tokio::test]
    async fn fade_in_plays_then_ramps_up() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let media = fake_playerctl(&log, "Paused", 2);

        media.fade_in(Duration::ZERO).await.unwrap();

        assert_eq!(
            logged(&log),
            vec!["play", "volume 0.00", "volume 0.50", "volume 1.00"]
        );
    }
}
