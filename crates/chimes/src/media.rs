//! Background media collaborator
//!
//! Whatever is playing music on the desktop gets faded out before a chime
//! and faded back in afterwards. Failures here never stop a chime; the
//! orchestrator logs them and carries on.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Error type for media control
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Control over an external media player.
#[async_trait]
pub trait MediaController: Send + Sync {
    /// Whether background media is audible right now.
    async fn is_playing(&self) -> bool;

    /// Ramp volume down over `duration`, then pause.
    async fn fade_out(&self, duration: Duration) -> Result<(), MediaError>;

    /// Resume, then ramp volume up over `duration`.
    async fn fade_in(&self, duration: Duration) -> Result<(), MediaError>;
}

/// No media player: nothing is ever playing, fades are no-ops.
pub struct NoMedia;

#[async_trait]
impl MediaController for NoMedia {
    async fn is_playing(&self) -> bool {
        false
    }

    async fn fade_out(&self, _duration: Duration) -> Result<(), MediaError> {
        Ok(())
    }

    async fn fade_in(&self, _duration: Duration) -> Result<(), MediaError> {
        Ok(())
    }
}

/// Step volume (percent) from `from` to `to` so the whole ramp takes
/// `duration` of wall time.
///
/// Each of the `steps` sleeps is `(duration - slack) / steps`; `slack`
/// budgets for the time `set_volume` itself takes. Whatever is left of
/// `duration` afterwards is slept off in one final wait, so overhead smaller
/// than `slack` never stretches the fade.
pub async fn ramp_volume<F, Fut>(
    from: u8,
    to: u8,
    duration: Duration,
    slack: Duration,
    steps: u32,
    mut set_volume: F,
) -> Result<(), MediaError>
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<(), MediaError>>,
{
    let started = Instant::now();
    let steps = steps.max(1);
    let step_sleep = duration.saturating_sub(slack) / steps;
    let (from, to) = (i32::from(from), i32::from(to));

    for i in 0..=steps {
        let level = from + (to - from) * i as i32 / steps as i32;
        set_volume(level.clamp(0, 100) as u8).await?;
        if i < steps {
            tokio::time::sleep(step_sleep).await;
        }
    }

    let remaining = duration.saturating_sub(started.elapsed());
    if !remaining.is_zero() {
        tokio::time::sleep(remaining).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn ramp_hits_every_level_and_lasts_exactly_the_duration() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        let recorded = Arc::clone(&levels);
        ramp_volume(100, 0, Duration::from_secs(1), Duration::from_millis(100), 20, |v| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(v);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(1));
        let levels = levels.lock().unwrap();
        assert_eq!(levels.len(), 21);
        assert_eq!(levels.first(), Some(&100));
        assert_eq!(levels.last(), Some(&0));
        assert!(levels.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn slack_absorbs_per_step_overhead() {
        let started = Instant::now();

        // Each volume command costs 5ms; 21 of them fit inside 100ms of slack
        ramp_volume(0, 100, Duration::from_secs(1), Duration::from_millis(100), 20, |_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        })
        .await
        .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(
            elapsed <= Duration::from_millis(1010),
            "fade took {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_stops_at_first_failure() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result = ramp_volume(100, 0, Duration::from_secs(1), Duration::ZERO, 10, |_| {
            let counter = Arc::clone(&counter);
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n == 3 {
                    return Err(MediaError::CommandFailed {
                        command: "volume".to_string(),
                        status: "1".to_string(),
                        stderr: "no player".to_string(),
                    });
                }
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn no_media_is_never_playing() {
        let media = NoMedia;
        assert!(!media.is_playing().await);
        assert!(media.fade_out(Duration::from_secs(1)).await.is_ok());
        assert!(media.fade_in(Duration::from_secs(1)).await.is_ok());
    }
}
