//! Terminal rendering of controller events and keyboard control.

use crate::coach::{Coach, FALLBACK_REPLY, reply_or_fallback};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use voice_coach_core::{ControllerHandle, HostEvent, PlaybackOutcome, SessionState, TurnId};

pub const USAGE: &str = "Press Enter to talk (Enter again to stop), i to interrupt, r to resume listening, q to quit.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Tap-to-talk: start when idle, stop otherwise.
    Talk,
    Interrupt,
    Resume,
    Quit,
}

pub fn parse_key(line: &str) -> Option<Key> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Some(Key::Talk),
        "i" => Some(Key::Interrupt),
        "r" => Some(Key::Resume),
        "q" | "quit" => Some(Key::Quit),
        _ => None,
    }
}

/// Line shown for an event, if any.
pub fn render(event: &HostEvent) -> Option<String> {
    match event {
        HostEvent::StateChanged(state) => Some(match state {
            SessionState::Idle => "[idle] press Enter to talk".to_string(),
            SessionState::Listening => "[listening]".to_string(),
            SessionState::Processing => "[thinking]".to_string(),
            SessionState::Speaking => "[speaking] press i to interrupt".to_string(),
        }),
        HostEvent::Interim(text) => Some(format!("  ... {}", text)),
        HostEvent::Transcript { text, .. } => Some(format!("You: {}", text)),
        HostEvent::SpeakingComplete(PlaybackOutcome::Cancelled { played, total }) => {
            Some(format!("(interrupted after {} of {} sentences)", played, total))
        }
        HostEvent::SpeakingComplete(_) => None,
        HostEvent::Error(_) => Some(FALLBACK_REPLY.to_string()),
    }
}

/// Plays the host UI: prints events and answers transcripts through the coach.
pub struct TerminalHost {
    controller: ControllerHandle,
    coach: Arc<dyn Coach>,
}

impl TerminalHost {
    pub fn new(controller: ControllerHandle, coach: Arc<dyn Coach>) -> Self {
        Self { controller, coach }
    }

    pub async fn run(self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            match &event {
                HostEvent::Transcript { turn, text } => {
                    tokio::spawn(answer(
                        self.controller.clone(),
                        self.coach.clone(),
                        *turn,
                        text.clone(),
                    ));
                }
                HostEvent::SpeakingComplete(outcome) => {
                    tracing::debug!("speaking complete: {:?}", outcome);
                }
                HostEvent::Error(e) => tracing::error!("voice session error: {}", e),
                _ => {}
            }
            if let Some(line) = render(&event) {
                println!("{}", line);
                let _ = std::io::stdout().flush();
            }
        }
        tracing::debug!("host event stream closed");
    }
}

async fn answer(controller: ControllerHandle, coach: Arc<dyn Coach>, turn: TurnId, transcript: String) {
    let reply = reply_or_fallback(coach.as_ref(), &transcript).await;
    println!("Coach: {}", reply);
    if let Err(e) = controller.respond(turn, reply).await {
        tracing::warn!("failed to deliver the reply for {}: {}", turn, e);
    }
}

/// Reads keys from stdin until `q` or end of input.
pub async fn read_keys(controller: ControllerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let Some(key) = parse_key(&line) else {
            println!("{}", USAGE);
            continue;
        };
        let result = match key {
            Key::Talk if controller.state() == SessionState::Idle => controller.start().await,
            Key::Talk => {
                controller.stop().await;
                Ok(())
            }
            Key::Interrupt => controller.interrupt().await,
            Key::Resume => controller.resume_listening().await,
            Key::Quit => break,
        };
        if let Err(e) = result {
            tracing::warn!("{:?} failed: {}", key, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_coach_core::VoiceError;

    #[test]
    fn keys() {
        assert_eq!(parse_key(""), Some(Key::Talk));
        assert_eq!(parse_key("  \n"), Some(Key::Talk));
        assert_eq!(parse_key("I"), Some(Key::Interrupt));
        assert_eq!(parse_key("r"), Some(Key::Resume));
        assert_eq!(parse_key("quit"), Some(Key::Quit));
        assert_eq!(parse_key("x"), None);
    }

    #[test]
    fn errors_show_the_static_message() {
        let line = render(&HostEvent::Error(VoiceError::Credential("401".to_string())));

        assert_eq!(line.as_deref(), Some(FALLBACK_REPLY));
    }

    #[test]
    fn completed_speech_is_silent_but_interruptions_are_shown() {
        assert_eq!(
            render(&HostEvent::SpeakingComplete(PlaybackOutcome::Completed {
                fragments: 2
            })),
            None
        );
        assert_eq!(
            render(&HostEvent::SpeakingComplete(PlaybackOutcome::Cancelled {
                played: 1,
                total: 3
            }))
            .as_deref(),
            Some("(interrupted after 1 of 3 sentences)")
        );
    }
}
