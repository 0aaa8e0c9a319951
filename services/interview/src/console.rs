//! A line-based stand-in for a speech recognizer: each line typed on the console
//! is one utterance.

use anyhow::{Result, bail};
use async_trait::async_trait;
use interview_core::services::{RecognizerEvent, SpeechRecognizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const END_COMMAND: &str = "/end";
pub const QUIT_COMMAND: &str = "/quit";

/// Session commands typed on the console, outside the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// End the session and generate the report.
    End,
    /// End the session without a report.
    Quit,
}

pub struct ConsoleRecognizer {
    listening: AtomicBool,
    closed: AtomicBool,
}

impl ConsoleRecognizer {
    /// Starts reading `input` in the background.
    ///
    /// Lines read while listening become `RecognizerEvent`s: a blank line is
    /// "no speech", which stops listening like a real recognizer does. Commands are
    /// accepted at any time.
    pub fn spawn<R>(
        input: R,
        events: mpsc::Sender<RecognizerEvent>,
        commands: mpsc::Sender<ConsoleCommand>,
    ) -> Arc<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let recognizer = Arc::new(Self {
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let reader = recognizer.clone();
        tokio::spawn(async move {
            let mut lines = input.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !reader.dispatch(line.trim(), &events, &commands).await {
                    break;
                }
            }
            reader.closed.store(true, Ordering::SeqCst);
            info!("Console input closed");
        });
        recognizer
    }

    /// Returns `false` once nobody is left to receive.
    async fn dispatch(
        &self,
        line: &str,
        events: &mpsc::Sender<RecognizerEvent>,
        commands: &mpsc::Sender<ConsoleCommand>,
    ) -> bool {
        let command = match line {
            END_COMMAND => Some(ConsoleCommand::End),
            QUIT_COMMAND => Some(ConsoleCommand::Quit),
            _ => None,
        };
        if let Some(command) = command {
            return commands.send(command).await.is_ok();
        }

        if !self.listening.load(Ordering::SeqCst) {
            debug!("Ignoring console input while not listening");
            return true;
        }
        let event = if line.is_empty() {
            self.listening.store(false, Ordering::SeqCst);
            RecognizerEvent::NoSpeech
        } else {
            RecognizerEvent::Utterance(line.to_string())
        };
        events.send(event).await.is_ok()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    async fn acquire(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("Console input is closed");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader, duplex};

    #[tokio::test]
    async fn lines_become_events_only_while_listening() {
        let (mut writer, reader) = duplex(256);
        let (events_tx, mut events) = mpsc::channel(8);
        let (commands_tx, mut commands) = mpsc::channel(8);
        let recognizer = ConsoleRecognizer::spawn(BufReader::new(reader), events_tx, commands_tx);

        writer.write_all(b"typed too early\n/end\n").await.unwrap();
        assert_eq!(commands.recv().await, Some(ConsoleCommand::End));

        recognizer.start().await.unwrap();
        writer.write_all(b"  I feel tired  \n\n").await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(RecognizerEvent::Utterance("I feel tired".into()))
        );
        assert_eq!(events.recv().await, Some(RecognizerEvent::NoSpeech));
        assert!(!recognizer.is_listening());
        assert!(events.try_recv().is_err(), "early line was not forwarded");
    }

    #[tokio::test]
    async fn closed_input_cannot_be_acquired() {
        let (events_tx, _events) = mpsc::channel(8);
        let (commands_tx, _commands) = mpsc::channel(8);
        let recognizer =
            ConsoleRecognizer::spawn(BufReader::new(&b"/quit\n"[..]), events_tx, commands_tx);

        for _ in 0..50 {
            if recognizer.acquire().await.is_err() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("console input should have been reported closed");
    }
}
