//! Speaks chat replies into an MP3 file while they stream.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use jarvis_core::{TextToSpeech, VoiceError};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct Speaker {
    tts: TextToSpeech,
    out: PathBuf,
}

impl Speaker {
    pub fn new(tts: TextToSpeech, out: PathBuf) -> Self {
        Self { tts, out }
    }

    /// Starts synthesis for one reply. Sentences are sent to the voice
    /// service as soon as they are complete.
    pub fn start(&self) -> Utterance {
        let (text, rx) = mpsc::unbounded_channel();
        let mut audio = self
            .tts
            .synthesize_stream(UnboundedReceiverStream::new(rx).boxed());

        let clip = tokio::spawn(async move {
            let mut clip = Vec::new();
            while let Some(chunk) = audio.next().await {
                clip.extend_from_slice(&chunk?);
            }
            Ok(clip)
        });

        Utterance {
            text,
            clip,
            out: self.out.clone(),
        }
    }
}

pub struct Utterance {
    text: mpsc::UnboundedSender<String>,
    clip: JoinHandle<Result<Vec<u8>, VoiceError>>,
    out: PathBuf,
}

impl Utterance {
    pub fn feed(&self, fragment: &str) {
        // Synthesis stops on its first error; finish reports it.
        let _ = self.text.send(fragment.to_string());
    }

    /// Waits for the remaining audio and writes the clip, replacing any
    /// earlier one. Returns the clip size; nothing is written for silence.
    pub async fn finish(self) -> Result<usize> {
        drop(self.text);
        let clip = self.clip.await.context("Speech task stopped")??;
        if clip.is_empty() {
            return Ok(0);
        }
        tokio::fs::write(&self.out, &clip)
            .await
            .with_context(|| format!("Failed to write {}", self.out.display()))?;
        Ok(clip.len())
    }
}
