use std::process::{Command, Stdio};

use remedy_contracts::error::{RemedyError, ServiceResult};
use tracing::{debug, warn};

/// Single-shot dictation: one call, one final transcript.
pub trait SpeechCapture: Send {
    fn is_available(&self) -> bool;
    fn listen(&mut self) -> ServiceResult<String>;
}

/// Runs an external recognizer and takes its trimmed stdout as the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDictation {
    program: String,
    args: Vec<String>,
}

impl CommandDictation {
    pub fn from_command_line(command_line: &str) -> ServiceResult<Self> {
        let mut parts = shell_words::split(command_line)
            .map_err(|err| RemedyError::Config(format!("REMEDY_SPEECH_CMD: {err}")))?
            .into_iter()
            .filter(|part| !part.is_empty());
        let program = parts
            .next()
            .ok_or_else(|| RemedyError::Config("REMEDY_SPEECH_CMD is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl SpeechCapture for CommandDictation {
    fn is_available(&self) -> bool {
        true
    }

    fn listen(&mut self) -> ServiceResult<String> {
        debug!(program = %self.program, "starting dictation");
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(program = %self.program, error = %err, "dictation command failed to start");
                RemedyError::SpeechStart
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("audio-capture");
            return Err(RemedyError::SpeechCapture(reason.to_string()));
        }
        let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if transcript.is_empty() {
            return Err(RemedyError::SpeechCapture("no-speech".to_string()));
        }
        Ok(transcript)
    }
}

/// Stand-in when no recognizer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpeech;

impl SpeechCapture for NoSpeech {
    fn is_available(&self) -> bool {
        false
    }

    fn listen(&mut self) -> ServiceResult<String> {
        Err(RemedyError::SpeechCapture("not-supported".to_string()))
    }
}
