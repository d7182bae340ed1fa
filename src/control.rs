//! Line-oriented control protocol for a running session.
//!
//! Each line is either a plain word command (`pause`, `search all-phone`,
//! `add-word hello HH AH L OW`) or the same command as a JSON object
//! (`{"type":"search","mode":"all-phone"}`). Replies mirror that split.

use crate::engine::SearchMode;
use crate::error::{AsrError, Result};
use crate::session::{ListeningMode, RecognitionSession};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Commands accepted on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Press,
    Release,
    Mode { mode: ListeningMode },
    Search { mode: SearchMode },
    Grammar { jsgf: String },
    GrammarFile { path: PathBuf },
    LanguageModel { path: PathBuf },
    Dictionary { path: PathBuf },
    AcousticModel { path: PathBuf },
    LogFile { path: PathBuf },
    Apply,
    Word { word: String },
    AddWord { word: String, phonemes: String },
    Record { path: PathBuf },
    StopRecording,
    Status,
    Quit,
}

/// Replies written back for each command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Word {
        word: String,
        exists: bool,
    },
    Recorded {
        samples: u64,
    },
    Status {
        listening: bool,
        mode: ListeningMode,
        paused: bool,
        pressed: bool,
        current: usize,
        ready: usize,
        healthy: usize,
        decoders: usize,
        frames_read: u64,
        frames_dropped: u64,
        last_error: Option<String>,
    },
    Error {
        message: String,
    },
}

impl Reply {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::Error {
                message: e.to_string(),
            },
        }
    }

    /// One-line human rendering.
    pub fn to_line(&self) -> String {
        match self {
            Reply::Ok => "ok".to_string(),
            Reply::Word { word, exists } => {
                format!("{} {}", word, if *exists { "known" } else { "unknown" })
            }
            Reply::Recorded { samples } => format!("recorded {} samples", samples),
            Reply::Status {
                listening,
                mode,
                paused,
                pressed,
                current,
                ready,
                healthy,
                decoders,
                frames_read,
                frames_dropped,
                last_error,
            } => {
                let mut line = format!(
                    "listening={} mode={} paused={} pressed={} current={} ready={}/{} healthy={}/{} frames={} dropped={}",
                    listening,
                    mode,
                    paused,
                    pressed,
                    current,
                    ready,
                    decoders,
                    healthy,
                    decoders,
                    frames_read,
                    frames_dropped
                );
                if let Some(error) = last_error {
                    line.push_str(&format!(" last_error=\"{}\"", error));
                }
                line
            }
            Reply::Error { message } => format!("error: {}", message),
        }
    }
}

fn invalid(message: impl Into<String>) -> AsrError {
    AsrError::InvalidState {
        message: message.into(),
    }
}

fn required<'a>(value: Option<&'a str>, what: &str, command: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(format!("{} requires {}", command, what)))
}

/// Parse one control line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ControlCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line)
            .map(Some)
            .map_err(|e| invalid(format!("bad control message: {}", e)));
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, Some(rest.trim())),
        None => (line, None),
    };
    let path = |what: &str| required(rest, what, verb).map(PathBuf::from);

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" | "listen" => ControlCommand::Start,
        "stop" => ControlCommand::Stop,
        "pause" => ControlCommand::Pause,
        "resume" => ControlCommand::Resume,
        "press" | "down" => ControlCommand::Press,
        "release" | "up" => ControlCommand::Release,
        "mode" => ControlCommand::Mode {
            mode: required(rest, "a mode", verb)?.parse()?,
        },
        "search" => ControlCommand::Search {
            mode: required(rest, "a search mode", verb)?.parse()?,
        },
        "grammar" => ControlCommand::Grammar {
            jsgf: required(rest, "grammar text", verb)?.to_string(),
        },
        "grammar-file" => ControlCommand::GrammarFile {
            path: path("a path")?,
        },
        "lm" => ControlCommand::LanguageModel {
            path: path("a path")?,
        },
        "dict" => ControlCommand::Dictionary {
            path: path("a path")?,
        },
        "hmm" => ControlCommand::AcousticModel {
            path: path("a path")?,
        },
        "logfile" => ControlCommand::LogFile {
            path: path("a path")?,
        },
        "apply" => ControlCommand::Apply,
        "word" => ControlCommand::Word {
            word: required(rest, "a word", verb)?.to_string(),
        },
        "add-word" => {
            let rest = required(rest, "a word and its phonemes", verb)?;
            let (word, phonemes) = rest
                .split_once(char::is_whitespace)
                .map(|(w, p)| (w, p.trim()))
                .filter(|(_, p)| !p.is_empty())
                .ok_or_else(|| invalid("add-word requires a word and its phonemes"))?;
            ControlCommand::AddWord {
                word: word.to_string(),
                phonemes: phonemes.to_string(),
            }
        }
        "record" => ControlCommand::Record {
            path: path("a path")?,
        },
        "stop-recording" => ControlCommand::StopRecording,
        "status" => ControlCommand::Status,
        "quit" | "exit" => ControlCommand::Quit,
        other => return Err(invalid(format!("unknown command: {}", other))),
    };
    Ok(Some(command))
}

/// Run one command against the session.
///
/// `Quit` is answered with `Ok`; the caller decides how to wind down.
pub fn execute(session: &RecognitionSession, command: &ControlCommand) -> Reply {
    debug!(?command, "control command");
    match command {
        ControlCommand::Start => Reply::from_result(session.start_listening()),
        ControlCommand::Stop => {
            session.stop_listening();
            Reply::Ok
        }
        ControlCommand::Pause => {
            session.pause();
            Reply::Ok
        }
        ControlCommand::Resume => {
            session.resume();
            Reply::Ok
        }
        ControlCommand::Press => {
            session.press_to_talk_down();
            Reply::Ok
        }
        ControlCommand::Release => {
            session.press_to_talk_up();
            Reply::Ok
        }
        ControlCommand::Mode { mode } => Reply::from_result(session.set_listening_mode(*mode)),
        ControlCommand::Search { mode } => {
            session.set_search_mode(*mode);
            Reply::Ok
        }
        ControlCommand::Grammar { jsgf } => {
            session.set_grammar(jsgf);
            Reply::Ok
        }
        ControlCommand::GrammarFile { path } => {
            session.set_grammar_file(path);
            Reply::Ok
        }
        ControlCommand::LanguageModel { path } => {
            session.set_language_model(path);
            Reply::Ok
        }
        ControlCommand::Dictionary { path } => {
            session.update_dictionary(path);
            Reply::Ok
        }
        ControlCommand::AcousticModel { path } => {
            session.update_acoustic_model(path);
            Reply::Ok
        }
        ControlCommand::LogFile { path } => {
            session.update_logging_path(path);
            Reply::Ok
        }
        ControlCommand::Apply => Reply::from_result(session.apply_updates()),
        ControlCommand::Word { word } => match session.word_exists(word) {
            Ok(exists) => Reply::Word {
                word: word.clone(),
                exists,
            },
            Err(e) => Reply::Error {
                message: e.to_string(),
            },
        },
        ControlCommand::AddWord { word, phonemes } => {
            Reply::from_result(session.add_word(word, phonemes))
        }
        ControlCommand::Record { path } => Reply::from_result(session.record_to(path)),
        ControlCommand::StopRecording => match session.stop_recording() {
            Some(samples) => Reply::Recorded { samples },
            None => Reply::Error {
                message: "not recording".to_string(),
            },
        },
        ControlCommand::Status => status(session),
        ControlCommand::Quit => Reply::Ok,
    }
}

fn status(session: &RecognitionSession) -> Reply {
    let pool = session.pool();
    let stats = session.stats();
    Reply::Status {
        listening: session.is_listening(),
        mode: session.listening_mode(),
        paused: session.is_paused(),
        pressed: session.is_pressed(),
        current: pool.current_index(),
        ready: pool.ready_count(),
        healthy: pool.healthy_count(),
        decoders: pool.len(),
        frames_read: stats.frames_read,
        frames_dropped: stats.frames_dropped,
        last_error: session.last_error(),
    }
}
