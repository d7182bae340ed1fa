//! Terminal rendering of session events and control replies.

use crate::control::Reply;
use crate::events::SessionEvent;
use owo_colors::OwoColorize;

/// How events are written to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStyle {
    /// One JSON object per line.
    Json,
    /// Human readable, optionally colored.
    Text { color: bool },
}

/// Render one event as a single line.
///
/// Hypotheses are the payload and go to stdout; everything else is status
/// and is meant for stderr, which `is_status` tells apart.
pub fn render_event(event: &SessionEvent, style: OutputStyle) -> String {
    let color = match style {
        OutputStyle::Json => {
            return serde_json::to_string(event)
                .unwrap_or_else(|e| format!("{{\"type\":\"error\",\"message\":\"{}\"}}", e));
        }
        OutputStyle::Text { color } => color,
    };

    let (label, detail) = match event {
        SessionEvent::Ready => ("ready", String::new()),
        SessionEvent::SpeechStart { slot } => ("speech", format!("started on decoder-{}", slot)),
        SessionEvent::SpeechEnd { slot } => ("speech", format!("ended on decoder-{}", slot)),
        SessionEvent::Hypothesis { text, .. } => return text.clone(),
        SessionEvent::Paused => ("paused", String::new()),
        SessionEvent::Resumed => ("resumed", String::new()),
        SessionEvent::Error { message } => {
            return if color {
                format!("{} {}", "error:".red().bold(), message)
            } else {
                format!("error: {}", message)
            };
        }
    };

    let label = format!("[{}]", label);
    let label = if color {
        label.dimmed().to_string()
    } else {
        label
    };
    if detail.is_empty() {
        label
    } else {
        format!("{} {}", label, detail)
    }
}

/// True for events that are not recognized text.
pub fn is_status(event: &SessionEvent) -> bool {
    !matches!(event, SessionEvent::Hypothesis { .. })
}

pub fn render_reply(reply: &Reply, style: OutputStyle) -> String {
    match style {
        OutputStyle::Json => serde_json::to_string(reply)
            .unwrap_or_else(|e| format!("{{\"type\":\"error\",\"message\":\"{}\"}}", e)),
        OutputStyle::Text { color: true } => match reply {
            Reply::Error { .. } => reply.to_line().red().to_string(),
            _ => reply.to_line().green().to_string(),
        },
        OutputStyle::Text { color: false } => reply.to_line(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: OutputStyle = OutputStyle::Text { color: false };

    #[test]
    fn test_hypothesis_is_bare_text() {
        let event = SessionEvent::Hypothesis {
            slot: 1,
            text: "hello world".to_string(),
        };
        assert_eq!(render_event(&event, PLAIN), "hello world");
        assert!(!is_status(&event));
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(render_event(&SessionEvent::Ready, PLAIN), "[ready]");
        assert_eq!(
            render_event(&SessionEvent::SpeechStart { slot: 2 }, PLAIN),
            "[speech] started on decoder-2"
        );
        assert_eq!(
            render_event(
                &SessionEvent::Error {
                    message: "device lost".to_string()
                },
                PLAIN
            ),
            "error: device lost"
        );
        assert!(is_status(&SessionEvent::Paused));
    }

    #[test]
    fn test_json_lines() {
        let line = render_event(&SessionEvent::SpeechEnd { slot: 0 }, OutputStyle::Json);
        assert_eq!(line, r#"{"type":"speech_end","slot":0}"#);
        let line = render_reply(&Reply::Ok, OutputStyle::Json);
        assert_eq!(line, r#"{"type":"ok"}"#);
    }

    #[test]
    fn test_colored_text_keeps_content() {
        let line = render_event(&SessionEvent::Resumed, OutputStyle::Text { color: true });
        assert!(line.contains("[resumed]"));
        assert_ne!(line, "[resumed]");
    }
}
