//! Event sink port and the console adapter.

use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::Event;
use crate::io::jsonl::to_ascii_line;

/// Presentation of events as they happen. Must not fail for a well-formed event.
pub trait EventSink {
    fn emit(&self, event: &Event);
}

/// Output layout for [`ConsoleEventSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFormat {
    /// Header line plus indented, pretty-printed payload.
    Human,
    /// One ASCII JSON object per line, same encoding as the run log.
    JsonLines,
}

/// Writes events to a terminal (or any writer).
pub struct ConsoleEventSink<W: Write = io::Stdout> {
    format: ConsoleFormat,
    out: Mutex<W>,
}

impl ConsoleEventSink {
    pub fn stdout(format: ConsoleFormat) -> Self {
        Self::new(format, io::stdout())
    }
}

impl<W: Write> ConsoleEventSink<W> {
    pub fn new(format: ConsoleFormat, out: W) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_event(&self, event: &Event) -> Result<()> {
        let rendered = match self.format {
            ConsoleFormat::Human => render_human(event)?,
            ConsoleFormat::JsonLines => to_ascii_line(event)?,
        };
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        out.write_all(rendered.as_bytes())
            .and_then(|()| out.flush())
            .context("write event")
    }
}

impl<W: Write> EventSink for ConsoleEventSink<W> {
    fn emit(&self, event: &Event) {
        if let Err(err) = self.write_event(event) {
            warn!(err = %err, event_type = %event.event_type, "failed to print event");
        }
    }
}

fn render_human(event: &Event) -> Result<String> {
    let flag = if event.blocking {
        "blocking"
    } else {
        "non-blocking"
    };
    let mut buf = format!(
        "[{}] ({flag}) {}\n",
        event.event_type.as_str().to_uppercase(),
        event.one_line_summary
    );
    if !event.payload.is_empty() {
        let payload = serde_json::to_string_pretty(&event.payload).context("render payload")?;
        for line in payload.lines() {
            buf.push_str("    ");
            buf.push_str(line);
            buf.push('\n');
        }
    }
    Ok(buf)
}
