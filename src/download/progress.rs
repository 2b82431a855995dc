//! Collapsing progress display for download backend output
//!
//! aria2c reports progress as `[#<gid> ...]` lines and finishes with a
//! `[COMPLETED]` marker. Progress lines are drawn over each other on a single
//! transient status line; everything else is printed normally.

use futures::{Stream, StreamExt};
use std::io::{self, Write};

/// Prefix of an updating progress line
pub const PROGRESS_MARKER: &str = "[#";
/// Prefix of the backend's completion line
pub const COMPLETED_MARKER: &str = "[COMPLETED]";

const STATUS_WIDTH: usize = 100;
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";

/// How a backend output line is displayed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineClass {
    /// Transient, self-overwriting status
    Progress,
    /// Closes the transient status line
    Completed,
    /// Printed as a regular line
    Other,
}

/// Classify one line of backend output
pub fn classify(line: &str) -> LineClass {
    if line.starts_with(PROGRESS_MARKER) {
        LineClass::Progress
    } else if line.starts_with(COMPLETED_MARKER) {
        LineClass::Completed
    } else {
        LineClass::Other
    }
}

/// Renders classified backend output to a terminal writer
///
/// The cursor is hidden while draining and restored afterwards, including when
/// the renderer is dropped mid-stream.
pub struct ProgressRenderer<W: Write> {
    out: W,
    status_shown: bool,
    status_width: usize,
    cursor_hidden: bool,
}

impl<W: Write> ProgressRenderer<W> {
    /// Create a renderer writing to `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            status_shown: false,
            status_width: 0,
            cursor_hidden: false,
        }
    }

    /// Borrow the underlying writer
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Render one line and report how it was classified
    pub fn render_line(&mut self, line: &str) -> io::Result<LineClass> {
        let class = classify(line);
        match class {
            LineClass::Progress => {
                let text = format!("Download progress {}", line.trim_end());
                write!(self.out, "\r{:width$}\r{}", "", text, width = self.wipe_width())?;
                self.status_shown = true;
                self.status_width = text.chars().count();
            }
            LineClass::Completed => {
                if self.status_shown {
                    writeln!(self.out)?;
                    self.status_shown = false;
                    self.status_width = 0;
                }
            }
            LineClass::Other => {
                let text = line.trim();
                if !text.is_empty() {
                    if self.status_shown {
                        // Wipe the transient line so no stale status survives.
                        write!(self.out, "\r{:width$}\r", "", width = self.wipe_width())?;
                        self.status_shown = false;
                        self.status_width = 0;
                    }
                    writeln!(self.out, "{text}")?;
                }
            }
        }
        self.out.flush()?;
        Ok(class)
    }

    /// Render every line of `lines` until the stream ends
    ///
    /// Returns the number of lines consumed. The cursor is restored even when
    /// rendering fails part-way.
    pub async fn drain<S>(&mut self, mut lines: S) -> io::Result<usize>
    where
        S: Stream<Item = String> + Unpin,
    {
        self.hide_cursor()?;

        let rendered = async {
            let mut count = 0;
            while let Some(line) = lines.next().await {
                self.render_line(&line)?;
                count += 1;
            }
            Ok::<_, io::Error>(count)
        }
        .await;

        let restored = self.show_cursor();
        let count = rendered?;
        restored?;
        Ok(count)
    }

    /// Spaces needed to cover whatever status is currently drawn
    fn wipe_width(&self) -> usize {
        STATUS_WIDTH.max(self.status_width)
    }

    fn hide_cursor(&mut self) -> io::Result<()> {
        write!(self.out, "{HIDE_CURSOR}")?;
        self.cursor_hidden = true;
        self.out.flush()
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        if !self.cursor_hidden {
            return Ok(());
        }
        self.cursor_hidden = false;
        write!(self.out, "{SHOW_CURSOR}")?;
        self.out.flush()
    }
}

impl<W: Write> Drop for ProgressRenderer<W> {
    fn drop(&mut self) {
        let _ = self.show_cursor();
    }
}
