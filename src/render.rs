use std::io::{self, Write};
use std::time::Duration;
use crossterm::cursor::MoveUp;
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use tokio::time::Instant;
use swiftdrop::utils::{format_bytes, format_eta, format_file_size, format_speed};
use swiftdrop::{UploadState, UploadTask};

const MIN_REDRAW_INTERVAL: Duration = Duration::from_millis(100);
const NAME_WIDTH: usize = 32;

/// Redraws the task table in place.
pub struct Renderer {
    lines_drawn: u16,
    last_draw: Option<Instant>,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            lines_drawn: 0,
            last_draw: None,
        }
    }

    /// Progress-only redraws are throttled; `force` bypasses that.
    pub fn draw(&mut self, tasks: &[UploadTask], force: bool) -> io::Result<()> {
        let now = Instant::now();
        if !force && self.last_draw.is_some_and(|last| now.duration_since(last) < MIN_REDRAW_INTERVAL) {
            return Ok(());
        }

        let mut stdout = io::stdout().lock();
        if self.lines_drawn > 0 {
            queue!(stdout, MoveUp(self.lines_drawn), Clear(ClearType::FromCursorDown))?;
        }

        for task in tasks {
            writeln!(stdout, "{}", task_line(task))?;
        }
        stdout.flush()?;

        self.lines_drawn = tasks.len().min(u16::MAX as usize) as u16;
        self.last_draw = Some(now);
        Ok(())
    }
}

fn task_line(task: &UploadTask) -> String {
    let name = truncate(&task.name, NAME_WIDTH);
    let size = format_file_size(task.size);

    match task.state {
        UploadState::Pending => format!("{:<width$} {:>10}  pending", name, size, width = NAME_WIDTH),
        UploadState::Uploading => format!(
            "{:<width$} {:>10}  {:>3}%  {} @ {}  eta {}",
            name,
            size,
            task.progress,
            format_bytes(task.uploaded_bytes),
            format_speed(task.speed),
            format_eta(task.eta_seconds),
            width = NAME_WIDTH
        ),
        UploadState::Completed => format!(
            "{:<width$} {:>10}  done  {}",
            name,
            size,
            task.result_location.as_deref().unwrap_or_default(),
            width = NAME_WIDTH
        ),
        UploadState::Error | UploadState::Cancelled => format!(
            "{:<width$} {:>10}  {}  {}",
            name,
            size,
            task.state,
            task.error.as_deref().unwrap_or_default(),
            width = NAME_WIDTH
        ),
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        return name.to_string();
    }

    let mut truncated: String = name.chars().take(width.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
