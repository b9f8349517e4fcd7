//! Terminal progress view for a running download.
//!
//! The UI never drives the engine; it polls the shared byte counter and
//! phase cell at its own cadence and receives the final result over a
//! channel. Interactive terminals get a ratatui view; everything else
//! falls back to plain periodic status lines.

use std::io::IsTerminal;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use downpour::{
    CancelFlag, DownloadPhase, DownloadReport, DownloadResult, PhaseCell, ProgressCounter,
};
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

/// How often the view samples the byte counter.
const TICK_RATE: Duration = Duration::from_millis(500);

/// Characters used for the manual progress bar.
const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Everything the view needs to observe a download.
pub struct UiContext {
    pub filename: String,
    pub total_size: u64,
    pub parallel: bool,
    pub progress: Arc<ProgressCounter>,
    pub phase: Arc<PhaseCell>,
    pub cancel: CancelFlag,
    pub checksum_algo: Option<String>,
}

/// Run the progress view until the download finishes (or the user cancels
/// and the engine confirms). Returns the download's result.
pub fn run(
    ctx: UiContext,
    results: Receiver<DownloadResult<DownloadReport>>,
) -> DownloadResult<DownloadReport> {
    if std::io::stdout().is_terminal() {
        run_tui(ctx, results)
    } else {
        run_headless(ctx, results)
    }
}

fn run_tui(
    ctx: UiContext,
    results: Receiver<DownloadResult<DownloadReport>>,
) -> DownloadResult<DownloadReport> {
    let mut terminal = ratatui::init();

    let started = Instant::now();
    let mut last_tick = Instant::now();
    let mut last_sampled = 0u64;
    let mut speed = 0.0f64;
    let outcome;

    loop {
        // Keys: q / Esc cancels a running download
        if let Ok(true) = event::poll(Duration::from_millis(50)) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    ctx.cancel.cancel();
                }
            }
        }

        match results.try_recv() {
            Ok(result) => {
                outcome = result;
                break;
            }
            Err(TryRecvError::Disconnected) => {
                outcome = Err(downpour::DownloadError::Cancelled);
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        if last_tick.elapsed() >= TICK_RATE {
            let current = ctx.progress.bytes();
            let instant_speed =
                (current - last_sampled) as f64 / last_tick.elapsed().as_secs_f64();
            speed = if speed == 0.0 {
                instant_speed
            } else {
                0.7 * speed + 0.3 * instant_speed
            };
            last_sampled = current;
            last_tick = Instant::now();
        }

        let view = ViewState {
            ctx: &ctx,
            downloaded: ctx.progress.bytes(),
            speed,
            elapsed: started.elapsed(),
        };
        let _ = terminal.draw(|frame| draw(frame, &view));
    }

    ratatui::restore();
    outcome
}

fn run_headless(
    ctx: UiContext,
    results: Receiver<DownloadResult<DownloadReport>>,
) -> DownloadResult<DownloadReport> {
    println!("Downloading {}...", ctx.filename);

    let report_interval = Duration::from_secs(2);
    let mut last_report = Instant::now();

    loop {
        match results.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => return result,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                return Err(downpour::DownloadError::Cancelled);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
        }

        if last_report.elapsed() >= report_interval {
            let downloaded = ctx.progress.bytes();
            if ctx.total_size > 0 {
                println!(
                    "  {} / {} ({:.0}%)",
                    format_bytes(downloaded as f64),
                    format_bytes(ctx.total_size as f64),
                    downloaded as f64 / ctx.total_size as f64 * 100.0
                );
            } else {
                println!("  {}", format_bytes(downloaded as f64));
            }
            last_report = Instant::now();
        }
    }
}

struct ViewState<'a> {
    ctx: &'a UiContext,
    downloaded: u64,
    speed: f64,
    elapsed: Duration,
}

impl ViewState<'_> {
    fn status_line(&self) -> (String, Color) {
        match self.ctx.phase.get() {
            DownloadPhase::Downloading => {
                let mode = if self.ctx.parallel {
                    "parallel multi-worker"
                } else {
                    "streaming"
                };
                (format!("Downloading ({mode})"), Color::Cyan)
            }
            DownloadPhase::Verifying => {
                let algo = self.ctx.checksum_algo.as_deref().unwrap_or("checksum");
                (format!("Verifying {algo} checksum..."), Color::Yellow)
            }
            DownloadPhase::Complete => ("Download complete".to_string(), Color::Green),
            DownloadPhase::Failed => ("Download failed".to_string(), Color::Red),
        }
    }

    fn fraction(&self) -> f64 {
        if self.ctx.total_size == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.ctx.total_size as f64).min(1.0)
        }
    }

    fn eta(&self) -> Option<Duration> {
        if self.speed <= 0.0 || self.ctx.total_size == 0 {
            return None;
        }
        let remaining = self.ctx.total_size.saturating_sub(self.downloaded) as f64;
        Some(Duration::from_secs_f64(remaining / self.speed))
    }
}

fn draw(frame: &mut Frame, view: &ViewState) {
    let size = frame.area();
    let box_width = 62u16.min(size.width.saturating_sub(2));
    let box_height = 12u16.min(size.height);
    let area = Rect {
        x: (size.width.saturating_sub(box_width)) / 2,
        y: (size.height.saturating_sub(box_height)) / 2,
        width: box_width,
        height: box_height,
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Span::styled(
            " Downpour ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ));
    frame.render_widget(block, area);

    let inner = Rect {
        x: area.x + 2,
        y: area.y + 1,
        width: area.width.saturating_sub(4),
        height: area.height.saturating_sub(2),
    };

    let (status, status_color) = view.status_line();
    let mut lines = vec![
        Line::from(Span::styled(
            status,
            Style::default()
                .fg(status_color)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("File: ", Style::default().fg(Color::DarkGray)),
            Span::styled(view.ctx.filename.clone(), Style::default().fg(Color::White)),
        ]),
        Line::from(""),
    ];

    // Progress bar with trailing percentage
    let bar_width = inner.width.saturating_sub(8) as usize;
    let filled = (view.fraction() * bar_width as f64) as usize;
    let empty = bar_width.saturating_sub(filled);
    lines.push(Line::from(vec![
        Span::styled(
            format!(
                "[{}{}]",
                BAR_FULL.to_string().repeat(filled),
                BAR_EMPTY.to_string().repeat(empty)
            ),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(
            format!(" {:>3.0}%", view.fraction() * 100.0),
            Style::default().fg(Color::White),
        ),
    ]));
    lines.push(Line::from(""));

    let eta = view
        .eta()
        .map(format_duration)
        .unwrap_or_else(|| "--:--".to_string());
    lines.push(Line::from(vec![
        Span::styled("Speed: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format_speed(view.speed), Style::default().fg(Color::White)),
        Span::styled("  ETA: ", Style::default().fg(Color::DarkGray)),
        Span::styled(eta, Style::default().fg(Color::White)),
        Span::styled("  Elapsed: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format_duration(view.elapsed),
            Style::default().fg(Color::White),
        ),
    ]));

    lines.push(Line::from(vec![
        Span::styled("Downloaded: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!(
                "{} / {}",
                format_bytes(view.downloaded as f64),
                format_bytes(view.ctx.total_size as f64)
            ),
            Style::default().fg(Color::White),
        ),
    ]));

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Press 'q' to cancel",
        Style::default().fg(Color::DarkGray),
    )));

    frame.render_widget(Paragraph::new(lines), inner);
}

/// Format a byte quantity with 1024-based K/M/G/T/P/E prefixes.
pub fn format_bytes(bytes: f64) -> String {
    const UNIT: f64 = 1024.0;
    const PREFIXES: [&str; 6] = ["K", "M", "G", "T", "P", "E"];

    if bytes < UNIT {
        return format!("{bytes:.0} B");
    }
    let exp = ((bytes.ln() / UNIT.ln()) as usize).min(PREFIXES.len());
    let scaled = bytes / UNIT.powi(exp as i32);
    format!("{:.2} {}B", scaled, PREFIXES[exp - 1])
}

/// Format a transfer rate.
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Format a duration as HH:MM:SS or MM:SS.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_small_values_stay_in_bytes() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1023.0), "1023 B");
    }

    #[test]
    fn test_format_bytes_scales_by_1024() {
        assert_eq!(format_bytes(1024.0), "1.00 KB");
        assert_eq!(format_bytes(1536.0), "1.50 KB");
        assert_eq!(format_bytes(1024.0 * 1024.0), "1.00 MB");
        assert_eq!(format_bytes(3.5 * 1024.0 * 1024.0 * 1024.0), "3.50 GB");
    }

    #[test]
    fn test_format_speed_appends_rate_suffix() {
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(59)), "00:59");
        assert_eq!(format_duration(Duration::from_secs(125)), "02:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
