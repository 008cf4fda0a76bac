//! Live table of suite status.
//!
//! A background task redraws the table on a fixed interval from snapshots
//! of the [`StatusTable`]. It never writes to a row, so it needs no
//! coordination with the suites beyond the row locks taken while copying.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::status::{Phase, StatusTable, TestStatus};

const MAX_NAME_WIDTH: usize = 40;
const MAX_LOG_WIDTH: usize = 80;

/// The icon shown in front of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Pending,
    Warning,
    Active,
    Skipped,
    Success,
    Failure,
}

impl Icon {
    /// Plain symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Icon::Pending => "…",
            Icon::Warning => "!",
            Icon::Active => "▶",
            Icon::Skipped => "-",
            Icon::Success => "✓",
            Icon::Failure => "✗",
        }
    }

    fn styled(self) -> console::StyledObject<&'static str> {
        let s = console::style(self.symbol());
        match self {
            Icon::Pending => s.dim(),
            Icon::Warning => s.yellow().bold(),
            Icon::Active => s.cyan(),
            Icon::Skipped => s.yellow(),
            Icon::Success => s.green(),
            Icon::Failure => s.red().bold(),
        }
    }
}

/// Picks the icon for a row.
///
/// Priority: pending, then active with warnings, active, skipped, success,
/// and failure when nothing else applies.
pub fn status_icon(status: &TestStatus) -> Icon {
    if status.phase == Phase::Pending {
        Icon::Pending
    } else if status.active && status.warnings {
        Icon::Warning
    } else if status.active {
        Icon::Active
    } else if status.skipped {
        Icon::Skipped
    } else if status.success {
        Icon::Success
    } else {
        Icon::Failure
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Renders one row of the table.
pub fn format_row(status: &TestStatus, name_width: usize) -> String {
    let elapsed = status
        .elapsed()
        .map(|d| format!("{:>6.1}s", d.as_secs_f64()))
        .unwrap_or_else(|| " ".repeat(7));

    let c = &status.counts;
    let counts = if status.phase == Phase::Pending {
        String::new()
    } else {
        format!(
            "P:{} R:{} D:{} F:{} E:{} O:{}",
            c.providers, c.resources, c.data_sources, c.functions, c.ephemeral_functions, c.outputs
        )
    };

    format!(
        "{} {:<name_width$} {:<10} {} {:<29} {}",
        status_icon(status).styled(),
        truncate(&status.name, name_width),
        status.phase.label(),
        elapsed,
        counts,
        console::style(truncate(&status.last_log, MAX_LOG_WIDTH)).dim(),
        name_width = name_width,
    )
}

/// Draws the status table through `indicatif`.
pub struct StatusDisplay {
    table: Arc<StatusTable>,
    refresh: Duration,
    multi: MultiProgress,
    bars: Vec<(String, ProgressBar)>,
}

impl StatusDisplay {
    /// Creates a display over `table`. A disabled display renders into a
    /// hidden target.
    pub fn new(table: Arc<StatusTable>, refresh: Duration, enabled: bool) -> Self {
        let target = if enabled {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            table,
            refresh,
            multi: MultiProgress::with_draw_target(target),
            bars: Vec::new(),
        }
    }

    /// Starts redrawing in the background.
    pub fn spawn(mut self) -> DisplayHandle {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.refresh);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => self.render(),
                }
            }
            self.render();
            self.finish();
        });
        DisplayHandle { stop, join }
    }

    /// Redraws every row from a fresh snapshot.
    pub fn render(&mut self) {
        let rows = self.table.snapshot();
        let same_rows = rows.len() == self.bars.len()
            && rows.iter().zip(&self.bars).all(|(row, (name, _))| &row.name == name);
        if !same_rows {
            self.rebuild(&rows);
        }

        let width = rows
            .iter()
            .map(|r| r.name.chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_NAME_WIDTH);
        for (row, (_, bar)) in rows.iter().zip(&self.bars) {
            bar.set_message(format_row(row, width));
        }
    }

    fn rebuild(&mut self, rows: &[TestStatus]) {
        for (_, bar) in self.bars.drain(..) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        let style = ProgressStyle::with_template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        for row in rows {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            self.bars.push((row.name.clone(), bar));
        }
    }

    fn finish(&mut self) {
        for (_, bar) in &self.bars {
            bar.finish();
        }
    }

    /// Number of rows currently drawn.
    pub fn row_count(&self) -> usize {
        self.bars.len()
    }
}

/// Handle to a running display task.
pub struct DisplayHandle {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl DisplayHandle {
    /// Stops redrawing after one final frame.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.join.await {
            tracing::debug!("Status display task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{PREPARE_ROW, lock};

    fn status(phase_path: &[Phase]) -> TestStatus {
        let mut s = TestStatus::new("suite");
        for phase in phase_path {
            s.transition(*phase).unwrap();
        }
        s
    }

    #[test]
    fn test_icon_priority() {
        assert_eq!(status_icon(&status(&[])), Icon::Pending);

        let mut active = status(&[Phase::Cleaning, Phase::Init]);
        assert_eq!(status_icon(&active), Icon::Active);
        active.warnings = true;
        assert_eq!(status_icon(&active), Icon::Warning);

        assert_eq!(status_icon(&status(&[Phase::Skipped])), Icon::Skipped);

        let pass = [
            Phase::Cleaning,
            Phase::Init,
            Phase::Applying,
            Phase::Analyzing,
            Phase::Destroying,
            Phase::Pass,
        ];
        let mut passed = status(&pass);
        passed.warnings = true;
        assert_eq!(status_icon(&passed), Icon::Success);

        assert_eq!(
            status_icon(&status(&[Phase::Cleaning, Phase::Init, Phase::Fail])),
            Icon::Failure
        );
        assert_eq!(status_icon(&status(&[Phase::Error])), Icon::Failure);
    }

    #[test]
    fn test_format_row() {
        let mut s = status(&[Phase::Cleaning, Phase::Init, Phase::Applying]);
        s.counts.resources = 3;
        s.last_log = "Creating aws_vpc.main".to_string();
        let row = format_row(&s, 10);
        assert!(row.contains("suite"));
        assert!(row.contains("APPLYING"));
        assert!(row.contains("R:3"));
        assert!(row.contains("Creating aws_vpc.main"));

        let pending = format_row(&status(&[]), 10);
        assert!(pending.contains("PENDING"));
        assert!(!pending.contains("R:0"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_render_follows_row_set() {
        let table = Arc::new(StatusTable::new());
        table.insert("b");
        table.insert("a");
        let mut display = StatusDisplay::new(table.clone(), Duration::from_millis(10), false);

        display.render();
        assert_eq!(display.row_count(), 2);

        let prep = table.insert(PREPARE_ROW);
        lock(&prep).last_log = "Caching 2 dependencies".to_string();
        display.render();
        assert_eq!(display.row_count(), 3);
        assert_eq!(display.bars[0].0, PREPARE_ROW);

        table.remove(PREPARE_ROW);
        display.render();
        assert_eq!(display.row_count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let table = Arc::new(StatusTable::new());
        table.insert("a");
        let handle = StatusDisplay::new(table, Duration::from_millis(5), false).spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;
    }
}
