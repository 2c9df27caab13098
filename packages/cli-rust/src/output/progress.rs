//! Per-host progress lines
//!
//! Each host gets its own line under one [`MultiProgress`]: a spinner with
//! the host name while its pass runs, then a mark and a short verdict. A
//! hidden group draws nothing, for `--quiet` and for passes that prompt.

use anyhow::Result;
use hostkeep_core::NodeReport;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

/// Progress lines for a batch of hosts
pub struct HostProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    hidden: bool,
}

impl HostProgress {
    /// Host names are padded to the longest of `hostnames` so verdicts line up
    pub fn new<'a>(hostnames: impl IntoIterator<Item = &'a str>, hidden: bool) -> Self {
        let width = hostnames.into_iter().map(str::len).max().unwrap_or(0);
        let template =
            format!("{{spinner:.green}} {{prefix:<{width}.cyan.bold}}  {{msg}} {{elapsed:.dim}}");
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            style,
            hidden,
        }
    }

    /// Start the line for `hostname`
    pub fn host(&self, hostname: &str, message: &str) -> HostLine {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(self.style.clone());
        bar.set_prefix(hostname.to_string());
        bar.set_message(message.to_string());
        if !self.hidden {
            bar.enable_steady_tick(TICK);
        }
        HostLine { bar }
    }
}

/// One host's line; `Send`, so it can move into that host's task
pub struct HostLine {
    bar: ProgressBar,
}

impl HostLine {
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn success(self, message: &str) {
        self.bar
            .finish_with_message(format!("{} {message}", console::style("✓").green()));
    }

    pub fn fail(self, message: &str) {
        self.bar
            .finish_with_message(format!("{} {message}", console::style("✗").red()));
    }

    /// Close the line with the verdict of a host pass
    pub fn finish(self, result: &Result<NodeReport>) {
        match verdict(result) {
            (true, message) => self.success(&message),
            (false, message) => self.fail(&message),
        }
    }
}

fn verdict(result: &Result<NodeReport>) -> (bool, String) {
    match result {
        Ok(report) if report.is_success() => match report.applied() {
            0 => (true, "already provisioned".to_string()),
            n => (true, format!("provisioned, {n} changed")),
        },
        Ok(NodeReport {
            aborted: Some(reason),
            ..
        }) => (false, format!("stopped: {reason}")),
        Ok(report) => (
            false,
            format!("{} step(s) failed", report.failed().count()),
        ),
        Err(_) => (false, "could not start".to_string()),
    }
}
