//! Output formatting module for provisor
//!
//! Human output is colored unless `--no-color` or `NO_COLOR` is set; JSON
//! output prints one object per event and the run summary at the end.

use colored::Colorize;
use std::time::{Duration, Instant};

use provisor::callback::ExecutionCallback;
use provisor::executor::task::{SkipReason, TaskRecord, TaskState};
use provisor::executor::{HostSummary, RunSummary};

/// Output formatter for different output modes
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a play header
    pub fn play_header(&self, play_name: &str) {
        if self.json_mode {
            return;
        }

        let header = format!("PLAY [{}]", play_name);
        let stars = "*".repeat(80_usize.saturating_sub(header.len()));

        if self.use_color {
            println!(
                "\n{} {}",
                header.bright_white().bold(),
                stars.bright_black()
            );
        } else {
            println!("\n{} {}", header, stars);
        }
    }

    /// One line per finished task
    pub fn task_line(&self, host: &str, record: &TaskRecord) {
        if self.json_mode {
            let line = serde_json::json!({
                "type": "task",
                "host": host,
                "task": record.task,
                "state": record.state,
                "changed": record.changed,
                "ignored": record.ignored,
                "msg": record.msg,
            });
            println!("{}", line);
            return;
        }

        let label = match &record.state {
            TaskState::Succeeded if record.changed => "changed",
            TaskState::Succeeded => "ok",
            TaskState::Failed(_) if record.ignored => "ignored",
            TaskState::Failed(_) => "failed",
            TaskState::Skipped(SkipReason::AlreadySatisfied) => "ok",
            TaskState::Skipped(_) => "skipping",
            _ => "pending",
        };

        let status = if self.use_color {
            match label {
                "changed" => label.yellow().to_string(),
                "ok" => label.green().to_string(),
                "failed" => label.red().bold().to_string(),
                "ignored" => label.blue().to_string(),
                _ => label.cyan().to_string(),
            }
        } else {
            label.to_string()
        };
        let host_str = if self.use_color {
            host.bright_white().bold().to_string()
        } else {
            host.to_string()
        };

        let mut line = format!("{}: [{}] {} => {}", status, host_str, record.task, record.state);
        if self.verbosity >= 2 {
            if let Some(msg) = &record.msg {
                line.push_str(&format!(" ({})", msg));
            }
        }
        println!("{}", line);
    }

    /// Per-host status lines followed by the overall result
    pub fn summary(&self, summary: &RunSummary) {
        if self.json_mode {
            match serde_json::to_string_pretty(summary) {
                Ok(json) => println!("{}", json),
                Err(e) => self.error(&format!("failed to serialize summary: {}", e)),
            }
            return;
        }

        let header = "RUN SUMMARY";
        let stars = "*".repeat(80 - header.len());
        if self.use_color {
            println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
        } else {
            println!("\n{} {}", header, stars);
        }

        for host in summary.hosts.values() {
            self.host_status(host);
        }

        let duration_str = format_duration(self.start_time.elapsed());
        if self.use_color {
            println!(
                "\n{} {}",
                "Run took".bright_black(),
                duration_str.bright_white()
            );
            if summary.success() {
                println!("{}", "All hosts succeeded.".green().bold());
            } else {
                println!("{}", "Run failed.".red().bold());
            }
        } else {
            println!("\nRun took {}", duration_str);
            if summary.success() {
                println!("All hosts succeeded.");
            } else {
                println!("Run failed.");
            }
        }
    }

    fn host_status(&self, host: &HostSummary) {
        let status = host.status_line();
        if self.use_color {
            let status = if host.is_failed() {
                status.red().bold()
            } else {
                status.green()
            };
            println!("{:<30} : {}", host.host.bright_white(), status);
        } else {
            println!("{:<30} : {}", host.host, status);
        }
        if let Some(skipped) = host.skipped_line() {
            println!("{:<30}   {}", "", skipped);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            let err = serde_json::json!({
                "type": "error",
                "message": message
            });
            eprintln!("{}", err);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            let warn = serde_json::json!({
                "type": "warning",
                "message": message
            });
            eprintln!("{}", warn);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.json_mode || self.verbosity < 1 {
            return;
        }
        if self.use_color {
            println!("{}", message.bright_black());
        } else {
            println!("{}", message);
        }
    }

    /// Print a plain line regardless of verbosity
    pub fn line(&self, message: &str) {
        if !self.json_mode {
            println!("{}", message);
        }
    }
}

impl ExecutionCallback for OutputFormatter {
    fn on_play_start(&self, play: &str, _hosts: &[String]) {
        self.play_header(play);
    }

    fn on_task_complete(&self, host: &str, record: &TaskRecord) {
        if self.verbosity >= 1 || self.json_mode || record.is_failed() {
            self.task_line(host, record);
        }
    }
}

/// Format a duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
