//! Terminal output formatting

use autopilot_lib::{ExecutionResult, SchedulerStatus, TaskStats};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Runs")]
    executions: u64,
    #[tabled(rename = "Success")]
    success_rate: String,
    #[tabled(rename = "Failures")]
    failures: String,
    #[tabled(rename = "Avg")]
    avg_duration: String,
    #[tabled(rename = "Next Run")]
    next_run: String,
}

impl From<&TaskStats> for TaskRow {
    fn from(task: &TaskStats) -> Self {
        let state = if task.enabled { "enabled" } else { "disabled" };
        let interval = if task.adaptive {
            format!(
                "{} ({})",
                format_minutes(task.current_interval_minutes),
                format_minutes(task.declared_interval_minutes)
            )
        } else {
            format_minutes(task.declared_interval_minutes)
        };

        Self {
            name: task.name.clone(),
            state: color_status(state),
            interval,
            executions: task.executions,
            success_rate: task
                .success_rate
                .map(format_rate)
                .unwrap_or_else(|| "-".to_string()),
            failures: format!("{}/{}", task.failures, task.max_failures),
            avg_duration: format!("{:.2}s", task.avg_duration_secs),
            next_run: task
                .next_run_in_secs
                .map(format_seconds)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {e}")),
    }
}

pub fn print_status(status: &SchedulerStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table => {
            let state = if status.running { "running" } else { "stopped" };
            println!("Scheduler: {}", color_status(state));
            println!(
                "Tasks: {} total, {} enabled\n",
                status.total_tasks, status.enabled_tasks
            );

            if status.tasks.is_empty() {
                println!("{}", "No tasks registered".yellow());
                return;
            }
            let rows: Vec<TaskRow> = status.tasks.iter().map(TaskRow::from).collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
    }
}

pub fn print_result(result: &ExecutionResult, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(result);
        return;
    }

    match result {
        ExecutionResult::Completed {
            task,
            output,
            duration_secs,
        } => {
            print_success(&format!(
                "{} completed in {:.2}s: {}",
                task, duration_secs, output.summary
            ));
        }
        ExecutionResult::Failed {
            task,
            error,
            circuit_open,
            ..
        } => {
            print_error(&format!("{} failed: {}", task, error));
            if *circuit_open {
                print_warning(&format!("{} disabled after repeated failures", task));
            }
        }
        ExecutionResult::Skipped { task, reason } => {
            print_warning(&format!("{} skipped: {}", task, reason));
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "enabled" | "running" | "completed" => status.green().to_string(),
        "skipped" | "stopped" => status.yellow().to_string(),
        "disabled" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Format an interval given in minutes
pub fn format_minutes(minutes: f64) -> String {
    if minutes >= 120.0 {
        format!("{:.1}h", minutes / 60.0)
    } else if minutes >= 1.0 {
        format!("{:.1}m", minutes)
    } else {
        format!("{:.0}s", minutes * 60.0)
    }
}

pub fn format_seconds(secs: f64) -> String {
    format_minutes(secs / 60.0)
}

pub fn format_rate(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(0.5), "30s");
        assert_eq!(format_minutes(5.0), "5.0m");
        assert_eq!(format_minutes(1440.0), "24.0h");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.9), "90%");
        assert_eq!(format_rate(1.0), "100%");
    }

    #[test]
    fn test_color_status_unknown_passthrough() {
        assert_eq!(color_status("custom"), "custom");
    }
}
