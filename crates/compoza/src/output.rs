//! Terminal output utilities

use compoza_image::{CheckStatus, ImageUpdateInfo, VersionStatus};
use compoza_tasks::{Task, TaskEvent, TaskId, TaskStatus};
use console::style;
use std::collections::HashMap;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast::{self, error::RecvError};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

#[derive(Tabled)]
struct UpdateRow {
    image: String,
    status: String,
    current: String,
    latest: String,
    #[tabled(rename = "update")]
    update_available: String,
    #[tabled(rename = "checked")]
    checked_at: String,
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn version_cell(version: Option<&str>, digest: Option<&str>, status: VersionStatus) -> String {
    match (version, status) {
        (Some(v), _) => v.to_string(),
        (None, VersionStatus::Pending) => "resolving...".to_string(),
        (None, _) => or_dash(digest.map(short_digest)),
    }
}

fn short_digest(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    match hex.char_indices().nth(12) {
        Some((end, _)) => &hex[..end],
        None => hex,
    }
}

fn status_cell(info: &ImageUpdateInfo) -> String {
    let label = match info.update.status {
        CheckStatus::Checked => "checked",
        CheckStatus::Unknown if info.update.rate_limited => "rate limited",
        CheckStatus::Unknown => "unknown",
        CheckStatus::Error => "error",
    };
    if info.from_cache {
        format!("{} (cached)", label)
    } else {
        label.to_string()
    }
}

/// Render check results as a table
pub fn update_table(results: &[ImageUpdateInfo]) {
    let mut sorted: Vec<&ImageUpdateInfo> = results.iter().collect();
    sorted.sort_by(|a, b| a.update.image.cmp(&b.update.image));

    let rows: Vec<UpdateRow> = sorted
        .into_iter()
        .map(|info| {
            let u = &info.update;
            UpdateRow {
                image: u.image.clone(),
                status: status_cell(info),
                current: version_cell(
                    u.current_version.as_deref(),
                    u.current_digest.as_deref(),
                    u.version_status,
                ),
                latest: version_cell(
                    u.latest_version.as_deref(),
                    u.latest_digest.as_deref(),
                    u.version_status,
                ),
                update_available: if u.update_available {
                    style("yes").green().bold().to_string()
                } else {
                    "no".to_string()
                },
                checked_at: u.checked_at.format("%H:%M:%S").to_string(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}

/// Echo task output and disconnects as they happen
pub async fn follow_tasks(mut events: broadcast::Receiver<TaskEvent>) {
    let mut printed: HashMap<TaskId, usize> = HashMap::new();
    let mut announced: HashMap<TaskId, TaskStatus> = HashMap::new();

    loop {
        let task = match events.recv().await {
            Ok(TaskEvent::Added(task)) | Ok(TaskEvent::Updated(task)) => task,
            Ok(TaskEvent::Removed(_)) => continue,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        print_new_output(&task, &mut printed);

        if announced.get(&task.id) != Some(&task.status) {
            announced.insert(task.id, task.status);
            if task.status == TaskStatus::Disconnected {
                warning(&format!("{}: connection lost, waiting for the server", task.label));
            }
        }
    }
}

fn print_new_output(task: &Task, printed: &mut HashMap<TaskId, usize>) {
    let seen = printed.entry(task.id).or_default();
    for line in task.output.iter().skip(*seen) {
        println!("  {} {}", style(format!("[{}]", task.label)).dim(), line);
    }
    *seen = task.output.len();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest() {
        assert_eq!(
            short_digest("sha256:0123456789abcdef0123"),
            "0123456789ab"
        );
        assert_eq!(short_digest("abc"), "abc");
    }

    #[test]
    fn test_short_digest_multibyte() {
        assert_eq!(short_digest("sha256:ééééééééééééé"), "éééééééééééé");
        assert_eq!(short_digest("0123456789aé"), "0123456789aé");
    }

    #[test]
    fn test_version_cell() {
        assert_eq!(
            version_cell(Some("1.27.0"), Some("sha256:aaa"), VersionStatus::Resolved),
            "1.27.0"
        );
        assert_eq!(
            version_cell(None, Some("sha256:aaa"), VersionStatus::Pending),
            "resolving..."
        );
        assert_eq!(
            version_cell(None, Some("sha256:abcdef0123456789"), VersionStatus::Failed),
            "abcdef012345"
        );
        assert_eq!(version_cell(None, None, VersionStatus::Resolved), "-");
    }
}
