//! CLI output formatting utilities.

use crate::pipeline::ProcessingStatus;
use crate::qa::{format_timestamp, Citation};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one episode with its pipeline status.
    pub fn episode(id: i64, title: &str, status: ProcessingStatus, duration_seconds: Option<u32>) {
        let status_text = format!("{:<12}", status.as_str());
        let status_styled = match status {
            ProcessingStatus::Indexed => style(status_text).green(),
            ProcessingStatus::Failed => style(status_text).red(),
            _ => style(status_text).yellow(),
        };
        let duration = duration_seconds
            .map(|d| format!(" ({})", format_duration(d)))
            .unwrap_or_default();
        println!(
            "  {} {} {}{}",
            style(format!("#{:<5}", id)).dim(),
            status_styled,
            style(title).bold(),
            style(duration).dim()
        );
    }

    /// Print a citation under an answer.
    pub fn citation(citation: &Citation) {
        println!(
            "\n{} {} @ {} - {}",
            style(">>").green(),
            style(&citation.episode_title).bold(),
            style(format_timestamp(citation.start_ms)).cyan(),
            style(format_timestamp(citation.end_ms)).cyan(),
        );
        if let Some(speakers) = &citation.speaker_labels {
            println!("   {}", style(speakers).dim());
        }
        println!("   {}", content_preview(&citation.text_snippet, 200));
        println!("   {}", style(&citation.listen_link).dim());
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format duration in seconds to a human-readable string.
fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        format!("{}...", content.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_content_preview_counts_characters() {
        assert_eq!(content_preview("line\nbreak", 20), "line break");
        assert_eq!(content_preview("ååååå", 3), "ååå...");
    }
}
