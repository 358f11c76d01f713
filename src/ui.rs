use chrono::Local;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use vision_clerk::{DetectionSnapshot, Prediction};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Show `message` (e.g. "Loading detection model...") until the guard drops.
    pub fn stage(&self, message: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(message.to_string());
            StageGuard::new(stage_name(message), Some(spinner))
        } else {
            eprintln!("==> {}", message);
            StageGuard::new(stage_name(message), None)
        }
    }
}

fn stage_name(message: &str) -> String {
    message.trim_end_matches('.').trim_end_matches('…').to_string()
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failure: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failure: None,
        }
    }

    /// End the stage with a failure message instead of a check mark.
    pub fn fail(mut self, message: &str) {
        self.failure = Some(message.to_string());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = match &self.failure {
            Some(failure) => format!("✘ {}", failure),
            None => format!("✔ {} ({})", self.name, format_duration(elapsed)),
        };
        match &self.spinner {
            Some(spinner) if self.failure.is_some() => spinner.abandon_with_message(message),
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// One line per prediction: `person (92.0%)`.
pub fn format_predictions(predictions: &[Prediction]) -> String {
    if predictions.is_empty() {
        return "Nothing detected.".to_string();
    }
    predictions
        .iter()
        .map(|p| format!("{} ({:.1}%)", p.class, p.score * 100.0))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per snapshot: local save time, then the comma-joined labels.
pub fn format_history(history: &[DetectionSnapshot]) -> String {
    if history.is_empty() {
        return "No history.".to_string();
    }
    history
        .iter()
        .map(|entry| {
            format!(
                "{}  {}",
                entry
                    .created_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S"),
                entry.objects.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn predictions_print_with_one_decimal() {
        let preds = vec![
            Prediction::new("person", 0.92, [10.0, 10.0, 100.0, 200.0]),
            Prediction::new("cup", 0.5, [0.0, 0.0, 4.0, 4.0]),
        ];
        assert_eq!(format_predictions(&preds), "person (92.0%)\ncup (50.0%)");
        assert_eq!(format_predictions(&[]), "Nothing detected.");
    }

    #[test]
    fn history_lists_labels_comma_joined() {
        let entry = DetectionSnapshot {
            id: "1".to_string(),
            objects: vec!["person".to_string(), "cup".to_string()],
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let text = format_history(&[entry]);
        assert!(text.ends_with("  person, cup"), "{text}");
        assert_eq!(format_history(&[]), "No history.");
    }

    #[test]
    fn stage_names_drop_trailing_ellipsis() {
        assert_eq!(stage_name("Loading detection model..."), "Loading detection model");
    }
}
