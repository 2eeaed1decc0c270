//! Spinner for long-running network operations.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while probing or punching
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    /// Start a spinner with `msg`
    #[must_use]
    pub fn new(msg: &str) -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Remove the spinner from the terminal
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }

    /// Abandon the spinner, leaving a message (for errors)
    pub fn abandon_with_message(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Format a round-trip time
#[must_use]
pub fn format_rtt(rtt: Duration) -> String {
    let ms = rtt.as_secs_f64() * 1000.0;
    if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", ms / 1000.0)
    }
}

/// Format a probability as a percentage
#[must_use]
pub fn format_probability(probability: Option<f64>) -> String {
    match probability {
        Some(p) => format!("{:.0}%", p * 100.0),
        None => "unspecified".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(Duration::from_micros(12_340)), "12.3 ms");
        assert_eq!(format_rtt(Duration::from_millis(999)), "999.0 ms");
        assert_eq!(format_rtt(Duration::from_millis(1500)), "1.50 s");
    }

    #[test]
    fn test_format_probability() {
        assert_eq!(format_probability(Some(0.95)), "95%");
        assert_eq!(format_probability(Some(0.1)), "10%");
        assert_eq!(format_probability(None), "unspecified");
    }
}
