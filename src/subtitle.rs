//! Time-aligned subtitle cues for a spoken reply.
//!
//! Text is cut into units at whitespace and punctuation. Each unit receives a
//! share of the total duration proportional to its character count,
//! punctuation included, so a pause mark lengthens the window before it.

use crate::config::SubtitleConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One visible subtitle line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl SubtitleCue {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone)]
pub struct SubtitleAllocator {
    punctuation: HashSet<char>,
    seconds_per_char: f64,
}

impl Default for SubtitleAllocator {
    fn default() -> Self {
        Self::new(
            crate::defaults::SUBTITLE_PUNCTUATION,
            crate::defaults::SECONDS_PER_CHAR,
        )
    }
}

impl SubtitleAllocator {
    pub fn new(punctuation: &str, seconds_per_char: f64) -> Self {
        Self {
            punctuation: punctuation.chars().collect(),
            seconds_per_char,
        }
    }

    pub fn from_config(config: &SubtitleConfig) -> Self {
        Self::new(&config.punctuation, config.seconds_per_char)
    }

    fn is_break(&self, ch: char) -> bool {
        ch.is_whitespace() || self.punctuation.contains(&ch)
    }

    /// Split `text` into `(display, timed_len)` units.
    fn units(&self, text: &str) -> Vec<(String, usize)> {
        let mut units = Vec::new();
        let mut display = String::new();
        let mut timed = 0usize;

        for ch in text.chars() {
            timed += 1;
            if self.is_break(ch) {
                units.push((display.trim().to_string(), timed));
                display.clear();
                timed = 0;
            } else {
                display.push(ch);
            }
        }
        if timed > 0 {
            units.push((display.trim().to_string(), timed));
        }
        units
    }

    /// Allocate cues over `total_duration` seconds.
    ///
    /// An unknown or non-positive duration is replaced by a per-character
    /// estimate. Units that are pure punctuation still consume time but yield
    /// no cue. The last unit always ends exactly at the total, so the last
    /// cue ends early when the text trails off in punctuation.
    pub fn allocate(&self, text: &str, total_duration: Option<f64>) -> Vec<SubtitleCue> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let total = match total_duration {
            Some(d) if d > 0.0 && d.is_finite() => d,
            _ => self.seconds_per_char * text.chars().count() as f64,
        };

        let units = self.units(text);
        let weight_sum: usize = units.iter().map(|(_, t)| (*t).max(1)).sum();
        let weight_sum = weight_sum.max(1) as f64;

        let mut cues = Vec::new();
        let mut cursor = 0.0;
        let last = units.len().saturating_sub(1);
        for (i, (display, timed)) in units.into_iter().enumerate() {
            let start = cursor;
            let end = if i == last {
                total
            } else {
                (start + total * (timed.max(1) as f64) / weight_sum).min(total)
            };
            if !display.is_empty() {
                cues.push(SubtitleCue {
                    text: display,
                    start_time: round_ms(start),
                    end_time: round_ms(end),
                });
            }
            cursor = end;
        }
        cues
    }

    /// Fallback duration for text whose audio length is unknown.
    pub fn estimate(&self, text: &str) -> f64 {
        self.seconds_per_char * text.trim().chars().count() as f64
    }

    /// Allocate cues over consecutive spans of text, each with its own
    /// duration, laid end to end on one timeline.
    pub fn allocate_spans(&self, spans: &[(&str, Option<f64>)]) -> Vec<SubtitleCue> {
        let mut cues = Vec::new();
        let mut offset = 0.0;
        for (text, duration) in spans {
            let duration = match duration {
                Some(d) if *d > 0.0 && d.is_finite() => *d,
                _ => self.estimate(text),
            };
            cues.extend(self.allocate(text, Some(duration)).into_iter().map(|cue| {
                SubtitleCue {
                    text: cue.text,
                    start_time: round_ms(cue.start_time + offset),
                    end_time: round_ms(cue.end_time + offset),
                }
            }));
            offset += duration;
        }
        cues
    }
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
