//! Quality gate: decide whether a recording is worth an extraction call
//! using only cheap local signals. No AI involved — the whole point is to
//! keep trivial recordings (silence, media playback) away from the most
//! expensive stage.

use serde::Serialize;
use tracing::error;

use crate::source::Recording;
use crate::thresholds::MEMORIZE_THRESHOLD;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualityScore {
    pub score: f64,
    pub should_memorize: bool,
}

/// Words that signal decisions, commitments, or facts worth keeping.
const ACTION_KEYWORDS: &[&str] = &[
    "decide", "decision", "agreed", "plan", "deadline", "due", "schedule",
    "meeting", "review", "send", "email", "call", "remind", "task", "todo",
    "ship", "launch", "finish", "allerg", "birthday", "anniversary",
    "remember", "important",
];

/// Phrases that signal a commitment made out loud.
const COMMITMENT_PHRASES: &[&str] = &["i'll", "i will", "we'll", "we will", "let's", "let us"];

/// Score a recording 0-10 and decide whether it crosses the memorize gate.
///
/// Never fails: any internal error logs and falls open to
/// `should_memorize = true` — an extra AI call beats silently dropping a
/// recording.
pub fn score_recording(recording: &Recording) -> QualityScore {
    gate(compute_score(recording), &recording.id)
}

fn gate(computed: Result<f64, crate::error::MemoirError>, recording_id: &str) -> QualityScore {
    match computed {
        Ok(score) => QualityScore { score, should_memorize: score >= MEMORIZE_THRESHOLD },
        Err(e) => {
            error!(recording = %recording_id, error = %e, "quality scoring failed, failing open");
            QualityScore { score: MEMORIZE_THRESHOLD, should_memorize: true }
        }
    }
}

fn compute_score(recording: &Recording) -> Result<f64, crate::error::MemoirError> {
    let transcript = recording.transcript_text();
    let lower = transcript.to_lowercase();
    let summary_lower = recording.summary.to_lowercase();

    // Substance: how much was actually said.
    let length_signal = (transcript.chars().count() as f64 / 400.0).min(2.0);
    let segment_signal = (recording.transcript_segments.len() as f64 / 4.0).min(1.5);

    // Engagement: questions mean a conversation, not background noise.
    let questions = transcript.matches('?').count();
    let question_signal = (questions as f64 * 0.5).min(1.0);

    // Actionability: decision/action vocabulary in transcript or summary.
    let keyword_hits = ACTION_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k) || summary_lower.contains(*k))
        .count();
    let keyword_signal = (keyword_hits as f64).min(3.0);

    let commitment_hits = COMMITMENT_PHRASES.iter().filter(|p| lower.contains(*p)).count();
    let commitment_signal = (commitment_hits as f64 * 0.75).min(1.5);

    // Named entities, approximated: capitalized tokens not at sentence start.
    let entity_signal = (count_mid_sentence_capitals(&transcript) as f64 * 0.3).min(1.5);

    // A source-provided summary is itself a quality signal.
    let summary_signal = (recording.summary.chars().count() as f64 / 100.0).min(1.5);

    let score = length_signal
        + segment_signal
        + question_signal
        + keyword_signal
        + commitment_signal
        + entity_signal
        + summary_signal;
    Ok(score.clamp(0.0, 10.0))
}

fn count_mid_sentence_capitals(text: &str) -> usize {
    let mut count = 0;
    for line in text.lines() {
        for (i, word) in line.split_whitespace().enumerate() {
            if i == 0 {
                continue;
            }
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                if first.is_uppercase() && chars.any(|c| c.is_lowercase()) {
                    count += 1;
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TranscriptSegment;
    use chrono::Utc;

    fn recording(segments: Vec<(&str, &str)>, summary: &str) -> Recording {
        Recording {
            id: "q".into(),
            started_at: Utc::now(),
            title: String::new(),
            summary: summary.into(),
            transcript_segments: segments
                .into_iter()
                .map(|(id, text)| TranscriptSegment {
                    speaker_id: id.into(),
                    speaker_name: String::new(),
                    text: text.into(),
                })
                .collect(),
            is_processed: false,
        }
    }

    #[test]
    fn empty_recording_scores_low() {
        let q = score_recording(&recording(vec![], ""));
        assert!(q.score < 1.0);
        assert!(!q.should_memorize);
    }

    #[test]
    fn trivial_chatter_stays_below_gate() {
        let q = score_recording(&recording(vec![("a", "uh huh"), ("b", "yeah ok")], ""));
        assert!(!q.should_memorize, "score was {}", q.score);
    }

    #[test]
    fn substantive_meeting_crosses_gate() {
        let q = score_recording(&recording(
            vec![
                ("a", "We agreed the launch deadline is next Friday, so let's plan the rollout."),
                ("b", "I'll review the design doc and send notes to Priya before the meeting?"),
                ("a", "Good. Remember to schedule the follow-up call with Marcus."),
                ("b", "Will do, and I need to finish the task list today."),
            ],
            "Team sync covering launch planning, review assignments, and scheduling.",
        ));
        assert!(q.should_memorize, "score was {}", q.score);
        assert!(q.score <= 10.0);
    }

    #[test]
    fn deterministic_for_identical_content() {
        let rec = recording(
            vec![("a", "We decided to ship on Friday"), ("b", "I'll review the doc")],
            "Shipping decision",
        );
        let first = score_recording(&rec);
        let second = score_recording(&rec);
        assert_eq!(first.score, second.score);
        assert_eq!(first.should_memorize, second.should_memorize);
    }

    #[test]
    fn scoring_error_fails_open() {
        let q = gate(Err(crate::error::MemoirError::Internal("boom".into())), "r1");
        assert!(q.should_memorize);
    }

    #[test]
    fn score_is_clamped() {
        let long_text = "We decided the plan: review, send, call, remind, schedule a meeting, \
                         set the deadline, ship the launch, finish every task. "
            .repeat(50);
        let q = score_recording(&recording(vec![("a", &long_text)], &long_text));
        assert!(q.score <= 10.0);
        assert!(q.should_memorize);
    }
}
