//! Extraction & consolidation: one AI call per worthwhile recording, one
//! consolidated memory out. The AI response is an untrusted payload —
//! every field defaults, nothing is assumed present.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ai::{self, AiConfig};
use crate::error::MemoirError;
use crate::prompts;
use crate::source::Recording;
use crate::speakers::CanonicalSpeaker;
use crate::store::{MemoryKind, PersonMention};
use crate::thresholds::EXTRACT_TIMEOUT_SECS;
use crate::util::short_id;
use crate::SharedStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEvent {
    pub description: String,
    #[serde(default)]
    pub when: Option<String>,
}

/// Structured payload for one recording. Produced at most once per
/// recording; an empty insight means "nothing worth keeping".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInsight {
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<ExtractedTask>,
    #[serde(default)]
    pub people_mentioned: Vec<PersonMention>,
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
}

impl ExtractedInsight {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.tasks.is_empty()
            && self.people_mentioned.is_empty()
            && self.events.is_empty()
    }
}

/// The extraction seam. The pipeline owns when to call this (at most once
/// per recording, only past the quality gate); implementations own how.
#[async_trait]
pub trait InsightExtractor: Send + Sync {
    async fn extract(
        &self,
        recording: &Recording,
        speakers: &BTreeMap<String, CanonicalSpeaker>,
    ) -> Result<ExtractedInsight, MemoirError>;
}

/// Real implementation: one forced tool call against an OpenAI-compatible
/// endpoint, bounded by a hard timeout. Timeout counts as failure.
pub struct LlmExtractor {
    ai: AiConfig,
    store: SharedStore,
}

impl LlmExtractor {
    pub fn new(ai: AiConfig, store: SharedStore) -> Self {
        Self { ai, store }
    }

    fn build_user_message(
        recording: &Recording,
        speakers: &BTreeMap<String, CanonicalSpeaker>,
    ) -> String {
        let mut msg = String::with_capacity(recording.transcript_segments.len() * 80);
        if !recording.title.is_empty() {
            msg.push_str(&format!("Title: {}\n", recording.title));
        }
        if !recording.summary.is_empty() {
            msg.push_str(&format!("Summary: {}\n", recording.summary));
        }
        msg.push_str("Transcript:\n");
        for seg in &recording.transcript_segments {
            let name = speakers
                .get(&seg.speaker_id)
                .map(|s| s.display_name.as_str())
                .unwrap_or(seg.speaker_id.as_str());
            msg.push_str(&format!("{name}: {}\n", seg.text));
        }
        msg
    }
}

#[async_trait]
impl InsightExtractor for LlmExtractor {
    async fn extract(
        &self,
        recording: &Recording,
        speakers: &BTreeMap<String, CanonicalSpeaker>,
    ) -> Result<ExtractedInsight, MemoirError> {
        let user = Self::build_user_message(recording, speakers);
        let call = ai::llm_tool_call::<ExtractedInsight>(
            &self.ai,
            prompts::EXTRACT_SYSTEM_PROMPT,
            &user,
            "store_insight",
            "Store the facts, tasks, people and events extracted from the recording",
            prompts::extract_tool_schema(),
        );

        let tcr = tokio::time::timeout(std::time::Duration::from_secs(EXTRACT_TIMEOUT_SECS), call)
            .await
            .map_err(|_| MemoirError::AiBackend("extraction call timed out".into()))??;

        if let Some(ref u) = tcr.usage {
            let store = self.store.clone();
            let model = tcr.model.clone();
            let (inp, outp, dur) = (u.prompt_tokens, u.completion_tokens, tcr.duration_ms);
            let _ = tokio::task::spawn_blocking(move || {
                store.log_llm_call("extract", &model, inp, outp, dur)
            })
            .await;
        }

        let mut insight = tcr.value;
        cross_reference_speakers(&mut insight, speakers);
        debug!(
            recording = %short_id(&recording.id),
            facts = insight.facts.len(),
            tasks = insight.tasks.len(),
            people = insight.people_mentioned.len(),
            "extraction complete"
        );
        Ok(insight)
    }
}

/// Make the people list consistent with speaker resolution: every non-self
/// canonical speaker appears exactly once with `is_speaker = true`, whatever
/// the model returned.
fn cross_reference_speakers(
    insight: &mut ExtractedInsight,
    speakers: &BTreeMap<String, CanonicalSpeaker>,
) {
    for person in &mut insight.people_mentioned {
        if speakers.values().any(|s| !s.is_self && s.display_name == person.name) {
            person.is_speaker = true;
        }
    }
    for speaker in speakers.values() {
        if speaker.is_self {
            continue;
        }
        if !insight.people_mentioned.iter().any(|p| p.name == speaker.display_name) {
            insight.people_mentioned.push(PersonMention {
                name: speaker.display_name.clone(),
                context: "spoke in this recording".into(),
                is_speaker: true,
            });
        }
    }
}

/// What the pipeline persists for one recording.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub content: String,
    pub people_mentioned: Vec<PersonMention>,
    pub importance: i64,
    pub kind: MemoryKind,
}

/// Fold one recording's insight into exactly ONE memory draft — a single
/// narrative covering the whole recording, with per-person detail carried
/// in metadata rather than fragmented into per-fact records.
///
/// Returns `None` for an empty insight: a failed or vacuous extraction
/// produces no memory at all.
pub fn consolidate_insight(
    recording: &Recording,
    insight: &ExtractedInsight,
) -> Option<MemoryDraft> {
    if insight.is_empty() {
        return None;
    }

    let mut content = String::new();
    let heading = if recording.title.is_empty() {
        format!("Recording on {}", recording.started_at.format("%Y-%m-%d"))
    } else {
        format!("{} ({})", recording.title, recording.started_at.format("%Y-%m-%d"))
    };
    content.push_str(&heading);
    if !recording.summary.is_empty() {
        content.push_str(": ");
        content.push_str(&recording.summary);
    }
    content.push('\n');

    if !insight.facts.is_empty() {
        content.push('\n');
        content.push_str(&insight.facts.join(" "));
        content.push('\n');
    }

    if !insight.tasks.is_empty() {
        content.push_str("\nCommitments: ");
        let tasks: Vec<String> = insight
            .tasks
            .iter()
            .map(|t| match &t.due_date {
                Some(due) => format!("{} (due {due})", t.description),
                None => t.description.clone(),
            })
            .collect();
        content.push_str(&tasks.join("; "));
        content.push('\n');
    }

    if !insight.events.is_empty() {
        content.push_str("\nUpcoming: ");
        let events: Vec<String> = insight
            .events
            .iter()
            .map(|e| match &e.when {
                Some(when) => format!("{} ({when})", e.description),
                None => e.description.clone(),
            })
            .collect();
        content.push_str(&events.join("; "));
        content.push('\n');
    }

    // Density-derived importance: a recording dense with facts and
    // commitments matters more than small talk that barely passed the gate.
    let density =
        insight.facts.len() + insight.tasks.len() + insight.events.len().div_ceil(2);
    let importance = (3 + density as i64).clamp(1, 10);

    // Speakers first, then non-speaker mentions, deduplicated by name.
    let mut people: Vec<PersonMention> = Vec::new();
    for p in insight
        .people_mentioned
        .iter()
        .filter(|p| p.is_speaker)
        .chain(insight.people_mentioned.iter().filter(|p| !p.is_speaker))
    {
        if !people.iter().any(|seen| seen.name == p.name) {
            people.push(p.clone());
        }
    }

    Some(MemoryDraft {
        content,
        people_mentioned: people,
        importance,
        kind: MemoryKind::Note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TranscriptSegment;
    use chrono::{TimeZone, Utc};

    fn recording() -> Recording {
        Recording {
            id: "rec-42".into(),
            started_at: Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
            title: "Standup".into(),
            summary: "Daily sync".into(),
            transcript_segments: vec![TranscriptSegment {
                speaker_id: "s1".into(),
                speaker_name: "Ana".into(),
                text: "hi".into(),
            }],
            is_processed: false,
        }
    }

    fn person(name: &str, is_speaker: bool) -> PersonMention {
        PersonMention { name: name.into(), context: "ctx".into(), is_speaker }
    }

    #[test]
    fn empty_insight_yields_no_draft() {
        assert!(consolidate_insight(&recording(), &ExtractedInsight::default()).is_none());
    }

    #[test]
    fn three_people_two_facts_consolidate_into_one_draft() {
        let insight = ExtractedInsight {
            facts: vec!["Ana leads the migration.".into(), "Launch moved to Q4.".into()],
            tasks: vec![],
            people_mentioned: vec![person("Ana", true), person("Ben", true), person("Cleo", false)],
            events: vec![],
        };
        let draft = consolidate_insight(&recording(), &insight).unwrap();
        assert_eq!(draft.people_mentioned.len(), 3);
        assert!(draft.content.contains("Ana leads the migration."));
        assert!(draft.content.contains("Launch moved to Q4."));
        assert!(draft.content.starts_with("Standup (2026-08-01): Daily sync"));
    }

    #[test]
    fn tasks_and_events_land_in_the_narrative() {
        let insight = ExtractedInsight {
            facts: vec![],
            tasks: vec![ExtractedTask {
                description: "review the doc".into(),
                due_date: Some("Friday".into()),
                source: String::new(),
            }],
            people_mentioned: vec![],
            events: vec![ExtractedEvent {
                description: "release party".into(),
                when: Some("next month".into()),
            }],
        };
        let draft = consolidate_insight(&recording(), &insight).unwrap();
        assert!(draft.content.contains("review the doc (due Friday)"));
        assert!(draft.content.contains("release party (next month)"));
    }

    #[test]
    fn people_dedupe_keeps_speakers_first() {
        let insight = ExtractedInsight {
            facts: vec!["f".into()],
            tasks: vec![],
            people_mentioned: vec![
                person("Cleo", false),
                person("Ana", true),
                person("Cleo", false),
            ],
            events: vec![],
        };
        let draft = consolidate_insight(&recording(), &insight).unwrap();
        let names: Vec<&str> = draft.people_mentioned.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Cleo"]);
    }

    #[test]
    fn importance_scales_with_density() {
        let sparse = ExtractedInsight {
            facts: vec!["one".into()],
            ..Default::default()
        };
        let dense = ExtractedInsight {
            facts: (0..6).map(|i| format!("fact {i}")).collect(),
            tasks: vec![ExtractedTask {
                description: "t".into(),
                due_date: None,
                source: String::new(),
            }],
            ..Default::default()
        };
        let rec = recording();
        let a = consolidate_insight(&rec, &sparse).unwrap().importance;
        let b = consolidate_insight(&rec, &dense).unwrap().importance;
        assert!(a < b);
        assert!(b <= 10);
    }

    #[test]
    fn cross_reference_adds_missing_speakers() {
        let mut speakers = BTreeMap::new();
        speakers.insert(
            "s1".to_string(),
            CanonicalSpeaker {
                speaker_id: "s1".into(),
                display_name: "Ana".into(),
                is_self: false,
            },
        );
        speakers.insert(
            "me".to_string(),
            CanonicalSpeaker {
                speaker_id: "me".into(),
                display_name: "You".into(),
                is_self: true,
            },
        );
        let mut insight = ExtractedInsight {
            facts: vec!["f".into()],
            ..Default::default()
        };
        cross_reference_speakers(&mut insight, &speakers);
        assert_eq!(insight.people_mentioned.len(), 1);
        assert_eq!(insight.people_mentioned[0].name, "Ana");
        assert!(insight.people_mentioned[0].is_speaker);
    }

    #[test]
    fn untrusted_payload_parses_with_defaults() {
        let insight: ExtractedInsight = serde_json::from_str(r#"{"facts": ["a"]}"#).unwrap();
        assert_eq!(insight.facts.len(), 1);
        assert!(insight.tasks.is_empty());
        let empty: ExtractedInsight = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
