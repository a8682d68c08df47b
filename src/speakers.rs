//! Speaker resolution: collapse raw per-utterance speaker labels into one
//! stable identity per raw id, without ever collapsing two distinct ids
//! into the same generic label.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::source::TranscriptSegment;
use crate::thresholds::SPEAKER_ORDINAL_BASE;

/// Resolved identity, scoped to one recording. Not persisted on its own —
/// only embedded into the resulting memory's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalSpeaker {
    pub speaker_id: String,
    pub display_name: String,
    pub is_self: bool,
}

/// Names the upstream diarizer emits when it has no idea who is talking.
/// "Speaker 2" (with a number) is a real upstream assignment and survives.
fn is_placeholder(name: &str) -> bool {
    let t = name.trim();
    t.is_empty()
        || t.eq_ignore_ascii_case("unknown")
        || t.eq_ignore_ascii_case("unidentified")
        || t.eq_ignore_ascii_case("speaker")
}

/// Resolve every raw speaker id in a transcript to a canonical identity.
///
/// Two passes. Pass 1 groups segments by raw id, keeping ids in order of
/// first appearance and collecting each id's reported names. Pass 2 names
/// each id: the wearer becomes "You"; otherwise the lexicographically first
/// non-placeholder name wins; ids with no usable name get "Speaker {n}" from
/// a counter local to this call, advanced in first-appearance order.
///
/// The counter keys off unique raw ids, never off reported names — three
/// ids all reporting "Unknown" come out as three distinct ordinals.
pub fn resolve_speakers(
    segments: &[TranscriptSegment],
    self_id: Option<&str>,
) -> BTreeMap<String, CanonicalSpeaker> {
    let mut order: Vec<&str> = Vec::new();
    let mut names: HashMap<&str, Vec<&str>> = HashMap::new();
    for seg in segments {
        let entry = names.entry(seg.speaker_id.as_str()).or_insert_with(|| {
            order.push(seg.speaker_id.as_str());
            Vec::new()
        });
        if !entry.contains(&seg.speaker_name.as_str()) {
            entry.push(seg.speaker_name.as_str());
        }
    }

    let mut resolved = BTreeMap::new();
    let mut next_ordinal = SPEAKER_ORDINAL_BASE;
    for id in &order {
        let speaker = if self_id == Some(*id) {
            CanonicalSpeaker {
                speaker_id: (*id).to_string(),
                display_name: "You".to_string(),
                is_self: true,
            }
        } else {
            let best = names[id]
                .iter()
                .filter(|n| !is_placeholder(n))
                .min_by(|a, b| a.cmp(b));
            let display_name = match best {
                Some(name) => name.trim().to_string(),
                None => {
                    let label = format!("Speaker {next_ordinal}");
                    next_ordinal += 1;
                    label
                }
            };
            CanonicalSpeaker {
                speaker_id: (*id).to_string(),
                display_name,
                is_self: false,
            }
        };
        resolved.insert((*id).to_string(), speaker);
    }

    validate_resolution(&mut resolved, &mut next_ordinal);
    resolved
}

/// Last-resort guard: no resolved name may still be a banned placeholder.
/// Logs an error rather than failing the recording, and repairs the entry
/// with the next unused ordinal.
fn validate_resolution(
    resolved: &mut BTreeMap<String, CanonicalSpeaker>,
    next_ordinal: &mut usize,
) {
    let taken: HashSet<String> = resolved.values().map(|s| s.display_name.clone()).collect();
    for speaker in resolved.values_mut() {
        if speaker.is_self || !is_placeholder(&speaker.display_name) {
            continue;
        }
        let mut label = format!("Speaker {next_ordinal}");
        *next_ordinal += 1;
        while taken.contains(&label) {
            label = format!("Speaker {next_ordinal}");
            *next_ordinal += 1;
        }
        error!(
            speaker = %speaker.speaker_id,
            bad_name = %speaker.display_name,
            replacement = %label,
            "placeholder survived speaker resolution"
        );
        speaker.display_name = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, name: &str, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            speaker_id: id.into(),
            speaker_name: name.into(),
            text: text.into(),
        }
    }

    #[test]
    fn distinct_unknowns_get_distinct_ordinals() {
        let segments = vec![
            seg("a", "Unknown", "one"),
            seg("b", "Unknown", "two"),
            seg("c", "Unknown", "three"),
        ];
        let resolved = resolve_speakers(&segments, None);
        let names: Vec<&str> = ["a", "b", "c"]
            .iter()
            .map(|id| resolved[*id].display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Speaker 0", "Speaker 1", "Speaker 2"]);
    }

    #[test]
    fn wearer_is_always_you() {
        let segments = vec![
            seg("me", "Alice", "hi"),
            seg("other", "Bob", "hello"),
        ];
        let resolved = resolve_speakers(&segments, Some("me"));
        assert_eq!(resolved["me"].display_name, "You");
        assert!(resolved["me"].is_self);
        assert_eq!(resolved["other"].display_name, "Bob");
        assert!(!resolved["other"].is_self);
    }

    #[test]
    fn lexicographically_first_valid_name_wins() {
        let segments = vec![
            seg("x", "Unknown", "a"),
            seg("x", "Charlie", "b"),
            seg("x", "Bea", "c"),
        ];
        let resolved = resolve_speakers(&segments, None);
        assert_eq!(resolved["x"].display_name, "Bea");
    }

    #[test]
    fn numbered_upstream_label_is_kept() {
        // "Speaker 2" carries a number — it's a real upstream assignment.
        let segments = vec![seg("x", "Speaker 2", "a")];
        let resolved = resolve_speakers(&segments, None);
        assert_eq!(resolved["x"].display_name, "Speaker 2");
    }

    #[test]
    fn bare_speaker_label_is_banned() {
        let segments = vec![seg("x", "speaker", "a"), seg("y", "SPEAKER", "b")];
        let resolved = resolve_speakers(&segments, None);
        assert_eq!(resolved["x"].display_name, "Speaker 0");
        assert_eq!(resolved["y"].display_name, "Speaker 1");
    }

    #[test]
    fn empty_transcript_is_empty_map() {
        let resolved = resolve_speakers(&[], None);
        assert!(resolved.is_empty());
    }

    #[test]
    fn ordinals_follow_first_appearance_among_unresolved() {
        let segments = vec![
            seg("named", "Dana", "x"),
            seg("u1", "", "y"),
            seg("named", "Dana", "z"),
            seg("u2", "unidentified", "w"),
        ];
        let resolved = resolve_speakers(&segments, None);
        assert_eq!(resolved["named"].display_name, "Dana");
        assert_eq!(resolved["u1"].display_name, "Speaker 0");
        assert_eq!(resolved["u2"].display_name, "Speaker 1");
    }

    #[test]
    fn no_placeholder_survives_resolution() {
        let segments = vec![
            seg("a", "Unknown", "1"),
            seg("b", "unidentified", "2"),
            seg("c", "", "3"),
            seg("d", "Frank", "4"),
        ];
        let resolved = resolve_speakers(&segments, None);
        for s in resolved.values() {
            assert!(!is_placeholder(&s.display_name), "leaked: {}", s.display_name);
        }
        // And all labels are unique.
        let unique: HashSet<&str> =
            resolved.values().map(|s| s.display_name.as_str()).collect();
        assert_eq!(unique.len(), resolved.len());
    }
}
