//! Memory CRUD. One row per consolidated memory; the partial unique index
//! on (owner_id, recording_id) backs the one-memory-per-recording invariant
//! behind the idempotency marker.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_ms, Store};
use crate::error::MemoirError;

const MAX_CONTENT_LEN: usize = 16_384;
const MAX_PEOPLE: usize = 50;

/// What a memory is about. Pipeline-consolidated memories default to `Note`
/// (they are narratives, not single typed facts); the manual API accepts any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Preference,
    Relationship,
    Routine,
    ImportantDate,
    PersonalInfo,
    Allergy,
    Note,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Relationship => "relationship",
            Self::Routine => "routine",
            Self::ImportantDate => "important_date",
            Self::PersonalInfo => "personal_info",
            Self::Allergy => "allergy",
            Self::Note => "note",
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = MemoirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "relationship" => Ok(Self::Relationship),
            "routine" => Ok(Self::Routine),
            "important_date" => Ok(Self::ImportantDate),
            "personal_info" => Ok(Self::PersonalInfo),
            "allergy" => Ok(Self::Allergy),
            "note" => Ok(Self::Note),
            other => Err(MemoirError::InvalidKind(other.into())),
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Manual,
    MessagingChannel,
    RecordingPipeline,
}

impl MemorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::MessagingChannel => "messaging_channel",
            Self::RecordingPipeline => "recording_pipeline",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "messaging_channel" => Self::MessagingChannel,
            "recording_pipeline" => Self::RecordingPipeline,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonMention {
    pub name: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub is_speaker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub owner_id: String,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub people_mentioned: Vec<PersonMention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
    pub source: MemorySource,
    pub importance: i64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersede_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MemoryInput {
    #[serde(default)]
    pub content: String,
    pub owner_id: String,
    pub kind: Option<MemoryKind>,
    pub importance: Option<i64>,
    #[serde(default)]
    pub people_mentioned: Vec<PersonMention>,
    #[serde(skip)]
    pub recording_id: Option<String>,
    #[serde(skip)]
    pub source: Option<MemorySource>,
    /// Skip near-duplicate detection. The recording pipeline always sets
    /// this — its uniqueness is about recording identity, not content.
    #[serde(default)]
    pub skip_deduplication: bool,
}

impl MemoryInput {
    pub fn new(owner_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            owner_id: owner_id.into(),
            kind: None,
            importance: None,
            people_mentioned: vec![],
            recording_id: None,
            source: None,
            skip_deduplication: false,
        }
    }

    pub fn kind(mut self, k: MemoryKind) -> Self {
        self.kind = Some(k);
        self
    }

    pub fn importance(mut self, i: i64) -> Self {
        self.importance = Some(i);
        self
    }

    pub fn people(mut self, p: Vec<PersonMention>) -> Self {
        self.people_mentioned = p;
        self
    }

    pub fn recording(mut self, id: impl Into<String>) -> Self {
        self.recording_id = Some(id.into());
        self.source = Some(MemorySource::RecordingPipeline);
        self
    }

    pub fn source(mut self, s: MemorySource) -> Self {
        self.source = Some(s);
        self
    }

    pub fn skip_deduplication(mut self) -> Self {
        self.skip_deduplication = true;
        self
    }
}

fn validate_input(input: &MemoryInput) -> Result<(), MemoirError> {
    if input.content.trim().is_empty() {
        return Err(MemoirError::EmptyContent);
    }
    if input.content.chars().count() > MAX_CONTENT_LEN {
        return Err(MemoirError::ContentTooLong);
    }
    if input.owner_id.trim().is_empty() {
        return Err(MemoirError::Validation("owner_id must not be empty".into()));
    }
    if input.people_mentioned.len() > MAX_PEOPLE {
        return Err(MemoirError::Validation(format!("too many people (max {MAX_PEOPLE})")));
    }
    if let Some(i) = input.importance {
        if !(1..=10).contains(&i) {
            return Err(MemoirError::Validation(format!("importance {i} out of range 1-10")));
        }
    }
    Ok(())
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let kind_str: String = row.get("kind")?;
    let source_str: String = row.get("source")?;
    let people_str: String = row.get("people_mentioned")?;
    Ok(Memory {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        kind: kind_str.parse().unwrap_or(MemoryKind::Note),
        content: row.get("content")?,
        people_mentioned: serde_json::from_str(&people_str).unwrap_or_default(),
        recording_id: row.get("recording_id")?,
        source: MemorySource::parse(&source_str),
        importance: row.get("importance")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        superseded_by: row.get("superseded_by")?,
        supersede_confidence: row.get("supersede_confidence")?,
    })
}

const COLS: &str = "id, owner_id, kind, content, people_mentioned, recording_id, \
    source, importance, created_at, updated_at, superseded_by, supersede_confidence";

impl Store {
    fn build_memory(input: &MemoryInput) -> Memory {
        let now = now_ms();
        Memory {
            id: Uuid::new_v4().to_string(),
            owner_id: input.owner_id.clone(),
            kind: input.kind.unwrap_or(MemoryKind::Note),
            content: input.content.clone(),
            people_mentioned: input.people_mentioned.clone(),
            recording_id: input.recording_id.clone(),
            source: input.source.unwrap_or(MemorySource::Manual),
            importance: input.importance.unwrap_or(5).clamp(1, 10),
            created_at: now,
            updated_at: now,
            superseded_by: None,
            supersede_confidence: None,
        }
    }

    /// Plain insert. Near-duplicate handling is the caller's concern
    /// (see `dedup::insert_manual`).
    pub fn insert_memory(&self, input: MemoryInput) -> Result<Memory, MemoirError> {
        validate_input(&input)?;
        let mem = Self::build_memory(&input);
        let c = self.conn()?;
        c.execute(
            &format!("INSERT INTO memories ({COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"),
            params![
                mem.id,
                mem.owner_id,
                mem.kind.as_str(),
                mem.content,
                serde_json::to_string(&mem.people_mentioned).unwrap_or_else(|_| "[]".into()),
                mem.recording_id,
                mem.source.as_str(),
                mem.importance,
                mem.created_at,
                mem.updated_at,
                mem.superseded_by,
                mem.supersede_confidence,
            ],
        )?;
        Ok(mem)
    }

    /// Insert a pipeline memory. Returns `None` when a memory for this
    /// (owner, recording) already exists — the unique index absorbs races
    /// the marker cannot see (e.g. marker expired but the memory survived).
    pub fn insert_recording_memory(
        &self,
        input: MemoryInput,
    ) -> Result<Option<Memory>, MemoirError> {
        validate_input(&input)?;
        if input.recording_id.is_none() {
            return Err(MemoirError::Validation("recording_id required".into()));
        }
        let mem = Self::build_memory(&input);
        let c = self.conn()?;
        let n = c.execute(
            &format!(
                "INSERT OR IGNORE INTO memories ({COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"
            ),
            params![
                mem.id,
                mem.owner_id,
                mem.kind.as_str(),
                mem.content,
                serde_json::to_string(&mem.people_mentioned).unwrap_or_else(|_| "[]".into()),
                mem.recording_id,
                mem.source.as_str(),
                mem.importance,
                mem.created_at,
                mem.updated_at,
                mem.superseded_by,
                mem.supersede_confidence,
            ],
        )?;
        Ok(if n > 0 { Some(mem) } else { None })
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>, MemoirError> {
        let c = self.conn()?;
        c.query_row(
            &format!("SELECT {COLS} FROM memories WHERE id = ?1"),
            params![id],
            row_to_memory,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn memory_for_recording(
        &self,
        owner_id: &str,
        recording_id: &str,
    ) -> Result<Option<Memory>, MemoirError> {
        let c = self.conn()?;
        c.query_row(
            &format!("SELECT {COLS} FROM memories WHERE owner_id = ?1 AND recording_id = ?2"),
            params![owner_id, recording_id],
            row_to_memory,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn list_memories(
        &self,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>, MemoirError> {
        let c = self.conn()?;
        let mut out = Vec::new();
        match owner_id {
            Some(owner) => {
                let mut stmt = c.prepare(&format!(
                    "SELECT {COLS} FROM memories WHERE owner_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(params![owner, limit as i64, offset as i64], row_to_memory)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = c.prepare(&format!(
                    "SELECT {COLS} FROM memories ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_memory)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    /// User-edit path: content, kind, importance. Bumps updated_at.
    pub fn update_memory(
        &self,
        id: &str,
        content: Option<&str>,
        kind: Option<MemoryKind>,
        importance: Option<i64>,
    ) -> Result<Option<Memory>, MemoirError> {
        if let Some(c) = content {
            if c.trim().is_empty() {
                return Err(MemoirError::EmptyContent);
            }
            if c.chars().count() > MAX_CONTENT_LEN {
                return Err(MemoirError::ContentTooLong);
            }
        }
        if let Some(i) = importance {
            if !(1..=10).contains(&i) {
                return Err(MemoirError::Validation(format!("importance {i} out of range 1-10")));
            }
        }
        let c = self.conn()?;
        c.execute(
            "UPDATE memories SET \
                 content = COALESCE(?2, content), \
                 kind = COALESCE(?3, kind), \
                 importance = COALESCE(?4, importance), \
                 updated_at = ?5 \
             WHERE id = ?1",
            params![id, content, kind.map(MemoryKind::as_str), importance, now_ms()],
        )?;
        self.get_memory(id)
    }

    pub fn delete_memory(&self, id: &str) -> Result<bool, MemoirError> {
        let c = self.conn()?;
        let n = c.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Mark `old_id` as superseded by `new_id`. One-way relation — the old
    /// row is never rewritten in place, so no reference cycles can form.
    pub fn mark_superseded(
        &self,
        old_id: &str,
        new_id: &str,
        confidence: f64,
    ) -> Result<(), MemoirError> {
        let c = self.conn()?;
        c.execute(
            "UPDATE memories SET superseded_by = ?2, supersede_confidence = ?3, updated_at = ?4 \
             WHERE id = ?1 AND superseded_by IS NULL",
            params![old_id, new_id, confidence, now_ms()],
        )?;
        Ok(())
    }

    /// Token-overlap near-duplicate scan over an owner's recent memories.
    /// Used by the manual insert path only — O(recent), never O(all).
    /// Returns the best match and its similarity.
    pub fn find_near_duplicate(
        &self,
        owner_id: &str,
        content: &str,
        threshold: f64,
    ) -> Result<Option<(Memory, f64)>, MemoirError> {
        let recent = self.list_memories(Some(owner_id), 500, 0)?;
        let best = recent
            .into_iter()
            .filter(|m| m.superseded_by.is_none())
            .map(|m| {
                let sim = jaccard(&m.content, content);
                (m, sim)
            })
            .filter(|(_, sim)| *sim > threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(best)
    }

    pub fn memory_count(&self) -> Result<usize, MemoirError> {
        let c = self.conn()?;
        let n: i64 = c.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// Jaccard similarity between two text snippets, 0.0-1.0. Short texts
/// (under three tokens) score zero — too little signal to call anything a
/// duplicate.
pub(crate) fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.len() < 3 || tb.len() < 3 {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical() {
        assert!(jaccard("team decided to ship friday", "team decided to ship friday") > 0.99);
    }

    #[test]
    fn jaccard_disjoint() {
        assert!(jaccard("team decided to ship friday", "grocery list eggs milk bread") < 0.01);
    }

    #[test]
    fn jaccard_short_scores_zero() {
        assert_eq!(jaccard("hi", "hi"), 0.0);
    }

    #[test]
    fn kind_roundtrip() {
        for k in [
            MemoryKind::Fact,
            MemoryKind::Preference,
            MemoryKind::Relationship,
            MemoryKind::Routine,
            MemoryKind::ImportantDate,
            MemoryKind::PersonalInfo,
            MemoryKind::Allergy,
            MemoryKind::Note,
        ] {
            assert_eq!(k.as_str().parse::<MemoryKind>().unwrap(), k);
        }
        assert!("nonsense".parse::<MemoryKind>().is_err());
    }
}
