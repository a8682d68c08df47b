use memoir::store::*;

fn test_store() -> Store {
    Store::open(":memory:").expect("in-memory store")
}

#[test]
fn basic_crud() {
    let s = test_store();
    let mem = s
        .insert_memory(
            MemoryInput::new("u1", "prefers tea over coffee in the morning")
                .kind(MemoryKind::Preference)
                .importance(7),
        )
        .unwrap();

    assert_eq!(mem.kind, MemoryKind::Preference);
    assert_eq!(mem.importance, 7);
    assert_eq!(mem.source, MemorySource::Manual);

    let got = s.get_memory(&mem.id).unwrap().unwrap();
    assert_eq!(got.content, "prefers tea over coffee in the morning");

    let updated = s
        .update_memory(&mem.id, Some("prefers strong tea"), Some(MemoryKind::Fact), Some(9))
        .unwrap()
        .unwrap();
    assert_eq!(updated.content, "prefers strong tea");
    assert_eq!(updated.kind, MemoryKind::Fact);
    assert_eq!(updated.importance, 9);
    assert!(updated.updated_at >= updated.created_at);

    assert!(s.delete_memory(&mem.id).unwrap());
    assert!(s.get_memory(&mem.id).unwrap().is_none());
}

#[test]
fn delete_missing_is_false() {
    let s = test_store();
    assert!(!s.delete_memory("nonexistent").unwrap());
}

#[test]
fn empty_content_rejected() {
    let s = test_store();
    assert!(s.insert_memory(MemoryInput::new("u1", "   ")).is_err());
}

#[test]
fn importance_out_of_range_rejected() {
    let s = test_store();
    assert!(s
        .insert_memory(MemoryInput::new("u1", "valid content here").importance(11))
        .is_err());
    assert!(s
        .insert_memory(MemoryInput::new("u1", "valid content here").importance(0))
        .is_err());
}

#[test]
fn one_memory_per_recording_enforced_by_index() {
    let s = test_store();
    let first = s
        .insert_recording_memory(
            MemoryInput::new("u1", "consolidated narrative of the meeting").recording("rec-1"),
        )
        .unwrap();
    assert!(first.is_some());

    let second = s
        .insert_recording_memory(
            MemoryInput::new("u1", "a different narrative of the same meeting").recording("rec-1"),
        )
        .unwrap();
    assert!(second.is_none(), "duplicate (owner, recording) must be ignored");
    assert_eq!(s.memory_count().unwrap(), 1);

    // A different owner may hold a memory for the same recording id.
    let other_owner = s
        .insert_recording_memory(
            MemoryInput::new("u2", "other owner's view of the meeting").recording("rec-1"),
        )
        .unwrap();
    assert!(other_owner.is_some());
}

#[test]
fn recording_memory_requires_recording_id() {
    let s = test_store();
    let res = s.insert_recording_memory(MemoryInput::new("u1", "content without recording"));
    assert!(res.is_err());
}

#[test]
fn list_is_owner_scoped_and_newest_first() {
    let s = test_store();
    s.insert_memory(MemoryInput::new("u1", "first memory about the garden")).unwrap();
    s.insert_memory(MemoryInput::new("u2", "someone else's memory entirely")).unwrap();
    s.insert_memory(MemoryInput::new("u1", "second memory about the kitchen")).unwrap();

    let mine = s.list_memories(Some("u1"), 10, 0).unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|m| m.owner_id == "u1"));

    let all = s.list_memories(None, 10, 0).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn people_mentioned_roundtrips_through_json_column() {
    let s = test_store();
    let people = vec![
        PersonMention { name: "Ana".into(), context: "led the call".into(), is_speaker: true },
        PersonMention { name: "Ben".into(), context: "mentioned".into(), is_speaker: false },
    ];
    let mem = s
        .insert_memory(
            MemoryInput::new("u1", "call notes with two people involved").people(people.clone()),
        )
        .unwrap();
    let got = s.get_memory(&mem.id).unwrap().unwrap();
    assert_eq!(got.people_mentioned, people);
}

#[test]
fn memory_for_recording_lookup() {
    let s = test_store();
    s.insert_recording_memory(
        MemoryInput::new("u1", "the consolidated record of rec-9").recording("rec-9"),
    )
    .unwrap();
    let found = s.memory_for_recording("u1", "rec-9").unwrap();
    assert!(found.is_some());
    assert!(s.memory_for_recording("u1", "rec-10").unwrap().is_none());
    assert!(s.memory_for_recording("u2", "rec-9").unwrap().is_none());
}

#[test]
fn supersede_is_one_way_and_sticky() {
    let s = test_store();
    let a = s.insert_memory(MemoryInput::new("u1", "old version of this fact right here")).unwrap();
    let b = s.insert_memory(MemoryInput::new("u1", "new version of this fact right here").skip_deduplication()).unwrap();
    let c = s.insert_memory(MemoryInput::new("u1", "even newer version of the fact").skip_deduplication()).unwrap();

    s.mark_superseded(&a.id, &b.id, 0.9).unwrap();
    // A second supersede of the same row is a no-op — the relation never
    // rewrites in place.
    s.mark_superseded(&a.id, &c.id, 0.99).unwrap();

    let old = s.get_memory(&a.id).unwrap().unwrap();
    assert_eq!(old.superseded_by.as_deref(), Some(b.id.as_str()));
    assert_eq!(old.supersede_confidence, Some(0.9));
}
