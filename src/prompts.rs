//! Centralised prompt text and tool-call JSON schema for the extraction
//! call, so they can be audited and tuned in one place.

pub const EXTRACT_SYSTEM_PROMPT: &str = r#"You are analysing one transcribed recording from a wearable capture device. Speaker labels in the transcript have already been resolved to canonical names; "You" is the device owner.

Extract, in a single response:

1. facts — concrete, durable statements about the owner or their world. Self-contained, one sentence each. Skip filler, pleasantries, and transient status.
2. tasks — anything anyone committed to do or asked for, INCLUDING commitments phrased as offhand asides ("I'll take a look at that doc sometime"). Phrase each as an imperative description. Include a due date only when one was actually said.
3. people_mentioned — every person who spoke or was talked about. Use the canonical speaker names exactly as given for speakers; set is_speaker accordingly. One short context phrase each.
4. events — planned or mentioned occurrences with a time reference when one was given.

Rules:
- Empty arrays are fine. Do not invent content to fill a field.
- Never include the raw speaker ids, only display names.
- Keep descriptions under 200 characters."#;

pub fn extract_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "facts": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Durable facts worth remembering"
            },
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "due_date": { "type": "string", "description": "Only if explicitly stated" },
                        "source": { "type": "string", "description": "Short quote or context the task came from" }
                    },
                    "required": ["description"]
                }
            },
            "people_mentioned": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "context": { "type": "string" },
                        "is_speaker": { "type": "boolean" }
                    },
                    "required": ["name"]
                }
            },
            "events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "when": { "type": "string" }
                    },
                    "required": ["description"]
                }
            }
        },
        "required": ["facts", "tasks", "people_mentioned", "events"]
    })
}
