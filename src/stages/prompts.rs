//! Prompt text and response schemas for each stage
//!
//! Schemas use the provider's OpenAPI subset (upper-case type names).

use serde_json::{Value, json};

pub(crate) fn outline(topic: &str, language: &str) -> String {
    format!(
        "You are designing a short course about \"{topic}\". \
         Return the ordered list of chapter titles, from fundamentals to advanced material. \
         Write every title in {language}."
    )
}

pub(crate) fn outline_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

pub(crate) fn chapter_content(topic: &str, chapter_title: &str, language: &str) -> String {
    format!(
        "Write the theory chapter \"{chapter_title}\" of a course about \"{topic}\". \
         Use Markdown with headings, short paragraphs and examples. \
         Write in {language}. Return only the chapter text."
    )
}

pub(crate) fn flashcards(
    topic: &str,
    chapter_title: &str,
    chapter_content: &str,
    language: &str,
    count: usize,
) -> String {
    format!(
        "Create {count} flashcards for the chapter \"{chapter_title}\" of a course about \"{topic}\". \
         Each card has a short question on the front and a concise answer on the back. \
         Base every card on the chapter text below. Write in {language}.\n\n{chapter_content}"
    )
}

pub(crate) fn flashcards_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "front": { "type": "STRING" },
                "back": { "type": "STRING" }
            },
            "required": ["front", "back"]
        }
    })
}

pub(crate) fn quiz(
    topic: &str,
    chapter_title: &str,
    chapter_content: &str,
    language: &str,
    count: usize,
) -> String {
    format!(
        "Create {count} multiple-choice questions for the chapter \"{chapter_title}\" of a course about \"{topic}\". \
         Every question has exactly four options; `answer` must repeat the correct option verbatim. \
         Add a one-sentence explanation. Base every question on the chapter text below. \
         Write in {language}.\n\n{chapter_content}"
    )
}

pub(crate) fn quiz_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "question": { "type": "STRING" },
                "options": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "minItems": 4,
                    "maxItems": 4
                },
                "answer": { "type": "STRING" },
                "explanation": { "type": "STRING" }
            },
            "required": ["question", "options", "answer", "explanation"]
        }
    })
}

pub(crate) fn podcast_script(
    topic: &str,
    chapter_title: &str,
    chapter_content: &str,
    language: &str,
) -> String {
    format!(
        "Turn the chapter \"{chapter_title}\" of a course about \"{topic}\" into a lively \
         dialogue between two podcast hosts. Prefix each line with the speaker name. \
         Cover the key ideas of the chapter text below. Write in {language}.\n\n{chapter_content}"
    )
}
