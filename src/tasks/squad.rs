//! SQuAD v2 extractive question answering

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{Expected, SpanIds};

use super::prompt::{Item, ItemTask, TaskDefaults};
use super::{Task, TaskKind, TaskOptions};

pub const NAME: &str = "squad_v2";

const SYSTEM_PROMPT: &str = "Answer the question with a short span copied from the context. \
If the context does not contain the answer, reply \"unanswerable\".";

const UNANSWERABLE: &str = "unanswerable";

#[derive(Debug, Deserialize)]
struct SquadRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    context: String,
    question: String,
    answers: SquadAnswers,
}

#[derive(Debug, Deserialize)]
struct SquadAnswers {
    text: Vec<String>,
    answer_start: Vec<i64>,
}

fn parse(record: SquadRecord) -> Result<Item> {
    let question = match &record.title {
        Some(title) => format!(
            "Title: {}\n\nContext: {}\n\nQuestion: {}",
            title, record.context, record.question
        ),
        None => format!("Context: {}\n\nQuestion: {}", record.context, record.question),
    };

    let shot_answer = record
        .answers
        .text
        .first()
        .cloned()
        .unwrap_or_else(|| UNANSWERABLE.to_string());

    let mut extra = Map::new();
    if let Some(title) = record.title {
        extra.insert("title".to_string(), Value::String(title));
    }

    Ok(Item {
        question,
        expected: Expected::Many(record.answers.text),
        shot_answer,
        span: Some(SpanIds {
            id: record.id,
            answer_start: record.answers.answer_start,
        }),
        extra,
    })
}

pub fn load(options: &TaskOptions) -> Result<Box<dyn Task>> {
    let defaults = TaskDefaults {
        kind: TaskKind::SpanExtraction,
        system_prompt: SYSTEM_PROMPT,
        max_new_tokens: 32,
    };
    Ok(Box::new(ItemTask::load(NAME, options, defaults, parse)?))
}
