//! Open-ended question answering

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BenchError, Result};
use crate::types::Expected;

use super::prompt::{Item, ItemTask, TaskDefaults};
use super::{Task, TaskKind, TaskOptions};

pub const NAME: &str = "qa";

const SYSTEM_PROMPT: &str = "Answer the question concisely.";

#[derive(Debug, Deserialize)]
struct QaRecord {
    question: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    answers: Option<Vec<String>>,
    #[serde(default)]
    id: Option<Value>,
}

fn parse(record: QaRecord) -> Result<Item> {
    let expected = match (record.answer, record.answers) {
        (Some(answer), None) => Expected::Single(answer),
        (None, Some(answers)) if !answers.is_empty() => Expected::Many(answers),
        _ => {
            return Err(BenchError::task(
                NAME,
                format!("question '{}' needs exactly one of 'answer' or a non-empty 'answers'", record.question),
            ))
        }
    };

    let mut extra = Map::new();
    if let Some(id) = record.id {
        extra.insert("id".to_string(), id);
    }

    Ok(Item {
        shot_answer: expected.first().unwrap_or_default().to_string(),
        question: record.question,
        expected,
        span: None,
        extra,
    })
}

pub fn load(options: &TaskOptions) -> Result<Box<dyn Task>> {
    let defaults = TaskDefaults {
        kind: TaskKind::Generative,
        system_prompt: SYSTEM_PROMPT,
        max_new_tokens: 64,
    };
    Ok(Box::new(ItemTask::load(NAME, options, defaults, parse)?))
}
