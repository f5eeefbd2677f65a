//! Multiple-choice question answering (MMLU / ARC style)

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BenchError, Result};
use crate::types::Expected;

use super::prompt::{Item, ItemTask, TaskDefaults};
use super::{Task, TaskKind, TaskOptions};

pub const NAME: &str = "multiple_choice";

const SYSTEM_PROMPT: &str = "Choose the correct answer.";

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Deserialize)]
struct ChoiceRecord {
    question: String,
    choices: Vec<String>,
    answer: Value,
}

fn letter(index: usize) -> char {
    LETTERS[index] as char
}

/// Resolve an answer given as an index, a letter or the text of a choice
fn answer_index(answer: &Value, choices: &[String]) -> Option<usize> {
    match answer {
        Value::Number(n) => n.as_u64().map(|n| n as usize).filter(|&i| i < choices.len()),
        Value::String(s) => {
            let s = s.trim();
            if s.len() == 1 {
                let byte = s.as_bytes()[0].to_ascii_uppercase();
                if let Some(i) = LETTERS.iter().position(|&l| l == byte) {
                    if i < choices.len() {
                        return Some(i);
                    }
                }
            }
            choices.iter().position(|choice| choice == s)
        }
        _ => None,
    }
}

fn parse(record: ChoiceRecord) -> Result<Item> {
    if record.choices.is_empty() || record.choices.len() > LETTERS.len() {
        return Err(BenchError::task(
            NAME,
            format!("question '{}' has {} choices", record.question, record.choices.len()),
        ));
    }

    let index = answer_index(&record.answer, &record.choices).ok_or_else(|| {
        BenchError::task(
            NAME,
            format!("answer {} does not match any choice of '{}'", record.answer, record.question),
        )
    })?;

    let mut question = record.question;
    for (i, choice) in record.choices.iter().enumerate() {
        question.push_str(&format!("\n{}. {}", letter(i), choice));
    }
    question.push_str("\nAnswer with the letter of the correct choice.");

    let mut extra = Map::new();
    extra.insert(
        "choices".to_string(),
        Value::Array(record.choices.into_iter().map(Value::String).collect()),
    );

    let answer = letter(index).to_string();
    Ok(Item {
        question,
        expected: Expected::Single(answer.clone()),
        shot_answer: answer,
        span: None,
        extra,
    })
}

pub fn load(options: &TaskOptions) -> Result<Box<dyn Task>> {
    let defaults = TaskDefaults {
        kind: TaskKind::Generative,
        system_prompt: SYSTEM_PROMPT,
        max_new_tokens: 8,
    };
    Ok(Box::new(ItemTask::load(NAME, options, defaults, parse)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemStyle;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_answer_forms() {
        let choices = vec!["Paris".to_string(), "London".to_string(), "Berlin".to_string()];
        assert_eq!(answer_index(&json!(1), &choices), Some(1));
        assert_eq!(answer_index(&json!("c"), &choices), Some(2));
        assert_eq!(answer_index(&json!("Paris"), &choices), Some(0));
        assert_eq!(answer_index(&json!(3), &choices), None);
        assert_eq!(answer_index(&json!("D"), &choices), None);
        assert_eq!(answer_index(&json!(null), &choices), None);
    }

    #[test]
    fn test_load_multiple_choice() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"question": "What is the capital of France?", "choices": ["Paris", "London", "Berlin"], "answer": "Paris"}}"#
        )
        .unwrap();
        writeln!(file, r#"{{"question": "What is 2+2?", "choices": ["3", "4", "5"], "answer": 1}}"#).unwrap();

        let task = load(&TaskOptions::for_path(file.path())).unwrap();
        assert_eq!(task.max_new_tokens(), 8);

        let examples: Vec<_> = task.build(0, SystemStyle::None).collect::<Result<_>>().unwrap();
        assert_eq!(examples[0].expected, Expected::Single("A".into()));
        assert_eq!(examples[1].expected, Expected::Single("B".into()));
        assert_eq!(
            examples[1].messages[0].content,
            "What is 2+2?\nA. 3\nB. 4\nC. 5\nAnswer with the letter of the correct choice."
        );
        assert_eq!(examples[1].extra.get("choices"), Some(&json!(["3", "4", "5"])));
    }

    #[test]
    fn test_unmatched_answer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"question": "?", "choices": ["x"], "answer": "y"}}"#).unwrap();
        assert!(load(&TaskOptions::for_path(file.path())).is_err());
    }
}
