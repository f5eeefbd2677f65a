// Location: src/tasks/prompt.rs

use serde_json::{Map, Value};

use crate::config::SystemStyle;
use crate::error::{BenchError, Result};
use crate::types::{Example, Expected, Message, SpanIds};

use super::{Task, TaskKind, TaskOptions};

/// A parsed dataset record, ready to be placed in a conversation
#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub question: String,
    pub expected: Expected,
    /// Reply used when this item serves as a few-shot exemplar
    pub shot_answer: String,
    pub span: Option<SpanIds>,
    pub extra: Map<String, Value>,
}

/// Task backed by an in-memory list of items, shared by every built-in task
pub(crate) struct ItemTask {
    name: String,
    kind: TaskKind,
    items: Vec<Item>,
    /// Separate exemplar pool; `None` draws exemplars from `items`
    shots: Option<Vec<Item>>,
    system_prompt: String,
    max_new_tokens: usize,
}

/// Built-in defaults a format supplies to [`ItemTask::load`]
pub(crate) struct TaskDefaults {
    pub kind: TaskKind,
    pub system_prompt: &'static str,
    pub max_new_tokens: usize,
}

impl ItemTask {
    pub fn load<R, F>(name: &str, options: &TaskOptions, defaults: TaskDefaults, parse: F) -> Result<Self>
    where
        R: serde::de::DeserializeOwned,
        F: Fn(R) -> Result<Item>,
    {
        let mut records: Vec<R> = super::jsonl::read_records(name, &options.path)?;
        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        let items = records.into_iter().map(&parse).collect::<Result<Vec<_>>>()?;

        let shots = match &options.shots_path {
            Some(path) => Some(
                super::jsonl::read_records::<R>(name, path)?
                    .into_iter()
                    .map(&parse)
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            kind: defaults.kind,
            items,
            shots,
            system_prompt: options
                .system_prompt
                .clone()
                .unwrap_or_else(|| defaults.system_prompt.to_string()),
            max_new_tokens: options.max_new_tokens.unwrap_or(defaults.max_new_tokens),
        })
    }

    fn exemplars(&self, index: usize, num_shots: usize) -> Result<Vec<&Item>> {
        let chosen: Vec<&Item> = match &self.shots {
            Some(pool) => pool.iter().take(num_shots).collect(),
            None => self
                .items
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, item)| item)
                .take(num_shots)
                .collect(),
        };

        if chosen.len() < num_shots {
            return Err(BenchError::task(
                &self.name,
                format!("requested {} shots but only {} exemplars are available", num_shots, chosen.len()),
            ));
        }
        Ok(chosen)
    }

    fn example(&self, index: usize, num_shots: usize, style: SystemStyle) -> Result<Example> {
        let item = &self.items[index];
        let mut messages = Vec::with_capacity(2 * num_shots + 2);

        for shot in self.exemplars(index, num_shots)? {
            messages.push(Message::user(shot.question.clone()));
            messages.push(Message::assistant(shot.shot_answer.clone()));
        }
        messages.push(Message::user(item.question.clone()));

        apply_system_style(&mut messages, &self.system_prompt, style);

        Ok(Example {
            messages,
            expected: item.expected.clone(),
            span: item.span.clone(),
            extra: item.extra.clone(),
        })
    }
}

/// Place the system instruction according to `style`
pub(crate) fn apply_system_style(messages: &mut Vec<Message>, system_prompt: &str, style: SystemStyle) {
    if system_prompt.is_empty() {
        return;
    }
    match style {
        SystemStyle::Inject => {
            if let Some(first) = messages.iter_mut().find(|m| m.role == crate::types::Role::User) {
                first.content = format!("{}\n\n{}", system_prompt, first.content);
            }
        }
        SystemStyle::System => messages.insert(0, Message::system(system_prompt)),
        SystemStyle::None => {}
    }
}

impl Task for ItemTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    fn build(&self, num_shots: usize, system_style: SystemStyle) -> Box<dyn Iterator<Item = Result<Example>> + '_> {
        Box::new((0..self.items.len()).map(move |index| self.example(index, num_shots, system_style)))
    }
}
