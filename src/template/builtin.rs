use lazy_static::lazy_static;

use crate::error::{BenchError, Result};
use crate::types::{Message, Role};

use super::{ChatTemplate, RenderOptions};

/// Chat formats shipped with the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTemplate {
    ChatMl,
    Llama2,
    Llama3,
    Zephyr,
    Alpaca,
    Plain,
}

lazy_static! {
    // Checked in order; the first marker found in a tokenizer's chat template wins.
    static ref FAMILY_MARKERS: Vec<(&'static str, BuiltinTemplate)> = vec![
        ("<|start_header_id|>", BuiltinTemplate::Llama3),
        ("<|im_start|>", BuiltinTemplate::ChatMl),
        ("[INST]", BuiltinTemplate::Llama2),
        ("<|assistant|>", BuiltinTemplate::Zephyr),
        ("### Instruction", BuiltinTemplate::Alpaca),
    ];
}

impl BuiltinTemplate {
    pub const ALL: [BuiltinTemplate; 6] = [
        BuiltinTemplate::ChatMl,
        BuiltinTemplate::Llama2,
        BuiltinTemplate::Llama3,
        BuiltinTemplate::Zephyr,
        BuiltinTemplate::Alpaca,
        BuiltinTemplate::Plain,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            BuiltinTemplate::ChatMl => "chatml",
            BuiltinTemplate::Llama2 => "llama2",
            BuiltinTemplate::Llama3 => "llama3",
            BuiltinTemplate::Zephyr => "zephyr",
            BuiltinTemplate::Alpaca => "alpaca",
            BuiltinTemplate::Plain => "plain",
        }
    }

    /// Recognise the format of a tokenizer's Jinja chat template
    pub fn detect(chat_template: &str) -> Option<Self> {
        FAMILY_MARKERS
            .iter()
            .find(|(marker, _)| chat_template.contains(marker))
            .map(|(_, template)| *template)
    }

    fn render_chatml(messages: &[Message], options: &RenderOptions) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str("<|im_start|>");
            prompt.push_str(role_name(message.role));
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str("<|im_end|>\n");
        }
        if options.add_generation_prompt {
            prompt.push_str("<|im_start|>assistant\n");
        }
        prompt
    }

    fn render_llama2(messages: &[Message]) -> Result<String> {
        let (system, turns) = match messages.first() {
            Some(first) if first.role == Role::System => (Some(first.content.as_str()), &messages[1..]),
            _ => (None, messages),
        };

        let mut prompt = String::new();
        for (i, message) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            if message.role != expected {
                return Err(BenchError::TemplateError {
                    message: "Conversation roles must alternate user/assistant/user/assistant".to_string(),
                });
            }
            match message.role {
                Role::User => {
                    prompt.push_str("<s>[INST] ");
                    if let (0, Some(system)) = (i, system) {
                        prompt.push_str("<<SYS>>\n");
                        prompt.push_str(system);
                        prompt.push_str("\n<</SYS>>\n\n");
                    }
                    prompt.push_str(message.content.trim());
                    prompt.push_str(" [/INST]");
                }
                _ => {
                    prompt.push(' ');
                    prompt.push_str(message.content.trim());
                    prompt.push_str(" </s>");
                }
            }
        }
        Ok(prompt)
    }

    fn render_llama3(messages: &[Message], options: &RenderOptions) -> String {
        let mut prompt = String::from("<|begin_of_text|>");
        for message in messages {
            prompt.push_str("<|start_header_id|>");
            prompt.push_str(role_name(message.role));
            prompt.push_str("<|end_header_id|>\n\n");
            prompt.push_str(message.content.trim());
            prompt.push_str("<|eot_id|>");
        }
        if options.add_generation_prompt {
            prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        }
        prompt
    }

    fn render_zephyr(messages: &[Message], options: &RenderOptions) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str("<|");
            prompt.push_str(role_name(message.role));
            prompt.push_str("|>\n");
            prompt.push_str(&message.content);
            prompt.push_str("</s>\n");
        }
        if options.add_generation_prompt {
            prompt.push_str("<|assistant|>\n");
        }
        prompt
    }

    fn render_alpaca(messages: &[Message], options: &RenderOptions) -> String {
        let mut prompt = String::new();
        for message in messages {
            match message.role {
                Role::System => {}
                Role::User => prompt.push_str("### Instruction:\n"),
                Role::Assistant => prompt.push_str("### Response:\n"),
            }
            prompt.push_str(&message.content);
            prompt.push_str("\n\n");
        }
        if options.add_generation_prompt {
            prompt.push_str("### Response:\n");
        }
        prompt
    }

    fn render_plain(messages: &[Message], options: &RenderOptions) -> String {
        let mut prompt = String::new();
        for message in messages {
            match message.role {
                Role::System => {
                    prompt.push_str(&message.content);
                    prompt.push_str("\n\n");
                }
                Role::User => {
                    prompt.push_str("User: ");
                    prompt.push_str(&message.content);
                    prompt.push('\n');
                }
                Role::Assistant => {
                    prompt.push_str("Assistant: ");
                    prompt.push_str(&message.content);
                    prompt.push('\n');
                }
            }
        }
        if options.add_generation_prompt {
            prompt.push_str("Assistant:");
        }
        prompt
    }
}

impl ChatTemplate for BuiltinTemplate {
    fn name(&self) -> &str {
        self.id()
    }

    fn render(&self, messages: &[Message], options: &RenderOptions) -> Result<String> {
        Ok(match self {
            BuiltinTemplate::ChatMl => Self::render_chatml(messages, options),
            BuiltinTemplate::Llama2 => Self::render_llama2(messages)?,
            BuiltinTemplate::Llama3 => Self::render_llama3(messages, options),
            BuiltinTemplate::Zephyr => Self::render_zephyr(messages, options),
            BuiltinTemplate::Alpaca => Self::render_alpaca(messages, options),
            BuiltinTemplate::Plain => Self::render_plain(messages, options),
        })
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}
