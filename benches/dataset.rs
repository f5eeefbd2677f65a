use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use llm_bench::config::SystemStyle;
use llm_bench::model::TextTokenizer;
use llm_bench::processing::DatasetBuilder;
use llm_bench::tasks::{qa, TaskOptions};
use llm_bench::template::{BuiltinTemplate, ChatTemplate, RenderOptions};
use llm_bench::types::Message;

/// One token per byte
struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode_batch(&self, texts: &[String]) -> llm_bench::Result<Vec<Vec<u32>>> {
        Ok(texts.iter().map(|t| t.bytes().map(u32::from).collect()).collect())
    }

    fn decode_batch(&self, sequences: &[Vec<u32>], _skip_special_tokens: bool) -> llm_bench::Result<Vec<String>> {
        Ok(sequences
            .iter()
            .map(|s| s.iter().filter_map(|b| char::from_u32(*b)).collect())
            .collect())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(0)
    }

    fn pad_token_id(&self) -> Option<u32> {
        Some(0)
    }
}

fn bench_render(c: &mut Criterion) {
    let messages = vec![
        Message::system("Answer the question concisely."),
        Message::user("What is the capital of France?"),
        Message::assistant("Paris"),
        Message::user("What is the capital of Italy?"),
    ];
    let options = RenderOptions {
        add_generation_prompt: true,
    };

    let mut group = c.benchmark_group("render");
    for template in [BuiltinTemplate::ChatMl, BuiltinTemplate::Llama3, BuiltinTemplate::Plain] {
        group.bench_function(template.id(), |b| {
            b.iter(|| template.render(black_box(&messages), &options))
        });
    }
    group.finish();
}

fn bench_dataset(c: &mut Criterion) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..256 {
        writeln!(file, r#"{{"question": "What is {} plus {}?", "answer": "{}"}}"#, i, i, i * 2).unwrap();
    }
    let task = qa::load(&TaskOptions::for_path(file.path())).unwrap();
    let template = BuiltinTemplate::ChatMl;

    c.bench_function("build_dataset_256_3shot", |b| {
        b.iter(|| {
            DatasetBuilder::new(task.as_ref(), &template, &ByteTokenizer)
                .with_num_shots(3)
                .with_system_style(SystemStyle::System)
                .build()
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_render, bench_dataset);
criterion_main!(benches);
