// Location: src/processing/common.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use candle_core::{Device, Tensor};
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::{BenchError, Result};

/// Side padding tokens are added on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingSide {
    Left,
    #[default]
    Right,
}

/// Token sequence with its attention mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    /// Input token IDs
    pub token_ids: Vec<u32>,

    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,

    /// Number of real tokens
    pub length: usize,
}

impl TokenSequence {
    /// Create a new unpadded token sequence
    pub fn new(token_ids: Vec<u32>) -> Self {
        let length = token_ids.len();
        Self {
            attention_mask: vec![1; length],
            length,
            token_ids,
        }
    }

    /// Pad sequence to target length; never truncates
    pub fn pad_to_length(&mut self, target_length: usize, pad_token_id: u32, side: PaddingSide) {
        let current = self.token_ids.len();
        if current >= target_length {
            return;
        }

        let pad_length = target_length - current;
        match side {
            PaddingSide::Right => {
                self.token_ids.extend(std::iter::repeat(pad_token_id).take(pad_length));
                self.attention_mask.extend(std::iter::repeat(0).take(pad_length));
            }
            PaddingSide::Left => {
                self.token_ids.splice(0..0, std::iter::repeat(pad_token_id).take(pad_length));
                self.attention_mask.splice(0..0, std::iter::repeat(0).take(pad_length));
            }
        }
    }
}

/// Token IDs whose attention mask entry is set
pub fn strip_padding(token_ids: &[u32], attention_mask: &[u32]) -> Vec<u32> {
    token_ids
        .iter()
        .zip(attention_mask)
        .filter(|(_, mask)| **mask != 0)
        .map(|(id, _)| *id)
        .collect()
}

/// Tensor representation of a batch, resident on the generation device
#[derive(Debug)]
pub struct BatchTensors {
    /// `(batch, width)` u32 token IDs
    pub input_ids: Tensor,
    /// `(batch, width)` u32 attention mask
    pub attention_mask: Tensor,
    pub width: usize,
}

impl BatchTensors {
    /// Stack equal-length sequences into `(batch, width)` tensors
    pub fn stack<'a>(rows: impl IntoIterator<Item = (&'a [u32], &'a [u32])>, device: &Device) -> Result<Self> {
        let mut token_ids = Vec::new();
        let mut attention_mask = Vec::new();
        let mut batch = 0;
        let mut width = None;

        for (ids, mask) in rows {
            if ids.len() != mask.len() || width.map_or(false, |w| w != ids.len()) {
                return Err(BenchError::GenerationError {
                    batch: 0,
                    message: "batch rows must share one padded length".to_string(),
                });
            }
            width = Some(ids.len());
            token_ids.extend_from_slice(ids);
            attention_mask.extend_from_slice(mask);
            batch += 1;
        }

        let width = width.unwrap_or(0);
        Ok(Self {
            input_ids: Tensor::from_vec(token_ids, (batch, width), device)?,
            attention_mask: Tensor::from_vec(attention_mask, (batch, width), device)?,
            width,
        })
    }
}

/// Lets a caller abort an in-flight run from another task
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`CancellationToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds on how long a blocking model call may run
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    /// Limit applied to each generation call
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RunControl {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fail fast when cancellation was requested between operations
    pub fn check(&self, operation: &str) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(BenchError::Cancelled {
                operation: operation.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Drive `future` to completion unless it times out or is cancelled first
    pub async fn run<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let cancellable = async {
            match &self.cancel {
                Some(token) => tokio::select! {
                    result = future => result,
                    _ = token.cancelled() => Err(BenchError::Cancelled {
                        operation: operation.to_string(),
                    }),
                },
                None => future.await,
            }
        };

        match self.timeout {
            Some(duration) => tokio::time::timeout(duration, cancellable)
                .await
                .map_err(|_| BenchError::TimeoutError {
                    duration,
                    operation: operation.to_string(),
                })?,
            None => cancellable.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_token_sequence() {
        let sequence = TokenSequence::new(vec![1, 2, 3, 4]);
        assert_eq!(sequence.length, 4);
        assert_eq!(sequence.attention_mask, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_sequence_padding() {
        let mut right = TokenSequence::new(vec![1, 2, 3]);
        right.pad_to_length(5, 0, PaddingSide::Right);
        assert_eq!(right.length, 3);
        assert_eq!(right.token_ids, vec![1, 2, 3, 0, 0]);
        assert_eq!(right.attention_mask, vec![1, 1, 1, 0, 0]);

        let mut left = TokenSequence::new(vec![1, 2, 3]);
        left.pad_to_length(5, 9, PaddingSide::Left);
        assert_eq!(left.token_ids, vec![9, 9, 1, 2, 3]);
        assert_eq!(left.attention_mask, vec![0, 0, 1, 1, 1]);
        assert_eq!(strip_padding(&left.token_ids, &left.attention_mask), vec![1, 2, 3]);

        let mut long = TokenSequence::new(vec![1, 2, 3]);
        long.pad_to_length(2, 0, PaddingSide::Right);
        assert_eq!(long.token_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_stack_batch() {
        let rows: Vec<(Vec<u32>, Vec<u32>)> = vec![(vec![1, 2, 0], vec![1, 1, 0]), (vec![3, 4, 5], vec![1, 1, 1])];
        let tensors = BatchTensors::stack(
            rows.iter().map(|(ids, mask)| (ids.as_slice(), mask.as_slice())),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(tensors.width, 3);
        assert_eq!(tensors.input_ids.dims(), &[2, 3]);
        assert_eq!(tensors.attention_mask.to_vec2::<u32>().unwrap(), vec![vec![1, 1, 0], vec![1, 1, 1]]);

        let ragged: Vec<(Vec<u32>, Vec<u32>)> = vec![(vec![1], vec![1]), (vec![1, 2], vec![1, 1])];
        assert!(BatchTensors::stack(
            ragged.iter().map(|(ids, mask)| (ids.as_slice(), mask.as_slice())),
            &Device::Cpu,
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_run_control_passthrough() {
        let control = RunControl::default();
        let value = control.run("op", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_control_timeout() {
        let control = RunControl::default().with_timeout(Duration::from_millis(10));
        let result: Result<()> = control
            .run("generate", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BenchError::TimeoutError { .. })));
    }

    #[tokio::test]
    async fn test_run_control_cancellation() {
        let token = CancellationToken::new();
        let control = RunControl::default().with_cancellation(token.clone());
        assert!(control.check("batch").is_ok());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<()> = control
            .run("generate", std::future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(BenchError::Cancelled { .. })));
        assert!(token.is_cancelled());
        assert!(matches!(control.check("batch"), Err(BenchError::Cancelled { .. })));
    }
}
