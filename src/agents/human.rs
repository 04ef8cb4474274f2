//! 人工输入：人工代理与手动选择发言人时向真人提问
//!
//! ChannelInput 通过一对 mpsc 通道与外部交互（UI / 测试）；StdinInput 从终端逐行读取。

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};

/// 向真人提问；None 表示输入已关闭
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn ask(&self, prompt: &str) -> Option<String>;
}

/// 通道式人工输入
pub struct ChannelInput {
    prompts: mpsc::UnboundedSender<String>,
    answers: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// 外部持有的一端：读取提问、写入回答
pub struct HumanHandle {
    pub prompts: mpsc::UnboundedReceiver<String>,
    pub answers: mpsc::UnboundedSender<String>,
}

impl ChannelInput {
    pub fn new() -> (Self, HumanHandle) {
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        (
            Self {
                prompts: prompt_tx,
                answers: Mutex::new(answer_rx),
            },
            HumanHandle {
                prompts: prompt_rx,
                answers: answer_tx,
            },
        )
    }
}

#[async_trait]
impl HumanInput for ChannelInput {
    async fn ask(&self, prompt: &str) -> Option<String> {
        // 没人读提问也可以直接给回答（预先写入的脚本化回答）
        let _ = self.prompts.send(prompt.to_string());
        self.answers.lock().await.recv().await
    }
}

/// 终端输入
pub struct StdinInput {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for StdinInput {
    async fn ask(&self, prompt: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(format!("{prompt}\n> ").as_bytes()).await;
        let _ = stdout.flush().await;
        match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read from stdin");
                None
            }
        }
    }
}
