//! 実行イベントとイベントストリーム
//!
//! # 責務
//!
//! - `run_stream` 系の呼び出しが発行するイベント [`Event`] の型定義
//! - 有界キューへの送信口 [`EventSink`]
//! - バックグラウンドタスクの出力を消費する [`EventStream`]
//!
//! # 配送の保証
//!
//! - 1回の `run_stream` につきストリームは1本で、終端イベント
//!   （成功または [`EventType::Error`]）の後に1度だけ閉じられます
//! - ライフサイクルイベントは [`EventSink::emit`] で送信し、キューが満杯なら
//!   生産者を待たせます（バックプレッシャー）
//! - 消費者がストリームを破棄した場合、以降のイベントは黙って捨てられます
//!
//! # 使用例
//!
//! ```rust,no_run
//! use melted_flow::event::EventType;
//! # async fn example(mut stream: melted_flow::event::EventStream<()>) {
//! while let Some(event) = stream.next().await {
//!     if event.event_type == EventType::StreamDelta {
//!         print!("{}", event.delta.unwrap_or_default());
//!     }
//! }
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::SystemTime;

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::Termination;
use crate::engine::ExecutionError;
use crate::provider::TokenUsage;
use crate::tool::{ToolCall, ToolResult};

/// 1本のストリームが持つキューの容量
pub const EVENT_BUFFER_SIZE: usize = 100;

/// イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    WorkflowStart,
    StepStart,
    StreamDelta,
    StepComplete,
    ParallelStart,
    ParallelComplete,
    RouteSelected,
    LoopIteration,
    ToolCallRequested,
    ToolCallApproved,
    ToolCallRejected,
    ToolCallStarted,
    ToolResult,
    AgentComplete,
    WorkflowComplete,
    Error,
}

/// 実行イベント
///
/// `event_type` 以外のフィールドはイベントの種類に応じて設定されます。
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// イベントの種類
    pub event_type: EventType,

    /// 発行元のステップ名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,

    /// ストリーミング中のテキスト差分
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,

    /// ツール呼び出し
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,

    /// ツール実行結果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    /// エラーメッセージ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 選択されたルート名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    /// ループまたはエージェントの反復番号（1始まり）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,

    /// トークン使用量
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// エージェントの終了理由
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,

    /// 発行時刻
    pub timestamp: SystemTime,
}

impl Event {
    /// 指定した種類のイベントを生成
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            step_name: None,
            delta: None,
            tool_call: None,
            tool_result: None,
            error: None,
            route: None,
            iteration: None,
            usage: None,
            termination: None,
            timestamp: SystemTime::now(),
        }
    }

    /// ステップ名を付与したイベントを生成
    pub fn for_step(event_type: EventType, step_name: &str) -> Self {
        Self::new(event_type).with_step(step_name)
    }

    /// エラーイベントを生成
    pub fn error(step_name: &str, error: &ExecutionError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::for_step(EventType::Error, step_name)
        }
    }

    pub fn with_step(mut self, step_name: &str) -> Self {
        self.step_name = Some(step_name.to_string());
        self
    }

    pub fn with_delta(mut self, delta: impl Into<String>) -> Self {
        self.delta = Some(delta.into());
        self
    }

    pub fn with_tool_call(mut self, call: &ToolCall) -> Self {
        self.tool_call = Some(call.clone());
        self
    }

    pub fn with_tool_result(mut self, result: &ToolResult) -> Self {
        self.tool_result = Some(result.clone());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = Some(termination);
        self
    }

    /// 終端イベント（成功または失敗）かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            EventType::WorkflowComplete | EventType::AgentComplete | EventType::Error
        )
    }
}

/// イベントの送信口
///
/// `Clone` して並行ブランチやツールタスクへ渡せます。複製は同じキューに送信します。
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    last_terminal: Arc<AtomicBool>,
}

impl EventSink {
    /// 有界チャネルを生成
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            last_terminal: Arc::new(AtomicBool::new(false)),
        };
        (sink, rx)
    }

    /// イベントを送信（キューが満杯なら空くまで待機）
    ///
    /// 受信側が破棄されている場合は何もしません。
    pub async fn emit(&self, event: Event) {
        let terminal = event.is_terminal();
        let _ = self.tx.send(event).await;
        self.last_terminal.store(terminal, Ordering::SeqCst);
    }

    /// 最後に送信したイベントが終端イベントだったか
    pub(crate) fn ends_with_terminal(&self) -> bool {
        self.last_terminal.load(Ordering::SeqCst)
    }
}

/// バックグラウンドタスクが発行するイベントのストリーム
///
/// イベントを読み切った後、[`EventStream::finish`] でタスクの最終出力を取得します。
pub struct EventStream<T> {
    rx: mpsc::Receiver<Event>,
    handle: JoinHandle<T>,
}

impl<T> EventStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Event>, handle: JoinHandle<T>) -> Self {
        Self { rx, handle }
    }

    /// 次のイベントを待機（ストリーム終了時は `None`）
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// タスクの完了を待ち、最終出力を返す
    ///
    /// 未読のイベントは破棄されます。
    pub async fn finish(mut self) -> Result<T, ExecutionError> {
        self.rx.close();
        while self.rx.recv().await.is_some() {}

        self.handle.await.map_err(|e| ExecutionError::Panicked {
            task: format!("event stream task: {}", e),
        })
    }

    /// 全イベントを読み切り、タスクの最終出力と共に返す
    pub async fn collect(mut self) -> (Vec<Event>, Result<T, ExecutionError>) {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        let output = self.finish().await;
        (events, output)
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}
