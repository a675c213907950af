//! Answer retrieval pipeline.
//!
//! `submit` validates a [`ChatRequest`] on the caller's context, then spawns
//! a worker task that streams the answer, retries while the model is still
//! loading, and posts the outcome back through the [`UiScheduler`].
//!
//! Event order per submission is fixed:
//! `BusyChanged(true)` → `Completed(..)` → `BusyChanged(false)`.
//! `BusyChanged(true)` is posted before the first network call.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::client::ChatTransport;
use super::dispatch::{Completion, UiEvent, UiScheduler};
use super::errors::RetrievalError;
use super::streaming::collect_answer;
use super::types::{
    truncate_utf8, ChatPayload, ChatRequest, RetrievalResult, LOADING_PLACEHOLDER,
    NO_ANSWER_PLACEHOLDER, UNSELECTED_MODEL,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Total attempts (first request included) while the model is loading.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts while the model is loading.
pub const LOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Question prefix length kept in log lines.
const LOG_QUESTION_BYTES: usize = 80;

// ─── Retry policy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: LOAD_RETRY_DELAY,
        }
    }
}

/// Attempt counter for one logical request.
///
/// Invariant: `attempts_made <= max_attempts`.
#[derive(Debug)]
pub struct RetryState {
    attempts_made: u32,
    max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Count an attempt that is about to be sent.
    fn record_attempt(&mut self) {
        debug_assert!(self.attempts_made < self.max_attempts);
        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts);
    }

    /// Whether another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Asynchronous question → answer pipeline.
///
/// Cheap to clone; every submission owns its own request, retry counter,
/// buffer, and HTTP request.
#[derive(Clone)]
pub struct AnswerPipeline {
    transport: Arc<dyn ChatTransport>,
    ui: Arc<dyn UiScheduler>,
    policy: RetryPolicy,
}

impl AnswerPipeline {
    pub fn new(transport: Arc<dyn ChatTransport>, ui: Arc<dyn UiScheduler>) -> Self {
        Self {
            transport,
            ui,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check a request before anything is sent.
    pub fn validate(request: &ChatRequest) -> Result<(), RetrievalError> {
        let model = request.model_id.trim();
        if model.is_empty() || model == UNSELECTED_MODEL {
            return Err(RetrievalError::Validation {
                reason: "Please select a model.".into(),
            });
        }
        if request.question.trim().is_empty() {
            return Err(RetrievalError::Validation {
                reason: "Question field cannot be empty.".into(),
            });
        }
        Ok(())
    }

    /// Submit a request.
    ///
    /// Validation errors are returned immediately and nothing is spawned.
    /// Otherwise the request runs on a new task and the returned handle
    /// resolves once every UI event for it has been posted. Must be called
    /// from within a tokio runtime.
    pub fn submit(&self, request: ChatRequest) -> Result<JoinHandle<()>, RetrievalError> {
        if let Err(e) = Self::validate(&request) {
            tracing::warn!(
                model = %request.model_id,
                error = %e,
                "request rejected before sending"
            );
            return Err(e);
        }

        let transport = Arc::clone(&self.transport);
        let ui = Arc::clone(&self.ui);
        let policy = self.policy;

        Ok(tokio::spawn(async move {
            run_invocation(transport, ui, policy, request).await;
        }))
    }
}

/// Posts `BusyChanged(false)` when dropped, so busy-exit happens on every
/// exit path of the worker. Panics inside `retrieve` are caught before they
/// reach it and become a `Failure` completion.
struct BusyGuard {
    ui: Arc<dyn UiScheduler>,
    request_id: Uuid,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.ui.post(UiEvent::BusyChanged {
            request_id: self.request_id,
            busy: false,
        });
    }
}

async fn run_invocation(
    transport: Arc<dyn ChatTransport>,
    ui: Arc<dyn UiScheduler>,
    policy: RetryPolicy,
    request: ChatRequest,
) {
    ui.post(UiEvent::BusyChanged {
        request_id: request.request_id,
        busy: true,
    });
    let _busy = BusyGuard {
        ui: Arc::clone(&ui),
        request_id: request.request_id,
    };

    let outcome = AssertUnwindSafe(retrieve(transport.as_ref(), &request, policy))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(RetrievalError::StreamError {
                reason: format!("request aborted: {}", panic_message(panic.as_ref())),
            })
        });

    let result = match outcome {
        Ok(answer) => RetrievalResult::Answer(answer),
        Err(e) => {
            tracing::error!(
                request_id = %request.request_id,
                model = %request.model_id,
                question = %truncate_utf8(&request.question, LOG_QUESTION_BYTES),
                kind = ?e.kind(),
                error = %e,
                "answer retrieval failed"
            );
            RetrievalResult::Failure {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
    };

    ui.post(UiEvent::Completed(Completion {
        request_id: request.request_id,
        model_id: request.model_id,
        topic: request.topic,
        question: request.question,
        result,
    }));
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "worker panicked"
    }
}

/// Run the request to a final answer, retrying while the model loads.
///
/// Transport and server errors are returned on first occurrence.
pub async fn retrieve(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    policy: RetryPolicy,
) -> Result<String, RetrievalError> {
    let payload = ChatPayload::from_request(request);
    let mut retry = RetryState::new(policy.max_attempts);

    loop {
        retry.record_attempt();
        tracing::info!(
            request_id = %request.request_id,
            model = %request.model_id,
            attempt = retry.attempts_made(),
            question = %truncate_utf8(&request.question, LOG_QUESTION_BYTES),
            "sending question"
        );

        let body = transport.open_chat_stream(&payload).await?;
        let outcome = collect_answer(body).await?;

        if !outcome.text.is_empty() {
            tracing::info!(
                request_id = %request.request_id,
                answer_len = outcome.text.len(),
                skipped_lines = outcome.skipped_lines,
                "answer received"
            );
            return Ok(outcome.text);
        }

        if !outcome.is_loading() {
            tracing::warn!(
                request_id = %request.request_id,
                done_reason = ?outcome.done_reason,
                "stream ended without content"
            );
            return Ok(NO_ANSWER_PLACEHOLDER.to_string());
        }

        if !retry.can_retry() {
            tracing::warn!(
                request_id = %request.request_id,
                attempts = retry.attempts_made(),
                "model still loading, giving up"
            );
            return Ok(LOADING_PLACEHOLDER.to_string());
        }

        tracing::info!(
            request_id = %request.request_id,
            delay_secs = policy.delay.as_secs_f32(),
            "model is loading, retrying"
        );
        tokio::time::sleep(policy.delay).await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};

    use crate::inference::dispatch::{ui_channel, UiReceiver};
    use crate::inference::errors::ErrorKind;
    use crate::inference::streaming::ByteStream;

    const LOADING_BODY: &str = "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"load\"}\n";

    #[derive(Clone)]
    enum Reply {
        Body(String),
        Refused,
        Status(u16),
        Panic,
    }

    /// Replays `replies` in order; the last one repeats forever.
    struct ScriptedTransport {
        replies: Vec<Reply>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_chat_stream(&self, _: &ChatPayload) -> Result<ByteStream, RetrievalError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies[n.min(self.replies.len() - 1)].clone();
            match reply {
                Reply::Body(body) => {
                    // One line per chunk, like a real chunked response.
                    let parts: Vec<Result<Vec<u8>, RetrievalError>> = body
                        .split_inclusive('\n')
                        .map(|l| Ok(l.as_bytes().to_vec()))
                        .collect();
                    Ok(stream::iter(parts).boxed())
                }
                Reply::Refused => Err(RetrievalError::ConnectionFailed {
                    endpoint: "http://localhost:11434/api/chat".into(),
                    reason: "connection refused".into(),
                }),
                Reply::Status(status) => Err(RetrievalError::HttpError {
                    status,
                    body: "boom".into(),
                }),
                Reply::Panic => panic!("transport exploded"),
            }
        }

        async fn fetch_models(&self) -> Result<serde_json::Value, RetrievalError> {
            Ok(serde_json::json!([]))
        }
    }

    fn answer_body(fragments: &[&str]) -> String {
        let mut body = String::new();
        for f in fragments {
            body.push_str(
                &serde_json::json!({"message": {"role": "assistant", "content": f}, "done": false})
                    .to_string(),
            );
            body.push('\n');
        }
        body.push_str("{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n");
        body
    }

    fn pipeline(transport: Arc<ScriptedTransport>) -> (AnswerPipeline, UiReceiver) {
        let (queue, rx) = ui_channel();
        (AnswerPipeline::new(transport, Arc::new(queue)), rx)
    }

    fn drain(rx: &mut UiReceiver) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    /// Assert the busy/completed/busy shape and return the result.
    fn single_result(events: &[UiEvent], request_id: Uuid) -> RetrievalResult {
        assert_eq!(events.len(), 3, "events: {events:?}");
        assert_eq!(
            events[0],
            UiEvent::BusyChanged { request_id, busy: true }
        );
        assert_eq!(
            events[2],
            UiEvent::BusyChanged { request_id, busy: false }
        );
        match &events[1] {
            UiEvent::Completed(c) => {
                assert_eq!(c.request_id, request_id);
                c.result.clone()
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_answer_is_trimmed_concatenation() {
        let transport = ScriptedTransport::new(vec![Reply::Body(answer_body(&[
            "\n Rust ", "is a ", "systems language. \n",
        ]))]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "intro", "What is Rust?");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            single_result(&events, id),
            RetrievalResult::Answer("Rust is a systems language.".into())
        );
        assert_eq!(transport.calls(), 1);

        match &events[1] {
            UiEvent::Completed(c) => {
                assert_eq!(c.model_id, "llama3");
                assert_eq!(c.topic, "intro");
                assert_eq!(c.question, "What is Rust?");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_transport_error_reported_once() {
        let transport = ScriptedTransport::new(vec![Reply::Refused]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "hello?");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        let result = single_result(&drain(&mut rx), id);
        assert!(matches!(
            result,
            RetrievalResult::Failure { kind: ErrorKind::Transport, .. }
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_http_status_is_transport_error() {
        let transport = ScriptedTransport::new(vec![Reply::Status(500)]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "hello?");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        match single_result(&drain(&mut rx), id) {
            RetrievalResult::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::Transport);
                assert!(message.contains("500"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_server_error_not_retried() {
        let body = format!(
            "{}\n{}\n",
            serde_json::json!({"message": {"content": "par"}, "done": false}),
            serde_json::json!({"error": "model 'ghost' not found, try pulling it first"})
        );
        let transport = ScriptedTransport::new(vec![Reply::Body(body)]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("ghost", "", "boo");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        match single_result(&drain(&mut rx), id) {
            RetrievalResult::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::Server);
                assert!(message.contains("not found"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_then_answer_retries_twice() {
        let transport = ScriptedTransport::new(vec![
            Reply::Body(LOADING_BODY.into()),
            Reply::Body(LOADING_BODY.into()),
            Reply::Body(answer_body(&["ready now"])),
        ]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "are you there?");
        let id = request.request_id;
        let started = tokio::time::Instant::now();
        pipeline.submit(request).unwrap().await.unwrap();

        assert!(started.elapsed() >= LOAD_RETRY_DELAY * 2);
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            single_result(&drain(&mut rx), id),
            RetrievalResult::Answer("ready now".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_forever_gives_placeholder_after_three() {
        let transport = ScriptedTransport::new(vec![Reply::Body(LOADING_BODY.into())]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "hello");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        assert_eq!(transport.calls(), MAX_ATTEMPTS as usize);
        assert_eq!(
            single_result(&drain(&mut rx), id),
            RetrievalResult::Answer(LOADING_PLACEHOLDER.into())
        );
    }

    #[tokio::test]
    async fn test_empty_stream_gives_no_answer_placeholder() {
        let transport = ScriptedTransport::new(vec![Reply::Body(answer_body(&["  ", "\n"]))]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "say nothing");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        assert_eq!(
            single_result(&drain(&mut rx), id),
            RetrievalResult::Answer(NO_ANSWER_PLACEHOLDER.into())
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_change_answer() {
        let clean = answer_body(&["one ", "two"]);
        let mut lines: Vec<&str> = clean.split_inclusive('\n').collect();
        lines.insert(1, "{\"message\": oops\n");
        let noisy: String = lines.concat();

        let transport = ScriptedTransport::new(vec![Reply::Body(noisy)]);
        let (pipeline, mut rx) = pipeline(transport);
        let request = ChatRequest::new("llama3", "", "count");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        assert_eq!(
            single_result(&drain(&mut rx), id),
            RetrievalResult::Answer("one two".into())
        );
    }

    #[tokio::test]
    async fn test_validation_never_touches_transport() {
        let transport = ScriptedTransport::new(vec![Reply::Body(answer_body(&["x"]))]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let cases = [
            ChatRequest::new("llama3", "topic", ""),
            ChatRequest::new("llama3", "topic", "   \n\t"),
            ChatRequest::new("", "topic", "question"),
            ChatRequest::new(UNSELECTED_MODEL, "topic", "question"),
        ];
        for request in cases {
            let err = pipeline.submit(request).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        tokio::task::yield_now().await;
        assert_eq!(transport.calls(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submissions_are_independent() {
        let transport = ScriptedTransport::new(vec![Reply::Body(answer_body(&["same answer"]))]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let first = ChatRequest::new("llama3", "", "first");
        let second = ChatRequest::new("llama3", "", "second");
        let ids = [first.request_id, second.request_id];
        let h1 = pipeline.submit(first).unwrap();
        let h2 = pipeline.submit(second).unwrap();
        h1.await.unwrap();
        h2.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 6);
        for id in ids {
            let mine: Vec<&UiEvent> = events
                .iter()
                .filter(|e| match e {
                    UiEvent::BusyChanged { request_id, .. } => *request_id == id,
                    UiEvent::Completed(c) => c.request_id == id,
                    UiEvent::ModelsListed(_) => false,
                })
                .collect();
            assert_eq!(mine.len(), 3);
            assert_eq!(*mine[0], UiEvent::BusyChanged { request_id: id, busy: true });
            assert!(matches!(mine[1], UiEvent::Completed(_)));
            assert_eq!(*mine[2], UiEvent::BusyChanged { request_id: id, busy: false });
        }
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_panicking_transport_still_completes() {
        let transport = ScriptedTransport::new(vec![Reply::Panic]);
        let (pipeline, mut rx) = pipeline(transport.clone());

        let request = ChatRequest::new("llama3", "", "hello?");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        match single_result(&drain(&mut rx), id) {
            RetrievalResult::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::Transport);
                assert!(message.contains("transport exploded"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Holds the UI receiver and records what had arrived when the chat
    /// request was opened.
    struct BusyObserver {
        rx: Mutex<UiReceiver>,
        seen_at_send: Mutex<Vec<UiEvent>>,
    }

    #[async_trait]
    impl ChatTransport for BusyObserver {
        async fn open_chat_stream(&self, _: &ChatPayload) -> Result<ByteStream, RetrievalError> {
            let mut rx = self.rx.lock().unwrap();
            let mut seen = self.seen_at_send.lock().unwrap();
            while let Ok(event) = rx.try_recv() {
                seen.push(event);
            }
            let body: Result<Vec<u8>, RetrievalError> =
                Ok(answer_body(&["ok"]).into_bytes());
            Ok(stream::iter(vec![body]).boxed())
        }

        async fn fetch_models(&self) -> Result<serde_json::Value, RetrievalError> {
            Ok(serde_json::json!([]))
        }
    }

    #[tokio::test]
    async fn test_busy_posted_before_request_is_sent() {
        let (queue, rx) = ui_channel();
        let observer = Arc::new(BusyObserver {
            rx: Mutex::new(rx),
            seen_at_send: Mutex::new(Vec::new()),
        });
        let pipeline = AnswerPipeline::new(observer.clone(), Arc::new(queue));

        let request = ChatRequest::new("llama3", "", "ready?");
        let id = request.request_id;
        pipeline.submit(request).unwrap().await.unwrap();

        assert_eq!(
            *observer.seen_at_send.lock().unwrap(),
            vec![UiEvent::BusyChanged { request_id: id, busy: true }]
        );
    }

    #[test]
    fn test_retry_state_bounds() {
        let mut state = RetryState::new(MAX_ATTEMPTS);
        assert!(state.can_retry());
        for _ in 0..MAX_ATTEMPTS {
            state.record_attempt();
        }
        assert_eq!(state.attempts_made(), MAX_ATTEMPTS);
        assert!(!state.can_retry());
    }

    #[test]
    fn test_retry_state_zero_means_one_attempt() {
        let mut state = RetryState::new(0);
        state.record_attempt();
        assert!(!state.can_retry());
    }
}
