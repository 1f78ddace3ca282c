//! Iteration controller - drives the request/extract/execute/evaluate loop

use crate::config::{DocumentSource, RunConfig};
use crate::prompt;
use doctai_error::{Error, Result};
use doctai_runtime::{
    ChatMessage, Conversation, IterationReport, LlmProvider, ProviderError, SandboxExecutor,
    ScriptExtractor, TerminalReason, TestRun, WorkDir,
};
use futures_util::future::join_all;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a run is in its loop
#[derive(Debug)]
enum State {
    Start,
    AwaitingAi,
    /// Holds the assistant text to extract scripts from
    Executing(String),
    Evaluating(IterationReport),
    Done {
        reason: TerminalReason,
        error: Option<String>,
    },
}

/// Verifies documentation sources against one provider
pub struct TestRunner<P: LlmProvider> {
    provider: P,
    config: RunConfig,
    extractor: ScriptExtractor,
}

impl<P: LlmProvider> TestRunner<P> {
    /// Fails with `ConfigInvalid` before any AI call when the config is unusable
    pub fn new(provider: P, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let extractor = ScriptExtractor::with_options(config.extractor);
        Ok(Self {
            provider,
            config,
            extractor,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Verify one source in its own working directory
    pub async fn run(&self, source: &DocumentSource, cancel: &CancellationToken) -> Result<TestRun> {
        let work_dir = WorkDir::create(self.config.work_dir.as_deref())
            .map_err(|e| e.with_context("source", source.id.clone()))?;
        Ok(self.run_in(source, work_dir, cancel).await)
    }

    /// Verify several sources as independent, concurrent runs.
    ///
    /// An explicit working directory shared by more than one source gets a
    /// sub-directory per source. All directories are created before the
    /// first AI call.
    pub async fn run_all(
        &self,
        sources: &[DocumentSource],
        cancel: &CancellationToken,
    ) -> Result<Vec<TestRun>> {
        if sources.is_empty() {
            return Err(Error::no_sources().with_operation("runner::run_all"));
        }

        let shared = sources.len() > 1;
        let mut work_dirs = Vec::with_capacity(sources.len());
        for source in sources {
            let work_dir = match self.config.work_dir.as_deref() {
                Some(root) if shared => WorkDir::create_for_source(root, &source.id),
                root => WorkDir::create(root),
            }
            .map_err(|e| {
                e.with_operation("runner::run_all")
                    .with_context("source", source.id.clone())
            })?;
            work_dirs.push(work_dir);
        }

        let runs = sources
            .iter()
            .zip(work_dirs)
            .map(|(source, work_dir)| self.run_in(source, work_dir, cancel));

        Ok(join_all(runs).await)
    }

    #[instrument(skip_all, fields(source = %source.id, provider = self.provider.name()))]
    async fn run_in(
        &self,
        source: &DocumentSource,
        work_dir: WorkDir,
        cancel: &CancellationToken,
    ) -> TestRun {
        let started = Instant::now();
        let mut conversation = Conversation::new();
        let mut executor =
            SandboxExecutor::new(work_dir.path(), &source.id, self.config.executor_config());
        let mut iterations: Vec<IterationReport> = Vec::new();

        info!(
            work_dir = %work_dir.path().display(),
            model = self.provider.model(),
            max_iterations = self.config.max_iterations,
            "starting test run"
        );

        let mut state = State::Start;
        let (reason, error) = loop {
            state = match state {
                State::Start => {
                    conversation.push(ChatMessage::system(self.config.templates.system.clone()));
                    conversation.push(ChatMessage::user(prompt::initial_prompt(
                        source,
                        self.config.instructions.as_deref(),
                    )));
                    State::AwaitingAi
                }

                State::AwaitingAi => {
                    debug!(messages = conversation.len(), "requesting scripts");
                    let reply = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        reply = self.provider.send_turn(&conversation) => Some(reply),
                    };

                    match reply {
                        None => State::Done {
                            reason: TerminalReason::Aborted,
                            error: None,
                        },
                        Some(Ok(message)) => {
                            let text = message.content.clone();
                            conversation.push(message);
                            State::Executing(text)
                        }
                        Some(Err(e)) => {
                            warn!(kind = %e.kind(), error = %e, "provider call failed");
                            State::Done {
                                reason: terminal_reason_for(&e),
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }

                State::Executing(text) => {
                    let index = iterations.len() + 1;
                    let candidates = self.extractor.extract(&text);
                    info!(iteration = index, candidates = candidates.len(), "executing scripts");

                    let mut results = Vec::with_capacity(candidates.len());
                    let mut interrupted = false;
                    for candidate in &candidates {
                        if cancel.is_cancelled() {
                            interrupted = true;
                            break;
                        }

                        let result = executor.execute(candidate, cancel).await;
                        info!(
                            iteration = index,
                            script = %result.name,
                            success = result.success,
                            exit_code = ?result.exit_code,
                            timed_out = result.timed_out,
                            "script finished"
                        );

                        let failed = !result.success;
                        results.push(result);
                        if cancel.is_cancelled() {
                            interrupted = true;
                            break;
                        }
                        if failed && self.config.stop_on_failure {
                            debug!(iteration = index, "stopping iteration after failure");
                            break;
                        }
                    }

                    let report = IterationReport::new(index, candidates.len(), results);
                    State::Evaluating(if interrupted {
                        debug!(iteration = index, "iteration interrupted");
                        report.interrupted()
                    } else {
                        report
                    })
                }

                State::Evaluating(report) => {
                    let index = report.index;
                    let success = report.success;
                    let feedback = if report.candidates_generated == 0 {
                        self.config.templates.no_scripts.clone()
                    } else {
                        prompt::feedback_prompt(&report)
                    };
                    iterations.push(report);

                    if cancel.is_cancelled() {
                        State::Done {
                            reason: TerminalReason::Aborted,
                            error: None,
                        }
                    } else if success {
                        State::Done {
                            reason: TerminalReason::Success,
                            error: None,
                        }
                    } else if index >= self.config.max_iterations {
                        State::Done {
                            reason: TerminalReason::Exhausted,
                            error: None,
                        }
                    } else {
                        conversation.push(ChatMessage::user(feedback));
                        State::AwaitingAi
                    }
                }

                State::Done { reason, error } => break (reason, error),
            };
        };

        executor.shutdown();

        let run = TestRun::finish(
            source.id.clone(),
            work_dir.into_path(),
            iterations,
            reason,
            error,
            started.elapsed(),
        );
        info!(
            reason = %run.terminal_reason,
            iterations = run.iterations.len(),
            passed = run.scripts_passed,
            failed = run.scripts_failed,
            "test run finished"
        );
        run
    }
}

fn terminal_reason_for(err: &ProviderError) -> TerminalReason {
    match err {
        ProviderError::Auth(_) => TerminalReason::AuthenticationError,
        other => TerminalReason::ProviderError(other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctai_error::ErrorKind;
    use doctai_runtime::{ProviderErrorKind, Role};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned replies and records every conversation it is sent
    struct ScriptedProvider {
        replies: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        /// Returned once the queue is empty
        fallback: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<std::result::Result<String, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: "I have nothing to add.".into(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn always(reply: &str) -> Self {
            let mut provider = Self::new(vec![]);
            provider.fallback = reply.into();
            provider
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn conversation(&self, call: usize) -> Vec<ChatMessage> {
            self.seen.lock().unwrap()[call].clone()
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "stub"
        }

        async fn send_turn(
            &self,
            conversation: &Conversation,
        ) -> std::result::Result<ChatMessage, ProviderError> {
            self.seen
                .lock()
                .unwrap()
                .push(conversation.messages().to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
                .map(ChatMessage::assistant)
        }
    }

    /// Never answers; lets cancellation win the race
    struct HangingProvider;

    impl LlmProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        fn model(&self) -> &str {
            "stub"
        }

        async fn send_turn(
            &self,
            _conversation: &Conversation,
        ) -> std::result::Result<ChatMessage, ProviderError> {
            std::future::pending().await
        }
    }

    /// Cancels the run while answering, then hands back its reply
    struct CancellingProvider {
        token: CancellationToken,
        reply: String,
    }

    impl LlmProvider for CancellingProvider {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn model(&self) -> &str {
            "stub"
        }

        async fn send_turn(
            &self,
            _conversation: &Conversation,
        ) -> std::result::Result<ChatMessage, ProviderError> {
            self.token.cancel();
            Ok(ChatMessage::assistant(self.reply.clone()))
        }
    }

    fn config(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            work_dir: Some(dir.to_path_buf()),
            timeout_secs: 10,
            ..RunConfig::default()
        }
    }

    fn docs() -> DocumentSource {
        DocumentSource::new("docs/quickstart.md", "Run `echo hello` to say hello.")
    }

    const FAIL_THEN_PASS: &str =
        "First:\n```sh\necho A\nexit 1\n```\nThen:\n```sh\necho B\n```\n";

    #[tokio::test]
    async fn test_echo_hello_succeeds_on_first_iteration() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok("```bash\necho hello\n```".into())]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert!(run.overall_success);
        assert_eq!(run.terminal_reason, TerminalReason::Success);
        assert_eq!(run.iterations.len(), 1);
        assert_eq!(run.iterations[0].scripts.len(), 1);
        assert!(run.iterations[0].scripts[0].stdout.contains("hello"));
        assert_eq!(run.scripts_passed, 1);
        assert_eq!(runner.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_initial_conversation_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok("```sh\ntrue\n```".into())]);
        let runner = TestRunner::new(
            provider,
            RunConfig {
                instructions: Some("Assume Ubuntu.".into()),
                ..config(tmp.path())
            },
        )
        .unwrap();

        runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        let first = runner.provider().conversation(0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].role, Role::System);
        assert_eq!(first[1].role, Role::User);
        assert!(first[1]
            .content
            .contains("=== Documentation from: docs/quickstart.md ==="));
        assert!(first[1].content.contains("Assume Ubuntu."));
    }

    #[tokio::test]
    async fn test_stop_on_failure_skips_remaining_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok(FAIL_THEN_PASS.into())]);
        let runner = TestRunner::new(
            provider,
            RunConfig {
                stop_on_failure: true,
                max_iterations: 1,
                ..config(tmp.path())
            },
        )
        .unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        let iteration = &run.iterations[0];
        assert_eq!(iteration.candidates_generated, 2);
        assert_eq!(iteration.scripts.len(), 1);
        assert_eq!(iteration.scripts[0].exit_code, Some(1));
        assert!(!iteration.success);
        assert_eq!(run.terminal_reason, TerminalReason::Exhausted);
    }

    #[tokio::test]
    async fn test_without_stop_on_failure_all_scripts_run() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok(FAIL_THEN_PASS.into())]);
        let runner = TestRunner::new(
            provider,
            RunConfig {
                max_iterations: 1,
                ..config(tmp.path())
            },
        )
        .unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        let scripts = &run.iterations[0].scripts;
        assert_eq!(scripts.len(), 2);
        assert!(!scripts[0].success);
        assert!(scripts[1].success);
        assert_eq!(scripts[1].stdout, "B\n");
        assert_eq!(run.scripts_failed, 1);
        assert!(!run.overall_success);
    }

    #[tokio::test]
    async fn test_no_scripts_exhausts_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::always("Sure! ```text\nnothing here\n```");
        let runner = TestRunner::new(
            provider,
            RunConfig {
                max_iterations: 2,
                ..config(tmp.path())
            },
        )
        .unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(run.terminal_reason, TerminalReason::Exhausted);
        assert_eq!(run.iterations.len(), 2);
        assert!(run.iterations.iter().all(|i| i.candidates_generated == 0));
        assert_eq!(runner.provider().calls(), 2);

        let second = runner.provider().conversation(1);
        let last = second.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, runner.config().templates.no_scripts);
    }

    #[tokio::test]
    async fn test_failure_feedback_then_success() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok("```bash\necho broken >&2\nexit 2\n```".into()),
            Ok("```bash\necho fixed\n```".into()),
        ]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert!(run.overall_success);
        assert_eq!(run.iterations.len(), 2);
        assert!(!run.iterations[0].success);
        assert!(run.iterations[1].success);

        // system, docs, reply, feedback
        let second = runner.provider().conversation(1);
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert!(second[3].content.contains("FAILED (exit code 2)"));
        assert!(second[3].content.contains("broken"));
    }

    #[tokio::test]
    async fn test_auth_error_ends_run_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Auth("invalid key".into()))]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(run.terminal_reason, TerminalReason::AuthenticationError);
        assert!(run.iterations.is_empty());
        assert_eq!(run.scripts_executed, 0);
        assert!(run.error.as_deref().unwrap_or_default().contains("invalid key"));
        assert_eq!(runner.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_provider_errors_are_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok("```sh\nexit 1\n```".into()),
            Err(ProviderError::RateLimited { retry_after: Some(30) }),
        ]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(
            run.terminal_reason,
            TerminalReason::ProviderError(ProviderErrorKind::RateLimited)
        );
        assert_eq!(run.iterations.len(), 1);
        assert_eq!(runner.provider().calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_ends_run() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Err(ProviderError::MalformedResponse(
            "no choices in response".into(),
        ))]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(
            run.terminal_reason,
            TerminalReason::ProviderError(ProviderErrorKind::MalformedResponse)
        );
        assert_eq!(run.provider_error, Some(ProviderErrorKind::MalformedResponse));
        assert!(run.iterations.is_empty());
        assert!(!run.overall_success);
        assert_eq!(runner.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_network_error_ends_run() {
        let tmp = tempfile::tempdir().unwrap();
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Network("connection refused".into()))]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(
            run.terminal_reason,
            TerminalReason::ProviderError(ProviderErrorKind::NetworkError)
        );
        assert!(run.error.as_deref().unwrap_or_default().contains("connection refused"));
        assert_eq!(runner.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_scripts_are_kept_in_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok("```sh\necho kept > out.txt\n```".into())]);
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &CancellationToken::new()).await.unwrap();

        assert_eq!(run.work_dir, tmp.path());
        let script = tmp.path().join(&run.iterations[0].scripts[0].name);
        assert!(script.is_file());
        assert!(tmp.path().join("out.txt").is_file());
    }

    #[tokio::test]
    async fn test_cancel_during_script_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![Ok("```sh\nsleep 30\n```\n```sh\necho never\n```".into())]);
        let runner = TestRunner::new(
            provider,
            RunConfig {
                timeout_secs: 60,
                ..config(tmp.path())
            },
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let run = runner.run(&docs(), &cancel).await.unwrap();

        assert_eq!(run.terminal_reason, TerminalReason::Aborted);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(run.iterations.len(), 1);
        assert_eq!(run.iterations[0].scripts.len(), 1);
        assert!(!run.iterations[0].scripts[0].success);
        assert!(run.iterations[0].interrupted);
    }

    #[tokio::test]
    async fn test_cancel_before_scripts_run_is_not_a_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let provider = CancellingProvider {
            token: cancel.clone(),
            reply: "```sh\necho one\n```\n```sh\necho two\n```".into(),
        };
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let run = runner.run(&docs(), &cancel).await.unwrap();

        assert_eq!(run.terminal_reason, TerminalReason::Aborted);
        assert_eq!(run.iterations.len(), 1);
        let iteration = &run.iterations[0];
        assert_eq!(iteration.candidates_generated, 2);
        assert!(iteration.scripts.is_empty());
        assert!(iteration.interrupted);
        assert!(!iteration.success);
        assert!(!run.overall_success);
        assert_eq!(run.scripts_executed, 0);
    }

    #[tokio::test]
    async fn test_cancel_during_provider_call() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(HangingProvider, config(tmp.path())).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = runner.run(&docs(), &cancel).await.unwrap();

        assert_eq!(run.terminal_reason, TerminalReason::Aborted);
        assert!(run.iterations.is_empty());
    }

    #[tokio::test]
    async fn test_run_all_requires_sources() {
        let runner = TestRunner::new(ScriptedProvider::new(vec![]), RunConfig::default()).unwrap();
        let err = runner
            .run_all(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSources);
    }

    #[tokio::test]
    async fn test_run_all_uses_per_source_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::always("```sh\npwd\n```");
        let runner = TestRunner::new(provider, config(tmp.path())).unwrap();

        let sources = vec![
            DocumentSource::new("guide/a.md", "A"),
            DocumentSource::new("guide/b.md", "B"),
        ];
        let runs = runner
            .run_all(&sources, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].source_id, "guide/a.md");
        assert_eq!(runs[0].work_dir, tmp.path().join("guide_a.md"));
        assert_eq!(runs[1].work_dir, tmp.path().join("guide_b.md"));
        assert!(runs.iter().all(|r| r.overall_success));
        assert_eq!(runner.provider().calls(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let result = TestRunner::new(
            ScriptedProvider::new(vec![]),
            RunConfig {
                max_iterations: 0,
                ..RunConfig::default()
            },
        );
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::ConfigInvalid));
    }
}
