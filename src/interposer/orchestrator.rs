//! Interposer orchestrator
//!
//! Owns the worker, forwards every output line to the transcript, and runs
//! one resolve-and-answer cycle per detected question without ever pausing
//! the drain of the worker's output.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::answer::{AnswerEnvelope, EchoGuard};
use super::classify::{classify, extract_question_request};
use super::framer::LineFramer;
use super::resolver::{Resolve, ResolverBridge};
use super::transport::{self, BoxedReader};
use super::types::{InterposerState, QuestionRequest, RunSummary};
use crate::config::{AnswerFormat, InterposerConfig};
use crate::error::{InterposeError, Result};

/// Result of one resolve-and-answer cycle, handed back with the input stream
struct CycleOutcome<I> {
    input: I,
    request_id: String,
    resolver_failed: bool,
    write_failed: bool,
}

/// Mediates between one worker and the resolver
pub struct Interposer<R> {
    config: InterposerConfig,
    resolver: Arc<R>,
}

impl Interposer<ResolverBridge> {
    /// Interposer using the subprocess resolver described by `config`
    pub fn from_config(config: InterposerConfig) -> Result<Self> {
        config.validate()?;
        let resolver = ResolverBridge::from_config(&config);
        Ok(Self::new(config, resolver))
    }
}

impl<R: Resolve + 'static> Interposer<R> {
    pub fn new(config: InterposerConfig, resolver: R) -> Self {
        Self {
            config,
            resolver: Arc::new(resolver),
        }
    }

    pub fn config(&self) -> &InterposerConfig {
        &self.config
    }

    /// Launch the worker for `task`, interpose on it until its output closes
    /// and return its exit status with the run's counters.
    pub async fn run<T>(&self, task: &str, transcript: T) -> Result<RunSummary>
    where
        T: AsyncWrite + Unpin,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, state = InterposerState::Idle.as_str(), "Starting interposed run");

        let (mut process, channels) = transport::launch(&self.config, task)?;
        let diagnostics = channels.diagnostics.map(spawn_diagnostics_drain);

        let summary = match self
            .interpose(channels.output, channels.input, transcript, channels.shared)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Worker stream failed, stopping worker");
                process.kill().await;
                let _ = process.wait().await;
                return Err(e);
            }
        };

        let exit_code = process.wait().await?;
        if let Some(handle) = diagnostics {
            let _ = handle.await;
        }

        let summary = RunSummary { exit_code, ..summary };
        if let Err(e) = summary.exit_status() {
            warn!(run_id = %run_id, error = %e, "Worker did not succeed");
        }
        Ok(summary)
    }

    /// Interpose on already-connected worker streams.
    ///
    /// Returns once `output` is exhausted. `shared_channel` enables discarding
    /// echoes of our own answers. The returned summary's `exit_code` is 0;
    /// [`Interposer::run`] fills in the worker's status.
    pub async fn interpose<O, I, T>(
        &self,
        output: O,
        input: I,
        mut transcript: T,
        shared_channel: bool,
    ) -> Result<RunSummary>
    where
        O: AsyncRead + Unpin + Send + 'static,
        I: AsyncWrite + Unpin + Send + 'static,
        T: AsyncWrite + Unpin,
    {
        let mut state = InterposerState::Idle;
        let mut summary = RunSummary::default();

        let framer = LineFramer::with_max_frame(output, self.config.max_frame_bytes);
        let (line_tx, mut line_rx) = mpsc::channel(256);
        let reader = spawn_reader(framer, line_tx);

        let (done_tx, mut done_rx) = mpsc::channel::<CycleOutcome<I>>(1);
        let echo = shared_channel.then(|| Arc::new(Mutex::new(EchoGuard::new(self.config.answer_format))));

        // None while a cycle holds the writer
        let mut input = Some(input);
        // Cleared after the first failed write; the worker is still served
        let mut transcript_open = true;
        let mut cycle: Option<JoinHandle<()>> = None;

        transition(&mut state, InterposerState::Running);

        let result = loop {
            tokio::select! {
                biased;

                Some(outcome) = done_rx.recv() => {
                    cycle = None;
                    input = Some(record_outcome(&mut summary, outcome));
                    transition(&mut state, InterposerState::Running);
                }
                frame = line_rx.recv() => {
                    let line = match frame {
                        Some(Ok(line)) => line,
                        Some(Err(e)) if e.is_fatal() => break Err(e),
                        Some(Err(e)) => {
                            warn!(error = %e, "Skipping unreadable worker output");
                            continue;
                        }
                        None => break Ok(()),
                    };

                    if let Some(ref guard) = echo {
                        let is_echo = guard.lock().unwrap_or_else(|e| e.into_inner()).is_echo(&line);
                        if is_echo {
                            debug!("Discarded echo of our own answer");
                            summary.echoes_discarded += 1;
                            continue;
                        }
                    }

                    if transcript_open {
                        match forward(&mut transcript, &line).await {
                            Ok(()) => summary.lines_forwarded += 1,
                            Err(e) => {
                                warn!(error = %e, "Transcript write failed, no longer forwarding output");
                                transcript_open = false;
                            }
                        }
                    }

                    let Some(request) = self.detect(line) else {
                        continue;
                    };

                    if state == InterposerState::AwaitingAnswer {
                        warn!(
                            request_id = %request.request_id,
                            "Question arrived while another is outstanding, ignoring it"
                        );
                        summary.questions_rejected += 1;
                        continue;
                    }

                    let Some(writer) = input.take() else {
                        continue;
                    };
                    info!(
                        request_id = %request.request_id,
                        questions = request.questions.len(),
                        "Question detected, consulting resolver"
                    );
                    cycle = Some(tokio::spawn(run_cycle(
                        self.resolver.clone(),
                        request,
                        self.config.answer_format,
                        writer,
                        echo.clone(),
                        done_tx.clone(),
                    )));
                    transition(&mut state, InterposerState::AwaitingAnswer);
                }
            }
        };

        if let Some(handle) = cycle.take() {
            match done_rx.try_recv() {
                Ok(outcome) => {
                    record_outcome(&mut summary, outcome);
                }
                Err(_) => {
                    warn!("Worker output closed with a question outstanding, abandoning it");
                    handle.abort();
                }
            }
        }
        reader.abort();
        transition(&mut state, InterposerState::Terminated);

        result.map(|()| summary)
    }

    /// Classify a line and extract a question request, if it carries one
    fn detect(&self, line: Vec<u8>) -> Option<QuestionRequest> {
        if line.is_empty() {
            return None;
        }
        let envelope = classify(line);
        match extract_question_request(&envelope, &self.config.question_tool) {
            Ok(request) => request,
            Err(e) => {
                warn!(kind = envelope.kind.as_str(), error = %e, "Could not decode question, forwarding as-is");
                None
            }
        }
    }
}

/// Count a finished cycle and return the writer it held
fn record_outcome<I>(summary: &mut RunSummary, outcome: CycleOutcome<I>) -> I {
    if outcome.resolver_failed {
        summary.resolver_failures += 1;
    }
    if outcome.write_failed {
        summary.answer_write_failures += 1;
    } else {
        summary.questions_answered += 1;
    }
    debug!(request_id = %outcome.request_id, "Resolve cycle complete");
    outcome.input
}

fn transition(state: &mut InterposerState, next: InterposerState) {
    if *state != next {
        debug!(from = state.as_str(), to = next.as_str(), "State transition");
        *state = next;
    }
}

/// Write one line to the transcript, verbatim and newline-terminated
async fn forward<T: AsyncWrite + Unpin>(transcript: &mut T, line: &[u8]) -> Result<()> {
    transcript.write_all(line).await?;
    transcript.write_all(b"\n").await?;
    transcript.flush().await?;
    Ok(())
}

/// Drain the framer on its own task so output keeps flowing regardless of
/// what the processing loop is doing
fn spawn_reader<O>(
    mut framer: LineFramer<O>,
    tx: mpsc::Sender<Result<Vec<u8>>>,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            // The framer is fused, so an error is followed by end of stream
            let item = match framer.next_line().await {
                Ok(Some(line)) => Ok(line),
                Ok(None) => break,
                Err(e) => Err(e),
            };
            if tx.send(item).await.is_err() {
                break;
            }
        }
        debug!("Worker output reader finished");
    })
}

/// Copy the worker's diagnostic stream to our stderr
fn spawn_diagnostics_drain(mut diagnostics: BoxedReader) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stderr = tokio::io::stderr();
        if let Err(e) = tokio::io::copy(&mut diagnostics, &mut stderr).await {
            debug!(error = %e, "Worker diagnostics stream ended with error");
        }
    })
}

/// Resolve one request and write the answer, then hand the writer back
async fn run_cycle<R, I>(
    resolver: Arc<R>,
    request: QuestionRequest,
    format: AnswerFormat,
    mut input: I,
    echo: Option<Arc<Mutex<EchoGuard>>>,
    done: mpsc::Sender<CycleOutcome<I>>,
) where
    R: Resolve + 'static,
    I: AsyncWrite + Unpin + Send + 'static,
{
    let resolution = resolver.resolve(&request).await;
    let resolver_failed = match resolution.failure {
        Some(ref failure) => {
            warn!(
                request_id = %request.request_id,
                error = %failure,
                "Resolver failed, answering with first options"
            );
            true
        }
        None => false,
    };

    let write_failed = match AnswerEnvelope::build(format, &request, &resolution.answers) {
        Ok(envelope) => {
            // Recorded before writing so an echo can never outrun it
            if let Some(ref guard) = echo {
                guard.lock().unwrap_or_else(|e| e.into_inner()).record(&envelope);
            }
            match write_answer(&mut input, &envelope).await {
                Ok(()) => {
                    info!(
                        request_id = %request.request_id,
                        answers = ?resolution.answers.iter().collect::<Vec<_>>(),
                        "Answer sent to worker"
                    );
                    false
                }
                Err(e) => {
                    warn!(request_id = %request.request_id, error = %e, "Failed to write answer");
                    true
                }
            }
        }
        Err(e) => {
            warn!(request_id = %request.request_id, error = %e, "Failed to build answer");
            true
        }
    };

    let _ = done
        .send(CycleOutcome {
            input,
            request_id: request.request_id,
            resolver_failed,
            write_failed,
        })
        .await;
}

async fn write_answer<I: AsyncWrite + Unpin>(input: &mut I, envelope: &AnswerEnvelope) -> Result<()> {
    let write = async {
        input.write_all(envelope.as_bytes()).await?;
        input.flush().await
    };
    write.await.map_err(InterposeError::AnswerWrite)
}
