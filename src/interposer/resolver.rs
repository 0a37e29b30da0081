//! Resolver bridge
//!
//! Answers a question request by running a second, read-only process once
//! with a rendered prompt and reading a single selection digit from its
//! output. Every failure degrades to the first option of each question.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::types::{AnswerSet, QuestionRequest};
use crate::config::{InterposerConfig, ReadOnlyTools};
use crate::error::ResolverFailure;

/// Answers chosen for one request, and why they fell back if they did
#[derive(Debug)]
pub struct Resolution {
    pub answers: AnswerSet,
    pub failure: Option<ResolverFailure>,
}

impl Resolution {
    pub fn fallback(request: &QuestionRequest, failure: ResolverFailure) -> Self {
        Self {
            answers: request.default_answers(),
            failure: Some(failure),
        }
    }
}

/// Something that can choose answers for a question request
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Always returns one answer per question
    async fn resolve(&self, request: &QuestionRequest) -> Resolution;
}

// ============================================================================
// Prompt Rendering
// ============================================================================

/// Render the resolver prompt for a request
pub fn render_prompt(request: &QuestionRequest) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a reviewer supervising the work of an automated coding agent.\n");
    prompt.push_str("Pick the best option for each question below.\n");
    prompt.push_str("Reply with only the number of the chosen option (1, 2, 3...) for each question.\n\n");

    for (i, question) in request.questions.iter().enumerate() {
        match &question.header {
            Some(header) if !header.is_empty() => {
                let _ = writeln!(prompt, "Question {} [{}]: {}", i + 1, header, question.text);
            }
            _ => {
                let _ = writeln!(prompt, "Question {}: {}", i + 1, question.text);
            }
        }
        if question.allow_multiple_select {
            prompt.push_str("(Several options may apply; choose the single best one.)\n");
        }
        prompt.push_str("Options:\n");
        for (j, option) in question.options.iter().enumerate() {
            let _ = writeln!(prompt, "  {}. {}: {}", j + 1, option.label, option.description);
        }
        prompt.push('\n');
    }

    prompt
}

/// Derive answers from resolver output.
///
/// The first digit 1-9 anywhere in the trimmed output selects an option of
/// the first question; every other question gets its first option.
pub fn parse_selection(output: &str, request: &QuestionRequest) -> Resolution {
    let Some(digit) = output.trim().chars().find(|c| ('1'..='9').contains(c)) else {
        return Resolution::fallback(request, ResolverFailure::NoSelection);
    };

    let selected = (digit as u8 - b'1') as usize;
    let options = request.questions.first().map(|q| q.options.len()).unwrap_or(0);
    if selected >= options {
        return Resolution::fallback(
            request,
            ResolverFailure::OutOfRange {
                selected: selected + 1,
                options,
            },
        );
    }

    Resolution {
        answers: AnswerSet::for_request(request, &[selected]),
        failure: None,
    }
}

// ============================================================================
// Subprocess Bridge
// ============================================================================

/// Resolver backed by a subprocess restricted to read-only tools
#[derive(Debug, Clone)]
pub struct ResolverBridge {
    program: String,
    base_args: Vec<String>,
    tools: ReadOnlyTools,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ResolverBridge {
    pub fn new(program: impl Into<String>, tools: ReadOnlyTools, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            tools,
            timeout,
            working_dir: None,
        }
    }

    pub fn from_config(config: &InterposerConfig) -> Self {
        Self {
            program: config.resolver_binary.clone(),
            base_args: config.resolver_args.clone(),
            tools: config.resolver_tools.clone(),
            timeout: config.resolver_timeout,
            working_dir: config.working_dir.clone(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-p")
            .arg(prompt)
            .arg("--allowedTools")
            .arg(self.tools.as_arg());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the resolver once and return its stdout
    async fn invoke(&self, prompt: &str) -> Result<String, ResolverFailure> {
        let child = self.command(prompt).spawn().map_err(ResolverFailure::Spawn)?;

        // Dropping the wait on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(ResolverFailure::Io)?,
            Err(_) => return Err(ResolverFailure::Timeout(self.timeout)),
        };

        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "Resolver stderr");
        }
        if !output.status.success() {
            return Err(ResolverFailure::NonZeroExit(output.status.code()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Resolve for ResolverBridge {
    async fn resolve(&self, request: &QuestionRequest) -> Resolution {
        let prompt = render_prompt(request);
        debug!(
            request_id = %request.request_id,
            questions = request.questions.len(),
            program = %self.program,
            "Consulting resolver"
        );

        match self.invoke(&prompt).await {
            Ok(output) => {
                trace!(output = %output.trim(), "Resolver output");
                parse_selection(&output, request)
            }
            Err(failure) => Resolution::fallback(request, failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interposer::types::{Question, QuestionOption};

    fn request(option_counts: &[usize]) -> QuestionRequest {
        QuestionRequest {
            request_id: "t1".to_string(),
            questions: option_counts
                .iter()
                .enumerate()
                .map(|(i, &n)| Question {
                    text: format!("Question text {}", i + 1),
                    header: None,
                    options: (0..n)
                        .map(|j| QuestionOption {
                            label: format!("Label{}", j + 1),
                            description: format!("Desc{}", j + 1),
                        })
                        .collect(),
                    allow_multiple_select: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_prompt_enumerates_one_based() {
        let mut req = request(&[2, 3]);
        req.questions[1].header = Some("Scope".to_string());
        req.questions[1].allow_multiple_select = true;

        let prompt = render_prompt(&req);
        assert!(prompt.contains("only the number"));
        assert!(prompt.contains("Question 1: Question text 1\n"));
        assert!(prompt.contains("Question 2 [Scope]: Question text 2\n"));
        assert!(prompt.contains("  1. Label1: Desc1\n"));
        assert!(prompt.contains("  3. Label3: Desc3\n"));
        assert!(prompt.contains("Several options may apply"));
        assert!(prompt.find("Question 1").unwrap() < prompt.find("Question 2").unwrap());
    }

    #[test]
    fn test_parse_first_digit() {
        let req = request(&[3, 2]);
        let res = parse_selection("  I'd go with option 2, then 1\n", &req);
        assert!(res.failure.is_none());
        assert_eq!(res.answers.get(0), Some(1));
        assert_eq!(res.answers.get(1), Some(0));
    }

    #[test]
    fn test_parse_skips_zero() {
        let req = request(&[3]);
        let res = parse_selection("0 or 3", &req);
        assert_eq!(res.answers.get(0), Some(2));
    }

    #[test]
    fn test_parse_no_digit_falls_back() {
        let req = request(&[2, 2]);
        let res = parse_selection("Yes, proceed.", &req);
        assert!(matches!(res.failure, Some(ResolverFailure::NoSelection)));
        assert_eq!(res.answers, req.default_answers());
    }

    #[test]
    fn test_parse_out_of_range_falls_back() {
        let req = request(&[2]);
        let res = parse_selection("7", &req);
        assert!(matches!(
            res.failure,
            Some(ResolverFailure::OutOfRange { selected: 7, options: 2 })
        ));
        assert_eq!(res.answers.get(0), Some(0));
    }

    #[test]
    fn test_parse_totality_and_range() {
        let outputs = ["", "1", "2", "9", "abc", "3 then 4", "٣", "0000"];
        for n in 1..=4 {
            for k in 1..=5 {
                let counts: Vec<usize> = (0..n).map(|i| (i % k) + 1).collect();
                let req = request(&counts);
                for out in outputs {
                    let res = parse_selection(out, &req);
                    assert_eq!(res.answers.len(), n);
                    for (i, idx) in res.answers.iter() {
                        assert!(idx < req.questions[i].options.len());
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> ResolverBridge {
        ResolverBridge::new("sh", ReadOnlyTools::default(), timeout)
            .with_args(vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_success() {
        let bridge = sh("echo 2", Duration::from_secs(10));
        let res = bridge.resolve(&request(&[2])).await;
        assert!(res.failure.is_none());
        assert_eq!(res.answers.get(0), Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_passes_prompt_and_read_only_tools() {
        // $1 is the prompt, $2/$3 the tool flag
        let script = r#"case "$1" in *"Question 1: Question text 1"*) ;; *) exit 7;; esac
[ "$2" = "--allowedTools" ] && [ "$3" = "Read,Glob,Grep" ] || exit 8
echo 2"#;
        let bridge = sh(script, Duration::from_secs(10));
        let res = bridge.resolve(&request(&[2])).await;
        assert!(res.failure.is_none(), "{:?}", res.failure);
        assert_eq!(res.answers.get(0), Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_non_zero_exit() {
        let bridge = sh("echo 2; exit 3", Duration::from_secs(10));
        let res = bridge.resolve(&request(&[2, 2])).await;
        assert!(matches!(res.failure, Some(ResolverFailure::NonZeroExit(Some(3)))));
        assert_eq!(res.answers.get(0), Some(0));
        assert_eq!(res.answers.get(1), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_timeout() {
        let bridge = sh("exec sleep 10", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let res = bridge.resolve(&request(&[3])).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(res.failure, Some(ResolverFailure::Timeout(_))));
        assert_eq!(res.answers, request(&[3]).default_answers());
    }

    #[tokio::test]
    async fn test_bridge_missing_binary() {
        let bridge = ResolverBridge::new(
            "/nonexistent/resolver-binary",
            ReadOnlyTools::default(),
            Duration::from_secs(1),
        );
        let res = bridge.resolve(&request(&[2])).await;
        assert!(matches!(res.failure, Some(ResolverFailure::Spawn(_))));
        assert_eq!(res.answers.get(0), Some(0));
    }
}
