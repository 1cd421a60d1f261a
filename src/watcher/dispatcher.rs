//! Dispatcher stage.
//!
//! Consumes debounced events one at a time. Each event's file is read again
//! (it may have changed or vanished since the notification), sniffed for
//! binary content, and scanned for a marker. Only files carrying a marker
//! produce a generation call. Calls never overlap, so two edits of the same
//! working tree cannot race.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ChangeEvent;
use crate::generation::{
    GenerateOptions, GenerationError, GenerationOutput, Generator, SessionState,
};
use crate::marker::{MarkerMatch, MarkerSet};
use crate::report::Reporter;
use crate::utils::is_binary_content;

/// One marker-bearing file ready to be sent to the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub path: PathBuf,
    pub file_content: Vec<u8>,
    pub matched_marker: MarkerMatch,
}

impl DispatchRequest {
    /// Render the instruction text sent to the generator.
    pub fn instruction(&self, markers: &MarkerSet) -> String {
        let content = String::from_utf8_lossy(&self.file_content);
        let forms = markers
            .patterns()
            .iter()
            .map(|p| format!("\"{p}: <change>\""))
            .collect::<Vec<_>>()
            .join(" or ");
        let requested = if self.matched_marker.instruction.is_empty() {
            "(none given; infer the intended change from the code around the marker)"
        } else {
            self.matched_marker.instruction.as_str()
        };
        let example = markers
            .patterns()
            .first()
            .map(String::as_str)
            .unwrap_or("# @markwatch");

        format!(
            r#"The file "{path}" was just saved.

Current content of the file:

==========
{content}
==========

Comments of the form {forms} request an edit to the file they appear in.
Line {line} holds such a comment ("{pattern}").

Requested change: {requested}

Apply the requested change to the file.

IMPORTANT: once the change is applied, delete the marker comment line itself.

# Example
<before>
{example} rename add to multiply
def add(a, b):
    return a + b
</before>
<after>
def multiply(a, b):
    return a * b
</after>
"#,
            path = self.path.display(),
            line = self.matched_marker.line,
            pattern = self.matched_marker.pattern,
        )
    }
}

/// Why a debounced event did not reach the generator.
#[derive(Debug)]
pub enum SkipReason {
    Unreadable(io::Error),
    Binary,
    NoMarker,
}

/// What happened to one debounced event.
#[derive(Debug)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    Completed(GenerationOutput),
    Failed(GenerationError),
    /// Shutdown was requested while the generator was running.
    Aborted,
}

pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    markers: MarkerSet,
    options: GenerateOptions,
    state: SessionState,
    reporter: Reporter,
}

impl Dispatcher {
    pub fn new(
        generator: Arc<dyn Generator>,
        markers: MarkerSet,
        options: GenerateOptions,
        reporter: Reporter,
    ) -> Self {
        Self {
            generator,
            markers,
            options,
            state: SessionState::new(),
            reporter,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Re-read and re-validate `path`, producing a request if it carries a marker.
    pub async fn prepare(&self, path: &Path) -> Result<DispatchRequest, SkipReason> {
        let file_content = tokio::fs::read(path)
            .await
            .map_err(SkipReason::Unreadable)?;

        if is_binary_content(&file_content) {
            return Err(SkipReason::Binary);
        }

        let text = String::from_utf8_lossy(&file_content);
        let matched_marker = self.markers.find(&text).ok_or(SkipReason::NoMarker)?;

        Ok(DispatchRequest {
            path: path.to_path_buf(),
            file_content,
            matched_marker,
        })
    }

    /// Handle one debounced event to completion.
    pub async fn dispatch(
        &mut self,
        event: &ChangeEvent,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let request = match self.prepare(&event.path).await {
            Ok(request) => request,
            Err(reason) => return DispatchOutcome::Skipped(reason),
        };

        if cancel.is_cancelled() {
            return DispatchOutcome::Aborted;
        }

        let instruction = request.instruction(&self.markers);
        self.state.begin(&request.path, Utc::now());

        self.reporter
            .sending(&request.path, self.generator.name(), self.options.use_weak_model);
        crate::log_event!(
            "dispatch",
            "generating",
            "{} (marker on line {})",
            request.path.display(),
            request.matched_marker.line
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return DispatchOutcome::Aborted,
            result = self.generator.generate(&instruction, &self.state, self.options) => result,
        };

        match result {
            Ok(output) => DispatchOutcome::Completed(output),
            Err(e) => DispatchOutcome::Failed(e),
        }
    }

    /// Process events serially until cancelled or the input closes.
    pub async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<ChangeEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = input.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.reporter.change_detected(&event);
            match self.dispatch(&event, &cancel).await {
                DispatchOutcome::Completed(output) => self.reporter.result(&event.path, &output),
                DispatchOutcome::Failed(e) => {
                    tracing::error!("[dispatch] {}: {e}", event.path.display());
                    self.reporter.error(&event.path, &e);
                }
                DispatchOutcome::Skipped(SkipReason::Unreadable(e)) => {
                    tracing::warn!("[dispatch] failed to read {}: {e}", event.path.display());
                }
                DispatchOutcome::Skipped(SkipReason::Binary) => {
                    self.reporter.skipped_binary(&event.path);
                }
                DispatchOutcome::Skipped(SkipReason::NoMarker) => {
                    crate::debug_event!("dispatch", "no marker", "{}", event.path.display());
                }
                DispatchOutcome::Aborted => {
                    crate::debug_event!("dispatch", "aborted", "{}", event.path.display());
                    break;
                }
            }
        }
        crate::debug_event!("dispatch", "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Usage;
    use crate::watcher::ChangeOp;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingGenerator {
        calls: Mutex<Vec<(String, Option<PathBuf>, bool)>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(
            &self,
            instruction: &str,
            state: &SessionState,
            options: GenerateOptions,
        ) -> Result<GenerationOutput, GenerationError> {
            self.calls.lock().unwrap().push((
                instruction.to_string(),
                state.current().map(Path::to_path_buf),
                options.use_weak_model,
            ));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(GenerationError::Reported {
                    message: "rate limited".to_string(),
                });
            }
            Ok(GenerationOutput {
                text: "edited".to_string(),
                usage: Usage {
                    input_tokens: 7,
                    output_tokens: 3,
                    ..Usage::default()
                },
            })
        }
    }

    fn dispatcher(generator: Arc<RecordingGenerator>) -> Dispatcher {
        Dispatcher::new(
            generator,
            MarkerSet::default(),
            GenerateOptions {
                use_weak_model: true,
            },
            Reporter::default(),
        )
    }

    fn write(path: &Path) -> ChangeEvent {
        ChangeEvent::new(path, ChangeOp::Write)
    }

    #[tokio::test]
    async fn test_marker_file_is_dispatched() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("calc.py");
        fs::write(&file, "# @markwatch: rename add to multiply\ndef add(a, b):\n    return a * b\n")
            .unwrap();

        let generator = Arc::new(RecordingGenerator::default());
        let mut dispatcher = dispatcher(generator.clone());

        let outcome = dispatcher
            .dispatch(&write(&file), &CancellationToken::new())
            .await;
        match outcome {
            DispatchOutcome::Completed(output) => assert_eq!(output.usage.total_tokens(), 10),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (instruction, accessed, weak) = &calls[0];
        assert!(instruction.contains(&file.display().to_string()));
        assert!(instruction.contains("def add(a, b):"));
        assert!(instruction.contains("Requested change: rename add to multiply"));
        assert!(instruction.contains("delete the marker comment"));
        assert_eq!(accessed.as_deref(), Some(file.as_path()));
        assert!(*weak);
        assert!(dispatcher.state().last_accessed(&file).is_some());
    }

    #[tokio::test]
    async fn test_file_without_marker_is_skipped() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lib.rs");
        fs::write(&file, "// markwatch is mentioned but not as a marker\n").unwrap();

        let generator = Arc::new(RecordingGenerator::default());
        let mut dispatcher = dispatcher(generator.clone());

        let outcome = dispatcher
            .dispatch(&write(&file), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, DispatchOutcome::Skipped(SkipReason::NoMarker)));
        assert!(generator.calls.lock().unwrap().is_empty());
        assert!(dispatcher.state().last_accessed(&file).is_none());
        assert!(dispatcher.state().current().is_none());
    }

    #[tokio::test]
    async fn test_binary_and_missing_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        let blob = temp.path().join("blob.bin");
        fs::write(&blob, b"// @markwatch fix\0\x01").unwrap();

        let generator = Arc::new(RecordingGenerator::default());
        let mut dispatcher = dispatcher(generator.clone());
        let cancel = CancellationToken::new();

        let outcome = dispatcher.dispatch(&write(&blob), &cancel).await;
        assert!(matches!(outcome, DispatchOutcome::Skipped(SkipReason::Binary)));

        let missing = temp.path().join("deleted.rs");
        let outcome = dispatcher.dispatch(&write(&missing), &cancel).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Skipped(SkipReason::Unreadable(_))
        ));
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_error_is_absorbed() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a.rs");
        let second = temp.path().join("b.rs");
        fs::write(&first, "// @markwatch add docs\n").unwrap();
        fs::write(&second, "// @markwatch add docs\n").unwrap();

        let generator = Arc::new(RecordingGenerator {
            fail: true,
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(write(&first)).unwrap();
        tx.send(write(&second)).unwrap();
        drop(tx);

        dispatcher(generator.clone())
            .run(rx, CancellationToken::new())
            .await;

        assert_eq!(generator.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_serialized() {
        let temp = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = temp.path().join(format!("f{i}.rs"));
                fs::write(&path, "// @markwatch tidy\n").unwrap();
                path
            })
            .collect();

        let generator = Arc::new(RecordingGenerator {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        for file in &files {
            tx.send(write(file)).unwrap();
        }
        drop(tx);

        let started = tokio::time::Instant::now();
        dispatcher(generator.clone())
            .run(rx, CancellationToken::new())
            .await;

        assert!(started.elapsed() >= Duration::from_millis(300));
        let seen: Vec<PathBuf> = generator
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, p, _)| p.clone())
            .collect();
        assert_eq!(seen, files);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_call() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("slow.rs");
        fs::write(&file, "// @markwatch rewrite\n").unwrap();

        let generator = Arc::new(RecordingGenerator {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let mut dispatcher = dispatcher(generator);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = dispatcher.dispatch(&write(&file), &cancel).await;
        assert!(matches!(outcome, DispatchOutcome::Aborted));
    }

    #[tokio::test]
    async fn test_cancelled_before_call_is_not_sent() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("late.rs");
        fs::write(&file, "// @markwatch rewrite\n").unwrap();

        let generator = Arc::new(RecordingGenerator::default());
        let mut dispatcher = dispatcher(generator.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = dispatcher.dispatch(&write(&file), &cancel).await;
        assert!(matches!(outcome, DispatchOutcome::Aborted));
        assert!(generator.calls.lock().unwrap().is_empty());
        assert!(dispatcher.state().current().is_none());
    }

    #[test]
    fn test_instruction_without_text_asks_to_infer() {
        let request = DispatchRequest {
            path: PathBuf::from("/w/util.sh"),
            file_content: b"# @markwatch\necho hi\n".to_vec(),
            matched_marker: MarkerMatch {
                pattern: "# @markwatch".to_string(),
                instruction: String::new(),
                line: 1,
            },
        };

        let text = request.instruction(&MarkerSet::default());
        assert!(text.contains("infer the intended change"));
        assert!(text.contains("\"# @markwatch: <change>\" or \"// @markwatch: <change>\""));
        assert!(text.contains("Line 1 holds such a comment"));
    }
}
