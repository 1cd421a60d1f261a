//! Generation backend that shells out to an agent CLI.
//!
//! The instruction is written to the child's stdin and the result is read
//! from stdout. The agent runs with the watch root as its working directory,
//! so its own tools perform the edit.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerateOptions, GenerationError, GenerationOutput, Generator, SessionState, Usage};
use crate::config::{ConfigError, GenerationSettings};

/// Environment variable naming the file being edited.
pub const FILE_ENV: &str = "MARKWATCH_FILE";

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 2000;

/// Runs a configured command per generation request.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    weak_command: Vec<String>,
    json_output: bool,
    timeout: Duration,
    working_dir: PathBuf,
}

/// JSON envelope printed by agent CLIs in JSON output mode.
#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: UsageEnvelope,
    #[serde(default)]
    total_cost_usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            weak_command: command.clone(),
            command,
            json_output: false,
            timeout: Duration::from_secs(600),
            working_dir: working_dir.into(),
        }
    }

    /// Build from `[generation]` settings, rejecting empty commands up front.
    pub fn from_settings(
        settings: &GenerationSettings,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let generator = Self::new(settings.command_for(false)?.to_vec(), working_dir)
            .with_weak_command(settings.command_for(true)?.to_vec())
            .with_json_output(settings.json_output)
            .with_timeout(settings.timeout());
        Ok(generator)
    }

    /// Command used when the lighter backend is requested.
    pub fn with_weak_command(mut self, command: Vec<String>) -> Self {
        self.weak_command = command;
        self
    }

    pub fn with_json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn argv(&self, options: GenerateOptions) -> &[String] {
        if options.use_weak_model {
            &self.weak_command
        } else {
            &self.command
        }
    }

    fn parse_stdout(&self, stdout: &[u8]) -> Result<GenerationOutput, GenerationError> {
        let raw = String::from_utf8_lossy(stdout);
        if !self.json_output {
            return Ok(GenerationOutput {
                text: raw.trim_end().to_string(),
                usage: Usage::default(),
            });
        }
        parse_envelope(&raw)
    }
}

fn parse_envelope(raw: &str) -> Result<GenerationOutput, GenerationError> {
    let envelope: ResultEnvelope =
        serde_json::from_str(raw.trim()).map_err(|e| GenerationError::InvalidOutput {
            reason: e.to_string(),
        })?;

    let text = envelope.result.unwrap_or_default();
    if envelope.is_error {
        return Err(GenerationError::Reported { message: text });
    }

    Ok(GenerationOutput {
        text,
        usage: Usage {
            input_tokens: envelope.usage.input_tokens,
            output_tokens: envelope.usage.output_tokens,
            cache_write_tokens: envelope.usage.cache_creation_input_tokens,
            cache_read_tokens: envelope.usage.cache_read_input_tokens,
            cost_usd: envelope.total_cost_usd,
        },
    })
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }

    async fn generate(
        &self,
        instruction: &str,
        state: &SessionState,
        options: GenerateOptions,
    ) -> Result<GenerationOutput, GenerationError> {
        let Some((program, args)) = self.argv(options).split_first() else {
            return Err(GenerationError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        let program = program.clone();

        let mut command = Command::new(&program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = state.current() {
            command.env(FILE_ENV, path);
        }

        let mut child = command.spawn().map_err(|source| GenerationError::Spawn {
            program: program.clone(),
            source,
        })?;

        tracing::debug!(
            "[generation] spawned {program} ({} bytes of instruction)",
            instruction.len()
        );

        // Feed stdin while collecting output so large prompts cannot deadlock
        // against a child that writes before it finishes reading.
        let stdin = child.stdin.take();
        let payload = instruction.as_bytes().to_vec();
        let run = async move {
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(&payload).await?;
                    stdin.shutdown().await?;
                }
                Ok::<(), std::io::Error>(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    tracing::debug!("[generation] failed to write instruction: {e}");
                }
            }
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(|source| GenerationError::Io {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GenerationError::Failed {
                program,
                status: output.status.to_string(),
                stderr: excerpt(&output.stderr),
            });
        }

        self.parse_stdout(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::path::Path;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn generator(script: &str) -> CommandGenerator {
        CommandGenerator::new(sh(script), std::env::temp_dir())
    }

    #[test]
    fn test_parse_envelope() {
        let raw = r#"{"result":"done","is_error":false,"usage":{"input_tokens":10,"output_tokens":4,"cache_read_input_tokens":100},"total_cost_usd":0.0123}"#;
        let output = parse_envelope(raw).unwrap();
        assert_eq!(output.text, "done");
        assert_eq!(output.usage.input_tokens, 10);
        assert_eq!(output.usage.output_tokens, 4);
        assert_eq!(output.usage.cache_read_tokens, 100);
        assert_eq!(output.usage.cache_write_tokens, 0);
        assert_eq!(output.usage.cost_usd, Some(0.0123));
    }

    #[test]
    fn test_parse_envelope_error_flag() {
        let err = parse_envelope(r#"{"result":"quota exceeded","is_error":true}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Reported { ref message } if message == "quota exceeded"));
    }

    #[test]
    fn test_parse_envelope_rejects_plain_text() {
        let err = parse_envelope("not json").unwrap_err();
        assert!(matches!(err, GenerationError::InvalidOutput { .. }));
    }

    #[test]
    fn test_from_settings_uses_weak_command() {
        let settings = GenerationSettings {
            command: vec!["agent".to_string()],
            weak_command: Some(vec!["agent".to_string(), "--fast".to_string()]),
            json_output: true,
            timeout_secs: 5,
        };
        let generator = CommandGenerator::from_settings(&settings, "/tmp").unwrap();
        assert_eq!(generator.argv(GenerateOptions::default()), ["agent"]);
        assert_eq!(
            generator.argv(GenerateOptions {
                use_weak_model: true
            }),
            ["agent", "--fast"]
        );
        assert_eq!(generator.name(), "agent");
        assert!(generator.json_output);
        assert_eq!(generator.timeout, Duration::from_secs(5));
        assert_eq!(generator.working_dir, PathBuf::from("/tmp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_instruction_goes_to_stdin() {
        let output = generator("cat")
            .generate("please edit", &SessionState::new(), GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "please edit");
        assert!(output.usage.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_env_names_current_file() {
        let mut state = SessionState::new();
        let now = Utc::now();
        state.begin(Path::new("/w/src/earlier.rs"), now + TimeDelta::seconds(30));
        state.begin(Path::new("/w/src/lib.rs"), now);

        let output = generator(r#"cat > /dev/null; printf '%s' "$MARKWATCH_FILE""#)
            .generate("x", &state, GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "/w/src/lib.rs");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_env_unset_without_current_file() {
        let mut state = SessionState::new();
        state.record_access(Path::new("/w/src/lib.rs"), Utc::now());

        let output = generator(r#"cat > /dev/null; printf '%s' "${MARKWATCH_FILE-unset}""#)
            .generate("x", &state, GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "unset");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_json_output_mode() {
        let script = r#"cat > /dev/null; printf '{"result":"ok","usage":{"input_tokens":3,"output_tokens":2}}'"#;
        let output = generator(script)
            .with_json_output(true)
            .generate("x", &SessionState::new(), GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "ok");
        assert_eq!(output.usage.total_tokens(), 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let err = generator("cat > /dev/null; echo boom >&2; exit 3")
            .generate("x", &SessionState::new(), GenerateOptions::default())
            .await
            .unwrap_err();
        match err {
            GenerationError::Failed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let err = generator("sleep 5")
            .with_timeout(Duration::from_millis(100))
            .generate("x", &SessionState::new(), GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = CommandGenerator::new(
            vec!["markwatch-no-such-agent-binary".to_string()],
            std::env::temp_dir(),
        )
        .generate("x", &SessionState::new(), GenerateOptions::default())
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::Spawn { .. }));
    }
}
