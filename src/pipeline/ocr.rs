//! OCR stage: runs the external OCR program against an uploaded binary.
//!
//! The program is called as `<command> <args..> <input> <language> --output <path-hint>` and must
//! print the absolute path of the text file it wrote as the last line on stdout. Anything on
//! stderr, a non-zero exit, a timeout, or output beyond the byte cap fails the stage.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use uuid::Uuid;

use crate::{
    config::Config,
    metrics::PipelineMetrics,
    source::{FileRef, Source, Stage, TEXT_PLAIN},
    storage::FileStorage,
};

use super::{
    lifecycle::LifecycleController,
    types::{PipelineError, StageArtifact, StageEntry},
};

const READ_CHUNK: usize = 8 * 1024;

/// How the OCR program is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrSettings {
    /// Executable to run.
    pub program: String,
    /// Arguments placed before the per-source ones.
    pub args: Vec<String>,
    /// Language hint passed to the program.
    pub language: String,
    /// Wall-clock bound for one run.
    pub timeout: Duration,
    /// Cap on combined stdout and stderr bytes.
    pub max_output_bytes: usize,
}

impl OcrSettings {
    /// Derive settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.ocr_command.clone(),
            args: config.ocr_args.clone(),
            language: config.ocr_language.clone(),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
            max_output_bytes: config.ocr_max_output_bytes,
        }
    }
}

/// Runs the OCR stage for one source at a time.
pub struct OcrRunner {
    settings: OcrSettings,
    lifecycle: LifecycleController,
    storage: Arc<dyn FileStorage>,
    metrics: Arc<PipelineMetrics>,
}

impl OcrRunner {
    /// Assemble a runner from its collaborators.
    pub fn new(
        settings: OcrSettings,
        lifecycle: LifecycleController,
        storage: Arc<dyn FileStorage>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            settings,
            lifecycle,
            storage,
            metrics,
        }
    }

    /// Enter the OCR stage, run the program once, and record the result.
    ///
    /// A failed run, including a failed write of the result, moves the source to `failed` before
    /// the error is returned.
    pub async fn run(&self, source_id: Uuid) -> Result<Source, PipelineError> {
        let source = match self.lifecycle.begin_stage(source_id, Stage::Ocr).await? {
            StageEntry::Started(source) => source,
            StageEntry::AlreadyRunning => {
                return Err(PipelineError::AlreadyInProgress {
                    source_id,
                    stage: Stage::Ocr,
                });
            }
        };

        let Some(binary) = source.source_file_ref.as_ref() else {
            let error = PipelineError::MissingPrerequisite {
                source_id,
                missing: "source file",
            };
            self.lifecycle.fail_stage(source_id, &error).await?;
            return Err(error);
        };
        let input = self.storage.resolve_path(binary);

        let outcome = async {
            let text_file_ref = self.extract(&input).await?;
            self.lifecycle
                .complete_stage(source_id, StageArtifact::Ocr { text_file_ref })
                .await
        };
        match outcome.await {
            Ok(source) => {
                self.metrics.record_ocr();
                Ok(source)
            }
            Err(error) => {
                self.metrics.record_failure();
                self.lifecycle.fail_stage(source_id, &error).await?;
                Err(error)
            }
        }
    }

    /// Run the OCR program on `input` and wrap the produced text file.
    pub async fn extract(&self, input: &Path) -> Result<FileRef, PipelineError> {
        let output_hint = output_hint(input);
        tracing::info!(
            input = %input.display(),
            language = %self.settings.language,
            "Running OCR"
        );

        let capture = tokio::time::timeout(self.settings.timeout, self.execute(input, &output_hint))
            .await
            .map_err(|_| {
                PipelineError::ProcessFailure(format!(
                    "timed out after {}s",
                    self.settings.timeout.as_secs_f32()
                ))
            })??;

        if !capture.stderr.trim().is_empty() {
            return Err(PipelineError::ProcessFailure(format!(
                "stderr: {}",
                capture.stderr.trim()
            )));
        }
        if !capture.success {
            return Err(PipelineError::ProcessFailure(format!(
                "exited with {}",
                capture.exit
            )));
        }

        let path = reported_path(&capture.stdout)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|error| {
            PipelineError::ProcessFailure(format!(
                "reported output {} is unreadable: {error}",
                path.display()
            ))
        })?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("ocr.txt")
            .to_string();

        tracing::debug!(output = %path.display(), size = metadata.len(), "OCR produced text");
        Ok(FileRef::new(name, metadata.len(), TEXT_PLAIN, path))
    }

    async fn execute(&self, input: &Path, output_hint: &Path) -> Result<Capture, PipelineError> {
        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(input)
            .arg(&self.settings.language)
            .arg("--output")
            .arg(output_hint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                PipelineError::ProcessFailure(format!(
                    "failed to start '{}': {error}",
                    self.settings.program
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::ProcessFailure("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::ProcessFailure("stderr not captured".into()))?;

        let used = AtomicUsize::new(0);
        let limit = self.settings.max_output_bytes;
        let (stdout, stderr) = tokio::try_join!(
            read_capped(stdout, &used, limit),
            read_capped(stderr, &used, limit)
        )?;

        let status = child
            .wait()
            .await
            .map_err(|error| PipelineError::ProcessFailure(format!("wait failed: {error}")))?;

        Ok(Capture {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            success: status.success(),
            exit: status.to_string(),
        })
    }
}

struct Capture {
    stdout: String,
    stderr: String,
    success: bool,
    exit: String,
}

/// Drain `reader`, counting bytes against a budget shared with the other stream.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    used: &AtomicUsize,
    limit: usize,
) -> Result<Vec<u8>, PipelineError> {
    let mut collected = Vec::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|error| PipelineError::ProcessFailure(format!("read failed: {error}")))?;
        if read == 0 {
            return Ok(collected);
        }
        if used.fetch_add(read, Ordering::SeqCst) + read > limit {
            return Err(PipelineError::ProcessOutputOverflow { limit });
        }
        collected.extend_from_slice(&buffer[..read]);
    }
}

/// `<dir>/<stem>_ocr.txt` next to the input.
fn output_hint(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document");
    input.with_file_name(format!("{stem}_ocr.txt"))
}

fn reported_path(stdout: &str) -> Result<PathBuf, PipelineError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .ok_or_else(|| PipelineError::ProcessFailure("no output path on stdout".into()))?;
    let path = PathBuf::from(line);
    if !path.is_absolute() {
        return Err(PipelineError::ProcessFailure(format!(
            "output path '{line}' is not absolute"
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceStatus;
    use crate::storage::LocalStorage;
    use crate::store::{InMemoryStore, SourceStore};
    use crate::test_support::RejectingSwapStore;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        runner: OcrRunner,
        store: Arc<InMemoryStore>,
        storage: Arc<LocalStorage>,
        metrics: Arc<PipelineMetrics>,
    }

    fn fixture(script: &str, timeout: Duration, max_output_bytes: usize) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let script_path = dir.path().join("ocr.sh");
        std::fs::write(&script_path, script).expect("script");

        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(LocalStorage::new(dir.path().join("files")));
        let metrics = Arc::new(PipelineMetrics::new());
        let settings = OcrSettings {
            program: "sh".into(),
            args: vec![script_path.to_string_lossy().into_owned()],
            language: "de".into(),
            timeout,
            max_output_bytes,
        };
        let runner = OcrRunner::new(
            settings,
            LifecycleController::new(store.clone()),
            storage.clone(),
            metrics.clone(),
        );
        Fixture {
            _dir: dir,
            runner,
            store,
            storage,
            metrics,
        }
    }

    async fn uploaded_pdf(fixture: &Fixture) -> Uuid {
        let file = fixture
            .storage
            .write("scan.pdf", "application/pdf", b"%PDF-1.4")
            .await
            .expect("write");
        let mut source = Source::new("project");
        source.status = SourceStatus::Uploaded;
        source.source_file_ref = Some(file);
        let id = source.id;
        fixture.store.insert_source(source).await.expect("insert");
        id
    }

    async fn status_of(fixture: &Fixture, id: Uuid) -> SourceStatus {
        fixture
            .store
            .get_source(id)
            .await
            .expect("get")
            .expect("present")
            .status
    }

    const WRITES_TEXT: &str = r#"printf 'Erkannter Text' > "$4"
echo "$4"
"#;

    #[tokio::test]
    async fn successful_run_records_text_file() {
        let fixture = fixture(WRITES_TEXT, Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;

        let source = fixture.runner.run(id).await.expect("ocr");

        assert_eq!(source.status, SourceStatus::Processed);
        let text = source.text_file_ref.expect("text ref");
        assert_eq!(text.mime_type, TEXT_PLAIN);
        assert_eq!(text.size, "Erkannter Text".len() as u64);
        assert!(text.location.is_absolute());
        assert!(text.name.ends_with("_ocr.txt"));
        assert_eq!(fixture.metrics.snapshot().ocr_completed, 1);
    }

    #[tokio::test]
    async fn rejected_completion_write_fails_the_source() {
        let fixture = fixture(WRITES_TEXT, Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;
        let store = RejectingSwapStore::new(
            fixture.store.clone(),
            SourceStatus::Processing,
            SourceStatus::Processed,
        );
        let runner = OcrRunner::new(
            fixture.runner.settings.clone(),
            LifecycleController::new(Arc::new(store)),
            fixture.storage.clone(),
            fixture.metrics.clone(),
        );

        let error = runner.run(id).await.expect_err("completion rejected");

        assert!(matches!(error, PipelineError::Store(_)));
        assert_eq!(status_of(&fixture, id).await, SourceStatus::Failed);
        assert_eq!(fixture.metrics.snapshot().stage_failures, 1);
    }

    #[tokio::test]
    async fn arguments_follow_the_cli_contract() {
        let script = r#"[ "$2" = "de" ] || { echo "bad language $2" >&2; exit 2; }
[ "$3" = "--output" ] || { echo "bad flag $3" >&2; exit 2; }
printf 'ok' > "$4"
echo "$4"
"#;
        let fixture = fixture(script, Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;
        fixture.runner.run(id).await.expect("ocr");
    }

    #[tokio::test]
    async fn non_zero_exit_fails_the_source() {
        let fixture = fixture("exit 3\n", Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;

        let error = fixture.runner.run(id).await.expect_err("exit code");

        assert!(matches!(error, PipelineError::ProcessFailure(_)));
        assert_eq!(status_of(&fixture, id).await, SourceStatus::Failed);
        assert_eq!(fixture.metrics.snapshot().stage_failures, 1);
    }

    #[tokio::test]
    async fn stderr_output_fails_even_with_zero_exit() {
        let script = r#"printf 'x' > "$4"
echo "$4"
echo "warning: low contrast" >&2
"#;
        let fixture = fixture(script, Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;

        let error = fixture.runner.run(id).await.expect_err("stderr");

        assert!(matches!(error, PipelineError::ProcessFailure(ref message) if message.contains("low contrast")));
        let source = fixture.store.get_source(id).await.expect("get").expect("present");
        assert_eq!(source.status, SourceStatus::Failed);
        assert!(source.text_file_ref.is_none());
    }

    #[tokio::test]
    async fn oversized_output_is_an_overflow() {
        let script = "i=0\nwhile [ $i -lt 200 ]; do echo 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'; i=$((i+1)); done\n";
        let fixture = fixture(script, Duration::from_secs(10), 256);
        let id = uploaded_pdf(&fixture).await;

        let error = fixture.runner.run(id).await.expect_err("overflow");

        assert!(matches!(error, PipelineError::ProcessOutputOverflow { limit: 256 }));
        assert_eq!(status_of(&fixture, id).await, SourceStatus::Failed);
    }

    #[tokio::test]
    async fn hanging_process_times_out() {
        let fixture = fixture("sleep 5\n", Duration::from_millis(200), 1024);
        let id = uploaded_pdf(&fixture).await;

        let error = fixture.runner.run(id).await.expect_err("timeout");

        assert!(matches!(error, PipelineError::ProcessFailure(ref message) if message.contains("timed out")));
        assert_eq!(status_of(&fixture, id).await, SourceStatus::Failed);
    }

    #[tokio::test]
    async fn relative_output_path_is_rejected() {
        let fixture = fixture("echo out.txt\n", Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;

        let error = fixture.runner.run(id).await.expect_err("relative");
        assert!(matches!(error, PipelineError::ProcessFailure(ref message) if message.contains("not absolute")));
    }

    #[tokio::test]
    async fn running_stage_is_not_entered_twice() {
        let fixture = fixture(WRITES_TEXT, Duration::from_secs(10), 1024);
        let id = uploaded_pdf(&fixture).await;
        LifecycleController::new(fixture.store.clone())
            .begin_stage(id, Stage::Ocr)
            .await
            .expect("claim");

        let error = fixture.runner.run(id).await.expect_err("in progress");
        assert!(matches!(error, PipelineError::AlreadyInProgress { stage: Stage::Ocr, .. }));
        assert_eq!(status_of(&fixture, id).await, SourceStatus::Processing);
    }

    #[test]
    fn output_hint_sits_next_to_input() {
        assert_eq!(
            output_hint(Path::new("/data/uploads/scan.pdf")),
            PathBuf::from("/data/uploads/scan_ocr.txt")
        );
    }

    #[test]
    fn reported_path_uses_last_non_empty_line() {
        let path = reported_path("Loading model\n/tmp/out.txt\n\n").expect("path");
        assert_eq!(path, PathBuf::from("/tmp/out.txt"));
        assert!(reported_path("   \n").is_err());
    }
}
