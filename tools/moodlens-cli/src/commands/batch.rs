//! Classify every request of a JSONL manifest concurrently.
//!
//! Frames of the same session run in manifest order so smoothing sees them in
//! sequence; different sessions run in parallel on the blocking pool. Output
//! lines follow manifest order regardless of completion order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use moodlens_common::{epoch_secs_to_rfc3339, unix_timestamp_secs, AppConfig};
use moodlens_emotion_model::{Emotion, InferenceOutput, InferenceRequest, SmoothingKey};
use moodlens_inference_core::EmotionPipeline;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One manifest line: an [`InferenceRequest`] whose image may be a file path.
#[derive(Debug, Deserialize)]
struct ManifestLine {
    #[serde(default)]
    path: Option<PathBuf>,

    #[serde(default, alias = "image_b64", alias = "image_base64")]
    image: Option<String>,

    #[serde(default)]
    user: Option<String>,

    #[serde(default)]
    module: Option<String>,

    #[serde(default)]
    activity: Option<String>,
}

#[derive(Debug)]
enum Frame {
    File(PathBuf),
    Inline(InferenceRequest),
}

#[derive(Debug)]
struct Entry {
    key: SmoothingKey,
    frame: Frame,
}

impl Entry {
    fn infer(self, pipeline: &EmotionPipeline) -> InferenceOutput {
        match self.frame {
            Frame::Inline(request) => pipeline.infer(&request),
            Frame::File(path) => match std::fs::read(&path) {
                Ok(bytes) => pipeline.infer_bytes(&bytes, &self.key),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Cannot read frame: {e}");
                    InferenceOutput::fallback(unix_timestamp_secs())
                }
            },
        }
    }
}

pub async fn run(config: &AppConfig, manifest: PathBuf, jobs: usize) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&manifest)
        .await
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
    let base = manifest.parent().map(Path::to_path_buf).unwrap_or_default();
    let entries = parse_manifest(&content, &base)?;
    let total = entries.len();
    let started = unix_timestamp_secs();

    let pipeline = Arc::new(EmotionPipeline::from_config(config));
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));

    let mut sessions: HashMap<SmoothingKey, Vec<(usize, Entry)>> = HashMap::new();
    for (index, entry) in entries.into_iter().enumerate() {
        sessions
            .entry(entry.key.clone())
            .or_default()
            .push((index, entry));
    }
    tracing::info!(frames = total, sessions = sessions.len(), jobs, "Starting batch");

    let mut tasks = JoinSet::new();
    for (_, frames) in sessions {
        let pipeline = Arc::clone(&pipeline);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let mut done = Vec::with_capacity(frames.len());
            for (index, entry) in frames {
                let _permit = semaphore.acquire().await?;
                let pipeline = Arc::clone(&pipeline);
                let output = tokio::task::spawn_blocking(move || entry.infer(&pipeline)).await?;
                done.push((index, output));
            }
            anyhow::Ok(done)
        });
    }

    let mut outputs: Vec<Option<InferenceOutput>> = vec![None; total];
    while let Some(joined) = tasks.join_next().await {
        for (index, output) in joined?? {
            outputs[index] = Some(output);
        }
    }

    let mut tally: BTreeMap<Emotion, usize> = BTreeMap::new();
    let mut fallbacks = 0usize;
    for output in outputs.into_iter().flatten() {
        if output.confidence == 0.0 {
            fallbacks += 1;
        }
        *tally.entry(output.emotion).or_default() += 1;
        println!("{}", serde_json::to_string(&output)?);
    }

    let summary = tally
        .iter()
        .map(|(emotion, n)| format!("{emotion}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(
        fallbacks,
        started = epoch_secs_to_rfc3339(started).unwrap_or_default(),
        elapsed_secs = unix_timestamp_secs() - started,
        "Batch complete: {summary}"
    );
    Ok(())
}

/// Parse a JSONL manifest. Blank lines and `#` comments are skipped; relative
/// paths resolve against `base`.
fn parse_manifest(content: &str, base: &Path) -> anyhow::Result<Vec<Entry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(i, line)| {
            let parsed: ManifestLine = serde_json::from_str(line)
                .with_context(|| format!("Manifest line {}: invalid JSON", i + 1))?;
            let request = InferenceRequest {
                user: parsed.user,
                module: parsed.module,
                activity: parsed.activity,
                ..InferenceRequest::new(parsed.image.clone().unwrap_or_default())
            };
            let key = request.smoothing_key();
            let frame = match (parsed.image, parsed.path) {
                (Some(_), _) => Frame::Inline(request),
                (None, Some(path)) => Frame::File(base.join(path)),
                (None, None) => {
                    anyhow::bail!("Manifest line {}: needs `path` or `image`", i + 1)
                }
            };
            Ok(Entry { key, frame })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_paths_and_inline() {
        let content = r#"
# lesson 3 captures
{"path": "frames/a.png", "user": "ana", "module": "m1", "activity": "q1"}

{"image_b64": "data:image/png;base64,AAAA", "module": "m1"}
"#;
        let entries = parse_manifest(content, Path::new("/data")).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].key, SmoothingKey::new("ana", "m1", "q1"));
        assert!(
            matches!(&entries[0].frame, Frame::File(p) if p == Path::new("/data/frames/a.png"))
        );

        assert_eq!(entries[1].key, SmoothingKey::new("guest", "m1", ""));
        assert!(matches!(&entries[1].frame, Frame::Inline(r) if r.image.ends_with("AAAA")));
    }

    #[test]
    fn test_parse_manifest_reports_line_numbers() {
        let err = parse_manifest("{\"path\": \"a.png\"}\n{\"user\": \"x\"}\n", Path::new("."))
            .err()
            .unwrap();
        assert!(err.to_string().contains("line 2"), "{err}");

        let err = parse_manifest("not json", Path::new(".")).err().unwrap();
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn test_unreadable_file_falls_back() {
        let pipeline = EmotionPipeline::builder().build();
        let entry = Entry {
            key: SmoothingKey::new("u", "m", "a"),
            frame: Frame::File(PathBuf::from("/nonexistent/frame.png")),
        };
        let output = entry.infer(&pipeline);
        assert_eq!((output.emotion, output.confidence), (Emotion::Neutral, 0.0));
    }
}
