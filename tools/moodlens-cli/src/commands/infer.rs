//! Classify a single frame.

use std::path::PathBuf;

use anyhow::Context;
use moodlens_common::AppConfig;
use moodlens_emotion_model::InferenceRequest;
use moodlens_inference_core::EmotionPipeline;

pub fn run(
    config: &AppConfig,
    image: Option<PathBuf>,
    data_uri: Option<String>,
    user: Option<String>,
    module: Option<String>,
    activity: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = EmotionPipeline::from_config(config);

    let request = InferenceRequest {
        user,
        module,
        activity,
        ..InferenceRequest::new(data_uri.clone().unwrap_or_default())
    };
    let key = request.smoothing_key();

    let output = match (data_uri, image) {
        (Some(_), _) => pipeline.infer(&request),
        (None, Some(path)) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            pipeline.infer_bytes(&bytes, &key)
        }
        (None, None) => anyhow::bail!("Provide an image path or --data-uri"),
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
