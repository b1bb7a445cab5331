//! Check which pipeline stages are available.

use moodlens_common::AppConfig;
use moodlens_inference_core::EmotionPipeline;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("MoodLens Pipeline Check");
    println!("{}", "=".repeat(50));

    let caps = EmotionPipeline::from_config(config).capabilities();
    let detector = &config.detector;

    let describe = |path: &Option<std::path::PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not configured".to_string())
    };

    if caps.face_detection {
        println!("[OK] Face cascade: {}", describe(&detector.face_cascade));
    } else {
        println!(
            "[WARN] Face cascade unavailable ({}); whole frames will be classified",
            describe(&detector.face_cascade)
        );
    }

    if caps.smile_detection {
        println!("[OK] Smile cascade: {}", describe(&detector.smile_cascade));
    } else {
        println!(
            "[WARN] Smile cascade unavailable ({}); smile gating disabled",
            describe(&detector.smile_cascade)
        );
    }

    println!("[OK] Classifier: {}", caps.classifier);
    println!("[OK] Smoothing window: {}", caps.smoothing_window);

    println!();
    if caps.face_detection && caps.smile_detection {
        println!("All detectors loaded. MoodLens is ready.");
    } else {
        println!("Inference will run in degraded mode. Set detector paths in the config");
        println!("or point MOODLENS_CASCADE_DIR at the OpenCV haarcascades directory.");
    }

    Ok(())
}
