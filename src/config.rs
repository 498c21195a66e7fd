use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::PipelineError;

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MODEL_INPUT: u32 = 640;

const OUTPUT_VIDEO_NAME: &str = "output_annotated_video.mp4";
const LOG_NAME: &str = "detections_log.csv";
const FRAMES_DIR_NAME: &str = "extracted_frames";

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    input_path: Option<String>,
    output_dir: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    overwrite: Option<bool>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

/// Configuration for one run. Constructed once when a run starts and
/// immutable for its duration; every output location derives from
/// `output_dir`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Input video path. `stub://<frames>` selects the synthetic source.
    pub input_path: String,
    pub output_dir: PathBuf,
    /// Minimum model score for a detection to be retained.
    pub confidence_threshold: f32,
    /// When false (the default), refuse to clobber an existing output video
    /// or detection log.
    pub overwrite: bool,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// ONNX model file. `None` selects the stub detector.
    pub path: Option<PathBuf>,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Class-id to label mapping. Ids beyond the list render as `class_<id>`.
    pub class_names: Vec<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: None,
            input_size: DEFAULT_MODEL_INPUT,
            class_names: Vec::new(),
        }
    }
}

impl ModelSettings {
    pub fn class_label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl RunConfig {
    /// Build a config for `input_path` with defaults for everything else.
    pub fn for_input(input_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            overwrite: false,
            model: ModelSettings::default(),
        }
    }

    /// Load from the optional JSON file named by `ROADSCAN_CONFIG`, then
    /// apply `ROADSCAN_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROADSCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RunConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        Self {
            input_path: file.input_path.unwrap_or_default(),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            overwrite: file.overwrite.unwrap_or(false),
            model: ModelSettings {
                path: model.path,
                input_size: model.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
                class_names: model.class_names.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ROADSCAN_INPUT") {
            if !path.trim().is_empty() {
                self.input_path = path;
            }
        }
        if let Ok(dir) = std::env::var("ROADSCAN_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(threshold) = std::env::var("ROADSCAN_THRESHOLD") {
            self.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("ROADSCAN_THRESHOLD must be a number in [0, 1]"))?;
        }
        if let Ok(model) = std::env::var("ROADSCAN_MODEL") {
            if !model.trim().is_empty() {
                self.model.path = Some(PathBuf::from(model));
            }
        }
        if let Ok(overwrite) = std::env::var("ROADSCAN_OVERWRITE") {
            self.overwrite = matches!(overwrite.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Validate after the last override has been applied.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.trim().is_empty() {
            return Err(anyhow!("input video path is required"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} out of range [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input size must be > 0"));
        }
        Ok(())
    }

    pub fn output_video_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_VIDEO_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_NAME)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.output_dir.join(FRAMES_DIR_NAME)
    }

    /// Create the output directories and enforce the overwrite policy.
    /// Must run before the pipeline starts; the frame persister requires the
    /// frames directory to already exist.
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.output_dir.clone(), self.frames_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                anyhow!(PipelineError::DirectoryUnavailable {
                    path: format!("{} ({})", dir.display(), e),
                })
            })?;
        }
        if !self.overwrite {
            for path in [self.output_video_path(), self.log_path()] {
                if path.exists() {
                    return Err(anyhow!(
                        "output file {} already exists (pass --overwrite to replace it)",
                        path.display()
                    ));
                }
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RunConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_live_under_output_dir() {
        let mut cfg = RunConfig::for_input("clip.mp4");
        cfg.output_dir = PathBuf::from("/tmp/run1");
        assert_eq!(
            cfg.output_video_path(),
            PathBuf::from("/tmp/run1/output_annotated_video.mp4")
        );
        assert_eq!(cfg.log_path(), PathBuf::from("/tmp/run1/detections_log.csv"));
        assert_eq!(cfg.frames_dir(), PathBuf::from("/tmp/run1/extracted_frames"));
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut cfg = RunConfig::for_input("clip.mp4");
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.confidence_threshold = 0.5;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_requires_input() {
        let cfg = RunConfig::for_input("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn class_label_falls_back_to_id() {
        let model = ModelSettings {
            class_names: vec!["crack".to_string(), "pothole".to_string()],
            ..ModelSettings::default()
        };
        assert_eq!(model.class_label(1), "pothole");
        assert_eq!(model.class_label(7), "class_7");
    }

    #[test]
    fn prepare_refuses_to_clobber_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = RunConfig::for_input("clip.mp4");
        cfg.output_dir = dir.path().join("out");

        cfg.prepare().expect("first prepare");
        assert!(cfg.frames_dir().is_dir());

        std::fs::write(cfg.log_path(), "Frame,Class\n").unwrap();
        assert!(cfg.prepare().is_err());

        cfg.overwrite = true;
        cfg.prepare().expect("prepare with overwrite");
    }
}
