use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl PipelinePaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("AAVE_PIPELINE_DATA_DIR"),
            std::env::var("AAVE_PIPELINE_CONFIG_DIR"),
        ) {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // Linux: ~/.config/aave-pipeline, macOS: ~/Library/Application Support/aave-pipeline
        let proj = ProjectDirs::from("", "", "aave-pipeline")
            .context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("aave-pipeline.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
