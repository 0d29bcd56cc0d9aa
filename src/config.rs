use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub metadata_csv: String,
    pub train_valid_list: String,
    pub test_list: String,
    pub image_dir: String,
    pub artifact_dir: String,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub num_trials: usize,
    pub valid_fraction: f64,
    pub age_cap: u32,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metadata_csv: "metadata/Data_Entry_2017.csv".to_string(),
            train_valid_list: "metadata/train_val_list.txt".to_string(),
            test_list: "metadata/test_list.txt".to_string(),
            image_dir: "images_resized".to_string(),
            artifact_dir: "artifacts".to_string(),
            batch_size: 128,
            num_epochs: 5,
            num_trials: 50,
            valid_fraction: 0.2,
            age_cap: 100,
            seed: 0,
        }
    }
}

impl PipelineConfig {
    pub fn trial_artifact_dir(&self, trial: usize) -> String {
        format!("{}/trial-{:02}", self.artifact_dir, trial)
    }
}
