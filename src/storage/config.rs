use std::path::PathBuf;

use envmnt::{ExpandOptions, ExpansionType};

use super::filesystem::FileSystem;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum StorageConfig {
    FileSystem { base_path: String },
}
impl StorageConfig {
    pub fn build(&self) -> FileSystem {
        match self {
            StorageConfig::FileSystem { base_path } => {
                // Expand environment variables as appropriate
                let mut options = ExpandOptions::new();
                options.expansion_type = Some(ExpansionType::Unix);
                let base_path = envmnt::expand(base_path, Some(options));

                FileSystem::new(PathBuf::from(base_path))
            }
        }
    }
}
