pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{TbClassifier, ModelConfig, NUM_CLASSES, IMAGE_SIZE, CLASS_NAMES, load_and_normalize_image_with_size, normalize_image};
pub use training::{XrayDataset, XrayBatcher, TrainingReport, train_model};
pub use inference::InferenceEngine;
