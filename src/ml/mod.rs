pub mod preprocess;
pub mod labels;
pub mod classifier;
#[cfg(feature = "ml")]
pub mod ml_model;
#[cfg(feature = "ml")]
pub mod inference;
#[cfg(feature = "ml")]
pub mod training;

pub use classifier::{Classifier, Prediction, ProbabilityModel};
pub use labels::{argmax, split_label, ClassLabel, DecodedLabel, LabelSet, NUM_CLASSES};
pub use preprocess::{
    preprocess_bytes, preprocess_image, preprocess_path, PreprocessConfig, PreprocessedTensor, MIN_IMAGE_SIZE,
};
#[cfg(feature = "ml")]
pub use ml_model::{MedicalClassifier, ModelConfig};
#[cfg(feature = "ml")]
pub use inference::{load_classifier, InferenceEngine};
#[cfg(feature = "ml")]
pub use training::{train_model, EpochReport, TrainingDataset, TrainingOptions, TrainingSummary};
