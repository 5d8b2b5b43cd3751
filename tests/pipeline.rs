mod common;

use std::path::Path;

use med_image_classifier::ml::{Classifier, LabelSet, PreprocessConfig};
use med_image_classifier::storage::{LocalDirectoryStore, ObjectStore, StorageError};
use med_image_classifier::{ClassificationService, ClassifierError};

use common::{write_white_png, StubModel};

struct UnreachableStore;

impl ObjectStore for UnreachableStore {
    fn put(&self, _local_path: &Path, _key: &str) -> Result<String, StorageError> {
        Err(StorageError::Url("bucket unreachable".to_string()))
    }
}

fn spine_normal_classifier() -> Classifier<StubModel> {
    Classifier::new(StubModel::one_hot(8, 7), LabelSet::standard(), PreprocessConfig::default()).unwrap()
}

#[test]
fn white_image_with_last_class_is_spine_normal() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_white_png(dir.path(), "white.png", 300, 300);

    let service = ClassificationService::new(spine_normal_classifier(), LocalDirectoryStore::new(dir.path().join("store")));
    let report = service.handle_upload(&image, "white.png").unwrap();

    assert_eq!(report.prediction.index, 7);
    assert_eq!(report.body_part(), "SPINE");
    assert_eq!(report.condition(), "NORMAL");
    assert!(report.upload.key.starts_with("SPINE/NORMAL/"));
    assert!(report.upload.key.ends_with("_white.png"));
    assert!(report.url().is_some());
    assert!(dir.path().join("store").join(&report.upload.key).exists());
}

#[test]
fn storage_failure_still_returns_classification() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_white_png(dir.path(), "scan.png", 300, 300);

    let service = ClassificationService::new(spine_normal_classifier(), UnreachableStore);
    let report = service.handle_upload(&image, "scan.png").unwrap();

    assert_eq!(report.body_part(), "SPINE");
    assert_eq!(report.condition(), "NORMAL");
    assert_eq!(report.url(), None);
    assert!(report.upload.diagnostic.as_deref().unwrap().contains("bucket unreachable"));
}

#[test]
fn corrupt_upload_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.png");
    std::fs::write(&path, b"this is a text file pretending to be a png").unwrap();

    let service = ClassificationService::new(spine_normal_classifier(), LocalDirectoryStore::new(dir.path().join("store")));
    let err = service.handle_upload(&path, "fake.png").unwrap_err();

    assert!(matches!(err, ClassifierError::Decode(_)));
    assert!(!dir.path().join("store").exists());
}

#[test]
fn model_width_other_than_eight_is_rejected() {
    for width in [1, 7, 9, 14] {
        let result = Classifier::new(StubModel::one_hot(width, 0), LabelSet::standard(), PreprocessConfig::default());
        assert!(
            matches!(result, Err(ClassifierError::IndexOutOfRange { len: 8, .. })),
            "width {} was accepted",
            width
        );
    }
}

#[test]
fn repeated_inference_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_white_png(dir.path(), "white.png", 64, 48);
    let classifier = Classifier::new(
        StubModel::new(vec![0.05, 0.1, 0.3, 0.3, 0.05, 0.05, 0.1, 0.05]),
        LabelSet::standard(),
        PreprocessConfig::default(),
    )
    .unwrap();

    let first = classifier.classify_path(&image).unwrap();
    for _ in 0..5 {
        assert_eq!(classifier.classify_path(&image).unwrap(), first);
    }
    // 同値は小さいインデックスを優先
    assert_eq!(first.label, "BRAIN_TUMOR");
}
