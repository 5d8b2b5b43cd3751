//! モデル学習機能
//!
//! 学習データはクラスごとのサブディレクトリに分けて配置します:
//!
//! ```text
//! dataset/train/
//!   BONE_FRACTURE/  *.png, *.jpg ...
//!   BRAIN_NORMAL/
//!   ...
//! ```
//!
//! クラス順序はディレクトリ名の辞書順で決まり、メタデータとして成果物に保存されます。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::ml::preprocess::{preprocess_path, PreprocessConfig, CHANNELS};
use crate::ml::ModelConfig;
use crate::model::{save_model_with_metadata, ModelMetadata};

/// 学習対象とする画像拡張子
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// 学習データのルート直下のサブディレクトリ名をクラスとして列挙（辞書順）
pub fn discover_classes(data_dir: &Path) -> Result<Vec<String>> {
    let mut class_names = Vec::new();

    for entry in std::fs::read_dir(data_dir)
        .with_context(|| format!("学習データディレクトリを開けません: {}", data_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            let class_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?
                .to_string();
            class_names.push(class_name);
        }
    }

    class_names.sort();
    Ok(class_names)
}

/// 学習データセット（パスのリストのみ保持）
pub struct TrainingDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
}

impl TrainingDataset {
    /// ディレクトリから学習データを読み込む
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let class_names = discover_classes(data_dir)?;
        if class_names.is_empty() {
            anyhow::bail!("クラスディレクトリが見つかりません: {}", data_dir.display());
        }

        let mut samples = Vec::new();
        for (class_id, class_name) in class_names.iter().enumerate() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir.join(class_name))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            files.sort();

            if files.is_empty() {
                tracing::warn!("クラス '{}' に画像がありません", class_name);
            }
            tracing::info!("  クラス {}: {} ({} 枚)", class_id, class_name, files.len());

            samples.extend(files.into_iter().map(|path| (path, class_id)));
        }

        if samples.is_empty() {
            anyhow::bail!("No training samples found in {}", data_dir.display());
        }

        tracing::info!("{} クラスから {} 枚を読み込みました", class_names.len(), samples.len());

        Ok(Self {
            samples,
            class_names,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとの枚数（クラスID順）
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for (_, id) in &self.samples {
            counts[*id] += 1;
        }
        counts
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct SampleItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<SampleItem> for TrainingDataset {
    fn get(&self, index: usize) -> Option<SampleItem> {
        let (path, label) = self.samples.get(index)?;
        Some(SampleItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
///
/// 推論時と同じ `preprocess_path` を通して画像をテンソル化します。
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    preprocess: PreprocessConfig,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, preprocess: PreprocessConfig) -> Self {
        Self { device, preprocess }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// [batch_size, size, size, 3]
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Backend> Batcher<B, SampleItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<SampleItem>, _device: &B::Device) -> ImageBatch<B> {
        let size = self.preprocess.image_size as usize;
        let mut all_pixels = Vec::with_capacity(items.len() * size * size * CHANNELS);
        let mut targets_vec = Vec::with_capacity(items.len());

        for item in items {
            match preprocess_path(&item.path, &self.preprocess) {
                Ok(tensor) => {
                    all_pixels.extend_from_slice(tensor.as_slice());
                    targets_vec.push(item.label as i64);
                }
                Err(e) => {
                    // 読めない画像はバッチから除外する
                    tracing::warn!("画像読み込み失敗のためスキップします {}: {}", item.path.display(), e);
                }
            }
        }

        let batch_size = targets_vec.len();
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, size, size, CHANNELS]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// 学習パラメータ
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub hidden_units: usize,
    pub preprocess: PreprocessConfig,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 8,
            learning_rate: 1e-3,
            seed: 42,
            hidden_units: 128,
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// エポックごとの学習結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1始まり
    pub epoch: usize,
    pub loss: f64,
    /// 0.0-1.0
    pub accuracy: f64,
    pub samples: usize,
}

/// 学習全体の結果
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub artifact_path: PathBuf,
    pub class_names: Vec<String>,
    pub num_samples: usize,
    pub epochs: Vec<EpochReport>,
}

/// モデル学習を実行してアーティファクトを保存
///
/// 検証分割・早期終了・途中チェックポイントは行いません。
/// 途中で失敗した場合は成果物は書き込まれません。
pub fn train_model<B, F>(
    data_dir: &Path,
    output_model_path: &Path,
    options: &TrainingOptions,
    device: &B::Device,
    mut on_epoch: F,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
    F: FnMut(&EpochReport),
{
    if options.batch_size == 0 {
        anyhow::bail!("バッチサイズは1以上である必要があります");
    }
    options.preprocess.validate().map_err(anyhow::Error::msg)?;

    let dataset = TrainingDataset::from_directory(data_dir)?;
    let num_classes = dataset.num_classes();
    let class_names = dataset.class_names().to_vec();

    tracing::info!("クラス順序 ({}個): {}", num_classes, class_names.join(", "));

    let model_config = ModelConfig::new(num_classes)
        .with_image_size(options.preprocess.image_size as usize)
        .with_hidden_units(options.hidden_units);
    let mut model = model_config.init::<B>(device);
    let mut optimizer = AdamConfig::new().init();

    let batcher = ImageBatcher::<B>::new(device.clone(), options.preprocess);
    let mut rng = rand::rngs::StdRng::seed_from_u64(options.seed);
    let mut indices: Vec<usize> = (0..dataset.len()).collect();

    tracing::info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        options.num_epochs,
        options.batch_size,
        options.learning_rate
    );

    let mut reports = Vec::with_capacity(options.num_epochs);

    for epoch in 0..options.num_epochs {
        indices.shuffle(&mut rng);

        let mut epoch_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut total_samples = 0usize;

        for chunk in indices.chunks(options.batch_size) {
            let items: Vec<SampleItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
            let batch = batcher.batch(items, device);
            if batch.is_empty() {
                continue;
            }
            let batch_len = batch.len();

            let item = model.forward_classification(batch.images, batch.targets);

            let loss_value: f64 = item.loss.clone().into_scalar().elem();
            let predictions: Tensor<B, 1, Int> = item.output.clone().argmax(1).reshape([batch_len]);
            let batch_correct: i64 = predictions
                .equal(item.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();

            let grads = item.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(options.learning_rate, model, grads);

            epoch_loss += loss_value;
            num_batches += 1;
            correct += batch_correct as usize;
            total_samples += batch_len;

            tracing::debug!(
                epoch = epoch + 1,
                batch = num_batches,
                loss = loss_value,
                "バッチ完了"
            );
        }

        if total_samples == 0 {
            anyhow::bail!("読み込める学習画像がありません");
        }

        let report = EpochReport {
            epoch: epoch + 1,
            loss: epoch_loss / num_batches.max(1) as f64,
            accuracy: correct as f64 / total_samples as f64,
            samples: total_samples,
        };
        tracing::info!(
            "Epoch {}/{}: loss = {:.4}, accuracy = {:.2}%",
            report.epoch,
            options.num_epochs,
            report.loss,
            report.accuracy * 100.0
        );
        on_epoch(&report);
        reports.push(report);
    }

    // 推論用バックエンドで読めるよう、勾配情報を外してから保存
    let trained_model = model.valid();
    tracing::info!("学習済みモデルの総パラメータ数: {}", trained_model.num_params());

    let model_binary = NamedMpkBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained_model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let mut metadata = ModelMetadata::new(
        class_names.clone(),
        options.preprocess,
        options.hidden_units,
        options.num_epochs as u32,
        options.batch_size as u32,
        options.learning_rate,
    );
    metadata.num_samples = dataset.len() as u64;
    metadata.final_accuracy = reports.last().map(|r| r.accuracy);

    let artifact_path = save_model_with_metadata(output_model_path, &metadata, &model_binary)?;
    tracing::info!("モデルを保存しました: {}", artifact_path.display());

    Ok(TrainingSummary {
        artifact_path,
        class_names,
        num_samples: dataset.len(),
        epochs: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(20, 16, Rgb(color)).save(path).unwrap();
    }

    fn make_dataset(root: &Path) {
        for (class, color) in [("SPINE_NORMAL", [250, 250, 250]), ("BONE_FRACTURE", [10, 10, 10])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..3 {
                write_image(&dir.join(format!("{}.png", i)), color);
            }
        }
        std::fs::write(root.join("SPINE_NORMAL").join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn test_class_discovery_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        std::fs::write(dir.path().join("README.md"), "not a class").unwrap();

        assert_eq!(
            discover_classes(dir.path()).unwrap(),
            vec!["BONE_FRACTURE".to_string(), "SPINE_NORMAL".to_string()]
        );
    }

    #[test]
    fn test_dataset_skips_non_images() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());

        let dataset = TrainingDataset::from_directory(dir.path()).unwrap();
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.class_counts(), vec![3, 3]);
        assert_eq!(dataset.get(0).unwrap().label, 0);
    }

    #[test]
    fn test_empty_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TrainingDataset::from_directory(dir.path()).is_err());
    }

    #[test]
    fn test_batcher_skips_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        let broken = dir.path().join("SPINE_NORMAL").join("broken.png");
        std::fs::write(&broken, b"not a png").unwrap();

        let preprocess = PreprocessConfig {
            image_size: 12,
            ..Default::default()
        };
        let batcher = ImageBatcher::<NdArray<f32>>::new(Default::default(), preprocess);
        let items = vec![
            SampleItem { path: broken, label: 1 },
            SampleItem {
                path: dir.path().join("BONE_FRACTURE").join("0.png"),
                label: 0,
            },
        ];
        let batch = batcher.batch(items, &Default::default());

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.images.dims(), [1, 12, 12, 3]);
    }

    #[test]
    fn test_train_writes_artifact_with_class_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        make_dataset(&data);

        let options = TrainingOptions {
            num_epochs: 2,
            batch_size: 4,
            hidden_units: 8,
            preprocess: PreprocessConfig {
                image_size: 16,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut seen = Vec::new();
        let summary = train_model::<TestBackend, _>(
            &data,
            &dir.path().join("out").join("model"),
            &options,
            &Default::default(),
            |report| seen.push(report.epoch),
        )
        .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(summary.num_samples, 6);
        assert!(summary.artifact_path.exists());

        let metadata = crate::model::load_metadata(&summary.artifact_path).unwrap();
        assert_eq!(metadata.class_labels, vec!["BONE_FRACTURE", "SPINE_NORMAL"]);
        assert_eq!(metadata.preprocess.image_size, 16);
        assert_eq!(metadata.num_samples, 6);
    }

    #[test]
    fn test_too_small_image_size_is_rejected_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        make_dataset(&data);

        let options = TrainingOptions {
            num_epochs: 1,
            preprocess: PreprocessConfig {
                image_size: 9,
                ..Default::default()
            },
            ..Default::default()
        };
        let output = dir.path().join("model");
        let err = train_model::<TestBackend, _>(&data, &output, &options, &Default::default(), |_| {})
            .unwrap_err();

        assert!(err.to_string().contains("画像サイズ"));
        assert!(!crate::model::model_storage::artifact_path(&output).exists());
    }
}
