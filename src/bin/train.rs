//! 学習用バイナリ
//!
//! クラスごとのサブディレクトリを持つ学習データからCNNを学習し、アーティファクトを保存します。

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_wgpu::{Wgpu, WgpuDevice};
use clap::Parser;

use med_image_classifier::ml::{train_model, EpochReport, TrainingOptions, TrainingSummary};
use med_image_classifier::model::{AppConfig, DeviceType};
use med_image_classifier::utils::logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(version)]
#[command(about = "Train the medical image classifier from a labeled directory", long_about = None)]
struct Args {
    /// Root directory with one subdirectory per class
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Output artifact path (.tar.gz is appended when missing)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Learning rate
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Train on the CPU (NdArray) backend
    #[arg(long, default_value = "false")]
    cpu: bool,

    /// Path to config.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    let config = match &args.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    let data_dir = args
        .data_dir
        .unwrap_or_else(|| PathBuf::from(&config.training.data_dir));
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.model.model_path));

    let options = TrainingOptions {
        num_epochs: args.epochs.unwrap_or(config.training.num_epochs),
        batch_size: args.batch_size.unwrap_or(config.training.batch_size),
        learning_rate: args.learning_rate.unwrap_or(config.training.learning_rate),
        seed: config.training.seed,
        hidden_units: config.model.hidden_units,
        preprocess: config.preprocess,
    };

    let device_type = if args.cpu { DeviceType::Cpu } else { config.device_type };
    tracing::info!("使用デバイス: {}", device_type);
    tracing::info!("学習データ: {}", data_dir.display());

    let report_epoch = |report: &EpochReport| {
        println!(
            "[{}/{}] loss: {:.4}  accuracy: {:.2}%",
            report.epoch,
            options.num_epochs,
            report.loss,
            report.accuracy * 100.0
        );
    };

    let summary: TrainingSummary = match device_type {
        DeviceType::Wgpu => train_model::<Autodiff<Wgpu>, _>(
            &data_dir,
            &output,
            &options,
            &WgpuDevice::default(),
            report_epoch,
        )?,
        DeviceType::Cpu => train_model::<Autodiff<NdArray<f32>>, _>(
            &data_dir,
            &output,
            &options,
            &Default::default(),
            report_epoch,
        )?,
    };

    println!("クラス順序: {}", summary.class_names.join(", "));
    println!("MODEL SAVED SUCCESSFULLY: {}", summary.artifact_path.display());
    Ok(())
}
