//! 医用画像分類CLI
//!
//! 学習済みアーティファクトを読み込み、画像1枚を分類して保存先にコピーします。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use burn_wgpu::{Wgpu, WgpuDevice};
use clap::{Parser, Subcommand};

use med_image_classifier::ml::load_classifier;
use med_image_classifier::model::{load_metadata, print_metadata_info, AppConfig, DeviceType};
use med_image_classifier::storage::LocalDirectoryStore;
use med_image_classifier::utils::logging::{init_logging, LogConfig};
use med_image_classifier::{ClassificationReport, ClassificationService};

#[derive(Parser, Debug)]
#[command(name = "med_image_classifier")]
#[command(version)]
#[command(about = "Classify a medical image into body part and condition", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Path to config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify one image and store it under BODY_PART/CONDITION/
    Classify {
        /// Image file to classify
        image: PathBuf,

        /// Model artifact (.tar.gz)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Directory that receives the stored copy
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Run on the CPU (NdArray) backend
        #[arg(long, default_value = "false")]
        cpu: bool,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show artifact metadata
    Info {
        /// Model artifact (.tar.gz)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Write the effective configuration to a file
    InitConfig {
        /// Destination (defaults to config.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    let config = match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    match cli.command {
        Commands::Classify {
            image,
            model,
            store_dir,
            cpu,
            json,
        } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let store_dir = store_dir.unwrap_or_else(|| PathBuf::from(&config.storage.root_dir));
            let device_type = if cpu { DeviceType::Cpu } else { config.device_type };

            tracing::info!("使用デバイス: {}", device_type);
            let report = match device_type {
                DeviceType::Wgpu => classify::<Wgpu>(&WgpuDevice::default(), &model_path, &store_dir, &image)?,
                DeviceType::Cpu => classify::<NdArray<f32>>(&Default::default(), &model_path, &store_dir, &image)?,
            };
            print_report(&report, json)?;
        }
        Commands::Info { model } => {
            let model_path = model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
            let metadata = load_metadata(&model_path)?;
            print_metadata_info(&metadata);
        }
        Commands::InitConfig { output } => {
            let output = output.unwrap_or_else(AppConfig::default_path);
            config
                .save(&output)
                .with_context(|| format!("設定ファイルを書き込めません: {}", output.display()))?;
            println!("設定ファイルを書き込みました: {}", output.display());
        }
    }

    Ok(())
}

fn classify<B: Backend>(
    device: &B::Device,
    model_path: &Path,
    store_dir: &Path,
    image: &Path,
) -> Result<ClassificationReport> {
    // モデルが読めない場合は続行しない
    let classifier = load_classifier::<B>(model_path, device)?;
    let service = ClassificationService::new(classifier, LocalDirectoryStore::new(store_dir));

    let original_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(service.handle_upload(image, &original_name)?)
}

fn print_report(report: &ClassificationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("部位: {}", report.body_part());
    println!("状態: {}", report.condition());
    println!(
        "予測クラス: {} (index {}, {:.2}%)",
        report.prediction.label,
        report.prediction.index,
        report.prediction.confidence * 100.0
    );
    match report.url() {
        Some(url) => println!("保存先: {}", url),
        None => println!(
            "保存先: なし ({})",
            report.upload.diagnostic.as_deref().unwrap_or("unknown error")
        ),
    }
    if let Some(browse) = &report.upload.browse_url {
        println!("一覧: {}", browse);
    }
    Ok(())
}
