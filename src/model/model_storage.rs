//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス順序、前処理設定など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを正規化
///
/// `.gz` で終わっていればそのまま、そうでなければ `.tar.gz` を付与します。
pub fn artifact_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = artifact_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで閉じる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

/// 指定した名前のエントリを `names` と同じ順序で読み出す
///
/// すべて見つかった時点で走査を打ち切ります。見つからなかったものは `None` です。
fn read_entries<const N: usize>(tar_gz_path: &Path, names: [&str; N]) -> Result<[Option<Vec<u8>>; N]> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found: [Option<Vec<u8>>; N] = std::array::from_fn(|_| None);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        if let Some(slot) = names.iter().position(|n| *n == name) {
            let mut buffer = Vec::new();
            entry
                .read_to_end(&mut buffer)
                .with_context(|| format!("Failed to read {} from tar.gz archive", name))?;
            found[slot] = Some(buffer);
        }
        if found.iter().all(Option::is_some) {
            break;
        }
    }
    Ok(found)
}

fn parse_metadata(bytes: Option<Vec<u8>>) -> Result<ModelMetadata> {
    let bytes = bytes.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))?;
    let json_str = String::from_utf8(bytes).context("metadata.json is not UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let [metadata] = read_entries(tar_gz_path, [METADATA_ENTRY])?;
    parse_metadata(metadata)
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let [metadata, binary] = read_entries(tar_gz_path, [METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata = parse_metadata(metadata)?;
    let binary = binary.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY))?;
    Ok((metadata, binary))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス数: {}", metadata.num_classes());
    for (i, label) in metadata.class_labels.iter().enumerate() {
        println!("  {}: {}", i, label);
    }
    println!(
        "入力サイズ: {}x{} ({:?}, {:?})",
        metadata.preprocess.image_size,
        metadata.preprocess.image_size,
        metadata.preprocess.filter,
        metadata.preprocess.channel_policy
    );
    println!("隠れ層ユニット数: {}", metadata.hidden_units);
    println!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        metadata.num_epochs, metadata.batch_size, metadata.learning_rate
    );
    println!("学習サンプル数: {}", metadata.num_samples);
    if let Some(acc) = metadata.final_accuracy {
        println!("最終学習精度: {:.2}%", acc * 100.0);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
