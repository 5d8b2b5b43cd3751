//! 画像前処理
//!
//! 学習時と推論時で同じ関数を通すことで、入力テンソルの形状とスケーリングを一致させます。
//!
//! 処理順序:
//! 1. デコード（`image` クレートが扱える任意フォーマット）
//! 2. RGB 3チャンネル化（グレースケールは複製、アルファは破棄）
//! 3. `image_size` x `image_size` へのリサイズ（クロップなし、アスペクト比は保持しない）
//! 4. 各チャンネル値を 255 で割り [0, 1] へ
//! 5. 先頭にバッチ次元を付与 → (1, H, W, 3)

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// モデル入力の一辺（ピクセル）
pub const IMAGE_SIZE: u32 = 224;

/// 入力チャンネル数
pub const CHANNELS: usize = 3;

/// CNN の特徴マップが 1x1 以上残る最小の一辺
pub const MIN_IMAGE_SIZE: u32 = 10;

/// リサイズ時の補間方法
///
/// 学習時の値がメタデータに保存され、推論時はその値を使用します。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl ResizeFilter {
    pub fn to_filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::Bicubic => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 3チャンネル未満の画像の扱い
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// グレースケールを RGB に複製する
    #[default]
    Replicate,
    /// `FormatError` として拒否する
    Reject,
}

/// 前処理パラメータ
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// 出力画像の一辺（正方形）
    pub image_size: u32,
    #[serde(default)]
    pub filter: ResizeFilter,
    #[serde(default)]
    pub channel_policy: ChannelPolicy,
}

impl PreprocessConfig {
    /// 一辺が `MIN_IMAGE_SIZE` 未満なら理由を返す
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(format!(
                "画像サイズ {} は小さすぎます (最小: {})",
                self.image_size, MIN_IMAGE_SIZE
            ));
        }
        Ok(())
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            filter: ResizeFilter::default(),
            channel_policy: ChannelPolicy::default(),
        }
    }
}

/// 前処理済みテンソル
///
/// 形状は (1, H, W, 3)、値は [0, 1]。データは NHWC 順で平坦化されています。
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl PreprocessedTensor {
    /// テンソルの形状 [batch, height, width, channels]
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// バイト列から前処理済みテンソルを作成
pub fn preprocess_bytes(bytes: &[u8], config: &PreprocessConfig) -> Result<PreprocessedTensor> {
    let img = image::load_from_memory(bytes)?;
    preprocess_image(&img, config)
}

/// 画像ファイルから前処理済みテンソルを作成
pub fn preprocess_path(path: &Path, config: &PreprocessConfig) -> Result<PreprocessedTensor> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ClassifierError::Decode(format!("{}: {}", path.display(), e)))?;
    preprocess_image(&img, config)
}

/// デコード済み画像から前処理済みテンソルを作成
pub fn preprocess_image(img: &DynamicImage, config: &PreprocessConfig) -> Result<PreprocessedTensor> {
    config.validate().map_err(ClassifierError::Format)?;

    let channels = img.color().channel_count();
    if channels < CHANNELS as u8 && config.channel_policy == ChannelPolicy::Reject {
        return Err(ClassifierError::Format(format!(
            "{}チャンネルの画像です (必要: {}チャンネル, {:?})",
            channels,
            CHANNELS,
            img.color()
        )));
    }

    let size = config.image_size;
    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, config.filter.to_filter_type());

    let data: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    Ok(PreprocessedTensor {
        data,
        shape: [1, size as usize, size as usize, CHANNELS],
    })
}
