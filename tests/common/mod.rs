#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use med_image_classifier::ml::{PreprocessedTensor, ProbabilityModel};

/// 固定の確率ベクトルを返すモデル
pub struct StubModel {
    probabilities: Vec<f32>,
}

impl StubModel {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self { probabilities }
    }

    pub fn one_hot(width: usize, hot: usize) -> Self {
        let mut probabilities = vec![0.0; width];
        probabilities[hot] = 1.0;
        Self::new(probabilities)
    }
}

impl ProbabilityModel for StubModel {
    fn num_classes(&self) -> usize {
        self.probabilities.len()
    }

    fn predict(&self, tensor: &PreprocessedTensor) -> med_image_classifier::Result<Vec<f32>> {
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        Ok(self.probabilities.clone())
    }
}

pub fn write_white_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

pub fn write_solid_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(32, 32, Rgb(color)).save(&path).unwrap();
    path
}
