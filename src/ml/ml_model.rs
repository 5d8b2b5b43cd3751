//! 医用画像分類用のCNNモデル定義

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    /// 全結合隠れ層のユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
}

impl ModelConfig {
    /// Flatten後の特徴次元
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2, stride 2): size -> size / 2 (切り捨て)
    pub fn feature_dim(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        64 * after_pool2 * after_pool2
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> MedicalClassifier<B> {
        let d = self.feature_dim();

        tracing::debug!(
            image_size = self.image_size,
            feature_dim = d,
            hidden = self.hidden_units,
            classes = self.num_classes,
            "CNNを初期化します"
        );

        MedicalClassifier {
            // Conv1: 3x3 (no padding, stride 1)
            conv1: Conv2dConfig::new([3, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // Conv2: 3x3 (no padding, stride 1)
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            fc1: LinearConfig::new(d, self.hidden_units).init(device),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 医用画像分類CNN
///
/// # アーキテクチャ
/// - Conv 3x3 (32) + ReLU + MaxPool 2x2
/// - Conv 3x3 (64) + ReLU + MaxPool 2x2
/// - Flatten
/// - FC: d -> 128 + ReLU
/// - FC: 128 -> num_classes
/// - Softmax (推論時)
///
/// 入力は前処理と同じ NHWC [batch, size, size, 3] で受け取り、内部で NCHW に並べ替えます。
#[derive(Module, Debug)]
pub struct MedicalClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,

    fc1: Linear<B>, // d -> 128
    fc2: Linear<B>, // 128 -> num_classes

    activation: Relu,
}

impl<B: Backend> MedicalClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, size, size, 3]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // NHWC -> NCHW
        let x = images.permute([0, 3, 1, 2]);

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラス確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 出力層の幅（読み込んだ重みの形状から取得）
    pub fn num_classes(&self) -> usize {
        self.fc2.weight.dims()[1]
    }

    /// 読み込んだ重みの形状が設定どおりか検査
    ///
    /// `load_record` は形状を検査しないため、読み込み直後に呼び出します。
    pub fn check_shapes(&self, config: &ModelConfig) -> Result<(), String> {
        let expected: [(&str, Vec<usize>, Vec<usize>); 4] = [
            ("conv1", vec![32, 3, 3, 3], self.conv1.weight.dims().to_vec()),
            ("conv2", vec![64, 32, 3, 3], self.conv2.weight.dims().to_vec()),
            (
                "fc1",
                vec![config.feature_dim(), config.hidden_units],
                self.fc1.weight.dims().to_vec(),
            ),
            (
                "fc2",
                vec![config.hidden_units, config.num_classes],
                self.fc2.weight.dims().to_vec(),
            ),
        ];

        for (name, want, got) in expected {
            if want != got {
                return Err(format!("{} の重み形状 {:?} が想定 {:?} と一致しません", name, got, want));
            }
        }
        Ok(())
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, size, size, 3]
    /// - `targets`: ターゲットラベル [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
