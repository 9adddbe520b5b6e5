//! ハードウェア抽象
//!
//! タイマカウンタ・インデックスピン・ADCチャネルはケイパビリティハンドル
//! として推定器のコンストラクタへ渡します。グローバルシングルトンへの
//! 直接参照は行いません。ハンドルの寿命はプログラム全体（boot時に生成、
//! shutdownまで）とします。

use core::fmt::Debug;

/// GPIOキャプチャでサンプルするポート数
pub const N_GPIO_SAMPLE_PORTS: usize = 8;

/// 電流ループtickと同期してキャプチャされたGPIOポート群のスナップショット
pub type GpioSnapshot = [u16; N_GPIO_SAMPLE_PORTS];

/// クワドラチャカウンタ（16bitハードウェアタイマ）
pub trait QuadratureCounter {
    type Error: Debug;

    /// カウンタを周期`period`のアップカウントモードで初期化し、
    /// A/B相入力をエンコーダモードへ設定する
    fn init(&mut self, period: u16) -> Result<(), Self::Error>;

    /// 計数を開始する
    fn start(&mut self) -> Result<(), Self::Error>;

    /// CNTレジスタの生値（単一読み出しでアトミック）
    fn count(&self) -> u16;

    /// CNTレジスタへ書き込む
    fn set_count(&mut self, value: u16);
}

/// インデックスピン（1回転1パルス）
///
/// `subscribe`はピンを入力プルダウンへ設定し、立ち上がりエッジ割り込みを
/// 有効化します。プラットフォーム側のEXTIハンドラはエッジを推定器の
/// `index_edge`へ届ける契約です。最初のエッジ処理の中で推定器側が
/// `unsubscribe`を呼び、以後のエッジは届きません。
pub trait IndexPin {
    fn subscribe(&mut self);
    fn unsubscribe(&mut self);
}

/// ADCチャネル（正規化読み出し）
pub trait AdcChannel {
    /// [0, 1]へ正規化した直近の変換値を返す
    fn get_normalized(&mut self) -> f32;
}

/// キャプチャ配列の中でのHallセンサー1本の位置（ポート番号とビット番号）
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioSample {
    pub port_index: usize,
    pub pin_number: u8,
}

/// Hallセンサー3本（A・B・C）のピン割り当て
///
/// 未配線のセンサーは`None`のままにします。
#[derive(Debug, Clone, Copy, Default)]
pub struct HallPins {
    pub a: Option<GpioSample>,
    pub b: Option<GpioSample>,
    pub c: Option<GpioSample>,
}

// 未使用スロットをコンストラクタへ渡すためのスタブ実装
impl IndexPin for () {
    fn subscribe(&mut self) {}
    fn unsubscribe(&mut self) {}
}

impl AdcChannel for () {
    fn get_normalized(&mut self) -> f32 {
        0.0
    }
}
