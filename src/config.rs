//! エンコーダ設定パラメータ
//!
//! 位置推定コアの設定（センサーモード・CPR・オフセット・PLL帯域など）を
//! 保持します。通常運転中は読み出し専用で、書き換えはコミッショニングと
//! キャリブレーション手順のみが行います。永続化は上位の設定ストアが
//! この構造体を丸ごとシリアライズする形で行います。

/// PLL帯域のデフォルト [rad/s]
pub const DEFAULT_BANDWIDTH: f32 = 1000.0;

/// CPRのデフォルト（2048ライン × 4逓倍）
pub const DEFAULT_CPR: i32 = 8192;

/// オフセットキャリブレーションのCPR整合性チェック許容誤差（相対値）
pub const DEFAULT_CALIB_RANGE: f32 = 0.02;

/// エンコーダの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncoderMode {
    /// インクリメンタル（AB相クワドラチャ、16bitハードウェアカウンタ）
    Incremental,
    /// Hallセンサー（3bit入力、電気角1周期あたり6セクタ）
    Hall,
    /// アナログSin/Cosエンコーダ
    ///
    /// デコーダ内部は固定の擬似CPR 6283（2π × 1000）で折り返す。設定の
    /// `cpr`は上書きしないため、`cpr != 6283`の場合の循環カウントは
    /// オフセットキャリブレーションによる正規化後にのみ意味を持つ。
    SinCos,
}

/// エンコーダ設定
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    /// センサーモード
    pub mode: EncoderMode,
    /// 1回転あたりのカウント数（正の整数）
    pub cpr: i32,
    /// エンコーダゼロと電気角ゼロを合わせる整数カウントオフセット
    pub offset: i32,
    /// `offset`の小数補完
    pub offset_float: f32,
    /// PLL帯域 [rad/s]
    pub bandwidth: f32,
    /// インデックスパルスを使用する
    pub use_index: bool,
    /// ロックインスピン中のみインデックスを探す
    pub find_idx_on_lockin_only: bool,
    /// インデックス検出時に線形カウントもゼロへ合わせる
    pub zero_count_on_find_idx: bool,
    /// 電源投入時から再キャリブレーション無しで使用可能
    pub pre_calibrated: bool,
    /// カウント間のサブカウント補間を有効化する
    pub enable_phase_interpolation: bool,
    /// キャリブレーション時のCPR許容誤差（相対値）
    pub calib_range: f32,
    /// 不正なHallコードを無視して推定を継続する
    pub ignore_illegal_hall_state: bool,
    /// インデックスサーチを単方向に制限する
    pub idx_search_unidirectional: bool,
}

impl EncoderConfig {
    pub const fn new() -> Self {
        Self {
            mode: EncoderMode::Incremental,
            cpr: DEFAULT_CPR,
            offset: 0,
            offset_float: 0.0,
            bandwidth: DEFAULT_BANDWIDTH,
            use_index: false,
            find_idx_on_lockin_only: false,
            zero_count_on_find_idx: true,
            pre_calibrated: false,
            enable_phase_interpolation: true,
            calib_range: DEFAULT_CALIB_RANGE,
            ignore_illegal_hall_state: false,
            idx_search_unidirectional: false,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new()
    }
}
