//! 位置推定コア
//!
//! 3方式のセンサーサンプル（クワドラチャ・Hall・Sin/Cos）を電流ループ
//! 周期で取り込み、2次のPLLオブザーバで位置・速度・電気角を推定します。
//! tickコンテキストからの呼び出し順序は `sample_now` →（Hallモードのみ）
//! `decode_hall_samples` → `update` です。動的確保は行いません。
//!
//! カウント対（`shadow_count`, `count_in_cpr`）への外部書き込みは
//! クリティカルセクションで保護し、インデックスISRとtickの間で常に
//! 整合したペアが観測されるようにします。

use core::f32::consts::PI;

use libm::{fabsf, floorf};

use crate::axis::EstimatorInterface;
use crate::config::{EncoderConfig, EncoderMode};
use crate::error::EncoderError;
use crate::fmt::*;
use crate::hardware::{AdcChannel, HallPins, IndexPin, QuadratureCounter};

use super::hall::decode_hall;
use super::math::{fast_atan2, fmodf_pos, wrap_pm, wrap_pm_pi};

/// Sin/Cosデコーダの擬似CPR（2π × 1000）
pub const SINCOS_CPR: i32 = 6283;

/// 位置推定器
///
/// 軸1本につき1個、boot時に生成して`init`で初期化し、以後は電流ループ
/// tickで駆動します。キャリブレーション手順は軸がアイドルのときにのみ
/// 実行し、通常の推定と並行しません。
pub struct Encoder<C, I, A> {
    pub(crate) config: EncoderConfig,
    pub(crate) counter: C,
    pub(crate) index_pin: I,
    pub(crate) adc_sincos: Option<(A, A)>,
    pub(crate) hall_pins: HallPins,
    /// モーター設定の極対数のミラー（キャリブレーション時に再同期）
    pub(crate) pole_pairs: i32,

    pub(crate) error: EncoderError,
    pub(crate) is_ready: bool,
    pub(crate) index_found: bool,

    pub(crate) shadow_count: i32,
    pub(crate) count_in_cpr: i32,
    pub(crate) interpolation: f32,
    pub(crate) phase: f32,
    pub(crate) pos_estimate: f32,
    pub(crate) pos_cpr: f32,
    pub(crate) vel_estimate: f32,
    pub(crate) pll_kp: f32,
    pub(crate) pll_ki: f32,

    pub(crate) tim_cnt_sample: i16,
    pub(crate) hall_state: u8,
    pub(crate) sincos_sample_s: f32,
    pub(crate) sincos_sample_c: f32,
}

impl<C, I, A> Encoder<C, I, A>
where
    C: QuadratureCounter,
    I: IndexPin,
    A: AdcChannel,
{
    /// 新しい推定器を作成する
    ///
    /// `pole_pairs`はモーター設定のミラーで、電気角変換に使用します。
    pub fn new(
        counter: C,
        index_pin: I,
        hall_pins: HallPins,
        adc_sincos: Option<(A, A)>,
        pole_pairs: i32,
        config: EncoderConfig,
    ) -> Self {
        Self {
            config,
            counter,
            index_pin,
            adc_sincos,
            hall_pins,
            pole_pairs,
            error: EncoderError::NONE,
            is_ready: false,
            index_found: false,
            shadow_count: 0,
            count_in_cpr: 0,
            interpolation: 0.0,
            phase: 0.0,
            pos_estimate: 0.0,
            pos_cpr: 0.0,
            vel_estimate: 0.0,
            pll_kp: 0.0,
            pll_ki: 0.0,
            tim_cnt_sample: 0,
            hall_state: 0,
            sincos_sample_s: 0.0,
            sincos_sample_c: 0.0,
        }
    }

    /// ハードウェアカウンタを設定し、推定器を運転可能状態へ初期化する
    pub fn init(&mut self) -> Result<(), C::Error> {
        self.update_pll_gains();

        // Hall / Sin/Cos は絶対センサーなので校正済みなら即座にready
        if self.config.pre_calibrated
            && matches!(self.config.mode, EncoderMode::Hall | EncoderMode::SinCos)
        {
            self.is_ready = true;
        }

        self.counter.init(0xffff)?;
        self.counter.start()?;

        self.set_idx_subscribe(false);

        debug!(
            "Encoder init: cpr={} pll_kp={} pll_ki={}",
            self.config.cpr, self.pll_kp, self.pll_ki
        );
        Ok(())
    }

    pub(crate) fn set_error(&mut self, error: EncoderError) {
        self.error |= error;
    }

    /// PLLゲインを帯域から再導出する（臨界減衰）
    fn update_pll_gains(&mut self) {
        self.pll_kp = 2.0 * self.config.bandwidth;
        self.pll_ki = 0.25 * (self.pll_kp * self.pll_kp);
    }

    /// PLL帯域 [rad/s] を設定し、ゲインを更新する
    pub fn set_bandwidth(&mut self, bandwidth: f32) {
        self.config.bandwidth = bandwidth;
        self.update_pll_gains();
    }

    /// 極対数ミラーを更新する（モーター設定変更時）
    pub fn set_pole_pairs(&mut self, pole_pairs: i32) {
        self.pole_pairs = pole_pairs;
    }

    /// `pre_calibrated`フラグと実状態の整合を確認し、矛盾があれば落とす
    pub fn check_pre_calibrated(&mut self) {
        if !self.is_ready {
            self.config.pre_calibrated = false;
        }
        if self.config.mode == EncoderMode::Incremental && !self.index_found {
            self.config.pre_calibrated = false;
        }
    }

    /// 線形カウントを任意値に設定する
    ///
    /// インデックスISRとの競合を避けるためクリティカルセクションで
    /// カウント・推定値・ハードウェアCNTをまとめて更新する
    pub fn set_linear_count(&mut self, count: i32) {
        critical_section::with(|_| {
            self.shadow_count = count;
            self.pos_estimate = count as f32;
            // ハードウェアへの書き込みは最後
            self.counter.set_count(count as u16);
        });
    }

    /// 循環カウントを設定する（[0, cpr)へ折り返される）
    ///
    /// `update_offset`が真のときは電気角との対応を保つようオフセットを
    /// 同量シフトする
    pub fn set_circular_count(&mut self, count: i32, update_offset: bool) {
        critical_section::with(|_| {
            if update_offset {
                self.config.offset += count - self.count_in_cpr;
                self.config.offset = self.config.offset.rem_euclid(self.config.cpr);
            }
            self.count_in_cpr = count.rem_euclid(self.config.cpr);
            self.pos_cpr = self.count_in_cpr as f32;
        });
    }

    /// インデックスピン立ち上がりエッジのISR本体
    ///
    /// プラットフォームのEXTIハンドラから呼びます。最初のエッジで循環
    /// カウントをゼロ合わせし、自身の割り込み購読を解除します。
    pub fn index_edge(&mut self) {
        if self.config.use_index {
            self.set_circular_count(0, false);
            if self.config.zero_count_on_find_idx {
                // サーチ後の位置制御過渡を避けるため線形カウントも合わせる
                self.set_linear_count(0);
            }
            if self.config.pre_calibrated {
                self.is_ready = true;
            } else {
                // インデックス検出前に取れたオフセットは基準がずれている
                // ため無効化する
                self.is_ready = false;
            }
            self.index_found = true;
        }

        // 以後のエッジは不要
        self.index_pin.unsubscribe();
    }

    /// インデックス割り込みの購読状態を設定に同期する
    ///
    /// `force`が真のときは設定に関わらず購読する（ロックインスピン中の
    /// サーチで使用）
    pub fn set_idx_subscribe(&mut self, force: bool) {
        if force || (self.config.use_index && !self.config.find_idx_on_lockin_only) {
            self.index_pin.subscribe();
        }
        if !self.config.use_index || self.config.find_idx_on_lockin_only {
            self.index_pin.unsubscribe();
        }
    }

    /// センサーサンプルをラッチする（tick先頭で呼ぶ）
    pub fn sample_now(&mut self) {
        match self.config.mode {
            EncoderMode::Incremental => {
                self.tim_cnt_sample = self.counter.count() as i16;
            }
            EncoderMode::Hall => {
                // GPIOキャプチャ側で取得済み。ここでは何もしない
            }
            EncoderMode::SinCos => {
                if let Some((adc_s, adc_c)) = self.adc_sincos.as_mut() {
                    self.sincos_sample_s = adc_s.get_normalized() - 0.5;
                    self.sincos_sample_c = adc_c.get_normalized() - 0.5;
                } else {
                    self.set_error(EncoderError::UNSUPPORTED_ENCODER_MODE);
                }
            }
        }
    }

    /// GPIOスナップショットからHall状態（C,B,Aの連接3bit）を組み立てる
    pub fn decode_hall_samples(&mut self, samples: &[u16]) {
        let pins = [self.hall_pins.c, self.hall_pins.b, self.hall_pins.a];

        let mut hall_state: u8 = 0;
        for pin in pins {
            if let Some(pin) = pin {
                hall_state <<= 1;
                if samples[pin.port_index] & (1u16 << pin.pin_number) != 0 {
                    hall_state |= 1;
                }
            }
        }

        self.hall_state = hall_state;
    }

    /// 電流ループtickの本体。カウント・PLL・補間・電気角を前進させる
    ///
    /// falseを返すのは致命的条件（不正Hall状態を無視しない設定での検出、
    /// サポート外構成）のみ。`dt × pll_kp ≥ 1`は非致命で、
    /// UNSTABLE_GAINをラッチして推定は継続する
    pub fn update(&mut self, dt: f32) -> bool {
        // 離散時間近似の安定条件チェック
        if !(dt * self.pll_kp < 1.0) {
            self.set_error(EncoderError::UNSTABLE_GAIN);
        }

        // センサーデルタの算出
        let mut delta_enc: i32 = 0;
        match self.config.mode {
            EncoderMode::Incremental => {
                // 16bit境界の折り返しは2の補数減算で吸収される
                let delta_enc_16 = self.tim_cnt_sample.wrapping_sub(self.shadow_count as i16);
                delta_enc = delta_enc_16 as i32; // sign extend
            }
            EncoderMode::Hall => {
                if let Some(hall_cnt) = decode_hall(self.hall_state) {
                    delta_enc = (hall_cnt - self.count_in_cpr).rem_euclid(6);
                    if delta_enc > 3 {
                        delta_enc -= 6;
                    }
                } else if !self.config.ignore_illegal_hall_state {
                    self.set_error(EncoderError::ILLEGAL_HALL_STATE);
                    return false;
                }
            }
            EncoderMode::SinCos => {
                if self.adc_sincos.is_none() {
                    self.set_error(EncoderError::UNSUPPORTED_ENCODER_MODE);
                    return false;
                }
                let phase = fast_atan2(self.sincos_sample_s, self.sincos_sample_c);
                let fake_count = (1000.0 * phase) as i32;

                delta_enc = (fake_count - self.count_in_cpr).rem_euclid(SINCOS_CPR);
                if delta_enc > SINCOS_CPR / 2 {
                    delta_enc -= SINCOS_CPR;
                }
            }
        }

        self.shadow_count += delta_enc;
        self.count_in_cpr += delta_enc;
        self.count_in_cpr = self.count_in_cpr.rem_euclid(self.config.cpr);

        // PLL（単位はエンコーダカウント）
        // 予測
        self.pos_estimate += dt * self.vel_estimate;
        self.pos_cpr += dt * self.vel_estimate;
        // 離散位相検出器
        let delta_pos = (self.shadow_count - floorf(self.pos_estimate) as i32) as f32;
        let delta_pos_cpr = (self.count_in_cpr - floorf(self.pos_cpr) as i32) as f32;
        let delta_pos_cpr = wrap_pm(delta_pos_cpr, 0.5 * self.config.cpr as f32);
        // フィードバック
        self.pos_estimate += dt * self.pll_kp * delta_pos;
        self.pos_cpr += dt * self.pll_kp * delta_pos_cpr;
        self.pos_cpr = fmodf_pos(self.pos_cpr, self.config.cpr as f32);
        // 速度は循環残差のみで駆動する
        self.vel_estimate += dt * self.pll_ki * delta_pos_cpr;
        let snap_to_zero_vel = if fabsf(self.vel_estimate) < 0.5 * dt * self.pll_ki {
            // ゼロに吸着させてデルタシグマのジッタを防ぐ
            self.vel_estimate = 0.0;
            true
        } else {
            false
        };

        // カウント間補間
        let corrected_enc = self.count_in_cpr - self.config.offset;
        if snap_to_zero_vel || !self.config.enable_phase_interpolation {
            // 停止中はドリフトしないよう中央へ固定
            self.interpolation = 0.5;
        } else if delta_enc > 0 {
            // エンコーダエッジで補間をリセット
            self.interpolation = 0.0;
        } else if delta_enc < 0 {
            self.interpolation = 1.0;
        } else {
            // 速度推定でカウント間を予測し、[0, 1]へクランプする
            self.interpolation += dt * self.vel_estimate;
            if self.interpolation > 1.0 {
                self.interpolation = 1.0;
            }
            if self.interpolation < 0.0 {
                self.interpolation = 0.0;
            }
        }
        let interpolated_enc = corrected_enc as f32 + self.interpolation;

        // 電気角の算出
        // TODO: elec_rad_per_encは設定変更時のみ再計算すれば十分
        let elec_rad_per_enc = self.pole_pairs as f32 * 2.0 * PI / self.config.cpr as f32;
        let ph = elec_rad_per_enc * (interpolated_enc - self.config.offset_float);
        self.phase = wrap_pm_pi(ph);

        true
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// 設定への可変アクセス（コミッショニング時のみ使用すること）
    pub fn config_mut(&mut self) -> &mut EncoderConfig {
        &mut self.config
    }

    /// 電気角 [rad]、(-π, π]
    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// 速度推定 [counts/s]
    pub fn vel_estimate(&self) -> f32 {
        self.vel_estimate
    }

    /// 平滑化済み線形位置 [counts]
    pub fn pos_estimate(&self) -> f32 {
        self.pos_estimate
    }

    /// 平滑化済み循環位置 [counts]、[0, cpr)
    pub fn pos_cpr(&self) -> f32 {
        self.pos_cpr
    }

    pub fn count_in_cpr(&self) -> i32 {
        self.count_in_cpr
    }

    pub fn shadow_count(&self) -> i32 {
        self.shadow_count
    }

    pub fn interpolation(&self) -> f32 {
        self.interpolation
    }

    /// クローズドループFOCへ移行可能か
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn index_found(&self) -> bool {
        self.index_found
    }

    pub fn error(&self) -> EncoderError {
        self.error
    }

    /// ラッチ済みエラーをクリアする（オペレーター操作）
    pub fn clear_errors(&mut self) {
        self.error.clear();
    }
}

impl<C, I, A> EstimatorInterface for Encoder<C, I, A>
where
    C: QuadratureCounter,
    I: IndexPin,
    A: AdcChannel,
{
    fn sample_now(&mut self) {
        Self::sample_now(self);
    }

    fn decode_hall_samples(&mut self, samples: &[u16]) {
        Self::decode_hall_samples(self, samples);
    }

    fn update(&mut self, dt: f32) -> bool {
        Self::update(self, dt)
    }

    fn index_edge(&mut self) {
        Self::index_edge(self);
    }

    fn set_idx_subscribe(&mut self, force: bool) {
        Self::set_idx_subscribe(self, force);
    }

    fn index_found(&self) -> bool {
        self.index_found
    }
}
