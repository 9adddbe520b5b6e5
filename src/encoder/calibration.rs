//! コミッショニング手順
//!
//! オフセットキャリブレーション・回転方向検出・インデックスサーチを
//! 提供します。いずれも軸がアイドルのときにのみ実行し、通常の推定tickと
//! 並行しません。モーターの駆動は軸側（`AxisInterface`）のFOC制御と
//! ロックインスピンへ依頼し、本モジュールは毎tickの指令生成と判定のみを
//! 行います。
//!
//! キャンセルは軸エラーの監視で行います。各ループは反復ごとに軸エラーを
//! 確認して早期リターンし、tickを横取りすることはありません。

use core::f32::consts::PI;

use libm::fabsf;

use crate::axis::{AxisInterface, MotorType};
use crate::config::EncoderMode;
use crate::error::EncoderError;
use crate::fmt::*;
use crate::hardware::{AdcChannel, IndexPin, QuadratureCounter};

use super::estimator::Encoder;
use super::math::wrap_pm_pi;

/// スキャン開始前にロータを電気角0へ拘束する時間 [s]
const START_LOCK_DURATION: f32 = 1.0;

/// スキャン角速度 [rad/s]（電気角）
const SCAN_OMEGA: f32 = 4.0 * PI;

/// スキャン距離 [rad]（電気角、片道）
const SCAN_DISTANCE: f32 = 16.0 * PI;

impl<C, I, A> Encoder<C, I, A>
where
    C: QuadratureCounter,
    I: IndexPin,
    A: AdcChannel,
{
    /// 制御ループを1tickずつ協調的に回す
    ///
    /// 毎tick、サンプル→（Hallのみ）デコード→updateの後に`body`を呼ぶ。
    /// `body`がtrueを返したら完了、推定が致命的に失敗するか軸エラーが
    /// 立ったら中断する
    fn run_control_loop<X>(
        &mut self,
        axis: &mut X,
        mut body: impl FnMut(&mut Self, &mut X, f32) -> bool,
    ) -> bool
    where
        X: AxisInterface,
    {
        loop {
            let tick = axis.wait_tick();

            self.sample_now();
            if self.config.mode == EncoderMode::Hall {
                self.decode_hall_samples(&tick.gpio_samples);
            }
            if !self.update(tick.dt) {
                return false;
            }

            if body(self, axis, tick.dt) {
                return true;
            }
            if axis.has_error() {
                return false;
            }
        }
    }

    /// インデックスサーチを実行する
    ///
    /// `use_index`を強制的に有効化し、インデックス検出を終了条件とした
    /// ロックインスピンを回す。終了条件フラグは呼び出し前の値へ復元する
    pub fn run_index_search<X>(&mut self, axis: &mut X) -> bool
    where
        X: AxisInterface,
    {
        self.config.use_index = true;
        self.index_found = false;
        if !self.config.idx_search_unidirectional && axis.motor_config().direction == 0 {
            axis.motor_config_mut().direction = 1;
        }

        let orig_finish_on_enc_idx = axis.lockin_config_mut().finish_on_enc_idx;
        axis.lockin_config_mut().finish_on_enc_idx = true;
        let status = axis.run_lockin_spin(self);
        axis.lockin_config_mut().finish_on_enc_idx = orig_finish_on_enc_idx;

        info!("Index search finished: found={}", self.index_found);
        status
    }

    /// 回転方向検出を実行する
    ///
    /// 正方向のロックインスピンで一定距離を移動し、エンコーダカウントの
    /// 変化から方向を判定する。±8カウントはノイズフロアで、それ未満は
    /// 判定不能として方向0を設定する
    pub fn run_direction_find<X>(&mut self, axis: &mut X) -> bool
    where
        X: AxisInterface,
    {
        let init_enc_val = self.shadow_count;
        let orig_finish_on_distance = axis.lockin_config_mut().finish_on_distance;
        axis.lockin_config_mut().finish_on_distance = true;
        // 判定ロジックのため必ず正方向へスピンする
        axis.motor_config_mut().direction = 1;

        let status = axis.run_lockin_spin(self);
        axis.lockin_config_mut().finish_on_distance = orig_finish_on_distance;

        if status {
            if self.shadow_count > init_enc_val + 8 {
                // モーターとエンコーダが同方向
                axis.motor_config_mut().direction = 1;
            } else if self.shadow_count < init_enc_val - 8 {
                // モーターとエンコーダが逆方向
                axis.motor_config_mut().direction = -1;
            } else {
                axis.motor_config_mut().direction = 0; // 判定不能
            }
            info!("Direction find: direction={}", axis.motor_config().direction);
        }

        status
    }

    /// オフセットキャリブレーションを実行する
    ///
    /// ロータを電気角0で拘束した後、前方・後方へ各`SCAN_DISTANCE`だけ
    /// スキャンし、カウントの平均からエンコーダと電気角の間のオフセットを
    /// 回帰する。前後対称のスキャンによりクワドラチャの進み/遅れと速度
    /// 依存の偏りは平均で相殺される
    pub fn run_offset_calibration<X>(&mut self, axis: &mut X) -> bool
    where
        X: AxisInterface,
    {
        let scan_duration = SCAN_DISTANCE / SCAN_OMEGA;

        // インデックス使用時は検出済みであることが前提
        if self.config.use_index && !self.index_found {
            self.set_error(EncoderError::INDEX_NOT_FOUND_YET);
            return false;
        }

        // 極対数ミラーをモーター設定と同期する
        self.pole_pairs = axis.motor_config().pole_pairs;

        // キャリブレーションはshadow_countで行い、結果はcount_in_cprへ
        // 適用されるため、開始前に両者を同期しておく
        self.shadow_count = self.count_in_cpr;

        let motor = axis.motor_config();
        let voltage_magnitude = match motor.motor_type {
            MotorType::HighCurrent => motor.calibration_current * motor.phase_resistance,
            MotorType::Gimbal => motor.calibration_current,
        };

        // 電気角0でロックしてスキャンに備える
        info!("Offset calibration: locking rotor at phase 0");
        let mut start_ms = axis.now_ms();
        if !axis.arm_foc() {
            axis.set_motor_failed();
            return false;
        }
        let ok = self.run_control_loop(axis, |_enc, axis, _dt| {
            let t = axis.now_ms().wrapping_sub(start_ms) as f32 / 1000.0;
            if !axis.foc_update(0.0, voltage_magnitude, 0.0, 0.0, 1000.0, true) {
                return false; // エラーは軸側でラッチ済み
            }
            t > START_LOCK_DURATION
        });
        if !ok || axis.has_error() {
            return false;
        }

        let init_enc_val = self.shadow_count;
        let mut encvaluesum: i64 = 0;
        let mut num_steps: u64 = 0;

        // 前方スキャン
        info!("Offset calibration: forward scan");
        start_ms = axis.now_ms();
        let ok = self.run_control_loop(axis, |enc, axis, _dt| {
            let t = axis.now_ms().wrapping_sub(start_ms) as f32 / 1000.0;
            let phase = wrap_pm_pi(SCAN_OMEGA * t - SCAN_DISTANCE / 2.0);
            if !axis.foc_update(0.0, voltage_magnitude, phase, SCAN_OMEGA, 1000.0, true) {
                return false;
            }

            encvaluesum += enc.shadow_count as i64;
            num_steps += 1;

            t > scan_duration
        });
        if !ok || axis.has_error() {
            return false;
        }

        // 応答の有無と回転方向の確認
        if self.shadow_count > init_enc_val + 8 {
            // モーターとエンコーダが同方向
            axis.motor_config_mut().direction = 1;
        } else if self.shadow_count < init_enc_val - 8 {
            // モーターとエンコーダが逆方向
            axis.motor_config_mut().direction = -1;
        } else {
            self.set_error(EncoderError::NO_RESPONSE);
            return false;
        }

        // 移動量が設定CPRと整合しているかの確認
        let elec_rad_per_enc = self.pole_pairs as f32 * 2.0 * PI / self.config.cpr as f32;
        let expected_encoder_delta = SCAN_DISTANCE / elec_rad_per_enc;
        let actual_encoder_delta_abs = fabsf((self.shadow_count - init_enc_val) as f32);
        if fabsf(actual_encoder_delta_abs - expected_encoder_delta) / expected_encoder_delta
            > self.config.calib_range
        {
            error!(
                "CPR mismatch: expected delta {}, measured {}",
                expected_encoder_delta, actual_encoder_delta_abs
            );
            self.set_error(EncoderError::CPR_OUT_OF_RANGE);
            return false;
        }

        // 後方スキャン（カウント和の積算は前方から継続する）
        info!("Offset calibration: backward scan");
        start_ms = axis.now_ms();
        let ok = self.run_control_loop(axis, |enc, axis, _dt| {
            let t = axis.now_ms().wrapping_sub(start_ms) as f32 / 1000.0;
            let phase = wrap_pm_pi(-SCAN_OMEGA * t + SCAN_DISTANCE / 2.0);
            if !axis.foc_update(0.0, voltage_magnitude, phase, SCAN_OMEGA, 1000.0, true) {
                return false;
            }

            encvaluesum += enc.shadow_count as i64;

            t > scan_duration
        });
        if !ok || axis.has_error() {
            return false;
        }

        // 両スキャンの平均カウントがオフセット。num_stepsは片道分なので
        // 2倍が総サンプル数になる
        let total_steps = (num_steps * 2) as i64;
        self.config.offset = (encvaluesum / total_steps) as i32;
        let residual = encvaluesum - self.config.offset as i64 * total_steps;
        // +0.5でカウント中心を位相に合わせる
        self.config.offset_float = residual as f32 / total_steps as f32 + 0.5;

        info!(
            "Offset calibration done: offset={} offset_float={}",
            self.config.offset, self.config.offset_float
        );
        self.is_ready = true;
        true
    }
}
