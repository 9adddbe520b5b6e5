//! 軸・モーター側の外部インターフェース
//!
//! キャリブレーションとインデックスサーチはモーターの駆動を外部の軸
//! ステートマシンへ依頼します。このモジュールはその契約だけを定義し、
//! 実装（FOC電流制御・ロックインスピン・tickスケジューリング）は上位
//! ファームウェアが持ちます。

use crate::hardware::GpioSnapshot;

/// モーター種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorType {
    /// 大電流モーター（校正電圧 = キャリブレーション電流 × 相抵抗）
    HighCurrent,
    /// ジンバルモーター（電流指令値をそのまま電圧[V]として扱う）
    Gimbal,
}

/// モーター設定のうち本コアが参照・更新する項目
#[derive(Debug, Clone, Copy)]
pub struct MotorConfig {
    /// 回転方向（+1 / -1、未確定は0）
    pub direction: i32,
    pub motor_type: MotorType,
    /// 極対数
    pub pole_pairs: i32,
    /// 相抵抗 [Ω]
    pub phase_resistance: f32,
    /// キャリブレーション電流 [A]
    pub calibration_current: f32,
}

/// ロックインスピン設定のうち本コアが操作する終了条件フラグ
#[derive(Debug, Clone, Copy, Default)]
pub struct LockinConfig {
    /// エンコーダインデックスの検出で終了する
    pub finish_on_enc_idx: bool,
    /// 規定距離の移動で終了する
    pub finish_on_distance: bool,
}

/// 電流ループ1tick分のコンテキスト
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    /// 前tickからの経過時間 [s]
    pub dt: f32,
    /// tickと同期してキャプチャされたGPIOスナップショット（Hallデコード用）
    pub gpio_samples: GpioSnapshot,
}

/// 推定器が軸側へ公開するインターフェース
///
/// 電流ループtickからの呼び出し順序は `sample_now` →（Hallモードのみ）
/// `decode_hall_samples` → `update`。`index_edge`はインデックスピンの
/// EXTIハンドラから呼びます。
pub trait EstimatorInterface {
    /// センサーサンプルをラッチする
    fn sample_now(&mut self);

    /// GPIOスナップショットからHall状態を組み立てる
    fn decode_hall_samples(&mut self, samples: &[u16]);

    /// 推定を1tick分前進させる。致命的条件のみfalseを返す
    fn update(&mut self, dt: f32) -> bool;

    /// インデックスエッジのISR本体
    fn index_edge(&mut self);

    /// インデックス割り込みの購読状態を設定へ同期する（`force`で強制購読）
    fn set_idx_subscribe(&mut self, force: bool);

    fn index_found(&self) -> bool;
}

/// 軸（モーター＋ステートマシン）側の契約
pub trait AxisInterface {
    /// 次の電流ループtickまで協調的に待ち、tickコンテキストを返す
    fn wait_tick(&mut self) -> TickContext;

    /// 単調増加するミリ秒tick
    fn now_ms(&self) -> u32;

    /// 軸のエラービットが立っているか
    fn has_error(&self) -> bool;

    /// モーター起動失敗を軸エラーへ記録する
    fn set_motor_failed(&mut self);

    /// FOC電流制御を起動する
    fn arm_foc(&mut self) -> bool;

    /// FOC制御量の更新
    ///
    /// `voltage_setpoint`が真のときは`q_command`を電圧[V]として扱います。
    fn foc_update(
        &mut self,
        d_current: f32,
        q_command: f32,
        phase: f32,
        phase_vel: f32,
        current_limit: f32,
        voltage_setpoint: bool,
    ) -> bool;

    fn motor_config(&self) -> &MotorConfig;
    fn motor_config_mut(&mut self) -> &mut MotorConfig;
    fn lockin_config_mut(&mut self) -> &mut LockinConfig;

    /// ロックインスピン（コミッショニング用のオープンループ回転）を実行する
    ///
    /// 実行中も推定器のtick（サンプル→更新）を回し続ける契約です。
    fn run_lockin_spin(&mut self, estimator: &mut dyn EstimatorInterface) -> bool;
}
