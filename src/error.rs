//! エンコーダエラーモデル
//!
//! エラーはラッチ式のビットセットで保持します。一度立ったビットは自動では
//! 消えず、オペレーター操作（`clear`）でのみクリアされます。軸側は上位の
//! エラービットへこの値を集約し、`is_ready`と合わせてクローズドループ
//! 移行の可否を判断します。

use core::ops::{BitOr, BitOrAssign};

/// ラッチ式エラービットセット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderError(u32);

impl EncoderError {
    pub const NONE: Self = Self(0);
    /// `dt × pll_kp ≥ 1`（離散時間近似の安定条件違反、非致命）
    pub const UNSTABLE_GAIN: Self = Self(1 << 0);
    /// 有効6コード以外のHall状態を検出
    pub const ILLEGAL_HALL_STATE: Self = Self(1 << 1);
    /// `use_index`有効のままインデックス未検出でキャリブレーションを要求
    pub const INDEX_NOT_FOUND_YET: Self = Self(1 << 2);
    /// キャリブレーション駆動に対しエンコーダが応答しない
    pub const NO_RESPONSE: Self = Self(1 << 3);
    /// スキャン移動量が設定CPRから許容誤差を超えて乖離
    pub const CPR_OUT_OF_RANGE: Self = Self(1 << 4);
    /// サポート外のエンコーダ構成
    pub const UNSUPPORTED_ENCODER_MODE: Self = Self(1 << 5);

    /// `other`のビットがすべて立っているか
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// 生のビット表現（テレメトリ・軸エラーへの集約用）
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// 全ビットをクリアする（オペレーター操作）
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl BitOr for EncoderError {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EncoderError {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latching() {
        let mut error = EncoderError::NONE;
        assert!(error.is_none());

        error |= EncoderError::UNSTABLE_GAIN;
        error |= EncoderError::NO_RESPONSE;
        assert!(error.contains(EncoderError::UNSTABLE_GAIN));
        assert!(error.contains(EncoderError::NO_RESPONSE));
        assert!(!error.contains(EncoderError::CPR_OUT_OF_RANGE));
        assert!(!error.is_none());

        error.clear();
        assert!(error.is_none());
    }

    #[test]
    fn test_bits_distinct() {
        let all = [
            EncoderError::UNSTABLE_GAIN,
            EncoderError::ILLEGAL_HALL_STATE,
            EncoderError::INDEX_NOT_FOUND_YET,
            EncoderError::NO_RESPONSE,
            EncoderError::CPR_OUT_OF_RANGE,
            EncoderError::UNSUPPORTED_ENCODER_MODE,
        ];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert_eq!(a.bits() & b.bits(), 0);
                }
            }
        }
    }
}
