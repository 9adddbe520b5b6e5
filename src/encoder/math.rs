// Wrap arithmetic and fast atan2 for the position estimator
// Angles wrap to [-pi, pi); circular counts use Euclidean remainder

use core::f32::consts::PI;
use libm::{atan2f, fmodf};

// Enable idsp-based fast atan2
const USE_IDSP_ATAN2: bool = true;

/// Positive fmod: result is in [0, y) for y > 0
pub fn fmodf_pos(x: f32, y: f32) -> f32 {
    let mut res = fmodf(x, y);
    if res < 0.0 {
        res += y;
    }
    res
}

/// Wrap x into [-pm_range, pm_range)
pub fn wrap_pm(x: f32, pm_range: f32) -> f32 {
    fmodf_pos(x + pm_range, 2.0 * pm_range) - pm_range
}

/// Wrap an angle into [-pi, pi)
pub fn wrap_pm_pi(x: f32) -> f32 {
    wrap_pm(x, PI)
}

/// Two-argument arctangent
///
/// Uses idsp's integer atan2 (~40 cycles on Cortex-M) instead of
/// libm::atan2f (~200 cycles). Can be switched via USE_IDSP_ATAN2.
pub fn fast_atan2(y: f32, x: f32) -> f32 {
    if USE_IDSP_ATAN2 {
        fast_atan2_idsp(y, x)
    } else {
        atan2f(y, x)
    }
}

/// atan2 via idsp, arguments expected in [-1, 1]
#[inline]
fn fast_atan2_idsp(y: f32, x: f32) -> f32 {
    // Scale both arguments to i32 full range; atan2 only depends on the
    // ratio so the common factor cancels
    const SCALE: f32 = 2147483647.0;
    let yi = (y * SCALE) as i32;
    let xi = (x * SCALE) as i32;

    // idsp maps -pi..pi onto i32::MIN..i32::MAX
    const I32_TO_RAD: f32 = PI / 2147483648.0;
    idsp::atan2(yi, xi) as f32 * I32_TO_RAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmodf_pos() {
        assert!((fmodf_pos(5.0, 4.0) - 1.0).abs() < 1e-6);
        assert!((fmodf_pos(-1.0, 4.0) - 3.0).abs() < 1e-6);
        assert!((fmodf_pos(-8.0, 4.0) - 0.0).abs() < 1e-6);
        // 結果は常に [0, y)
        for i in -20..20 {
            let r = fmodf_pos(i as f32 * 0.7, 2.5);
            assert!((0.0..2.5).contains(&r));
        }
    }

    #[test]
    fn test_wrap_pm() {
        assert!((wrap_pm(5.0, 4.0) - (-3.0)).abs() < 1e-6);
        assert!((wrap_pm(-5.0, 4.0) - 3.0).abs() < 1e-6);
        assert!((wrap_pm(3.0, 4.0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrap_pm_pi() {
        assert!((wrap_pm_pi(3.0 * PI / 2.0) - (-PI / 2.0)).abs() < 1e-5);
        assert!((wrap_pm_pi(-3.0 * PI / 2.0) - (PI / 2.0)).abs() < 1e-5);
        // 範囲は [-pi, pi)
        for i in -50..50 {
            let w = wrap_pm_pi(i as f32 * 0.37);
            assert!(w >= -PI && w < PI + 1e-6);
        }
    }

    #[test]
    fn test_fast_atan2_matches_libm() {
        // sin/cosデコードで使う振幅域で誤差を確認する
        let mut max_err: f32 = 0.0;
        for iy in -10..=10 {
            for ix in -10..=10 {
                if iy == 0 && ix == 0 {
                    continue;
                }
                let y = iy as f32 * 0.05;
                let x = ix as f32 * 0.05;
                let err = (fast_atan2(y, x) - atan2f(y, x)).abs();
                // 折り返し点 (±pi) は同値として扱う
                let err = err.min((err - 2.0 * PI).abs());
                max_err = max_err.max(err);
            }
        }
        assert!(max_err < 5e-3, "max_err = {}", max_err);
    }

    #[test]
    fn test_fast_atan2_quadrants() {
        assert!(fast_atan2(0.0, 0.5).abs() < 5e-3);
        assert!((fast_atan2(0.5, 0.0) - PI / 2.0).abs() < 5e-3);
        assert!((fast_atan2(-0.5, 0.0) + PI / 2.0).abs() < 5e-3);
        assert!(fast_atan2(0.3, -0.3) > PI / 2.0);
        assert!(fast_atan2(-0.3, -0.3) < -PI / 2.0);
    }
}
