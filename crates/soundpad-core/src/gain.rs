//! Perceptual volume curve shared by per-clip and master volume.

/// Highest user-facing volume; values above are clamped.
pub const MAX_VOLUME: f32 = 2.0;

/// Raw curve value at unity volume, used to normalise the curve so that
/// `curve(1.0)` is exactly `1.0`.
const UNITY: f64 = 1.7 - 1.0;

/// Clamp a user-facing volume into `[0.0, MAX_VOLUME]`. NaN maps to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, MAX_VOLUME)
    }
}

/// Map a user-facing volume to an amplitude multiplier.
///
/// Uses the power curve `1.7·v^1.8 − v^1.6`, floored at zero (the raw curve
/// dips slightly below zero for `v < 0.07`) and normalised to unity at `v = 1`.
pub fn curve(volume: f32) -> f32 {
    let v = f64::from(clamp_volume(volume));
    let raw = 1.7 * v.powf(1.8) - v.powf(1.6);
    (raw.max(0.0) / UNITY) as f32
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unity_and_silence() {
        assert_eq!(curve(1.0), 1.0);
        assert_eq!(curve(0.0), 0.0);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(curve(-3.0), 0.0);
        assert_eq!(curve(5.0), curve(MAX_VOLUME));
        assert_eq!(curve(f32::NAN), 0.0);
        assert_eq!(clamp_volume(2.5), 2.0);
    }

    #[test]
    fn test_curve_is_quieter_below_unity() {
        assert!(curve(0.5) < 0.5);
        assert!(curve(1.5) > 1.5);
    }

    proptest! {
        #[test]
        fn curve_is_monotonic(a in 0.0f32..=2.0, b in 0.0f32..=2.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(curve(lo) <= curve(hi));
        }

        #[test]
        fn curve_is_non_negative(v in -10.0f32..10.0) {
            prop_assert!(curve(v) >= 0.0);
        }
    }
}
