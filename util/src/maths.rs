//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
///
/// No clamping is performed, values outside of the source range are extrapolated. Use
/// [`in_range`] first if the value must be rejected instead.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Returns true if `value` lies within the inclusive range `[min, max]`.
///
/// `NaN` is never in range.
pub fn in_range<T>(value: T, min: T, max: T) -> bool
where
    T: Float
{
    value >= min && value <= max
}

/// Return the midpoint of the range `[min, max]`.
pub fn midpoint<T>(min: T, max: T) -> T
where
    T: Float
{
    min + (max - min) / (T::one() + T::one())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 100f64), (1000f64, 2000f64), 0f64), 1000f64);
        assert_eq!(lin_map((0f64, 100f64), (1000f64, 2000f64), 50f64), 1500f64);
        assert_eq!(lin_map((0f64, 100f64), (1000f64, 2000f64), 100f64), 2000f64);
        assert_eq!(lin_map((-100f64, 100f64), (900f64, 2100f64), 0f64), 1500f64);
        assert_eq!(lin_map((-100f64, 100f64), (900f64, 2100f64), -100f64), 900f64);

        // Inverted target ranges are allowed
        assert_eq!(lin_map((0f64, 1f64), (10f64, 0f64), 0.25f64), 7.5f64);
    }

    #[test]
    fn test_in_range() {
        assert!(in_range(0f64, 0f64, 100f64));
        assert!(in_range(100f64, 0f64, 100f64));
        assert!(!in_range(100.001f64, 0f64, 100f64));
        assert!(!in_range(-0.001f64, 0f64, 100f64));
        assert!(!in_range(f64::NAN, 0f64, 100f64));
    }

    #[test]
    fn test_midpoint() {
        assert_eq!(midpoint(1000f64, 2000f64), 1500f64);
        assert_eq!(midpoint(-1f32, 1f32), 0f32);
    }
}
