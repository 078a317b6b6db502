//! Fixed unit-conversion table (§4.4). Protocol workers apply these
//! before handing values to the Normalizer, since only the worker knows
//! what units its transport encodes values in.

pub const FEET_TO_METERS: f64 = 0.3048;
pub const KNOTS_TO_MPS: f64 = 1852.0 / 3600.0;
pub const MPH_TO_MPS: f64 = 1609.344 / 3600.0;
pub const KPH_TO_MPS: f64 = 1.0 / 3.6;

pub fn feet_to_meters(v: f64) -> f64 {
    v * FEET_TO_METERS
}

pub fn knots_to_mps(v: f64) -> f64 {
    v * KNOTS_TO_MPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feet_conversion() {
        assert!((feet_to_meters(100.0) - 30.48).abs() < 1e-9);
    }

    #[test]
    fn knots_conversion() {
        assert!((knots_to_mps(5.0) - 2.5722).abs() < 1e-3);
    }
}
