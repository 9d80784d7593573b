//! Dry-soil rule. Advisory only: nothing here talks to irrigation hardware.

use crate::reading::SensorReading;

/// Readings strictly below this moisture value are considered dry.
pub const DRY_SOIL_THRESHOLD: f64 = 400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationAlert {
    pub moisture: f64,
}

/// Returns an alert when the reading is below [`DRY_SOIL_THRESHOLD`].
///
/// NaN compares false and never alerts.
pub fn check_soil(reading: &SensorReading) -> Option<IrrigationAlert> {
    (reading.moisture < DRY_SOIL_THRESHOLD).then_some(IrrigationAlert {
        moisture: reading.moisture,
    })
}
