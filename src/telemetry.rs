//! Aircraft telemetry as delivered by the simulator client.

use serde::{Deserialize, Serialize};

use crate::grid::{clamp_lat, normalize_lon, project_position};

/// Phase of flight, as detected by the external telemetry client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStage {
    Preflight,
    Taxi,
    Takeoff,
    Climb,
    Cruise,
    Descent,
    Approach,
    Landed,
}

/// One immutable telemetry sample.
///
/// `predicted_lat`/`predicted_lon` lie on the great-circle projection along
/// the current heading for the prediction horizon; scoring uses them so the
/// ranking leads the aircraft instead of trailing it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Telemetry {
    pub lat: f64,
    pub lon: f64,
    pub alt_msl_ft: f64,
    pub alt_agl_ft: f64,
    /// Degrees, [0, 360).
    pub heading_deg: f64,
    pub ground_speed_kts: f64,
    pub vertical_speed_fpm: f64,
    pub is_on_ground: bool,
    pub predicted_lat: f64,
    pub predicted_lon: f64,
    pub flight_stage: FlightStage,
}

/// Prediction horizon used when projecting the aircraft position.
pub const PREDICTION_HORIZON_SECS: f64 = 60.0;

const KTS_TO_MPS: f64 = 0.514_444;

impl Telemetry {
    /// Build a sample from raw sim values, clamping coordinates and wrapping
    /// the heading. The predicted position is projected along the heading
    /// for [`PREDICTION_HORIZON_SECS`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lat: f64,
        lon: f64,
        alt_msl_ft: f64,
        alt_agl_ft: f64,
        heading_deg: f64,
        ground_speed_kts: f64,
        vertical_speed_fpm: f64,
        is_on_ground: bool,
        flight_stage: FlightStage,
    ) -> Self {
        let lat = clamp_lat(lat);
        let lon = normalize_lon(lon);
        let heading_deg = heading_deg.rem_euclid(360.0);
        let travel_m = ground_speed_kts.max(0.0) * KTS_TO_MPS * PREDICTION_HORIZON_SECS;
        let (predicted_lat, predicted_lon) = project_position(lat, lon, heading_deg, travel_m);

        Self {
            lat,
            lon,
            alt_msl_ft,
            alt_agl_ft,
            heading_deg,
            ground_speed_kts,
            vertical_speed_fpm,
            is_on_ground,
            predicted_lat,
            predicted_lon,
            flight_stage,
        }
    }

    pub fn is_airborne(&self) -> bool {
        !self.is_on_ground
    }

    /// Position the scorer works against.
    pub fn predicted_position(&self) -> (f64, f64) {
        (self.predicted_lat, self.predicted_lon)
    }
}
