use serde::{Deserialize, Serialize};

use crate::{Stop, TeamState, Train};

/// A WGS84 coordinate.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub lat: f64,
    pub long: f64,
}

impl Point {
    pub fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    /// The approximate distance between two points in meters, using equirectangular projection.
    pub fn distance(self, other: Self) -> f64 {
        // mean radius of the earth in meters
        const EARTH_RADIUS: f64 = 6_371_008.8;

        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_long = (other.long - self.long).to_radians();
        let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
        EARTH_RADIUS * f64::hypot(delta_lat, mean_lat.cos() * delta_long)
    }
}

impl From<&Stop> for Point {
    fn from(stop: &Stop) -> Self {
        Point::new(stop.lat, stop.lon)
    }
}

impl From<&Train> for Point {
    fn from(train: &Train) -> Self {
        Point::new(train.lat, train.long)
    }
}

impl From<&TeamState> for Point {
    fn from(team: &TeamState) -> Self {
        Point::new(team.lat, team.long)
    }
}
