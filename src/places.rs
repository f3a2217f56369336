//! Place identity: the user's saved places and history-inferred places.
//!
//! Saved places are indexed in an R-tree for radius lookups. Inferred places
//! come from a separate multi-day analysis and are keyed by geohash7.

use std::collections::HashMap;

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{encode_geohash, haversine_distance, meters_to_degrees, GEOHASH_PRECISION};
use crate::GpsPoint;

/// Confidence assigned to a match against a user-saved place.
const USER_PLACE_CONFIDENCE: f64 = 0.95;
/// Confidence of a location with no known identity.
const UNKNOWN_PLACE_CONFIDENCE: f64 = 0.2;

/// Kind of place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    Home,
    Work,
    Frequent,
    #[default]
    Unknown,
}

/// A place the user has saved explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPlace {
    pub id: String,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters within which a fix counts as being at this place
    pub radius_m: f64,
    #[serde(default)]
    pub place_type: PlaceType,
}

/// A place inferred from visitation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredPlace {
    pub geohash7: String,
    pub inferred_type: PlaceType,
    pub suggested_label: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// The identity a location resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub place_id: Option<String>,
    pub label: Option<String>,
    pub place_type: PlaceType,
    pub geohash7: String,
    pub confidence: f64,
}

/// A user place with its index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedPlace {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPlace {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedPlace {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

/// Lookup structure over saved and inferred places.
#[derive(Debug, Clone, Default)]
pub struct PlaceDirectory {
    user_places: Vec<UserPlace>,
    rtree: RTree<IndexedPlace>,
    max_radius_m: f64,
    inferred: HashMap<String, InferredPlace>,
}

impl PlaceDirectory {
    /// Build a directory. Saved places with invalid coordinates or a
    /// non-positive radius are ignored.
    pub fn new(user_places: Vec<UserPlace>, inferred_places: Vec<InferredPlace>) -> Self {
        let user_places: Vec<UserPlace> = user_places
            .into_iter()
            .filter(|p| {
                GpsPoint::new(p.latitude, p.longitude).is_valid()
                    && p.radius_m.is_finite()
                    && p.radius_m > 0.0
            })
            .collect();

        let indexed: Vec<IndexedPlace> = user_places
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPlace {
                idx: i,
                lat: p.latitude,
                lng: p.longitude,
            })
            .collect();

        let max_radius_m = user_places.iter().map(|p| p.radius_m).fold(0.0, f64::max);

        let inferred = inferred_places
            .into_iter()
            .map(|p| (p.geohash7.to_ascii_lowercase(), p))
            .collect();

        Self {
            user_places,
            rtree: RTree::bulk_load(indexed),
            max_radius_m,
            inferred,
        }
    }

    /// Saved place whose radius contains `point`, closest first.
    pub fn user_place_at(&self, point: &GpsPoint) -> Option<&UserPlace> {
        if self.user_places.is_empty() {
            return None;
        }
        let search_deg = meters_to_degrees(self.max_radius_m, point.latitude);
        let query = [point.latitude, point.longitude];

        self.rtree
            .locate_within_distance(query, search_deg * search_deg)
            .map(|ip| {
                let place = &self.user_places[ip.idx];
                let dist = haversine_distance(point, &GpsPoint::new(place.latitude, place.longitude));
                (place, dist)
            })
            .filter(|(place, dist)| *dist <= place.radius_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(place, _)| place)
    }

    /// Inferred place for a geohash7 cell.
    pub fn inferred(&self, geohash7: &str) -> Option<&InferredPlace> {
        self.inferred.get(&geohash7.to_ascii_lowercase())
    }

    /// Resolve a location to the best known place identity.
    ///
    /// Saved places win over inferred ones; an unmatched location still
    /// carries its geohash.
    pub fn resolve(&self, point: &GpsPoint) -> ResolvedPlace {
        let geohash7 = encode_geohash(point.latitude, point.longitude, GEOHASH_PRECISION);

        if let Some(place) = self.user_place_at(point) {
            return ResolvedPlace {
                place_id: Some(place.id.clone()),
                label: Some(place.label.clone()),
                place_type: place.place_type,
                geohash7,
                confidence: USER_PLACE_CONFIDENCE,
            };
        }

        if let Some(inferred) = self.inferred(&geohash7) {
            let label = Some(inferred.suggested_label.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            return ResolvedPlace {
                place_id: None,
                label,
                place_type: inferred.inferred_type,
                geohash7,
                confidence: inferred.confidence.clamp(0.0, 1.0),
            };
        }

        ResolvedPlace {
            place_id: None,
            label: None,
            place_type: PlaceType::Unknown,
            geohash7,
            confidence: UNKNOWN_PLACE_CONFIDENCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> UserPlace {
        UserPlace {
            id: "place-home".to_string(),
            label: "Home".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            radius_m: 150.0,
            place_type: PlaceType::Home,
        }
    }

    fn office() -> UserPlace {
        UserPlace {
            id: "place-office".to_string(),
            label: "Office".to_string(),
            latitude: 40.7580,
            longitude: -73.9855,
            radius_m: 100.0,
            place_type: PlaceType::Work,
        }
    }

    #[test]
    fn test_resolve_user_place() {
        let dir = PlaceDirectory::new(vec![home(), office()], vec![]);
        // ~55m north of home
        let r = dir.resolve(&GpsPoint::new(40.7133, -74.0060));
        assert_eq!(r.place_id.as_deref(), Some("place-home"));
        assert_eq!(r.place_type, PlaceType::Home);
        assert_eq!(r.geohash7.len(), 7);
    }

    #[test]
    fn test_resolve_outside_radius() {
        let dir = PlaceDirectory::new(vec![home()], vec![]);
        // ~330m north of home
        let r = dir.resolve(&GpsPoint::new(40.7158, -74.0060));
        assert!(r.place_id.is_none());
        assert!(r.label.is_none());
        assert_eq!(r.place_type, PlaceType::Unknown);
    }

    #[test]
    fn test_resolve_inferred_place() {
        let point = GpsPoint::new(51.5074, -0.1278);
        let hash = encode_geohash(point.latitude, point.longitude, GEOHASH_PRECISION);
        let inferred = InferredPlace {
            geohash7: hash.to_uppercase(),
            inferred_type: PlaceType::Frequent,
            suggested_label: "Gym".to_string(),
            confidence: 0.7,
            reasoning: "visited 12 of last 30 days".to_string(),
        };
        let dir = PlaceDirectory::new(vec![], vec![inferred]);
        let r = dir.resolve(&point);
        assert_eq!(r.label.as_deref(), Some("Gym"));
        assert_eq!(r.place_type, PlaceType::Frequent);
        assert!((r.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_user_places_ignored() {
        let mut bad = home();
        bad.radius_m = 0.0;
        let dir = PlaceDirectory::new(vec![bad], vec![]);
        assert!(dir.user_place_at(&GpsPoint::new(40.7128, -74.0060)).is_none());
    }

    #[test]
    fn test_closest_place_wins() {
        let mut near = home();
        near.id = "near".to_string();
        near.latitude = 40.7129;
        let mut far = home();
        far.id = "far".to_string();
        far.latitude = 40.7135;
        far.radius_m = 500.0;
        let dir = PlaceDirectory::new(vec![far, near], vec![]);
        let place = dir.user_place_at(&GpsPoint::new(40.7128, -74.0060)).unwrap();
        assert_eq!(place.id, "near");
    }
}
