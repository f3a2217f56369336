//! Geographic utilities: great-circle distance, geohash encoding, centroids.

use geo::{Centroid, Distance, Haversine, MultiPoint, Point};

use crate::GpsPoint;

/// Geohash precision used as the identity of an inferred place (~150m cells).
pub const GEOHASH_PRECISION: usize = 7;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Great-circle distance between two points in meters.
///
/// # Example
/// ```
/// use life_timeline::GpsPoint;
/// use life_timeline::geo_utils::haversine_distance;
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
/// let km = haversine_distance(&london, &paris) / 1000.0;
/// assert!((km - 343.5).abs() < 2.0);
/// ```
pub fn haversine_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let p1 = Point::new(a.longitude, a.latitude);
    let p2 = Point::new(b.longitude, b.latitude);
    Haversine::distance(p1, p2)
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert a distance in meters to degrees of longitude at `latitude`.
///
/// Longitude degrees shrink towards the poles, so this is the larger of the
/// two conversions and safe to use as a search radius in either axis.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let cos_lat = latitude.to_radians().cos().abs().max(0.01);
    meters / (111_320.0 * cos_lat)
}

/// Centroid of a set of points.
pub fn centroid(points: &[GpsPoint]) -> Option<GpsPoint> {
    if points.is_empty() {
        return None;
    }
    let multi: MultiPoint<f64> = points
        .iter()
        .map(|p| Point::new(p.longitude, p.latitude))
        .collect::<Vec<_>>()
        .into();
    multi.centroid().map(|c| GpsPoint::new(c.y(), c.x()))
}

/// Encode a coordinate as a base-32 geohash of `precision` characters.
///
/// # Example
/// ```
/// use life_timeline::geo_utils::encode_geohash;
/// assert_eq!(encode_geohash(57.64911, 10.40744, 7), "u4pruyd");
/// ```
pub fn encode_geohash(latitude: f64, longitude: f64, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut bit_count = 0;
    let mut even = true;

    while hash.len() < precision {
        let (range, value) = if even {
            (&mut lng_range, longitude)
        } else {
            (&mut lat_range, latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}

/// Decode a geohash to the centre of its cell.
///
/// Returns `None` for an empty hash or any character outside the alphabet.
pub fn decode_geohash(hash: &str) -> Option<GpsPoint> {
    if hash.is_empty() {
        return None;
    }
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.bytes() {
        let value = GEOHASH_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_lowercase())?;
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            let range = if even { &mut lng_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if bit == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }

    Some(GpsPoint::new(
        (lat_range.0 + lat_range.1) / 2.0,
        (lng_range.0 + lng_range.1) / 2.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero() {
        let p = GpsPoint::new(40.0, -74.0);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(1.0, 0.0);
        let d = haversine_distance(&a, &b);
        assert!((d - 111_195.0).abs() < 100.0);
    }

    #[test]
    fn test_polyline_length() {
        let line = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.001, 0.0),
            GpsPoint::new(0.002, 0.0),
        ];
        let len = polyline_length(&line);
        assert!((len - 222.4).abs() < 1.0);
        assert_eq!(polyline_length(&line[..1]), 0.0);
    }

    #[test]
    fn test_geohash_known_value() {
        assert_eq!(encode_geohash(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert!(encode_geohash(51.5074, -0.1278, 7).starts_with("gcpvj"));
    }

    #[test]
    fn test_geohash_decode_roundtrip_within_cell() {
        let hash = encode_geohash(37.7749, -122.4194, 7);
        let centre = decode_geohash(&hash).unwrap();
        let original = GpsPoint::new(37.7749, -122.4194);
        assert!(haversine_distance(&centre, &original) < 150.0);
    }

    #[test]
    fn test_geohash_decode_invalid() {
        assert!(decode_geohash("").is_none());
        assert!(decode_geohash("abc!").is_none());
        // 'a' is not in the geohash alphabet
        assert!(decode_geohash("a").is_none());
    }

    #[test]
    fn test_centroid() {
        let pts = vec![GpsPoint::new(10.0, 20.0), GpsPoint::new(12.0, 22.0)];
        let c = centroid(&pts).unwrap();
        assert!((c.latitude - 11.0).abs() < 1e-9);
        assert!((c.longitude - 21.0).abs() < 1e-9);
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_meters_to_degrees() {
        let at_equator = meters_to_degrees(111_320.0, 0.0);
        assert!((at_equator - 1.0).abs() < 1e-9);
        assert!(meters_to_degrees(111_320.0, 60.0) > at_equator);
    }
}
