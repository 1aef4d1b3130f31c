//! The variable-length signed-integer delta encoding used by common mapping
//! APIs: coordinates scaled to 1e5, deltas zigzag-flipped for negatives,
//! emitted as 5-bit chunks with a continuation bit.

use crate::model::Point;

const PRECISION: f64 = 1e5;

pub fn encode(points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat = 0_i64;
    let mut prev_lng = 0_i64;

    for p in points {
        let lat = (p.lat * PRECISION).round() as i64;
        let lng = (p.lng * PRECISION).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = value << 1;
    if value < 0 {
        v = !v;
    }
    while v >= 0x20 {
        out.push((((0x20 | (v & 0x1f)) + 63) as u8) as char);
        v >>= 5;
    }
    out.push(((v + 63) as u8) as char);
}

pub fn decode(encoded: &str) -> Vec<Point> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut i = 0;
    let mut lat = 0_i64;
    let mut lng = 0_i64;

    while i < bytes.len() {
        let Some((delta, next)) = decode_value(bytes, i) else {
            break;
        };
        lat += delta;
        let Some((delta, next)) = decode_value(bytes, next) else {
            break;
        };
        lng += delta;
        i = next;

        points.push(Point::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
    }

    points
}

fn decode_value(bytes: &[u8], mut i: usize) -> Option<(i64, usize)> {
    let mut result = 0_i64;
    let mut shift = 0;
    loop {
        let byte = (*bytes.get(i)? as i64) - 63;
        i += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }
    let value = if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    };
    Some((value, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encoding() {
        // the reference example from the format documentation
        let points = [
            Point::new(38.5, -120.2),
            Point::new(40.7, -120.95),
            Point::new(43.252, -126.453),
        ];
        assert_eq!(encode(&points), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }

    #[test]
    fn test_round_trip_identity() {
        let points = [
            Point::new(37.7749, -122.4194),
            Point::new(37.775, -122.418),
        ];
        let decoded = decode(&encode(&points));
        assert_eq!(decoded.len(), points.len());
        for (a, b) in points.iter().zip(&decoded) {
            assert!((a.lat - b.lat).abs() < 1e-5 / 2.);
            assert!((a.lng - b.lng).abs() < 1e-5 / 2.);
        }
    }

    #[test]
    fn test_round_trip_exact_on_quantized_coords() {
        // 1e-5-quantized inputs survive exactly
        let points = [
            Point::new(51.50001, -0.10001),
            Point::new(51.50002, -0.10004),
            Point::new(-33.85680, 151.21530),
            Point::new(0., 0.),
        ];
        let decoded = decode(&encode(&points));
        for (a, b) in points.iter().zip(&decoded) {
            assert_eq!((a.lat * 1e5).round(), (b.lat * 1e5).round());
            assert_eq!((a.lng * 1e5).round(), (b.lng * 1e5).round());
        }
    }

    #[test]
    fn test_empty_and_garbage() {
        assert_eq!(encode(&[]), "");
        assert!(decode("").is_empty());
        // truncated input doesn't panic
        let _ = decode("_p~iF");
    }
}
