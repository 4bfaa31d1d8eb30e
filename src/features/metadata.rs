//! Capture-time, GPS and camera signals.

use chrono::NaiveDateTime;

use crate::photo::{CameraInfo, GeoPoint};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 24 * HOUR_SECS;
const WEEK_SECS: i64 = 7 * DAY_SECS;
const MONTH_SECS: i64 = 30 * DAY_SECS;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Step function over the absolute capture-time difference.
pub fn time_similarity(a: &NaiveDateTime, b: &NaiveDateTime) -> Option<f32> {
    let delta = (*a - *b).num_seconds().abs();
    let score = if delta <= HOUR_SECS {
        1.0
    } else if delta <= DAY_SECS {
        0.8
    } else if delta <= WEEK_SECS {
        0.6
    } else if delta <= MONTH_SECS {
        0.4
    } else {
        0.2
    };
    Some(score)
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Step function over the great-circle distance.
pub fn location_similarity(a: &GeoPoint, b: &GeoPoint) -> Option<f32> {
    if !valid_point(a) || !valid_point(b) {
        return None;
    }
    let km = haversine_km(a, b);
    let score = if km <= 0.1 {
        1.0
    } else if km <= 1.0 {
        0.8
    } else if km <= 10.0 {
        0.6
    } else if km <= 100.0 {
        0.4
    } else {
        0.2
    };
    Some(score)
}

fn valid_point(p: &GeoPoint) -> bool {
    p.latitude.is_finite()
        && p.longitude.is_finite()
        && (-90.0..=90.0).contains(&p.latitude)
        && (-180.0..=180.0).contains(&p.longitude)
}

// Relative weight of each camera component in the blend.
const MAKE_WEIGHT: f32 = 0.2;
const MODEL_WEIGHT: f32 = 0.3;
const LENS_WEIGHT: f32 = 0.2;
const FOCAL_WEIGHT: f32 = 0.15;
const APERTURE_WEIGHT: f32 = 0.15;

/// Blend of exact make/model/lens matches and focal-length/aperture ratio
/// closeness, over the components both cameras report.
pub fn camera_similarity(a: &CameraInfo, b: &CameraInfo) -> Option<f32> {
    let components = [
        (MAKE_WEIGHT, text_match(a.make.as_deref(), b.make.as_deref())),
        (MODEL_WEIGHT, text_match(a.model.as_deref(), b.model.as_deref())),
        (LENS_WEIGHT, text_match(a.lens.as_deref(), b.lens.as_deref())),
        (FOCAL_WEIGHT, ratio_match(a.focal_length, b.focal_length)),
        (APERTURE_WEIGHT, ratio_match(a.aperture, b.aperture)),
    ];

    let (total, weight_sum) = components
        .iter()
        .filter_map(|(w, score)| score.map(|s| (w * s, *w)))
        .fold((0.0f32, 0.0f32), |(t, ws), (s, w)| (t + s, ws + w));

    if weight_sum > 0.0 {
        Some(total / weight_sum)
    } else {
        None
    }
}

fn text_match(a: Option<&str>, b: Option<&str>) -> Option<f32> {
    let a = a.map(str::trim).filter(|s| !s.is_empty())?;
    let b = b.map(str::trim).filter(|s| !s.is_empty())?;
    Some(if a.eq_ignore_ascii_case(b) { 1.0 } else { 0.0 })
}

fn ratio_match(a: Option<f64>, b: Option<f64>) -> Option<f32> {
    let (a, b) = (a?, b?);
    if !(a.is_finite() && b.is_finite()) || a <= 0.0 || b <= 0.0 {
        return None;
    }
    Some((a.min(b) / a.max(b)) as f32)
}
