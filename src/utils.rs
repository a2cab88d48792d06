/// 地球の半径 (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 1ラウンドの最高得点
pub const MAX_POINTS: u32 = 5000;

/// 得点が1/eになる距離 (km)
const SCORE_DECAY_KM: f64 = 2000.0;

/// この距離未満なら満点扱い (km)
const PERFECT_RADIUS_KM: f64 = 0.025;

/// 2点間の大円距離（Haversine）
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// 距離から得点を算出
pub fn score_for_distance(distance_km: f64) -> u32 {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return 0;
    }
    if distance_km < PERFECT_RADIUS_KM {
        return MAX_POINTS;
    }
    (f64::from(MAX_POINTS) * (-distance_km / SCORE_DECAY_KM).exp()).round() as u32
}

/// 緯度・経度が有効範囲内か
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
