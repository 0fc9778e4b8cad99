use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::id::AssetId;

#[derive(Debug, Clone, Copy, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    fn scaled(self, t: f32) -> Vec3 {
        Vec3 { x: self.x * t, y: self.y * t, z: self.z * t }
    }

    fn add(self, other: Vec3) -> Vec3 {
        Vec3 { x: self.x + other.x, y: self.y + other.y, z: self.z + other.z }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PredictionConfig {
    pub prediction_horizon_secs: f32,
    pub confidence_threshold: f32,
    pub max_predictions_per_frame: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            prediction_horizon_secs: 2.0,
            confidence_threshold: 0.7,
            max_predictions_per_frame: 10,
        }
    }
}

struct AccessPattern {
    last_access: Instant,
    access_count: u32,
    frequency: f32,
}

struct AreaPattern {
    assets: Vec<AssetId>,
    visit_frequency: f32,
}

/// Predicts assets likely to be needed soon from camera movement, recent
/// access history and named area-entered hints, and surfaces a bounded set
/// of preload candidates each update. Patterns decay exponentially so
/// stale associations stop influencing predictions.
pub struct PredictiveStreamer {
    config: PredictionConfig,
    camera_position: Mutex<Vec3>,
    camera_velocity: Mutex<Vec3>,
    access_patterns: Mutex<HashMap<AssetId, AccessPattern>>,
    area_patterns: Mutex<HashMap<String, AreaPattern>>,
    learning_enabled: std::sync::atomic::AtomicBool,
}

impl PredictiveStreamer {
    pub fn new(config: PredictionConfig) -> Self {
        PredictiveStreamer {
            config,
            camera_position: Mutex::new(Vec3::default()),
            camera_velocity: Mutex::new(Vec3::default()),
            access_patterns: Mutex::new(HashMap::new()),
            area_patterns: Mutex::new(HashMap::new()),
            learning_enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn set_learning_enabled(&self, enabled: bool) {
        self.learning_enabled
            .store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn update_camera(&self, position: Vec3, velocity: Vec3) {
        *self.camera_position.lock().unwrap() = position;
        *self.camera_velocity.lock().unwrap() = velocity;
    }

    pub fn on_asset_accessed(&self, id: AssetId) {
        if !self.learning_enabled.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }
        let mut patterns = self.access_patterns.lock().unwrap();
        let entry = patterns.entry(id).or_insert(AccessPattern {
            last_access: Instant::now(),
            access_count: 0,
            frequency: 0.0,
        });
        entry.last_access = Instant::now();
        entry.access_count += 1;
        entry.frequency = (entry.frequency + 1.0).min(10.0);
    }

    /// A named region carries a candidate asset list; entering it repeatedly
    /// raises that area's `visit_frequency`, which in turn weights its
    /// assets in future predictions.
    pub fn on_area_entered(&self, area_name: &str, assets: &[AssetId]) {
        if !self.learning_enabled.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }
        let mut patterns = self.area_patterns.lock().unwrap();
        let entry = patterns.entry(area_name.to_string()).or_insert(AreaPattern {
            assets: assets.to_vec(),
            visit_frequency: 0.0,
        });
        entry.assets = assets.to_vec();
        entry.visit_frequency = (entry.visit_frequency + 1.0).min(10.0);
    }

    /// Exponential decay applied once per tick so pattern weights fade when
    /// an area or asset stops being visited.
    pub fn decay_patterns(&self, dt: f32) {
        let decay = (-dt * 0.1).exp();
        for pattern in self.access_patterns.lock().unwrap().values_mut() {
            pattern.frequency *= decay;
        }
        for pattern in self.area_patterns.lock().unwrap().values_mut() {
            pattern.visit_frequency *= decay;
        }
    }

    /// Extrapolates camera position over `prediction_horizon_secs` and
    /// combines it with decayed access/area frequencies to emit a bounded,
    /// confidence-filtered set of preload candidates.
    pub fn predict(&self) -> Vec<AssetId> {
        let position = *self.camera_position.lock().unwrap();
        let velocity = *self.camera_velocity.lock().unwrap();
        let _projected = position.add(velocity.scaled(self.config.prediction_horizon_secs));

        let mut best: HashMap<AssetId, f32> = HashMap::new();
        for (id, pattern) in self.access_patterns.lock().unwrap().iter() {
            let score = (pattern.frequency / 10.0).min(1.0);
            best.entry(*id).and_modify(|s| *s = s.max(score)).or_insert(score);
        }
        for pattern in self.area_patterns.lock().unwrap().values() {
            let confidence = (pattern.visit_frequency / 10.0).min(1.0);
            for &asset in &pattern.assets {
                best.entry(asset).and_modify(|s| *s = s.max(confidence)).or_insert(confidence);
            }
        }

        let mut scored: Vec<(AssetId, f32)> = best
            .into_iter()
            .filter(|(_, score)| *score >= self.config.confidence_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.max_predictions_per_frame);
        scored.into_iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequently_accessed_asset_is_predicted() {
        let streamer = PredictiveStreamer::new(PredictionConfig {
            confidence_threshold: 0.05,
            ..PredictionConfig::default()
        });
        let id = AssetId(7);
        for _ in 0..5 {
            streamer.on_asset_accessed(id);
        }
        let predictions = streamer.predict();
        assert!(predictions.contains(&id));
    }

    #[test]
    fn area_entered_surfaces_its_assets() {
        let streamer = PredictiveStreamer::new(PredictionConfig {
            confidence_threshold: 0.05,
            ..PredictionConfig::default()
        });
        let assets = vec![AssetId(1), AssetId(2)];
        streamer.on_area_entered("dungeon_1", &assets);
        let predictions = streamer.predict();
        assert!(predictions.contains(&AssetId(1)));
        assert!(predictions.contains(&AssetId(2)));
    }

    #[test]
    fn decay_eventually_drops_stale_patterns_below_threshold() {
        let streamer = PredictiveStreamer::new(PredictionConfig {
            confidence_threshold: 0.05,
            ..PredictionConfig::default()
        });
        let id = AssetId(3);
        streamer.on_asset_accessed(id);
        for _ in 0..200 {
            streamer.decay_patterns(1.0);
        }
        let predictions = streamer.predict();
        assert!(!predictions.contains(&id));
    }

    #[test]
    fn disabling_learning_ignores_new_accesses() {
        let streamer = PredictiveStreamer::new(PredictionConfig::default());
        streamer.set_learning_enabled(false);
        streamer.on_asset_accessed(AssetId(9));
        assert!(streamer.access_patterns.lock().unwrap().is_empty());
    }
}
