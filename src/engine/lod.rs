// Caller-side level-of-detail selection. The loader never switches variants.

use crate::config::{ExportConfig, LodConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LodLevel {
    High,
    Medium,
    Low,
}

impl LodLevel {
    pub const ALL: [LodLevel; 3] = [LodLevel::High, LodLevel::Medium, LodLevel::Low];

    fn from_index(index: usize) -> Self {
        match index {
            0 => LodLevel::High,
            1 => LodLevel::Medium,
            _ => LodLevel::Low,
        }
    }

    pub fn index(self) -> usize {
        match self {
            LodLevel::High => 0,
            LodLevel::Medium => 1,
            LodLevel::Low => 2,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            LodLevel::High => "high",
            LodLevel::Medium => "medium",
            LodLevel::Low => "low",
        }
    }
}

/// Asset id of one LOD variant: `rock1@low`.
pub fn variant_id(base: &str, level: LodLevel) -> String {
    format!("{}@{}", base, level.suffix())
}

/// Distance thresholds and export ratios for picking a variant.
#[derive(Debug, Clone, PartialEq)]
pub struct LodPolicy {
    distances: Vec<f32>,
    ratios: Vec<f32>,
}

impl LodPolicy {
    pub fn new(lod: &LodConfig, export: &ExportConfig) -> Self {
        Self {
            distances: lod.distances.clone(),
            ratios: export.lod_ratios.clone(),
        }
    }

    /// Level for a viewer at `distance`: one level lower past each threshold.
    pub fn select(&self, distance: f32) -> LodLevel {
        let passed = self.distances.iter().filter(|d| distance >= **d).count();
        LodLevel::from_index(passed)
    }

    /// Export geometry ratio for `level`, clamped to the configured levels.
    pub fn ratio(&self, level: LodLevel) -> f32 {
        let index = level.index().min(self.ratios.len().saturating_sub(1));
        self.ratios.get(index).copied().unwrap_or(1.0)
    }

    /// Variant a consumer should hold for `base` at `distance`.
    pub fn variant_for(&self, base: &str, distance: f32) -> String {
        variant_id(base, self.select(distance))
    }
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self::new(&LodConfig::default(), &ExportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_distance() {
        let policy = LodPolicy::default();
        assert_eq!(policy.select(0.0), LodLevel::High);
        assert_eq!(policy.select(29.9), LodLevel::High);
        assert_eq!(policy.select(30.0), LodLevel::Medium);
        assert_eq!(policy.select(500.0), LodLevel::Low);
        assert_eq!(policy.variant_for("rock1", 50.0), "rock1@medium");
    }

    #[test]
    fn test_ratio_clamps_to_configured_levels() {
        let policy = LodPolicy::new(
            &LodConfig::default(),
            &ExportConfig {
                lod_ratios: vec![1.0, 0.4],
            },
        );
        assert_eq!(policy.ratio(LodLevel::High), 1.0);
        assert_eq!(policy.ratio(LodLevel::Low), 0.4);
    }
}
