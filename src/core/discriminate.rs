use serde::{Deserialize, Serialize};

use crate::types::DetectionCandidate;

/// False-alarm discrimination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminationParams {
    /// Reject components smaller than this (speckle noise)
    pub min_area: usize,
    /// Reject components larger than this (residual land or clutter edges)
    pub max_area: usize,
    /// Minimum peak-over-background ratio
    pub min_contrast_ratio: f64,
    /// Maximum bounding-box area over pixel count; rejects elongated clutter
    /// streaks. None disables the rule.
    pub max_compactness: Option<f64>,
}

impl Default for DiscriminationParams {
    fn default() -> Self {
        Self {
            min_area: 1,
            max_area: 10_000,
            min_contrast_ratio: 2.0,
            max_compactness: None,
        }
    }
}

/// Why a candidate was rejected; the first failing rule wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Pixel count below min_area
    TooSmall,
    /// Pixel count above max_area
    TooLarge,
    /// Contrast ratio below the floor
    LowContrast,
    /// Bounding-box area / pixel count above max_compactness
    Elongated,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::TooSmall => write!(f, "below minimum area"),
            RejectionReason::TooLarge => write!(f, "above maximum area"),
            RejectionReason::LowContrast => write!(f, "below contrast floor"),
            RejectionReason::Elongated => write!(f, "above compactness bound"),
        }
    }
}

/// Discrimination outcome: accepted candidates plus rejects with reasons
#[derive(Debug, Clone)]
pub struct Discrimination {
    pub accepted: Vec<DetectionCandidate>,
    pub rejected: Vec<(DetectionCandidate, RejectionReason)>,
}

/// Shape/contrast discriminator separating targets from clutter
pub struct Discriminator {
    params: DiscriminationParams,
}

impl Discriminator {
    pub fn new(params: DiscriminationParams) -> Self {
        Self { params }
    }

    pub fn with_defaults() -> Self {
        Self::new(DiscriminationParams::default())
    }

    /// Evaluate the rules in fixed order against one candidate.
    fn evaluate(&self, candidate: &DetectionCandidate) -> Option<RejectionReason> {
        if candidate.pixel_count < self.params.min_area {
            return Some(RejectionReason::TooSmall);
        }
        if candidate.pixel_count > self.params.max_area {
            return Some(RejectionReason::TooLarge);
        }
        if candidate.contrast_ratio < self.params.min_contrast_ratio {
            return Some(RejectionReason::LowContrast);
        }
        if let Some(max_compactness) = self.params.max_compactness {
            let compactness = candidate.bounds.area() as f64 / candidate.pixel_count as f64;
            if compactness > max_compactness {
                return Some(RejectionReason::Elongated);
            }
        }
        None
    }

    /// Route candidates into accepted and rejected sets. Candidates are moved,
    /// never modified.
    pub fn discriminate(&self, candidates: Vec<DetectionCandidate>) -> Discrimination {
        let total = candidates.len();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for candidate in candidates {
            match self.evaluate(&candidate) {
                None => accepted.push(candidate),
                Some(reason) => {
                    log::debug!(
                        "rejected candidate at ({:.1}, {:.1}): {}",
                        candidate.centroid_row,
                        candidate.centroid_col,
                        reason
                    );
                    rejected.push((candidate, reason));
                }
            }
        }

        log::info!(
            "discrimination: {} of {} candidates accepted",
            accepted.len(),
            total
        );
        Discrimination { accepted, rejected }
    }
}
