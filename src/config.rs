//! Training-run configuration.
//!
//! Argument parsing lives outside this crate; whatever CLI or launcher is
//! in front fills in a [`TrainConfig`] and hands it over. The defaults are
//! the classic ImageNet recipe.

use std::path::PathBuf;

use crate::error::{Result, TrainError};

/// Everything the training orchestrator consumes.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Dataset root path (consumed by the data-loading collaborator).
    pub data_dir: PathBuf,
    /// Architecture identifier, recorded in every checkpoint.
    pub arch: String,
    /// Data-loading worker count (consumed by the data-loading collaborator).
    pub workers: usize,
    /// Total epochs to run.
    pub epochs: usize,
    /// First epoch index (overridden by a resumed checkpoint).
    pub start_epoch: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Base learning rate fed to the schedule.
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    /// Emit a progress line every this many batches.
    pub print_freq: usize,
    /// Checkpoint to restore before the loop starts.
    pub resume: Option<PathBuf>,
    /// Run exactly one validation pass and stop.
    pub evaluate: bool,
    /// Start from pretrained weights (consumed by the model constructor).
    pub pretrained: bool,
    /// Maximum dyadic scale J of the scattering transform.
    pub scattering_scale: usize,
    /// Run directory for checkpoints and the run log.
    pub save_dir: PathBuf,
    /// Bottleneck stage widths.
    pub bottleneck_width: Vec<usize>,
    /// Bottleneck stage depths, one per width entry.
    pub bottleneck_depth: Vec<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            arch: "scat_bottleneck".to_string(),
            workers: 4,
            epochs: 90,
            start_epoch: 0,
            batch_size: 256,
            learning_rate: 0.1,
            momentum: 0.9,
            weight_decay: 1e-4,
            print_freq: 10,
            resume: None,
            evaluate: false,
            pretrained: false,
            scattering_scale: 3,
            save_dir: PathBuf::from("runs"),
            bottleneck_width: vec![128, 256],
            bottleneck_depth: vec![3, 3],
        }
    }
}

impl TrainConfig {
    /// Replaces the bottleneck stage spec from its JSON list form, e.g.
    /// `"[128,256]"` / `"[3,3]"`.
    pub fn with_bottleneck_spec(mut self, width: &str, depth: &str) -> Result<Self> {
        self.bottleneck_width = parse_spec_list(width)?;
        self.bottleneck_depth = parse_spec_list(depth)?;
        Ok(self)
    }

    /// Checks cross-field consistency. Called once before a run starts; a
    /// failure here means no work is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrainError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.print_freq == 0 {
            return Err(TrainError::Config(
                "print frequency must be at least 1".to_string(),
            ));
        }
        if self.bottleneck_width.is_empty()
            || self.bottleneck_width.len() != self.bottleneck_depth.len()
        {
            return Err(TrainError::Config(format!(
                "bottleneck spec needs matching non-empty width/depth lists, got {} widths and {} depths",
                self.bottleneck_width.len(),
                self.bottleneck_depth.len()
            )));
        }
        if !self.evaluate && self.start_epoch >= self.epochs && self.resume.is_none() {
            return Err(TrainError::Config(format!(
                "start epoch {} leaves no epochs to run out of {}",
                self.start_epoch, self.epochs
            )));
        }
        Ok(())
    }
}

/// Parses a JSON integer list like `"[128,256]"`.
///
/// # Errors
///
/// Malformed JSON and empty lists are configuration errors.
pub fn parse_spec_list(spec: &str) -> Result<Vec<usize>> {
    let values: Vec<usize> = serde_json::from_str(spec)
        .map_err(|e| TrainError::Config(format!("malformed spec list '{spec}': {e}")))?;
    if values.is_empty() {
        return Err(TrainError::Config(format!(
            "spec list '{spec}' must not be empty"
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_list() {
        assert_eq!(parse_spec_list("[128,256]").unwrap(), vec![128, 256]);
        assert_eq!(parse_spec_list("[3, 3]").unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_parse_spec_list_rejects_garbage() {
        assert!(matches!(
            parse_spec_list("128,256"),
            Err(TrainError::Config(_))
        ));
        assert!(matches!(parse_spec_list("[]"), Err(TrainError::Config(_))));
        assert!(matches!(
            parse_spec_list("[-1]"),
            Err(TrainError::Config(_))
        ));
    }

    #[test]
    fn test_default_validates() {
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn test_mismatched_bottleneck_spec() {
        let config = TrainConfig::default()
            .with_bottleneck_spec("[128]", "[3,3]")
            .unwrap();
        assert!(matches!(config.validate(), Err(TrainError::Config(_))));
    }

    #[test]
    fn test_exhausted_epoch_range() {
        let config = TrainConfig {
            start_epoch: 90,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::Config(_))));
    }
}
