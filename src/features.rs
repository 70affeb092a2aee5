use log::info;

use crate::error::Result;
use crate::tracker::TrackerClient;
use crate::util::is_version_greater_or_equal;

const FEATURE_TOGGLES_MIN_VERSION: &str = "25.1.12";

const PIPELINE_PARAMETERS_TOGGLE: &str = "run_pipeline_with_parameters";
const AUTOMATED_TESTS_TOGGLE: &str = "run_automated_tests";

/// Server-side feature toggles relevant to the relay. Everything defaults
/// off when the server predates toggle support.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub pipeline_parameters: bool,
    pub automated_tests: bool,
}

impl Features {
    pub async fn load(tracker: &TrackerClient) -> Result<Self> {
        let server_version = tracker.get_server_version().await?;
        if !is_version_greater_or_equal(&server_version, FEATURE_TOGGLES_MIN_VERSION) {
            info!(
                "The tracking server version '{server_version}' predates '{FEATURE_TOGGLES_MIN_VERSION}'. Turning off all feature toggles..."
            );
            return Ok(Self::default());
        }

        let toggles = tracker.get_feature_toggles().await?;
        let features = Self {
            pipeline_parameters: toggles
                .get(PIPELINE_PARAMETERS_TOGGLE)
                .copied()
                .unwrap_or(false),
            automated_tests: toggles.get(AUTOMATED_TESTS_TOGGLE).copied().unwrap_or(false),
        };

        info!(
            "Feature '{PIPELINE_PARAMETERS_TOGGLE}' is {}.",
            if features.pipeline_parameters { "on" } else { "off" }
        );
        info!(
            "Feature '{AUTOMATED_TESTS_TOGGLE}' is {}.",
            if features.automated_tests { "on" } else { "off" }
        );

        Ok(features)
    }
}
