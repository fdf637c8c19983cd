pub mod run;
pub mod synthetic;
pub mod validate;

use rtwl_rs::streaming::replay_rounds;
use rtwl_rs::{
    Chunk, LocationPeak, LocationWindow, PipelineCoordinator, PipelineEvent, PipelineStats,
    ReplayPacing, RtwlConfig, RtwlError, TravelTimeProvider,
};
use std::sync::Arc;

/// Everything a finished pipeline run produced
pub struct PipelineRun {
    pub windows: Vec<LocationWindow>,
    pub stats: PipelineStats,
}

impl PipelineRun {
    /// Strongest sample over every located window
    pub fn peak(&self) -> Option<LocationPeak> {
        self.windows
            .iter()
            .filter_map(LocationWindow::peak)
            .max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
    }
}

/// Start a pipeline, replay `rounds` through it and shut it down.
pub async fn run_pipeline(
    config: RtwlConfig,
    provider: Arc<dyn TravelTimeProvider>,
    rounds: Vec<Vec<Chunk>>,
) -> Result<PipelineRun, RtwlError> {
    let pacing = ReplayPacing::from_offline_mode(config.offline_mode);
    let mut handle = PipelineCoordinator::start(config, provider).await?;
    let mut events = handle.outputs().ok_or(RtwlError::ChannelClosed)?;

    let collector = tokio::spawn(async move {
        let mut windows = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Located(window) => windows.push(window),
                PipelineEvent::Stopped => break,
                other => log::info!("{:?}", other),
            }
        }
        windows
    });

    let replayed = replay_rounds(&handle, rounds, pacing).await;
    let stats = handle.shutdown().await?;
    replayed?;

    let windows = collector
        .await
        .map_err(|e| RtwlError::Worker(e.to_string()))?;
    Ok(PipelineRun { windows, stats })
}
