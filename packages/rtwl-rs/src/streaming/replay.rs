// Replay of recorded or synthetic chunks into a running pipeline

use super::coordinator::PipelineHandle;
use crate::chunk::Chunk;
use crate::error::Result;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// How replayed chunks are spaced in wall-clock time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplayPacing {
    /// Ingest as fast as the pipeline accepts
    Offline,

    /// Hold each chunk back until its last sample would have been recorded
    RealTime,

    /// Fixed pause between delivery rounds
    Fixed(Duration),
}

impl ReplayPacing {
    pub fn from_offline_mode(offline_mode: bool) -> Self {
        if offline_mode {
            ReplayPacing::Offline
        } else {
            ReplayPacing::RealTime
        }
    }
}

/// Ingest delivery rounds in order. Returns the number of chunks ingested.
pub async fn replay_rounds(
    handle: &PipelineHandle,
    rounds: Vec<Vec<Chunk>>,
    pacing: ReplayPacing,
) -> Result<usize> {
    let started = Instant::now();
    let origin = rounds
        .iter()
        .flatten()
        .map(|c| c.start)
        .fold(f64::INFINITY, f64::min);

    let mut ingested = 0usize;
    for (i, round) in rounds.into_iter().enumerate() {
        if let ReplayPacing::Fixed(pause) = pacing {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
        }
        for chunk in round {
            if pacing == ReplayPacing::RealTime {
                let due = (chunk.end() + chunk.dt - origin).max(0.0);
                tokio::time::sleep_until(started + Duration::from_secs_f64(due)).await;
            }
            handle.ingest(chunk).await?;
            ingested += 1;
        }
        log::debug!("replayed round {} ({} chunks so far)", i, ingested);
    }
    Ok(ingested)
}

/// Read chunks stored one JSON object per line; blank lines are skipped
pub fn read_chunks_jsonl(path: impl AsRef<Path>) -> Result<Vec<Chunk>> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut chunks = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        chunks.push(serde_json::from_str(&line)?);
    }
    Ok(chunks)
}

/// Write chunks one JSON object per line
pub fn write_chunks_jsonl(path: impl AsRef<Path>, chunks: &[Chunk]) -> Result<()> {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&serde_json::to_string(chunk)?);
        out.push('\n');
    }
    std::fs::write(path.as_ref(), out)?;
    Ok(())
}
