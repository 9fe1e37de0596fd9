use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    CacheCheck,
    Expand,
    Retrieve,
    Rerank,
    Generate,
    CacheWrite,
}

// Pipeline stage timings tracker
#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StageKind, Duration)> {
        self.timings.iter()
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, d)| d.as_millis())
    }

    pub fn cache_check_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::CacheCheck)
    }

    pub fn expand_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Expand)
    }

    pub fn retrieve_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Retrieve)
    }

    pub fn rerank_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Rerank)
    }

    pub fn generate_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Generate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_recorded_stage_durations() {
        let mut timings = PipelineStageTimings::default();
        timings.record(StageKind::Retrieve, Duration::from_millis(12));
        timings.record(StageKind::Generate, Duration::from_millis(340));

        assert_eq!(timings.retrieve_ms(), 12);
        assert_eq!(timings.generate_ms(), 340);
        assert_eq!(timings.rerank_ms(), 0);
        assert_eq!(timings.into_vec().len(), 2);
    }
}
