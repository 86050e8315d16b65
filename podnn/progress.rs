use std::fmt;

/// Long-running stages that report incremental progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    BasisFit,
    Training,
    HifiPrediction,
}

impl PipelineStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::BasisFit => "POD basis fit",
            Self::Training => "surrogate training",
            Self::HifiPrediction => "hifi prediction",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress through the pipeline.
///
/// `total` and `processed` count epochs for [`PipelineStage::Training`] and
/// rows for [`PipelineStage::HifiPrediction`].
pub trait ProgressObserver {
    fn on_stage_start(&mut self, stage: PipelineStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: PipelineStage, processed: usize) {
        let _ = (stage, processed);
    }
    /// Latest training loss, reported alongside epoch progress.
    fn on_loss(&mut self, epoch: usize, loss: f64) {
        let _ = (epoch, loss);
    }
    fn on_stage_finish(&mut self, stage: PipelineStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every callback for assertions in other modules' tests.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub started: Vec<(PipelineStage, usize)>,
        pub advanced: Vec<(PipelineStage, usize)>,
        pub losses: Vec<(usize, f64)>,
        pub finished: Vec<PipelineStage>,
    }

    impl ProgressObserver for RecordingProgress {
        fn on_stage_start(&mut self, stage: PipelineStage, total: usize) {
            self.started.push((stage, total));
        }
        fn on_stage_advance(&mut self, stage: PipelineStage, processed: usize) {
            self.advanced.push((stage, processed));
        }
        fn on_loss(&mut self, epoch: usize, loss: f64) {
            self.losses.push((epoch, loss));
        }
        fn on_stage_finish(&mut self, stage: PipelineStage) {
            self.finished.push(stage);
        }
    }

    #[test]
    fn stages_describe_themselves() {
        assert_eq!(PipelineStage::Training.to_string(), "surrogate training");
        assert_eq!(PipelineStage::BasisFit.describe(), "POD basis fit");
    }

    #[test]
    fn noop_observer_accepts_every_callback() {
        let mut observer = NoopProgress;
        observer.on_stage_start(PipelineStage::HifiPrediction, 3);
        observer.on_stage_advance(PipelineStage::HifiPrediction, 3);
        observer.on_loss(0, 1.0);
        observer.on_stage_finish(PipelineStage::HifiPrediction);
    }
}
