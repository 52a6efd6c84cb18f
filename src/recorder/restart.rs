//! The recorder as a [`RestartTarget`].

use super::Recorder;
use crate::backend::RestartTarget;
use crate::error::Result;
use crate::pipeline::PipelineDescriptor;
use crate::sync::lock;
use crate::types::{RxStatus, SdrStatus, SourceStatus};

impl RestartTarget for Recorder {
    fn source_status(&self) -> SourceStatus {
        Recorder::source_status(self)
    }

    fn is_started(&self) -> bool {
        Recorder::is_started(self)
    }

    fn seconds_since_last_input(&self) -> f64 {
        self.splitter.seconds_since_last_input()
    }

    fn active_pipeline(&self) -> Option<PipelineDescriptor> {
        lock(&self.live)
            .run
            .as_ref()
            .map(|run| run.descriptor().clone())
    }

    fn stop_receiver(&self) {
        self.stop();
    }

    fn restart_receiver(&self) -> Result<()> {
        {
            let mut slot = lock(&self.source);
            if !slot.opened {
                slot.source.open()?;
                slot.opened = true;
            }
        }
        self.start()
    }

    fn close_source(&self) {
        let mut slot = lock(&self.source);
        slot.source.close();
        slot.opened = false;
    }

    fn mark_source_error(&self, message: &str) {
        lock(&self.source).source.set_status(SourceStatus::Error);
        *lock(&self.last_source_error) = Some(message.to_string());
    }

    fn pause_pipeline(&self) {
        if let Some(outcome) = self.stop_processing() {
            tracing::info!(run_id = %outcome.run_id, "Live pipeline paused for source restart");
        }
    }

    fn resume_pipeline(&self) -> Result<()> {
        self.resume_processing()
    }

    fn set_sdr_status(&self, status: SdrStatus) {
        Recorder::set_sdr_status(self, status);
    }

    fn set_rx_status(&self, status: RxStatus) {
        Recorder::set_rx_status(self, status);
    }
}
