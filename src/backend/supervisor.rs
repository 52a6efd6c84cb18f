//! Restart Supervisor.
//!
//! A pull state machine: the owner calls [`RestartSupervisor::tick`] from its
//! control loop at whatever cadence it likes. There is no timer thread; a tick
//! before the reopen deadline does nothing.
//!
//! ```text
//! Online ──unhealthy──► Restarting(backoff)
//!   ▲                       │ deadline reached
//!   │                       ▼
//!   └──── reopen ok ◄── try reopen ──fail──► Restarting(min(backoff·2, cap))
//! ```
//!
//! The stream is healthy while the source reports Online and the splitter
//! has seen a batch within the stall timeout (or the receiver is not started,
//! so there is nothing to time out).

use crate::config::RestartSettings;
use crate::error::Result;
use crate::pipeline::PipelineDescriptor;
use crate::types::{RxStatus, SdrStatus, SourceStatus};
use std::time::{Duration, Instant};

/// What the supervisor drives. Implemented by the recorder.
#[cfg_attr(test, mockall::automock)]
pub trait RestartTarget {
    fn source_status(&self) -> SourceStatus;

    /// Whether the source and splitter are running.
    fn is_started(&self) -> bool;

    /// Seconds since the last sample batch, `-1.0` before the first.
    fn seconds_since_last_input(&self) -> f64;

    /// Descriptor of the main live pipeline, if one is running.
    fn active_pipeline(&self) -> Option<PipelineDescriptor>;

    /// Stop the source and the splitter data plane.
    fn stop_receiver(&self);

    /// Open the source again and start streaming.
    fn restart_receiver(&self) -> Result<()>;

    /// Release the source handle.
    fn close_source(&self);

    /// Record a failed reopen on the source itself.
    fn mark_source_error(&self, message: &str);

    /// Stop the main live pipeline, remembering it for [`RestartTarget::resume_pipeline`].
    fn pause_pipeline(&self);

    fn resume_pipeline(&self) -> Result<()>;

    fn set_sdr_status(&self, status: SdrStatus);

    fn set_rx_status(&self, status: RxStatus);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Online,
    Restarting,
}

#[derive(Debug)]
pub struct RestartSupervisor {
    settings: RestartSettings,
    state: SupervisorState,
    backoff: Duration,
    deadline: Option<Instant>,
    pipeline_restart_pending: bool,
}

impl RestartSupervisor {
    pub fn new(settings: RestartSettings) -> Self {
        let backoff = settings.backoff_floor();
        Self {
            settings,
            state: SupervisorState::Online,
            backoff,
            deadline: None,
            pipeline_restart_pending: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Delay that will be applied to the next reschedule.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// When the next reopen is attempted, while restarting.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pipeline_restart_pending(&self) -> bool {
        self.pipeline_restart_pending
    }

    fn is_protected(&self, descriptor: &PipelineDescriptor) -> bool {
        self.settings
            .protected_categories
            .iter()
            .any(|c| descriptor.matches_category(c))
    }

    /// Advance the state machine once.
    pub fn tick(&mut self, target: &dyn RestartTarget, now: Instant) -> SupervisorState {
        let status = target.source_status();
        let stalled =
            target.is_started() && target.seconds_since_last_input() > self.settings.stall_timeout_secs;

        if self.state == SupervisorState::Online {
            if status == SourceStatus::Online && !stalled {
                self.report_healthy(target);
                return self.state;
            }
            self.begin_restart(target, status, stalled, now);
            return self.state;
        }

        match self.deadline {
            Some(deadline) if now < deadline => return self.state,
            _ => {}
        }
        self.attempt_reopen(target, now);
        self.state
    }

    fn report_healthy(&mut self, target: &dyn RestartTarget) {
        let rx = if target.active_pipeline().is_some() {
            RxStatus::Running
        } else {
            RxStatus::Stopped
        };
        target.set_rx_status(rx);
        target.set_sdr_status(SdrStatus::Online);
        self.pipeline_restart_pending = false;
        self.backoff = self.settings.backoff_floor();
        self.deadline = None;
    }

    fn begin_restart(&mut self, target: &dyn RestartTarget, status: SourceStatus, stalled: bool, now: Instant) {
        if stalled {
            tracing::warn!(
                "No IQ data detected for over {} seconds, restarting...",
                self.settings.stall_timeout_secs
            );
            target.set_rx_status(RxStatus::NoIq);
        } else {
            tracing::warn!("Source is {}, restarting...", status);
            match status {
                SourceStatus::Offline => target.set_sdr_status(SdrStatus::Offline),
                SourceStatus::Error => target.set_sdr_status(SdrStatus::Error),
                SourceStatus::Online => {}
            }
        }

        if target.is_started() {
            target.stop_receiver();
        }
        if let Some(descriptor) = target.active_pipeline() {
            if self.is_protected(&descriptor) {
                tracing::info!("Pausing {} until the source is back", descriptor.name);
                self.pipeline_restart_pending = true;
                target.pause_pipeline();
                target.set_rx_status(RxStatus::Restarting);
            }
        }

        target.close_source();
        self.state = SupervisorState::Restarting;
        target.set_sdr_status(SdrStatus::Restarting);
        self.deadline = Some(now + self.backoff);
    }

    fn attempt_reopen(&mut self, target: &dyn RestartTarget, now: Instant) {
        match target.restart_receiver() {
            Ok(()) if target.source_status() == SourceStatus::Online => {
                tracing::info!("Source restarted");
                self.state = SupervisorState::Online;
                self.backoff = self.settings.backoff_floor();
                self.deadline = None;
                target.set_sdr_status(SdrStatus::Online);
                if self.pipeline_restart_pending {
                    self.pipeline_restart_pending = false;
                    if let Err(e) = target.resume_pipeline() {
                        tracing::error!("Failed to resume live pipeline: {}", e);
                        target.set_rx_status(RxStatus::Error);
                    }
                }
                return;
            }
            Ok(()) => {
                tracing::warn!("Source reopened but did not come online");
            }
            Err(e) => {
                tracing::error!("Failed to restart source: {}", e);
                target.mark_source_error(&e.to_string());
                target.set_sdr_status(SdrStatus::Error);
            }
        }

        self.backoff = (self.backoff * 2).min(self.settings.backoff_cap());
        self.deadline = Some(now + self.backoff);
        target.set_sdr_status(SdrStatus::Restarting);
    }
}
