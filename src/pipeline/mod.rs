//! Capture pipeline
//!
//! All configuration changes (open, attach, detach, rebuild, close) run on one
//! control thread in the order they were issued. Hardware callbacks are posted
//! into the same queue, so the worker's state is only ever touched from there.

pub mod controller;
pub mod request;
pub mod targets;
mod worker;

use tokio::sync::oneshot;

use crate::errors::Result;

pub use controller::{PipelineController, PipelineControllerBuilder};
pub use request::{AeMode, AwbMode, ControlMode, FrameRateRange, RepeatingRequest, RequestTemplate};
pub use targets::{ActiveTargetSet, FrameSink, OutputTarget, TargetKind};
pub use worker::{PipelineState, PipelineStatus};

/// One-shot completion for a caller request
pub type Responder<T> = oneshot::Sender<Result<T>>;

/// Deliver a result, ignoring callers that stopped waiting
pub(crate) fn respond<T>(reply: Responder<T>, result: Result<T>) {
    if reply.send(result).is_err() {
        log::debug!("Caller dropped before receiving the result");
    }
}
