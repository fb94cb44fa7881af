//! Landing decision logic.
//!
//! [`LandingFsm`] gates the descent on pose quality, landability and link
//! health; [`SafetySupervisor`] runs the per-tick watchdogs whose findings
//! feed the machine's failsafe rule. [`GuidanceController`] turns the
//! machine's output into advisory velocity setpoints.

mod fsm;
mod guidance;
mod safety;

pub use fsm::{
    transition, AbortReason, Commands, FailsafeReason, FsmOutput, FsmParams, FsmState, FsmStateKind,
    Instruction, LandingFsm, Step, TickInputs,
};
pub use guidance::{GuidanceController, GuidanceParams, Setpoint};
pub use safety::{SafetyLimits, SafetyStatus, SafetySupervisor, SafetyViolation};
