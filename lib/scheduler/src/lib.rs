//! Schedule translation and native scheduler registration.
//!
//! This crate provides:
//!
//! - **Translation**: cron expressions to [`ScheduleTrigger`] values
//! - **Native adapters**: Windows Task Scheduler and crontab backends
//!   behind the [`NativeScheduler`] trait
//! - **Registrar**: task registration with the elevation fallback

pub mod crontab;
pub mod error;
pub mod native;
pub mod powershell;
pub mod registrar;
pub mod schedule;

pub use crontab::CrontabScheduler;
pub use error::{NativeError, ScheduleError, SchedulerError};
pub use native::{
    NativeScheduler, NativeTaskInfo, NativeTaskSpec, for_backend, is_permission_denied,
};
pub use powershell::PowerShellScheduler;
pub use registrar::{SchedulerRegistrar, TaskStatus};
pub use schedule::{ScheduleTrigger, TimeOfDay, TriggerKind, Weekday, translate};
