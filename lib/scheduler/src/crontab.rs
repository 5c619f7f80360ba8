//! Unix crontab adapter.
//!
//! Each task owns one line of the user's crontab, tagged with a trailing
//! `# taskward:<name>` marker. Disabling a task comments its line out with
//! a `#disabled# ` prefix so it can be restored verbatim.

use crate::error::NativeError;
use crate::native::{NativeScheduler, NativeTaskInfo, NativeTaskSpec, run_command};
use crate::schedule::{ScheduleTrigger, translate};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Utc};
use std::io::Write;

const CRONTAB: &str = "crontab";
const MARKER: &str = "# taskward:";
const DISABLED_PREFIX: &str = "#disabled# ";

/// Adapter for the invoking user's crontab.
#[derive(Debug, Clone)]
pub struct CrontabScheduler {
    program: String,
}

impl Default for CrontabScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CrontabScheduler {
    /// Creates an adapter using `crontab` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: CRONTAB.to_string(),
        }
    }

    async fn read(&self) -> Result<String, NativeError> {
        let output = run_command(&self.program, &["-l".to_string()], None).await?;
        if output.success() {
            return Ok(output.stdout);
        }
        if output.stderr.to_lowercase().contains("no crontab") {
            return Ok(String::new());
        }
        Err(output.into_error(&self.program))
    }

    async fn write(&self, contents: &str) -> Result<(), NativeError> {
        let output = run_command(&self.program, &["-".to_string()], Some(contents)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(output.into_error(&self.program))
        }
    }
}

#[async_trait]
impl NativeScheduler for CrontabScheduler {
    fn backend_name(&self) -> &'static str {
        "crontab"
    }

    fn tracks_last_run(&self) -> bool {
        false
    }

    async fn register(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        let line = render_line(spec)?;
        let current = self.read().await?;
        self.write(&upsert(&current, &spec.name, &line)).await
    }

    async fn register_elevated(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        let line = render_line(spec)?;
        let current = self.read().await?;
        let updated = upsert(&current, &spec.name, &line);

        let write_err = |e: std::io::Error| NativeError::ScriptFailed {
            reason: e.to_string(),
        };
        let mut table = tempfile::Builder::new()
            .prefix("taskward-crontab-")
            .tempfile()
            .map_err(write_err)?;
        table.write_all(updated.as_bytes()).map_err(write_err)?;
        let table = table.into_temp_path();

        let user = std::env::var("USER").unwrap_or_default();
        if user.is_empty() {
            return Err(NativeError::ScriptFailed {
                reason: "USER is not set".to_string(),
            });
        }

        tracing::info!(task = %spec.name, "requesting elevated crontab installation");
        let args = vec![
            CRONTAB.to_string(),
            "-u".to_string(),
            user,
            table.display().to_string(),
        ];
        let output = run_command("pkexec", &args, None).await?;
        if output.success() {
            Ok(())
        } else {
            Err(output.into_error("pkexec"))
        }
    }

    async fn unregister(&self, name: &str) -> Result<(), NativeError> {
        let current = self.read().await?;
        if find_line(&current, name).is_none() {
            return Ok(());
        }
        self.write(&remove(&current, name)).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), NativeError> {
        let current = self.read().await?;
        let updated = toggle(&current, name, enabled).ok_or_else(|| NativeError::NotFound {
            name: name.to_string(),
        })?;
        self.write(&updated).await
    }

    async fn query(&self, name: &str) -> Result<Option<NativeTaskInfo>, NativeError> {
        let current = self.read().await?;
        let now = Local::now().naive_local();
        Ok(find_line(&current, name).map(|line| info_for_line(line, now)))
    }
}

/// Renders the schedule part of a crontab line.
///
/// # Errors
///
/// Returns `NativeError::Unsupported` for one-shot triggers, which cron
/// cannot express.
pub fn render_schedule(trigger: &ScheduleTrigger) -> Result<String, NativeError> {
    let join = |values: Vec<String>| values.join(",");
    match trigger {
        ScheduleTrigger::Daily { time, interval } => {
            let day = if *interval > 1 {
                format!("*/{interval}")
            } else {
                "*".to_string()
            };
            Ok(format!("{} {} {day} * *", time.minute(), time.hour()))
        }
        ScheduleTrigger::Weekly { time, days, .. } => Ok(format!(
            "{} {} * * {}",
            time.minute(),
            time.hour(),
            join(days.iter().map(|d| d.index().to_string()).collect())
        )),
        ScheduleTrigger::Monthly { time, days } if !days.is_empty() => Ok(format!(
            "{} {} {} * *",
            time.minute(),
            time.hour(),
            join(days.iter().map(u8::to_string).collect())
        )),
        ScheduleTrigger::Monthly { .. } => Err(unsupported("monthly trigger without days")),
        ScheduleTrigger::Startup => Ok("@reboot".to_string()),
        ScheduleTrigger::Once { .. } => Err(unsupported("one-shot triggers")),
    }
}

fn unsupported(reason: &str) -> NativeError {
    NativeError::Unsupported {
        backend: CRONTAB.to_string(),
        reason: reason.to_string(),
    }
}

fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Renders the full tagged crontab line for a task.
///
/// # Errors
///
/// Returns an error if the trigger cannot be expressed in cron.
pub fn render_line(spec: &NativeTaskSpec) -> Result<String, NativeError> {
    let schedule = render_schedule(&spec.trigger)?;
    let command = std::iter::once(spec.program.display().to_string())
        .chain(spec.arguments.iter().cloned())
        .map(|part| sh_quote(&part))
        .collect::<Vec<_>>()
        .join(" ");
    // `%` is a newline in crontab commands.
    let command = command.replace('%', r"\%");
    let disabled = if spec.enabled { "" } else { DISABLED_PREFIX };
    Ok(format!(
        "{disabled}{schedule} cd {} && {command} {MARKER}{}",
        sh_quote(&spec.working_dir.display().to_string()),
        spec.name
    ))
}

/// Reads a task line back. cron keeps no run history, so `last_run` is
/// never known; `next_run` is derived from the schedule of an active line.
fn info_for_line(line: &str, now: NaiveDateTime) -> NativeTaskInfo {
    let enabled = !line.starts_with(DISABLED_PREFIX);
    let next_run = if enabled {
        line_trigger(line)
            .and_then(|trigger| trigger.next_after(now))
            .and_then(|next| next.and_local_timezone(Local).earliest())
            .map(|next| next.with_timezone(&Utc))
    } else {
        None
    };
    NativeTaskInfo {
        enabled,
        last_run: None,
        next_run,
    }
}

fn line_trigger(line: &str) -> Option<ScheduleTrigger> {
    let line = line.strip_prefix(DISABLED_PREFIX).unwrap_or(line);
    if line.starts_with("@reboot") {
        return Some(ScheduleTrigger::Startup);
    }
    let fields: Vec<&str> = line.split_whitespace().take(5).collect();
    translate(&fields.join(" ")).ok()
}

fn is_tagged(line: &str, name: &str) -> bool {
    line.trim_end()
        .strip_suffix(name)
        .is_some_and(|rest| rest.ends_with(MARKER))
}

/// Returns the line owned by `name`, if present.
fn find_line<'a>(table: &'a str, name: &str) -> Option<&'a str> {
    table.lines().find(|line| is_tagged(line, name))
}

fn rebuild(lines: impl Iterator<Item = String>) -> String {
    let mut out: String = lines.map(|l| l + "\n").collect();
    if out.trim().is_empty() {
        out.clear();
    }
    out
}

/// Replaces the line owned by `name`, or appends it.
fn upsert(table: &str, name: &str, line: &str) -> String {
    let mut lines = Vec::new();
    let mut replaced = false;
    for existing in table.lines() {
        if !is_tagged(existing, name) {
            lines.push(existing.to_string());
        } else if !replaced {
            lines.push(line.to_string());
            replaced = true;
        }
    }
    if !replaced {
        lines.push(line.to_string());
    }
    rebuild(lines.into_iter())
}

/// Drops the line owned by `name`.
fn remove(table: &str, name: &str) -> String {
    rebuild(
        table
            .lines()
            .filter(|line| !is_tagged(line, name))
            .map(str::to_string),
    )
}

/// Comments out or restores the line owned by `name`. Returns `None` if
/// the task has no line.
fn toggle(table: &str, name: &str, enabled: bool) -> Option<String> {
    find_line(table, name)?;
    Some(rebuild(table.lines().map(|line| {
        if !is_tagged(line, name) {
            return line.to_string();
        }
        let bare = line.strip_prefix(DISABLED_PREFIX).unwrap_or(line);
        if enabled {
            bare.to_string()
        } else {
            format!("{DISABLED_PREFIX}{bare}")
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::translate;
    use std::path::PathBuf;

    fn spec(cron: &str) -> NativeTaskSpec {
        NativeTaskSpec {
            name: "Taskward_nightly".to_string(),
            description: "nightly".to_string(),
            trigger: translate(cron).expect("valid cron"),
            program: PathBuf::from("/opt/taskward/taskward"),
            arguments: vec![
                "run".to_string(),
                "/home/me/.config/taskward/tasks/nightly.md".to_string(),
            ],
            working_dir: PathBuf::from("/opt/taskward"),
            enabled: true,
        }
    }

    #[test]
    fn renders_each_trigger_kind() {
        assert_eq!(
            render_schedule(&translate("0 9 * * *").expect("valid")).expect("render"),
            "0 9 * * *"
        );
        assert_eq!(
            render_schedule(&translate("30 8 * * 1-5").expect("valid")).expect("render"),
            "30 8 * * 1,2,3,4,5"
        );
        assert_eq!(
            render_schedule(&translate("0 6 1,15 * *").expect("valid")).expect("render"),
            "0 6 1,15 * *"
        );
        assert_eq!(
            render_schedule(&ScheduleTrigger::Startup).expect("render"),
            "@reboot"
        );
    }

    #[test]
    fn daily_interval_uses_day_step() {
        let trigger = ScheduleTrigger::Daily {
            time: crate::schedule::TimeOfDay::new(7, 5).expect("valid"),
            interval: 3,
        };
        assert_eq!(render_schedule(&trigger).expect("render"), "5 7 */3 * *");
    }

    #[test]
    fn once_is_unsupported() {
        let at = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid");
        let err = render_schedule(&ScheduleTrigger::Once { at }).unwrap_err();
        assert!(matches!(err, NativeError::Unsupported { .. }));
    }

    #[test]
    fn line_is_tagged_and_quoted() {
        let line = render_line(&spec("0 9 * * *")).expect("render");
        assert_eq!(
            line,
            "0 9 * * * cd /opt/taskward && /opt/taskward/taskward run \
             /home/me/.config/taskward/tasks/nightly.md # taskward:Taskward_nightly"
        );
    }

    #[test]
    fn arguments_with_spaces_and_percent_are_escaped() {
        let mut spec = spec("0 9 * * *");
        spec.arguments = vec!["run".to_string(), "/tmp/my task 100%.md".to_string()];
        let line = render_line(&spec).expect("render");
        assert!(line.contains(r"'/tmp/my task 100\%.md'"));
    }

    #[test]
    fn upsert_appends_then_replaces() {
        let original = "MAILTO=me\n0 1 * * * backup\n";
        let first = upsert(original, "Taskward_a", "0 9 * * * run # taskward:Taskward_a");
        assert_eq!(
            first,
            "MAILTO=me\n0 1 * * * backup\n0 9 * * * run # taskward:Taskward_a\n"
        );

        let second = upsert(&first, "Taskward_a", "0 10 * * * run # taskward:Taskward_a");
        assert_eq!(
            second,
            "MAILTO=me\n0 1 * * * backup\n0 10 * * * run # taskward:Taskward_a\n"
        );
    }

    #[test]
    fn tags_do_not_match_by_prefix() {
        let table = "0 9 * * * run # taskward:Taskward_ab\n";
        assert!(find_line(table, "Taskward_a").is_none());
        assert!(find_line(table, "Taskward_ab").is_some());
    }

    #[test]
    fn remove_leaves_other_lines() {
        let table = "0 1 * * * backup\n0 9 * * * run # taskward:Taskward_a\n";
        assert_eq!(remove(table, "Taskward_a"), "0 1 * * * backup\n");
        assert_eq!(remove("0 9 * * * run # taskward:Taskward_a\n", "Taskward_a"), "");
    }

    fn noon() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-03-13 12:00", "%Y-%m-%d %H:%M").expect("valid datetime")
    }

    #[test]
    fn disabled_spec_renders_commented_out() {
        let mut disabled = spec("0 9 * * *");
        disabled.enabled = false;
        let line = render_line(&disabled).expect("render");
        assert!(line.starts_with("#disabled# 0 9 * * * cd /opt/taskward"));
        assert!(!info_for_line(&line, noon()).enabled);
        let active = render_line(&spec("0 9 * * *")).expect("render");
        assert_eq!(toggle(&line, "Taskward_nightly", true), Some(format!("{active}\n")));
    }

    #[test]
    fn active_line_reports_next_run_only() {
        let line = render_line(&spec("30 8 * * 1-5")).expect("render");
        // A Friday evening; the next firing is Monday morning.
        let now = NaiveDateTime::parse_from_str("2026-03-13 20:00", "%Y-%m-%d %H:%M")
            .expect("valid datetime");
        let info = info_for_line(&line, now);
        assert!(info.enabled);
        assert_eq!(info.last_run, None);

        let expected = NaiveDateTime::parse_from_str("2026-03-16 08:30", "%Y-%m-%d %H:%M")
            .expect("valid datetime");
        let next = info.next_run.expect("next run");
        assert_eq!(next.with_timezone(&Local).naive_local(), expected);

        let disabled = toggle(&line, "Taskward_nightly", false).expect("present");
        assert_eq!(info_for_line(disabled.trim_end(), now).next_run, None);
    }

    #[test]
    fn reboot_line_has_no_next_run() {
        let mut spec = spec("0 9 * * *");
        spec.trigger = ScheduleTrigger::Startup;
        let line = render_line(&spec).expect("render");
        assert_eq!(line_trigger(&line), Some(ScheduleTrigger::Startup));
        assert_eq!(info_for_line(&line, noon()).next_run, None);
    }

    #[test]
    fn toggle_comments_and_restores() {
        let table = "0 9 * * * run # taskward:Taskward_a\n";
        let disabled = toggle(table, "Taskward_a", false).expect("present");
        assert_eq!(disabled, "#disabled# 0 9 * * * run # taskward:Taskward_a\n");
        assert!(
            find_line(&disabled, "Taskward_a")
                .expect("present")
                .starts_with(DISABLED_PREFIX)
        );

        // Disabling twice does not stack prefixes.
        let again = toggle(&disabled, "Taskward_a", false).expect("present");
        assert_eq!(again, disabled);

        let enabled = toggle(&disabled, "Taskward_a", true).expect("present");
        assert_eq!(enabled, table);

        assert!(toggle(table, "Taskward_b", true).is_none());
    }
}
