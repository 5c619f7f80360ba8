//! Windows Task Scheduler adapter driven through PowerShell.
//!
//! Registration goes through the `Schedule.Service` COM object so that
//! every trigger kind, including day-of-month sets, can be expressed.
//! Scripts are passed with `-EncodedCommand` to sidestep quoting.

use crate::error::NativeError;
use crate::native::{NativeScheduler, NativeTaskInfo, NativeTaskSpec, run_command};
use crate::schedule::{ScheduleTrigger, TimeOfDay, Weekday};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;

const POWERSHELL: &str = "powershell.exe";

// Task Scheduler 2.0 trigger type codes.
const TRIGGER_TIME: u8 = 1;
const TRIGGER_DAILY: u8 = 2;
const TRIGGER_WEEKLY: u8 = 3;
const TRIGGER_MONTHLY: u8 = 4;
const TRIGGER_BOOT: u8 = 8;

/// All twelve months in a `MonthsOfYear` mask.
const ALL_MONTHS: u16 = 0x0FFF;

/// Adapter for the Windows Task Scheduler.
#[derive(Debug, Clone)]
pub struct PowerShellScheduler {
    program: String,
}

impl Default for PowerShellScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerShellScheduler {
    /// Creates an adapter using `powershell.exe` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: POWERSHELL.to_string(),
        }
    }

    async fn run_script(&self, script: &str) -> Result<String, NativeError> {
        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-EncodedCommand".to_string(),
            encode_command(script),
        ];
        let output = run_command(&self.program, &args, None).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(output.into_error(&self.program))
        }
    }
}

#[async_trait]
impl NativeScheduler for PowerShellScheduler {
    fn backend_name(&self) -> &'static str {
        "powershell"
    }

    async fn register(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        let script = register_script(spec, Local::now().date_naive())?;
        self.run_script(&script).await.map(|_| ())
    }

    async fn register_elevated(&self, spec: &NativeTaskSpec) -> Result<(), NativeError> {
        let script = register_script(spec, Local::now().date_naive())?;

        let mut file = tempfile::Builder::new()
            .prefix("taskward-register-")
            .suffix(".ps1")
            .tempfile()
            .map_err(|e| NativeError::ScriptFailed {
                reason: e.to_string(),
            })?;
        file.write_all(script.as_bytes())
            .map_err(|e| NativeError::ScriptFailed {
                reason: e.to_string(),
            })?;
        // The path must outlive the elevated child; it is removed on drop.
        let path = file.into_temp_path();

        tracing::info!(task = %spec.name, "requesting elevated registration");
        self.run_script(&elevation_script(&path.display().to_string()))
            .await
            .map(|_| ())
    }

    async fn unregister(&self, name: &str) -> Result<(), NativeError> {
        let script = format!(
            "$t = Get-ScheduledTask -TaskName {name} -ErrorAction SilentlyContinue\n\
             if ($t) {{\n\
               Unregister-ScheduledTask -TaskName {name} -Confirm:$false -ErrorAction Stop\n\
             }}",
            name = ps_quote(name)
        );
        self.run_script(&script).await.map(|_| ())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), NativeError> {
        let cmdlet = if enabled {
            "Enable-ScheduledTask"
        } else {
            "Disable-ScheduledTask"
        };
        let script = format!(
            "{cmdlet} -TaskName {} -ErrorAction Stop | Out-Null",
            ps_quote(name)
        );
        self.run_script(&script).await.map(|_| ())
    }

    async fn query(&self, name: &str) -> Result<Option<NativeTaskInfo>, NativeError> {
        let stdout = self.run_script(&query_script(name)).await?;
        parse_query_output(&stdout)
    }
}

/// Base64 of the UTF-16LE script, as `-EncodedCommand` expects.
#[must_use]
pub fn encode_command(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Single-quoted PowerShell string literal.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes one argument for a Windows command line.
fn win_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

fn days_of_week_mask(days: &BTreeSet<Weekday>) -> u8 {
    days.iter().fold(0, |mask, day| mask | (1 << day.index()))
}

fn days_of_month_mask(days: &BTreeSet<u8>) -> u32 {
    days.iter()
        .filter(|d| (1..=31).contains(*d))
        .fold(0, |mask, day| mask | (1 << (day - 1)))
}

fn start_boundary(date: NaiveDate, time: TimeOfDay) -> String {
    format!(
        "{}T{:02}:{:02}:00",
        date.format("%Y-%m-%d"),
        time.hour(),
        time.minute()
    )
}

/// Script lines that add the trigger to `$def`.
fn trigger_lines(trigger: &ScheduleTrigger, today: NaiveDate) -> Result<String, NativeError> {
    if matches!(trigger, ScheduleTrigger::Monthly { days, .. } if days.is_empty()) {
        return Err(NativeError::Unsupported {
            backend: "powershell".to_string(),
            reason: "monthly trigger without days".to_string(),
        });
    }
    let lines = match trigger {
        ScheduleTrigger::Daily { time, interval } => format!(
            "$tr = $def.Triggers.Create({TRIGGER_DAILY})\n\
             $tr.StartBoundary = '{}'\n\
             $tr.DaysInterval = {}",
            start_boundary(today, *time),
            (*interval).max(1)
        ),
        ScheduleTrigger::Weekly {
            time,
            days,
            interval,
        } => format!(
            "$tr = $def.Triggers.Create({TRIGGER_WEEKLY})\n\
             $tr.StartBoundary = '{}'\n\
             $tr.DaysOfWeek = {}\n\
             $tr.WeeksInterval = {}",
            start_boundary(today, *time),
            days_of_week_mask(days),
            (*interval).max(1)
        ),
        ScheduleTrigger::Monthly { time, days } => format!(
            "$tr = $def.Triggers.Create({TRIGGER_MONTHLY})\n\
             $tr.StartBoundary = '{}'\n\
             $tr.DaysOfMonth = {}\n\
             $tr.MonthsOfYear = {ALL_MONTHS}",
            start_boundary(today, *time),
            days_of_month_mask(days)
        ),
        ScheduleTrigger::Once { at } => format!(
            "$tr = $def.Triggers.Create({TRIGGER_TIME})\n\
             $tr.StartBoundary = '{}'",
            at.format("%Y-%m-%dT%H:%M:%S")
        ),
        ScheduleTrigger::Startup => format!("$tr = $def.Triggers.Create({TRIGGER_BOOT})"),
    };
    Ok(lines)
}

/// Builds the registration script for a task.
///
/// `today` anchors the trigger's start boundary.
///
/// # Errors
///
/// Returns `NativeError::Unsupported` for a monthly trigger with no days.
pub fn register_script(spec: &NativeTaskSpec, today: NaiveDate) -> Result<String, NativeError> {
    let arguments = spec
        .arguments
        .iter()
        .map(|a| win_arg(a))
        .collect::<Vec<_>>()
        .join(" ");
    let trigger = trigger_lines(&spec.trigger, today)?;

    Ok(format!(
        "$ErrorActionPreference = 'Stop'\n\
         $svc = New-Object -ComObject Schedule.Service\n\
         $svc.Connect()\n\
         $def = $svc.NewTask(0)\n\
         $def.RegistrationInfo.Description = {description}\n\
         $def.Settings.Enabled = {enabled}\n\
         $def.Settings.StartWhenAvailable = $true\n\
         $def.Settings.DisallowStartIfOnBatteries = $false\n\
         $def.Settings.StopIfGoingOnBatteries = $false\n\
         {trigger}\n\
         $act = $def.Actions.Create(0)\n\
         $act.Path = {program}\n\
         $act.Arguments = {arguments}\n\
         $act.WorkingDirectory = {working_dir}\n\
         $svc.GetFolder('\\').RegisterTaskDefinition({name}, $def, 6, $null, $null, 3) | Out-Null",
        description = ps_quote(&spec.description),
        enabled = if spec.enabled { "$true" } else { "$false" },
        program = ps_quote(&spec.program.display().to_string()),
        arguments = ps_quote(&arguments),
        working_dir = ps_quote(&spec.working_dir.display().to_string()),
        name = ps_quote(&spec.name),
    ))
}

/// Wraps a script file in an elevated `Start-Process` that propagates the
/// child's exit code.
fn elevation_script(script_path: &str) -> String {
    let inner = format!(
        "-NoProfile -NonInteractive -ExecutionPolicy Bypass -File {}",
        win_arg(script_path)
    );
    format!(
        "$p = Start-Process -FilePath '{POWERSHELL}' -ArgumentList {} -Verb RunAs -Wait -PassThru\n\
         exit $p.ExitCode",
        ps_quote(&inner)
    )
}

fn query_script(name: &str) -> String {
    format!(
        "$t = Get-ScheduledTask -TaskName {name} -ErrorAction SilentlyContinue\n\
         if (-not $t) {{ exit 0 }}\n\
         $i = Get-ScheduledTaskInfo -TaskName {name}\n\
         $last = $i.LastRunTime\n\
         $next = $i.NextRunTime\n\
         [pscustomobject]@{{\n\
           State = [string]$t.State\n\
           LastRunTime = if ($last) {{ $last.ToUniversalTime().ToString('o') }} else {{ $null }}\n\
           NextRunTime = if ($next) {{ $next.ToUniversalTime().ToString('o') }} else {{ $null }}\n\
         }} | ConvertTo-Json -Compress",
        name = ps_quote(name)
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryOutput {
    state: String,
    last_run_time: Option<String>,
    next_run_time: Option<String>,
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses the JSON emitted by the query script. Empty output means the
/// task does not exist.
fn parse_query_output(stdout: &str) -> Result<Option<NativeTaskInfo>, NativeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let output: QueryOutput =
        serde_json::from_str(trimmed).map_err(|e| NativeError::ParseFailed {
            reason: e.to_string(),
        })?;
    Ok(Some(NativeTaskInfo {
        enabled: !output.state.eq_ignore_ascii_case("disabled"),
        last_run: parse_time(output.last_run_time.as_deref()),
        next_run: parse_time(output.next_run_time.as_deref()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::translate;
    use std::path::PathBuf;

    fn spec(trigger: ScheduleTrigger) -> NativeTaskSpec {
        NativeTaskSpec {
            name: "Taskward_nightly".to_string(),
            description: "Nightly report's run".to_string(),
            trigger,
            program: PathBuf::from(r"C:\Program Files\taskward\taskward.exe"),
            arguments: vec![
                "run".to_string(),
                r"C:\Users\me\tasks\nightly.md".to_string(),
            ],
            working_dir: PathBuf::from(r"C:\Program Files\taskward"),
            enabled: true,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date")
    }

    #[test]
    fn encode_command_is_utf16le_base64() {
        // "A" in UTF-16LE is 0x41 0x00.
        assert_eq!(encode_command("A"), "QQA=");
    }

    #[test]
    fn ps_quote_doubles_single_quotes() {
        assert_eq!(ps_quote("it's"), "'it''s'");
    }

    #[test]
    fn win_arg_quotes_when_needed() {
        assert_eq!(win_arg("run"), "run");
        assert_eq!(win_arg(r"C:\Program Files\x"), r#""C:\Program Files\x""#);
        assert_eq!(win_arg(""), r#""""#);
        assert_eq!(win_arg(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    fn weekly_script_sets_day_mask() {
        let trigger = translate("30 8 * * 1-5").expect("valid");
        let script = register_script(&spec(trigger), today()).expect("script");
        // MON..FRI = 2 + 4 + 8 + 16 + 32
        assert!(script.contains("$tr.DaysOfWeek = 62"));
        assert!(script.contains("$def.Triggers.Create(3)"));
        assert!(script.contains("$tr.StartBoundary = '2026-03-02T08:30:00'"));
        assert!(script.contains("'Nightly report''s run'"));
    }

    #[test]
    fn daily_script_sets_interval() {
        let trigger = translate("0 9 * * *").expect("valid");
        let script = register_script(&spec(trigger), today()).expect("script");
        assert!(script.contains("$def.Triggers.Create(2)"));
        assert!(script.contains("$def.Settings.Enabled = $true"));
        assert!(script.contains("$tr.DaysInterval = 1"));
        assert!(script.contains("RegisterTaskDefinition('Taskward_nightly', $def, 6"));
    }

    #[test]
    fn monthly_script_sets_day_of_month_mask() {
        let trigger = translate("0 6 1,15 * *").expect("valid");
        let script = register_script(&spec(trigger), today()).expect("script");
        assert!(script.contains("$def.Triggers.Create(4)"));
        // Day 1 = bit 0, day 15 = bit 14.
        assert!(script.contains(&format!("$tr.DaysOfMonth = {}", 1 | (1 << 14))));
        assert!(script.contains("$tr.MonthsOfYear = 4095"));
    }

    #[test]
    fn disabled_spec_registers_an_inactive_task() {
        let mut disabled = spec(ScheduleTrigger::Startup);
        disabled.enabled = false;
        let script = register_script(&disabled, today()).expect("script");
        assert!(script.contains("$def.Settings.Enabled = $false"));
        assert!(!script.contains("$def.Settings.Enabled = $true"));
    }

    #[test]
    fn startup_and_once_triggers() {
        let startup = register_script(&spec(ScheduleTrigger::Startup), today()).expect("script");
        assert!(startup.contains("$def.Triggers.Create(8)"));

        let at = today().and_hms_opt(14, 5, 0).expect("valid time");
        let once = register_script(&spec(ScheduleTrigger::Once { at }), today()).expect("script");
        assert!(once.contains("$tr.StartBoundary = '2026-03-02T14:05:00'"));
    }

    #[test]
    fn action_arguments_are_windows_quoted() {
        let script = register_script(&spec(ScheduleTrigger::Startup), today()).expect("script");
        assert!(script.contains(r"$act.Arguments = 'run C:\Users\me\tasks\nightly.md'"));
        assert!(script.contains(r"$act.Path = 'C:\Program Files\taskward\taskward.exe'"));
    }

    #[test]
    fn monthly_without_days_is_unsupported() {
        let trigger = ScheduleTrigger::Monthly {
            time: TimeOfDay::MIDNIGHT,
            days: BTreeSet::new(),
        };
        let err = register_script(&spec(trigger), today()).unwrap_err();
        assert!(matches!(err, NativeError::Unsupported { .. }));
    }

    #[test]
    fn elevation_script_uses_runas_and_propagates_exit_code() {
        let script = elevation_script(r"C:\Temp\taskward-register-1.ps1");
        assert!(script.contains("-Verb RunAs -Wait -PassThru"));
        assert!(script.contains("exit $p.ExitCode"));
        assert!(script.contains(r"-File C:\Temp\taskward-register-1.ps1"));
    }

    #[test]
    fn query_output_parsing() {
        assert_eq!(parse_query_output("  \r\n").expect("parse"), None);

        let info = parse_query_output(concat!(
            r#"{"State":"Ready","LastRunTime":"1999-11-30T00:00:00.0000000Z","#,
            r#""NextRunTime":"2026-03-03T08:30:00.0000000Z"}"#,
        ))
        .expect("parse")
        .expect("present");
        assert!(info.enabled);
        assert_eq!(
            info.next_run.map(|t| t.to_rfc3339()),
            Some("2026-03-03T08:30:00+00:00".to_string())
        );
        assert!(info.last_run.is_some());

        let disabled =
            parse_query_output(r#"{"State":"Disabled","LastRunTime":null,"NextRunTime":null}"#)
                .expect("parse")
                .expect("present");
        assert!(!disabled.enabled);
        assert_eq!(disabled.next_run, None);

        assert!(parse_query_output("not json").is_err());
    }
}
