//! Replay of JSON-lines event scripts
//!
//! Each non-empty line that does not start with `#` is one [`RawCallEvent`].
//! Events go straight through a [`CallRegistry`]; effects are printed, not
//! executed, so a script has to spell out the events an interactor would
//! produce (`reconnect_timeout`, `membership_changed`, `call_concluded`).

use anyhow::{Context, Result};
use saorsa_call_core::prelude::*;
use std::io::{BufRead, Write};
use tracing::warn;

/// Counts of how each script line was treated
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Operations applied
    pub applied: usize,
    /// Events the installed processor ignored
    pub ignored: usize,
    /// Lines refused at the boundary or by the registry
    pub rejected: usize,
    /// Calls forced to terminate
    pub violations: usize,
}

/// Run a script through a fresh registry, writing a report to `out`
pub fn replay<R: BufRead, W: Write>(
    script: R,
    config: &CallEngineConfig,
    out: &mut W,
) -> Result<ReplaySummary> {
    let mut registry = CallRegistry::new(
        Dispatcher::new(config.reconnect.clone()),
        config.max_concurrent_calls,
    );
    let mut summary = ReplaySummary::default();

    for (index, line) in script.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match parse_line(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Rejected script line");
                summary.rejected += 1;
                writeln!(out, "❌ [{line_no}] {e}")?;
                continue;
            }
        };

        let transition = match registry.handle(&event) {
            Ok(transition) => transition,
            Err(e) => {
                warn!(line = line_no, call_id = %event.call_id, error = %e, "Registry refused event");
                summary.rejected += 1;
                writeln!(out, "❌ [{line_no}] {} {}: {e}", short(&event), event.kind())?;
                continue;
            }
        };

        let from = transition
            .previous
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        match &transition.disposition {
            Disposition::Applied => {
                summary.applied += 1;
                writeln!(
                    out,
                    "✅ [{line_no}] {} {}: {from} -> {} ({:?})",
                    short(&event),
                    event.kind(),
                    transition.processor,
                    transition.state.connection_state()
                )?;
            }
            Disposition::Ignored => {
                summary.ignored += 1;
                writeln!(
                    out,
                    "➖ [{line_no}] {} {}: ignored by {from}",
                    short(&event),
                    event.kind()
                )?;
            }
            Disposition::InvariantViolated(reason) => {
                summary.violations += 1;
                writeln!(
                    out,
                    "⚠️  [{line_no}] {} {}: terminated, {reason}",
                    short(&event),
                    event.kind()
                )?;
            }
        }

        for request in &transition.effects {
            writeln!(out, "      ↳ {}", serde_json::to_string(&request.effect)?)?;
        }
    }

    Ok(summary)
}

fn parse_line(line: &str) -> Result<CallEvent> {
    let raw: RawCallEvent = serde_json::from_str(line).context("not a call event")?;
    Ok(CallEvent::try_from(raw)?)
}

fn short(event: &CallEvent) -> String {
    crate::console::short(event.call_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CALL: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    fn run(script: &str) -> (ReplaySummary, String) {
        let mut out = Vec::new();
        let summary = replay(
            Cursor::new(script.to_string()),
            &CallEngineConfig::default(),
            &mut out,
        )
        .unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_replay_call_link_reconnect() {
        let script = format!(
            r#"
# call link that drops and comes back
{{"kind": "start_call", "call_id": "{CALL}", "payload": {{"mode": "call_link"}}}}
{{"kind": "connected_ack", "call_id": "{CALL}"}}
{{"kind": "network_unavailable", "call_id": "{CALL}"}}
{{"kind": "connected_ack", "call_id": "{CALL}"}}
{{"kind": "connected_ack", "call_id": "{CALL}"}}
"#
        );
        let (summary, out) = run(&script);

        assert_eq!(
            summary,
            ReplaySummary {
                applied: 4,
                ignored: 1,
                rejected: 0,
                violations: 0,
            }
        );
        assert!(out.contains("CallLinkConnected -> CallLinkNetworkUnavailable (Reconnecting)"));
        assert!(out.contains(r#""type":"schedule_timer""#));
    }

    #[test]
    fn test_replay_rejects_bad_lines() {
        let script = format!(
            r#"not json
{{"kind": "wave", "call_id": "{CALL}"}}
{{"kind": "connected_ack", "call_id": "{CALL}"}}
{{"kind": "start_call", "call_id": "{CALL}", "payload": {{}}}}
"#
        );
        let (summary, out) = run(&script);

        assert_eq!(summary.rejected, 4);
        assert_eq!(summary.applied, 0);
        assert!(out.contains("Unknown event kind: wave"));
        assert!(out.contains("Call not found"));
        assert!(out.contains("missing required field `mode`"));
    }
}
