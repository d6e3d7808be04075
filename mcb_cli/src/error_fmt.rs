//! Human-readable error descriptions and structured JSON error formatting.

use mcb_core::McbError;

/// Stable category name of the innermost `McbError`, if any.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<McbError>() {
        Some(McbError::Transport(_)) => "Transport",
        Some(McbError::Timeout) => "Timeout",
        Some(McbError::Device { .. }) => "Device",
        Some(McbError::Protocol { .. }) => "Protocol",
        Some(McbError::Validation(_)) => "Validation",
        Some(McbError::Format(_)) => "Format",
        Some(McbError::Io(_)) => "Io",
        Some(McbError::Config(_)) => "Config",
        Some(McbError::State(_)) => "State",
        None => "Error",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(me) = err.downcast_ref::<McbError>() {
        return match me {
            McbError::Transport(msg) => format!(
                "What happened: The detector connection failed ({msg}).\nLikely causes: MCB driver not running, detector unplugged, or the handle was closed.\nHow to fix: Check the connection and driver service, then run `mcb self-check`."
            ),
            McbError::Timeout => "What happened: The detector did not answer in time.\nLikely causes: Busy or disconnected hardware.\nHow to fix: Retry; if it persists, power-cycle the MCB and run `mcb self-check`.".to_string(),
            McbError::Device { .. } => format!(
                "What happened: {me}.\nLikely causes: The command is not valid in the detector's current state or the value is out of its range.\nHow to fix: Check presets, discriminators and ROI bounds against the detector's channel count."
            ),
            McbError::Protocol { .. } => format!(
                "What happened: {me}.\nLikely causes: Line noise, a firmware mismatch, or another program talking to the same detector.\nHow to fix: Close other MCB software and retry; run with --log-level=trace to see the raw exchange."
            ),
            McbError::Validation(msg) => format!(
                "What happened: Invalid input ({msg}).\nLikely causes: A value outside the detector's channel range or a spectrum of the wrong length.\nHow to fix: Correct the argument or file and rerun."
            ),
            McbError::Format(msg) => format!(
                "What happened: The spectrum file is malformed ({msg}).\nLikely causes: Truncated file or a format other than .Spe.\nHow to fix: Re-export the spectrum and try again."
            ),
            McbError::Io(msg) => format!(
                "What happened: File access failed ({msg}).\nLikely causes: Missing file, wrong path, or insufficient permissions.\nHow to fix: Check the path and permissions."
            ),
            McbError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            McbError::State(msg) => format!(
                "What happened: The operation is not allowed right now ({msg}).\nLikely causes: The detector is acquiring.\nHow to fix: Stop the acquisition first."
            ),
        };
    }

    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'channel,energy'.".to_string();
    }

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid ({err:#}).\nLikely causes: Unknown keys or out-of-range values in the TOML.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("live backend unavailable") {
        return format!(
            "What happened: {msg}.\nLikely causes: This build has no vendor driver support.\nHow to fix: Rebuild with `--features hardware` on Windows, or use the simulated backend."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error category.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<McbError>() {
        Some(McbError::Transport(_) | McbError::Timeout | McbError::Device { .. }) => 3,
        Some(McbError::Protocol { .. }) => 4,
        Some(McbError::Validation(_) | McbError::Config(_)) => 5,
        Some(McbError::Format(_) | McbError::Io(_)) => 6,
        Some(McbError::State(_)) => 7,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_keep_their_category_through_context() {
        use eyre::WrapErr;
        let r: eyre::Result<()> = Err(eyre::Report::new(McbError::Format("no $DATA:".into())));
        let e = r.wrap_err("read spectrum").unwrap_err();
        assert_eq!(reason_name(&e), "Format");
        assert_eq!(exit_code_for_error(&e), 6);
        assert!(humanize(&e).starts_with("What happened: The spectrum file is malformed"));
    }

    #[test]
    fn untyped_errors_fall_back() {
        let e = eyre::eyre!("calibration CSV must have headers 'channel,energy', got: a,b");
        assert_eq!(exit_code_for_error(&e), 1);
        assert!(humanize(&e).contains("Expected 'channel,energy'"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Error");
    }
}
