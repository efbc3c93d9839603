//! Output formatting for the command line.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use ewon_core::{EwonSummary, Frame, MailboxStatus, Tag};
use ewon_types::DeviceSummary;
use ewon_processor::CycleReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn as_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)? + "\n")
}

pub fn format_report(report: &CycleReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(report);
    }
    let cursor = report
        .cursor
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    let mut out = format!(
        "Published {} frame(s), {} value(s) in {} batch(es); cursor {}\n",
        report.frames_published, report.values_published, report.batches, cursor
    );
    if report.no_data {
        out.push_str("No new data\n");
    }
    Ok(out)
}

pub fn format_status(status: &MailboxStatus, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(status);
    }
    let mut out = String::new();
    if let Some(count) = status.history_count {
        out.push_str(&format!("History records: {}\n", count));
    }
    if let Some(first) = &status.first_history_date {
        out.push_str(&format!("First record:    {}\n", first));
    }
    if let Some(last) = &status.last_history_date {
        out.push_str(&format!("Last record:     {}\n", last));
    }
    if out.is_empty() {
        out.push_str("No history stored\n");
    }
    Ok(out)
}

pub fn format_devices(devices: &[DeviceSummary], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(&devices);
    }
    if devices.is_empty() {
        return Ok("No devices\n".to_string());
    }
    let mut out = format!("{:<10} {:<24} {}\n", "ID", "NAME", "LAST SYNC");
    for device in devices {
        out.push_str(&format!(
            "{:<10} {:<24} {}\n",
            device.id,
            device.name,
            device.last_synchro_date.as_deref().unwrap_or("-")
        ));
    }
    Ok(out)
}

#[derive(Serialize)]
struct DeviceView<'a> {
    summary: &'a EwonSummary,
    tags: &'a [Tag],
}

pub fn format_device(summary: &EwonSummary, tags: &[Tag], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(&DeviceView { summary, tags });
    }
    let mut out = format_summary(summary);
    out.push_str(&format!("\n{:<6} {:<24} {:<8} {:>6}  {}\n", "ID", "TAG", "TYPE", "VALUES", "LATEST"));
    for tag in tags {
        let latest = tag
            .latest()
            .map_or_else(|| "-".to_string(), |v| format!("{} @ {}", v.value(), v.timestamp().to_rfc3339()));
        out.push_str(&format!(
            "{:<6} {:<24} {:<8} {:>6}  {}\n",
            tag.id,
            tag.name,
            tag.data_type.to_string(),
            tag.value_count(),
            latest
        ));
    }
    Ok(out)
}

pub fn format_history(tags: &[Tag], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(&tags);
    }
    let mut out = String::new();
    for tag in tags {
        out.push_str(&format!("{} ({})\n", tag.name, tag.id));
        for value in &tag.values {
            out.push_str(&format!("  {}  {}\n", value.timestamp().to_rfc3339(), value.value()));
        }
    }
    if out.is_empty() {
        out.push_str("No history\n");
    }
    Ok(out)
}

#[derive(Serialize)]
struct FramesView<'a> {
    summary: &'a EwonSummary,
    frames: &'a [Frame],
}

pub fn format_frames(summary: &EwonSummary, frames: &[Frame], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return as_json(&FramesView { summary, frames });
    }
    let mut out = format_summary(summary);
    out.push('\n');
    for frame in frames {
        out.push_str(&format!("{}  ({} values)\n", frame.timestamp().to_rfc3339(), frame.len()));
        for value in frame.values() {
            out.push_str(&format!("  {:<24} {}\n", value.tag_name(), value.value()));
        }
    }
    Ok(out)
}

fn format_summary(summary: &EwonSummary) -> String {
    let cursor = summary
        .last_transaction_id
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    format!(
        "Device {} ({})\n  Clock zone: {}\n  Cursor:     {}\n  Tags: {}, values: {}, frames: {}, rejected: {}\n",
        summary.id,
        summary.name.as_deref().unwrap_or("unnamed"),
        summary.clock_zone,
        cursor,
        summary.tag_count,
        summary.value_count,
        summary.frame_count,
        summary.rejected_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewon_types::TransactionId;

    #[test]
    fn test_format_report_text() {
        let report = CycleReport {
            batches: 1,
            frames_published: 2,
            values_published: 3,
            cursor: Some(TransactionId::from(9)),
            no_data: false,
        };
        let text = format_report(&report, OutputFormat::Text).unwrap();
        assert!(text.contains("2 frame(s)"));
        assert!(text.contains("cursor 9"));
    }

    #[test]
    fn test_format_devices_empty() {
        assert_eq!(format_devices(&[], OutputFormat::Text).unwrap(), "No devices\n");
    }

    #[test]
    fn test_format_report_json() {
        let report = CycleReport::default();
        let json: serde_json::Value =
            serde_json::from_str(&format_report(&report, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["frames_published"], 0);
        assert!(json["cursor"].is_null());
    }
}
