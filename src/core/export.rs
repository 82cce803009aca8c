// Mlog - core/export.rs
//
// CSV, JSON and plain-table rendering of queried events.
// Core layer: writes to any Write trait object; the caller owns the target.

use crate::core::model::{format_timestamp, StoredEvent};
use crate::util::constants::MAX_EXPORT_EVENTS;
use crate::util::error::ExportError;
use std::io::Write;

/// Export events as CSV.
///
/// Columns: id, timestamp, server_id, event_type, severity, source_ip,
/// source_port, username, message, metadata (JSON object), raw_log.
pub fn export_csv<W: Write>(
    events: &[StoredEvent],
    writer: W,
    target: &str,
) -> Result<usize, ExportError> {
    check_size(events)?;
    let csv_err = |source| ExportError::Csv {
        target: target.to_string(),
        source,
    };
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer
        .write_record([
            "id",
            "timestamp",
            "server_id",
            "event_type",
            "severity",
            "source_ip",
            "source_port",
            "username",
            "message",
            "metadata",
            "raw_log",
        ])
        .map_err(csv_err)?;

    for stored in events {
        let e = &stored.event;
        csv_writer
            .write_record([
                stored.id.to_string().as_str(),
                &format_timestamp(&e.timestamp),
                &e.server_id,
                e.event_type.as_str(),
                e.severity.as_str(),
                e.source_ip.as_deref().unwrap_or(""),
                &e.source_port.map(|p| p.to_string()).unwrap_or_default(),
                e.username.as_deref().unwrap_or(""),
                &e.message,
                &e.metadata_json(),
                &e.raw_log,
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|source| ExportError::Io {
        target: target.to_string(),
        source,
    })?;

    Ok(events.len())
}

/// Export events as a pretty-printed JSON array.
pub fn export_json<W: Write>(
    events: &[StoredEvent],
    mut writer: W,
    target: &str,
) -> Result<usize, ExportError> {
    check_size(events)?;
    serde_json::to_writer_pretty(&mut writer, events).map_err(|source| ExportError::Json {
        target: target.to_string(),
        source,
    })?;
    writeln!(writer).map_err(|source| ExportError::Io {
        target: target.to_string(),
        source,
    })?;
    Ok(events.len())
}

/// Render events as a fixed-width text table, one event per line.
pub fn export_table<W: Write>(
    events: &[StoredEvent],
    mut writer: W,
    target: &str,
) -> Result<usize, ExportError> {
    let io_err = |source| ExportError::Io {
        target: target.to_string(),
        source,
    };

    writeln!(
        writer,
        "{:<8} {:<20} {:<4} {:<17} {:<16} {:<12} MESSAGE",
        "ID", "TIME (UTC)", "SEV", "TYPE", "SOURCE", "USER"
    )
    .map_err(io_err)?;

    for stored in events {
        let e = &stored.event;
        writeln!(
            writer,
            "{:<8} {:<20} {:<4} {:<17} {:<16} {:<12} {}",
            stored.id,
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.severity.short_label(),
            e.event_type.as_str(),
            e.source_ip.as_deref().unwrap_or("-"),
            e.username.as_deref().unwrap_or("-"),
            e.message,
        )
        .map_err(io_err)?;
    }
    Ok(events.len())
}

fn check_size(events: &[StoredEvent]) -> Result<(), ExportError> {
    if events.len() > MAX_EXPORT_EVENTS {
        return Err(ExportError::TooManyEvents {
            count: events.len(),
            max: MAX_EXPORT_EVENTS,
        });
    }
    Ok(())
}
