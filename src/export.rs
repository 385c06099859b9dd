use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoordinatorError;
use crate::registration::{AttendanceRecord, SERVER_TIMESTAMP_FIELD};

/// Serialization format for the exported attendance table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => anyhow::bail!("Unknown export format '{}' (expected csv or json)", other),
        }
    }
}

/// Render the attendance log as a table
pub fn export_records(
    records: &[AttendanceRecord],
    format: ExportFormat,
) -> Result<String, CoordinatorError> {
    if records.is_empty() {
        return Err(CoordinatorError::NoRecords);
    }

    match format {
        ExportFormat::Csv => Ok(to_csv(records, &Local)),
        ExportFormat::Json => serde_json::to_string_pretty(records).map_err(|e| {
            CoordinatorError::PersistenceFailure {
                reason: format!("Failed to serialize records: {}", e),
            }
        }),
    }
}

/// CSV with one column per field name seen, in first-seen order, then the
/// server timestamp rendered in `tz`
fn to_csv<Tz: TimeZone>(records: &[AttendanceRecord], tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.fields.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut lines = Vec::with_capacity(records.len() + 1);

    let mut header: Vec<String> = columns.iter().map(|c| escape_field(c)).collect();
    header.push(SERVER_TIMESTAMP_FIELD.to_string());
    lines.push(header.join(","));

    for record in records {
        let mut row: Vec<String> = columns
            .iter()
            .map(|c| escape_field(record.fields.get(*c).map(String::as_str).unwrap_or("")))
            .collect();
        row.push(
            record
                .server_timestamp
                .format("%d/%m/%Y %H:%M:%S")
                .to_string(),
        );
        lines.push(row.join(","));
    }

    lines.join("\n")
}

fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::Submission;
    use chrono::{FixedOffset, Utc};

    fn record(pairs: &[(&str, &str)]) -> AttendanceRecord {
        let fields: Submission = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AttendanceRecord::stamp(fields, Utc.with_ymd_and_hms(2025, 3, 10, 8, 5, 9).unwrap())
    }

    #[test]
    fn test_empty_log_has_no_records() {
        assert_eq!(
            export_records(&[], ExportFormat::Csv),
            Err(CoordinatorError::NoRecords)
        );
        assert_eq!(
            export_records(&[], ExportFormat::Json),
            Err(CoordinatorError::NoRecords)
        );
    }

    #[test]
    fn test_csv_header_and_rows() {
        let records = vec![
            record(&[("dni", "12345678"), ("nombres", "Ana")]),
            record(&[("dni", "87654321"), ("area", "Sistemas")]),
        ];

        let csv = to_csv(&records, &Utc);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "dni,nombres,area,server_timestamp");
        assert_eq!(lines[1], "12345678,Ana,,10/03/2025 08:05:09");
        assert_eq!(lines[2], "87654321,,Sistemas,10/03/2025 08:05:09");
    }

    #[test]
    fn test_csv_escapes_commas_and_quotes() {
        let records = vec![record(&[("cargo", "Jefe, \"Área\" TI")])];

        let csv = to_csv(&records, &Utc);
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "\"Jefe, \"\"Área\"\" TI\",10/03/2025 08:05:09"
        );
    }

    #[test]
    fn test_csv_columns_follow_submission_order() {
        let records = vec![record(&[
            ("apellido_paterno", "Quispe"),
            ("nombres", "Ana"),
            ("dni", "12345678"),
            ("area_seccion", "TI"),
        ])];

        let csv = export_records(&records, ExportFormat::Csv).unwrap();
        assert_eq!(
            csv.lines().next().unwrap(),
            "apellido_paterno,nombres,dni,area_seccion,server_timestamp"
        );
    }

    #[test]
    fn test_csv_timestamp_uses_server_zone() {
        let records = vec![record(&[("dni", "12345678")])];
        let lima = FixedOffset::west_opt(5 * 3600).unwrap();

        let csv = to_csv(&records, &lima);
        assert_eq!(csv.lines().nth(1).unwrap(), "12345678,10/03/2025 03:05:09");
    }

    #[test]
    fn test_csv_export_uses_local_time() {
        let records = vec![record(&[("dni", "12345678")])];
        let expected = records[0]
            .server_timestamp
            .with_timezone(&Local)
            .format("%d/%m/%Y %H:%M:%S")
            .to_string();

        let csv = export_records(&records, ExportFormat::Csv).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with(&expected));
    }

    #[test]
    fn test_json_export_lists_records() {
        let records = vec![record(&[("dni", "12345678")])];

        let json = export_records(&records, ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["dni"], "12345678");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
