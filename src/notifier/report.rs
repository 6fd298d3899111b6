//! Backup report rendering for mail notifications.

use crate::model::{BackupStatus, BackupWithFiles, DriveFileStatus};
use serde::Serialize;
use uuid::Uuid;

/// Report data for one backup
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub backup_id: Uuid,
    pub backup_date: String,
    pub database_name: String,
    pub status: BackupStatus,
    pub drives: Vec<DriveReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveReport {
    pub provider: String,
    pub label: String,
    pub status: DriveFileStatus,
}

impl BackupReport {
    pub fn from_backup(full: &BackupWithFiles) -> Self {
        Self {
            backup_id: full.backup.id,
            backup_date: full.backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            database_name: full.backup.label.clone(),
            status: full.backup.status,
            drives: full
                .drive_files
                .iter()
                .map(|f| DriveReport {
                    provider: f.provider.clone(),
                    label: f.label.clone(),
                    status: f.status,
                })
                .collect(),
        }
    }

    /// Render the HTML mail body
    pub fn to_html(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Backup Report - {}</title>
    <style>
        body {{
            font-family: Arial, Helvetica, sans-serif;
            color: #333;
            margin: 0;
            padding: 20px;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
            margin-bottom: 20px;
        }}
        td {{
            padding: 8px;
            border: 1px solid #e9ecef;
        }}
        .key {{
            width: 30%;
            background-color: #f8f9fa;
        }}
        .status-header td {{
            font-weight: bold;
            background-color: #f8f9fa;
        }}
        .finished {{ color: #28a745; }}
        .failed {{ color: #dc3545; }}
        .pending {{ color: #fd7e14; }}
    </style>
</head>
<body>
    <h2>Backup Report</h2>
    <table>
        <tr><td class="key">Backup ID</td><td>{}</td></tr>
        <tr><td class="key">Backup Date</td><td>{}</td></tr>
        <tr><td class="key">Database Name</td><td>{}</td></tr>
        <tr><td class="key">Status</td><td class="{}">{}</td></tr>
    </table>
    <table>
        <tr class="status-header"><td>Provider</td><td>Drive</td><td>Status</td></tr>
        {}
    </table>
</body>
</html>"#,
            escape_html(&self.database_name),
            self.backup_id,
            self.backup_date,
            escape_html(&self.database_name),
            self.status,
            self.status,
            self.drive_rows()
        )
    }

    fn drive_rows(&self) -> String {
        self.drives
            .iter()
            .map(|drive| {
                format!(
                    r#"<tr><td>{}</td><td>{}</td><td class="{}">{}</td></tr>"#,
                    escape_html(&drive.provider),
                    escape_html(&drive.label),
                    drive.status,
                    drive.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n        ")
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
