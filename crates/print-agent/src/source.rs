// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event source abstraction and the Windows print-service implementation.
//!
//! The agent core only depends on the [`EventSource`] trait; the concrete
//! implementation shells out to PowerShell's `Get-WinEvent` and parses one
//! compressed JSON object per stdout line. A transiently unavailable source
//! yields an empty sequence, never an error.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::event::RawEvent;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches the entire available event history.
    async fn fetch_all(&self) -> Vec<RawEvent>;

    /// Fetches events within a trailing look-back window.
    async fn fetch_since(&self, window: Duration) -> Vec<RawEvent>;

    /// Cheap availability check used at startup.
    async fn probe(&self) -> bool;
}

/// Reads print-job events from the Windows event log via PowerShell.
pub struct PowerShellEventSource {
    log_name: String,
    event_id: u32,
}

impl Default for PowerShellEventSource {
    fn default() -> Self {
        PowerShellEventSource {
            log_name: "Microsoft-Windows-PrintService/Operational".to_string(),
            event_id: 307,
        }
    }
}

impl PowerShellEventSource {
    const EVENT_FIELDS: &'static str = r"
            $output = @{
                RecordId = $evento.RecordId
                TimeCreated = $evento.TimeCreated.ToString('yyyy-MM-dd HH:mm:ss')
                UserId = if ($evento.UserId) { $evento.UserId.Value } else { 'System' }
                MachineName = $evento.MachineName
                Message = $evento.Message
                Level = $evento.LevelDisplayName
            }
            $output | ConvertTo-Json -Compress";

    async fn run_script(&self, script: &str) -> Vec<RawEvent> {
        let output = match Command::new("powershell")
            .args(["-ExecutionPolicy", "Bypass", "-Command", script])
            .output()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                warn!("failed to run PowerShell: {error}");
                return Vec::new();
            }
        };

        if !output.stderr.is_empty() {
            warn!(
                "PowerShell stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Self::parse_lines(&String::from_utf8_lossy(&output.stdout))
    }

    /// One JSON object per line; anything else is progress output.
    fn parse_lines(stdout: &str) -> Vec<RawEvent> {
        let mut events = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if !line.starts_with('{') {
                if !line.is_empty() {
                    debug!("event source: {line}");
                }
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(event) => events.push(event),
                Err(error) => debug!("skipping undecodable event line: {error}"),
            }
        }
        events
    }
}

#[async_trait]
impl EventSource for PowerShellEventSource {
    async fn fetch_all(&self) -> Vec<RawEvent> {
        let script = format!(
            r"
        $eventos = Get-WinEvent -FilterHashtable @{{
            LogName='{log}'
            ID={id}
        }} -ErrorAction SilentlyContinue

        foreach ($evento in $eventos) {{{fields}
        }}",
            log = self.log_name,
            id = self.event_id,
            fields = Self::EVENT_FIELDS,
        );
        let events = self.run_script(&script).await;
        debug!("full history scan returned {} events", events.len());
        events
    }

    async fn fetch_since(&self, window: Duration) -> Vec<RawEvent> {
        let minutes = (window.as_secs().div_ceil(60)).max(1);
        let script = format!(
            r"
        $startTime = (Get-Date).AddMinutes(-{minutes})

        $eventos = Get-WinEvent -FilterHashtable @{{
            LogName='{log}'
            ID={id}
            StartTime=$startTime
        }} -ErrorAction SilentlyContinue

        foreach ($evento in $eventos) {{{fields}
        }}",
            log = self.log_name,
            id = self.event_id,
            fields = Self::EVENT_FIELDS,
        );
        self.run_script(&script).await
    }

    async fn probe(&self) -> bool {
        match Command::new("powershell")
            .args(["-Command", "Write-Host 'PowerShell OK'"])
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(error) => {
                warn!("PowerShell not available: {error}");
                false
            }
        }
    }
}
