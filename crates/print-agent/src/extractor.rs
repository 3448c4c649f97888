// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Free-text field extraction.
//!
//! Print-service messages are localized prose, not structured data. The
//! extractor routes each message to a per-language pattern group and takes the
//! first match per field category. Extraction never fails the record: fields
//! with no match degrade to sentinel values, and out-of-range page counts fall
//! back to 1.

use chrono::Local;
use regex::Regex;
use tracing::debug;

use crate::event::{CanonicalEvent, RawEvent};

/// Page counts outside `1..=MAX_PAGES` are treated as extraction failures.
pub const MAX_PAGES: u32 = 10_000;

const UNKNOWN_USER: &str = "Unknown";
const UNKNOWN_DOCUMENT: &str = "Document";
const UNKNOWN_PRINTER: &str = "Printer";

/// Ordered patterns for one message language.
struct LanguagePatterns {
    doc_user: Regex,
    printer: Regex,
    /// Page-count tiers, tried in order; first in-range match wins.
    pages: Vec<Regex>,
}

/// Turns one raw event into a collector-ready record. Pure, no I/O.
pub struct Extractor {
    machine_name: String,
    english: LanguagePatterns,
    portuguese: LanguagePatterns,
    /// Last-resort numeric-near-keyword scans, language-independent.
    pages_generic: Vec<Regex>,
}

impl Extractor {
    #[allow(clippy::expect_used)]
    pub fn new(machine_name: impl Into<String>) -> Self {
        // Static patterns, compiled once per agent.
        let compile = |pattern: &str| Regex::new(pattern).expect("static pattern compiles");

        let english = LanguagePatterns {
            doc_user: compile(r"Document \d+, (.+?) owned by (.+?) on"),
            printer: compile(r"was printed on (.+?)(?:\s+through|\s+via|\.|$)"),
            pages: vec![
                compile(r"Pages printed:\s*(\d+)"),
                compile(r"Total pages printed:\s*(\d+)"),
                compile(r"(?i)(\d+)\s+pages?\b"),
                compile(
                    r"(?:Size in bytes:|Tamanho em bytes:)\s*\d+\.\s*(?:Pages printed:|Páginas impressas:)?\s*(\d+)",
                ),
            ],
        };

        let portuguese = LanguagePatterns {
            doc_user: compile(r"O documento \d+, (.+?) pertencente a (.+?) em"),
            printer: compile(r"foi impresso em (.+?)(?:\s+pela porta|\s+através|\.|$)"),
            pages: vec![
                compile(r"Páginas impressas:\s*(\d+)"),
                compile(r"Total de páginas impressas:\s*(\d+)"),
                compile(r"(?i)(\d+)\s+páginas?\b"),
            ],
        };

        let pages_generic = vec![
            compile(r"(?i)(?:páginas?|pages?)\s*:\s*(\d+)"),
            compile(r"(?i)(\d+)\s*(?:páginas?|pages?)"),
            compile(r"(?i)total\s*:\s*(\d+)"),
            compile(r"(?i)(?:impressas?|printed)\s*:\s*(\d+)"),
        ];

        Extractor {
            machine_name: machine_name.into(),
            english,
            portuguese,
            pages_generic,
        }
    }

    /// Extracts a canonical record from one raw event.
    ///
    /// Infallible by design: unmatched fields keep their sentinel defaults and
    /// the condition is logged, never escalated.
    pub fn extract(&self, raw: &RawEvent) -> CanonicalEvent {
        let message = raw.message.as_str();

        let date = if raw.time_created.is_empty() {
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            raw.time_created.clone()
        };
        let machine = if raw.machine_name.is_empty() {
            self.machine_name.clone()
        } else {
            raw.machine_name.clone()
        };

        let mut event = CanonicalEvent {
            date,
            user: UNKNOWN_USER.to_string(),
            machine,
            pages: 1,
            document: UNKNOWN_DOCUMENT.to_string(),
            printer: UNKNOWN_PRINTER.to_string(),
        };

        let group = if message.contains("pertencente a") || message.contains("foi impresso") {
            &self.portuguese
        } else {
            &self.english
        };

        if let Some(captures) = group.doc_user.captures(message) {
            event.document = captures[1].trim().to_string();
            event.user = captures[2].trim().to_string();
        }
        if let Some(captures) = group.printer.captures(message) {
            event.printer = captures[1].trim().to_string();
        }

        match self.extract_pages(message, group) {
            Some(pages) => event.pages = pages,
            None => {
                debug!(
                    record_id = raw.record_id,
                    "no usable page count in message, defaulting to 1"
                );
            }
        }

        event
    }

    fn extract_pages(&self, message: &str, group: &LanguagePatterns) -> Option<u32> {
        group
            .pages
            .iter()
            .chain(self.pages_generic.iter())
            .find_map(|pattern| {
                pattern
                    .captures(message)
                    .and_then(|captures| captures[1].parse::<u32>().ok())
                    .filter(|pages| (1..=MAX_PAGES).contains(pages))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(message: &str) -> RawEvent {
        RawEvent {
            record_id: 42,
            time_created: "2025-06-01 10:30:00".to_string(),
            user_id: String::new(),
            machine_name: "PC1".to_string(),
            message: message.to_string(),
            level: "Information".to_string(),
        }
    }

    #[test]
    fn test_english_full_message() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw(
            "Document 3, report.docx owned by alice on \\\\PC1 was printed on HP-LaserJet. Pages printed: 7.",
        ));
        assert_eq!(event.user, "alice");
        assert_eq!(event.machine, "PC1");
        assert_eq!(event.document, "report.docx");
        assert_eq!(event.printer, "HP-LaserJet");
        assert_eq!(event.pages, 7);
    }

    #[test]
    fn test_portuguese_full_message() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw(
            "O documento 3, relatorio.docx pertencente a maria em \\\\PC1 foi impresso em Epson-L3150 pela porta USB001. Páginas impressas: 12",
        ));
        assert_eq!(event.user, "maria");
        assert_eq!(event.document, "relatorio.docx");
        assert_eq!(event.printer, "Epson-L3150");
        assert_eq!(event.pages, 12);
    }

    #[test]
    fn test_total_pages_tier() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("Job done. Total pages printed: 33"));
        assert_eq!(event.pages, 33);
    }

    #[test]
    fn test_trailing_pages_tier() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("Printed spreadsheet, 4 pages"));
        assert_eq!(event.pages, 4);
    }

    #[test]
    fn test_size_plus_count_tier() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("Size in bytes: 53200. Pages printed: 9"));
        assert_eq!(event.pages, 9);
    }

    #[test]
    fn test_generic_keyword_tier() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("spool summary printed: 5"));
        assert_eq!(event.pages, 5);
    }

    #[test]
    fn test_out_of_range_count_falls_through_to_default() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("Pages printed: 99999"));
        assert_eq!(event.pages, 1);
    }

    #[test]
    fn test_first_in_range_match_wins() {
        let extractor = Extractor::new("PC1");
        // Tier (a) is out of range, tier (c) is not.
        let event = extractor.extract(&raw("Pages printed: 0. Job had 6 pages total"));
        assert_eq!(event.pages, 6);
    }

    #[test]
    fn test_unmatched_fields_use_sentinels() {
        let extractor = Extractor::new("PC1");
        let event = extractor.extract(&raw("Unrecognized message body"));
        assert_eq!(event.user, "Unknown");
        assert_eq!(event.document, "Document");
        assert_eq!(event.printer, "Printer");
        assert_eq!(event.pages, 1);
    }

    #[test]
    fn test_missing_machine_falls_back_to_local() {
        let extractor = Extractor::new("LOCALHOST");
        let mut raw_event = raw("whatever");
        raw_event.machine_name = String::new();
        let event = extractor.extract(&raw_event);
        assert_eq!(event.machine, "LOCALHOST");
    }

    #[test]
    fn test_missing_date_is_repaired() {
        let extractor = Extractor::new("PC1");
        let mut raw_event = raw("whatever");
        raw_event.time_created = String::new();
        let event = extractor.extract(&raw_event);
        assert!(!event.date.is_empty());
    }

    proptest! {
        #[test]
        fn prop_extraction_never_panics_and_bounds_pages(message in ".{0,300}") {
            let extractor = Extractor::new("PC1");
            let event = extractor.extract(&raw(&message));
            prop_assert!(event.pages >= 1 && event.pages <= MAX_PAGES);
        }
    }
}
