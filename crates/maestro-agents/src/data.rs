//! Embedded mock dataset backing the reference agents.
//!
//! Stands in for the sales database, knowledge base, and compliance rule
//! book a production deployment would query. Deterministic by design so the
//! agents stay pure functions of their input state.

/// Quarterly revenue in millions plus closed deal count, oldest first.
pub const QUARTERLY_SALES: &[(&str, f64, u32)] = &[
    ("2023-Q3", 38.2, 41),
    ("2023-Q4", 45.1, 48),
    ("2024-Q1", 42.7, 44),
    ("2024-Q2", 47.9, 52),
    ("2024-Q3", 51.4, 55),
    ("2024-Q4", 58.8, 61),
    ("2025-Q1", 55.2, 57),
    ("2025-Q2", 63.5, 66),
];

/// One searchable knowledge-base entry.
#[derive(Debug, Clone, Copy)]
pub struct KbEntry {
    pub name: &'static str,
    pub kind: &'static str,
    pub summary: &'static str,
    pub tags: &'static [&'static str],
}

/// Companies, products, and market notes the search agent retrieves over.
pub const KNOWLEDGE_BASE: &[KbEntry] = &[
    KbEntry {
        name: "Hanbit Medical Center",
        kind: "customer",
        summary: "University hospital network, 2,400 beds, digitizing its procurement pipeline",
        tags: &["hospital", "healthcare", "procurement", "customer"],
    },
    KbEntry {
        name: "Dongsan Pharma",
        kind: "customer",
        summary: "Mid-size pharmaceutical distributor, strong in the southeast region",
        tags: &["pharma", "distribution", "customer"],
    },
    KbEntry {
        name: "Orion Diagnostics",
        kind: "competitor",
        summary: "Main competitor in the diagnostics segment, aggressive quarterly pricing",
        tags: &["competitor", "diagnostics", "pricing", "market"],
    },
    KbEntry {
        name: "Vega Bio Systems",
        kind: "competitor",
        summary: "Entered the imaging market last year, weak service coverage outside the capital",
        tags: &["competitor", "imaging", "market"],
    },
    KbEntry {
        name: "PulseTrack M3",
        kind: "product",
        summary: "Patient monitoring platform, flagship line, 34% of current revenue",
        tags: &["product", "monitoring", "revenue", "flagship"],
    },
    KbEntry {
        name: "LabFlow LIS",
        kind: "product",
        summary: "Laboratory information system, growing double digits quarter over quarter",
        tags: &["product", "laboratory", "growth"],
    },
    KbEntry {
        name: "ClearImage CT-9",
        kind: "product",
        summary: "Imaging line refresh scheduled for next fiscal year",
        tags: &["product", "imaging", "roadmap"],
    },
    KbEntry {
        name: "Q2 market brief",
        kind: "market_note",
        summary: "Diagnostics demand up 12% year over year; public tenders shifting to multi-year contracts",
        tags: &["market", "diagnostics", "tender", "contract"],
    },
    KbEntry {
        name: "Regional tender calendar",
        kind: "market_note",
        summary: "Three provincial hospital tenders open in the next two quarters",
        tags: &["tender", "hospital", "market"],
    },
];

/// Phrases the compliance rule book rejects, with severity and rule code.
pub const PROHIBITED_PHRASES: &[(&str, &str, &str)] = &[
    ("guaranteed returns", "critical", "fin-001"),
    ("risk-free", "critical", "fin-002"),
    ("kickback", "critical", "law-003"),
    ("confidential patient data", "critical", "priv-001"),
    ("exclusive market control", "high", "trade-002"),
    ("undisclosed fee", "high", "fin-004"),
    ("personal data", "medium", "priv-002"),
];

/// Boilerplate every outbound document must carry.
pub const DISCLAIMER: &str =
    "Disclaimer: figures are indicative and subject to contract terms and regulatory review.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sales_series_is_ordered() {
        for window in QUARTERLY_SALES.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
    }

    #[test]
    fn test_rule_levels_are_known() {
        for (_, level, _) in PROHIBITED_PHRASES {
            assert!(matches!(*level, "critical" | "high" | "medium"));
        }
    }
}
