//! Priority classification for violations.
//!
//! A first-match decision cascade maps a violation's severity, message,
//! and category onto P0-P3. Unknown violations default to P2. An
//! optional impact promoter escalates priorities when a dependency-graph
//! lookup reports wide cross-service blast radius.

use crate::pipeline::state::Priority;

const P0_SEVERITIES: [&str; 3] = ["critical", "fatal", "blocker"];

const P0_KEYWORDS: [&str; 14] = [
    "cannot start",
    "build fail",
    "container crash",
    "missing entrypoint",
    "fatal",
    "startup fail",
    "compose fail",
    "docker fail",
    "import error",
    "module not found",
    "syntax error",
    "crash",
    "segfault",
    "oom",
];

const P0_CATEGORIES: [&str; 3] = ["build", "startup", "infrastructure"];

const P1_KEYWORDS: [&str; 11] = [
    "primary",
    "endpoint fail",
    "auth broken",
    "test fail",
    "api error",
    "500 error",
    "connection refused",
    "timeout",
    "data loss",
    "contract violation",
    "breaking change",
];

const P1_CATEGORIES: [&str; 4] = ["test", "api", "contract", "security"];

const P2_KEYWORDS: [&str; 5] = ["secondary", "non-critical", "minor", "missing test", "coverage"];

const P2_CATEGORIES: [&str; 3] = ["documentation", "coverage", "performance"];

const P3_SEVERITIES: [&str; 3] = ["info", "style", "hint"];

const P3_CATEGORIES: [&str; 3] = ["style", "naming", "formatting"];

/// A violation as seen by the classifier.
#[derive(Debug, Clone, Default)]
pub struct Violation {
    pub severity: String,
    pub category: String,
    pub message: String,
    pub file_path: String,
    pub component: String,
}

impl Violation {
    pub fn new(severity: &str, category: &str, message: &str) -> Self {
        Self {
            severity: severity.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    /// Node identifier for impact lookups: file path, else component.
    pub fn impact_node(&self) -> &str {
        if !self.file_path.is_empty() {
            &self.file_path
        } else {
            &self.component
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|kw| haystack.contains(kw))
}

/// Classify a violation into P0-P3. Pure: same input, same priority.
pub fn classify(violation: &Violation) -> Priority {
    let severity = violation.severity.to_lowercase();
    let category = violation.category.to_lowercase();
    let message = violation.message.to_lowercase();

    // P0: the system cannot start.
    if P0_SEVERITIES.contains(&severity.as_str())
        || contains_any(&message, &P0_KEYWORDS)
        || (P0_CATEGORIES.contains(&category.as_str()) && severity == "error")
    {
        return Priority::P0;
    }

    // P1: a primary use case fails.
    if severity == "error"
        || P1_CATEGORIES.contains(&category.as_str())
        || contains_any(&message, &P1_KEYWORDS)
    {
        return Priority::P1;
    }

    // P2: a secondary feature is broken.
    if severity == "warning"
        || P2_CATEGORIES.contains(&category.as_str())
        || contains_any(&message, &P2_KEYWORDS)
    {
        return Priority::P2;
    }

    // P3: cosmetic.
    if P3_SEVERITIES.contains(&severity.as_str()) || P3_CATEGORIES.contains(&category.as_str()) {
        return Priority::P3;
    }

    // Unknown violations default to P2.
    Priority::P2
}

/// Escalate a priority based on cross-service impact.
///
/// `impacted_nodes >= 10` promotes to P0; `>= 3` to at least P1.
pub fn promote_for_impact(priority: Priority, impacted_nodes: u32) -> Priority {
    if priority == Priority::P0 {
        return priority;
    }
    if impacted_nodes >= 10 {
        Priority::P0
    } else if impacted_nodes >= 3 && priority > Priority::P1 {
        Priority::P1
    } else {
        priority
    }
}
