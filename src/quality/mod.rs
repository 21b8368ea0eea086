//! Layered quality-gate models and report rendering.

pub mod models;
pub mod report;

pub use models::{
    ContractViolation, GateVerdict, LayerResult, QualityGateReport, QualityLayer, ScanViolation,
};
pub use report::render_quality_gate_report;
