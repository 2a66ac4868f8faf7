//! Risk findings and the integration engine.

pub mod merge;
pub mod model;
pub mod similarity;

pub use merge::{FindingSet, Integration, IntegrationAmbiguity, UnanalyzedBatch, integrate, merge};
pub use model::{
    Category, Evidence, Likelihood, RawFinding, RiskFinding, RiskId, RiskRegister, Severity,
};
