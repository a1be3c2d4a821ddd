//! Value types shared across the collection flows

pub mod data_contract;
mod inputs;
mod record;
mod repository;

pub use inputs::{OnboardingInput, OnboardingType, PointCollectorInput};
pub use record::{Metadata, ORIGINATING_URL, RecordContext, RecordWithContext, ResponseShape};
pub use repository::Repository;
