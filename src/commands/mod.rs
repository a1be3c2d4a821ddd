mod common;
mod delta;
mod init;
mod onboard;
mod point;
mod traffic;
mod validate;
mod webhook;

pub use delta::{DeltaArgs, process_delta};
pub use init::{InitArgs, init_config};
pub use onboard::{OnboardArgs, process_onboarding};
pub use point::{PointArgs, process_point};
pub use traffic::{TrafficArgs, process_traffic};
pub use validate::{ValidateArgs, validate_config};
pub use webhook::{WebhookArgs, process_webhook};
