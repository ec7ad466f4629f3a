//! Built-in step implementations.

pub mod constant;
pub mod delay;
pub mod expression;
pub mod gain;
pub mod group_step;
pub mod integrator;
pub mod recorder;
pub mod sum;

pub use constant::ConstantStep;
pub use delay::UnitDelayStep;
pub use expression::ExpressionStep;
pub use gain::GainStep;
pub use group_step::GroupStep;
pub use integrator::IntegratorStep;
pub use recorder::{RecordedSample, RecorderStep};
pub use sum::SumStep;
