//! Decision layer
//!
//! - [`thompson`] - Beta posteriors per topic and the Gamma/Beta sampler
//! - [`history`] - bounded log of answered items
//! - [`policy`] - topic, difficulty and batch selection

pub mod history;
pub mod policy;
pub mod thompson;

pub use history::{SelectionEvent, SelectionHistory};
pub use policy::{
    difficulty_for_theta, response_reward, weakness_bonus, ArmStats, BanditInsights,
    PolicyExport, SelectionPolicy, TopicChoice,
};
pub use thompson::{BanditArm, BetaSampler};
