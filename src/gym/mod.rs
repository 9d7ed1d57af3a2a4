pub mod environment;
pub mod market;
pub mod memory;

pub use environment::{Environment, StepOutcome};
pub use market::SyntheticMarket;
pub use memory::ReplayMemory;
