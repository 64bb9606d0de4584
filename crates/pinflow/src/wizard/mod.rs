pub mod machine;

pub use machine::{step, Effect, Reply, Transition, WizardCtx};
