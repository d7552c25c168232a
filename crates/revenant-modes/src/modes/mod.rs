//! The nine experimental conditions, one module each.

pub mod amnesiac;
pub mod determinism;
pub mod hive_cluster;
pub mod illusory_operator;
pub mod panopticon_observer;
pub mod panopticon_subject;
pub mod prisoners_dilemma;
pub mod split_brain;
pub mod unstable_memory;

pub use amnesiac::{AmnesiacConfig, AmnesiacMode};
pub use determinism::{DeterminismConfig, DeterminismMode};
pub use hive_cluster::{HiveClusterConfig, HiveClusterMode};
pub use illusory_operator::{IllusoryOperatorConfig, IllusoryOperatorMode};
pub use panopticon_observer::{PanopticonObserverConfig, PanopticonObserverMode};
pub use panopticon_subject::{PanopticonSubjectConfig, PanopticonSubjectMode};
pub use prisoners_dilemma::{OpponentStrategy, PrisonersDilemmaConfig, PrisonersDilemmaMode};
pub use split_brain::{SplitBrainConfig, SplitBrainMode};
pub use unstable_memory::{UnstableMemoryConfig, UnstableMemoryMode};
