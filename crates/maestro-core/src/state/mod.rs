//! Typed shared run state and its mutation discipline.
//!
//! The state is a closed, schema-checked record ([`RunState`]). The only
//! mutator is a [`StatePatch`] applied through the [`StateStore`], which
//! validates field-by-field: accumulating sequences (`messages`, `progress`,
//! `errors`) are appended, mappings are key-merged, scalars overwrite.

mod patch;
mod store;
mod types;

pub use patch::StatePatch;
pub use store::StateStore;
pub use types::{
    ErrorEntry, MessageRecord, ProgressAction, ProgressEntry, ResultRecord, ResultStatus, Role,
    RunState,
};
