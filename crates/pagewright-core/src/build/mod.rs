//! Landing-page build orchestration.
//!
//! - `plan`: the fixed stage pipeline and advisor requirement table
//! - `session`: monotonic transitions over `BuildSession`
//! - `signal`: end-of-turn signal resolution
//! - `history`: append-only conversation log with a bounded replay window
//! - `tool`: tool trait, registry, and per-turn context
//! - `prompt`: system prompt composition
//! - `store`: session/history persistence port plus an in-memory store
//! - `driver`: the bounded tool-calling loop tying it all together

pub mod driver;
pub mod history;
pub mod plan;
pub mod prompt;
pub mod session;
pub mod signal;
pub mod store;
pub mod tool;
