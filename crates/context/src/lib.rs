//! Context budgeting engine — the core decision logic of docuchat.
//!
//! Answers two questions for the UI and the session layer:
//! - "can document D be added to the current selection without exceeding
//!   the capacity budget?"
//! - "how much of the budget is the current selection using?"
//!
//! Everything here is pure: inputs are a selection set, the document list,
//! and a budget; outputs are a new selection set or a number. No UI state,
//! no I/O, fully testable without a harness.

pub mod cost;
pub mod prompt;
pub mod selection;

pub use cost::{CharCost, CostModel};
pub use prompt::build_chat_prompt;
pub use selection::{BudgetEngine, SelectionSet, ToggleOutcome, Usage, UsageLevel};
