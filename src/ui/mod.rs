//! Operator interaction.
//!
//! The pipeline talks to the operator only through `UserInterface`; the
//! terminal implementation lives in `stream`.

pub mod stream;

pub use stream::StreamUi;

use crate::system::commands::OperationList;

/// Everything the installation pipeline asks of the operator.
///
/// Prompts block until answered. Implementations running without questions
/// answer every prompt with its default.
pub trait UserInterface {
    /// Set the title shown for the rest of the session.
    fn set_title(&mut self, title: &str);

    /// Informational message the operator should see.
    fn message(&mut self, msg: &str);

    /// Progress detail; may be hidden from the operator.
    fn log(&mut self, msg: &str);

    fn warn(&mut self, msg: &str);

    fn error(&mut self, msg: &str);

    /// Ask a yes/no question.
    fn yes_no(&mut self, default: bool, question: &str) -> bool;

    /// Ask for a line of text.
    fn get_input(&mut self, default: &str, prompt: &str) -> String;

    /// Show the license text and ask whether it is accepted.
    fn display_license(&mut self, license: &str) -> bool;

    /// Show the planned operations and ask whether to proceed.
    fn approve_operation_list(&mut self, list: &OperationList, description: &str) -> bool;
}
