//! Terminal user interface.
//!
//! Messages go to stdout, warnings and errors to stderr, and prompts through
//! `dialoguer`. Every message is also forwarded to the `log` facade so the
//! installation log carries the full conversation.

use crate::system::commands::OperationList;
use crate::ui::UserInterface;
use dialoguer::{Confirm, Input};

/// Terminal implementation of `UserInterface`.
#[derive(Debug, Default)]
pub struct StreamUi {
    no_questions: bool,
    expert: bool,
    title: String,
}

impl StreamUi {
    pub fn new(no_questions: bool, expert: bool) -> Self {
        StreamUi {
            no_questions,
            expert,
            title: String::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl UserInterface for StreamUi {
    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        log::info!("{}", title);
    }

    fn message(&mut self, msg: &str) {
        println!("\n{}\n", msg);
        log::info!("{}", msg);
    }

    fn log(&mut self, msg: &str) {
        if self.expert {
            println!("-> {}", msg);
        }
        log::info!("{}", msg);
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("\nWARNING: {}\n", msg);
        log::warn!("{}", msg);
    }

    fn error(&mut self, msg: &str) {
        eprintln!("\nERROR: {}\n", msg);
        log::error!("{}", msg);
    }

    fn yes_no(&mut self, default: bool, question: &str) -> bool {
        let answer = if self.no_questions {
            default
        } else {
            match Confirm::new()
                .with_prompt(question)
                .default(default)
                .interact()
            {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("Prompt failed ({}); using default answer", e);
                    default
                }
            }
        };
        log::info!("{} ({})", question, if answer { "Yes" } else { "No" });
        answer
    }

    fn get_input(&mut self, default: &str, prompt: &str) -> String {
        let answer = if self.no_questions {
            default.to_string()
        } else {
            match Input::<String>::new()
                .with_prompt(prompt)
                .default(default.to_string())
                .interact_text()
            {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("Prompt failed ({}); using default answer", e);
                    default.to_string()
                }
            }
        };
        log::info!("{}: {}", prompt, answer);
        answer
    }

    fn display_license(&mut self, license: &str) -> bool {
        println!("{}", license);
        self.yes_no(false, "Do you accept this license?")
    }

    fn approve_operation_list(&mut self, list: &OperationList, description: &str) -> bool {
        if !self.expert {
            return true;
        }

        println!("\nThe following operations will be performed to install the {}:", description);
        for line in list.describe() {
            println!("  {}", line);
        }
        self.yes_no(true, "Is this acceptable?")
    }
}
