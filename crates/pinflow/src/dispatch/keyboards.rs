//! Reply keyboards for the operator chat.

use crate::services::Keyboard;

pub fn main_menu() -> Keyboard {
    Keyboard::new([
        ["Run", "Status"],
        ["Accounts", "Prompts"],
        ["Settings", "Help"],
    ])
}

pub fn accounts_menu() -> Keyboard {
    Keyboard::new(vec![
        vec!["List", "Select"],
        vec!["Add", "Edit"],
        vec!["Back"],
    ])
}

pub fn models_menu() -> Keyboard {
    Keyboard::new(vec![vec!["Gemini", "OpenAI"], vec!["Video"], vec!["Back"]])
}

pub fn run_confirm() -> Keyboard {
    Keyboard::new(vec![vec!["Start", "Cancel"], vec!["Back"]])
}

/// One alias per row, with a trailing Back row.
pub fn alias_picker(aliases: &[String]) -> Keyboard {
    let mut rows: Vec<Vec<String>> = aliases.iter().map(|a| vec![a.clone()]).collect();
    rows.push(vec!["Back".to_string()]);
    Keyboard::from_rows(rows)
}
