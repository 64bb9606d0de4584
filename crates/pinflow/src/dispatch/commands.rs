//! Operator input parsing: slash commands plus the bare keywords the reply
//! keyboards send.

use crate::state::ModelChoice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ListAccounts,
    /// `/account_set <alias>`; without an alias, opens the picker wizard.
    SetAccount(Option<String>),
    AddAccount,
    EditAccount(Option<String>),
    ListPrompts,
    ShowPrompt(Option<String>),
    EditPrompt(Option<String>),
    ListSettings,
    EditSetting(Option<String>),
    SetModel(Option<ModelChoice>),
    Status,
    /// Bare "Run" button: walks the account/model/confirm wizard.
    RunWizard,
    /// `/run`: starts immediately from the stored selections.
    RunNow,
    Back,
    Unknown(String),
}

fn argument(text: &str) -> Option<String> {
    text.split_whitespace()
        .nth(1)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub fn parse(text: &str) -> Command {
    let trimmed = text.trim();
    let normalized = trimmed.to_lowercase();
    let command_word = normalized.split_whitespace().next().unwrap_or("");

    match command_word {
        "/start" | "/help" => return Command::Help,
        "/accounts" => return Command::ListAccounts,
        "/account_set" => return Command::SetAccount(argument(trimmed)),
        "/account_add" => return Command::AddAccount,
        "/account_edit" => return Command::EditAccount(argument(trimmed)),
        "/prompts" => return Command::ListPrompts,
        "/prompt_show" => return Command::ShowPrompt(argument(trimmed)),
        "/prompt_edit" => return Command::EditPrompt(argument(trimmed)),
        "/settings" => return Command::ListSettings,
        "/settings_edit" => return Command::EditSetting(argument(trimmed)),
        "/model" => {
            return Command::SetModel(
                argument(trimmed).and_then(|m| m.parse::<ModelChoice>().ok()),
            )
        }
        "/status" => return Command::Status,
        "/run" => return Command::RunNow,
        _ => {}
    }

    match normalized.as_str() {
        "help" => Command::Help,
        "accounts" | "list" => Command::ListAccounts,
        "select" => Command::SetAccount(None),
        "add" => Command::AddAccount,
        "edit" => Command::EditAccount(None),
        "prompts" => Command::ListPrompts,
        "settings" => Command::ListSettings,
        "status" => Command::Status,
        "run" => Command::RunWizard,
        "back" => Command::Back,
        "gemini" | "openai" | "video" => Command::SetModel(normalized.parse().ok()),
        _ => Command::Unknown(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_commands_with_arguments() {
        assert_eq!(
            parse("/account_set acc1"),
            Command::SetAccount(Some("acc1".to_string()))
        );
        assert_eq!(parse("/account_set"), Command::SetAccount(None));
        assert_eq!(
            parse("/prompt_edit image_prompt"),
            Command::EditPrompt(Some("image_prompt".to_string()))
        );
        assert_eq!(
            parse("/model GEMINI"),
            Command::SetModel(Some(ModelChoice::Gemini))
        );
        assert_eq!(parse("/model dall-e"), Command::SetModel(None));
    }

    #[test]
    fn test_keyboard_keywords_are_case_insensitive() {
        assert_eq!(parse("Run"), Command::RunWizard);
        assert_eq!(parse("/run"), Command::RunNow);
        assert_eq!(parse("STATUS"), Command::Status);
        assert_eq!(parse("List"), Command::ListAccounts);
        assert_eq!(parse("Video"), Command::SetModel(Some(ModelChoice::Video)));
        assert_eq!(parse(" back "), Command::Back);
    }

    #[test]
    fn test_unknown_text_is_preserved() {
        assert_eq!(
            parse("what is this"),
            Command::Unknown("what is this".to_string())
        );
    }
}
