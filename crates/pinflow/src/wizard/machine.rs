//! Pure wizard state machine.
//!
//! A step maps (pending action, operator input, context) to a transition.
//! No I/O happens here: side effects are described as `Effect` values and
//! applied by the dispatcher, which commits the transition only when the
//! effect succeeds.

use serde_json::Value;

use crate::config::Account;
use crate::dispatch::keyboards;
use crate::services::Keyboard;
use crate::state::{ModelChoice, PendingAction, WizardStep};

/// Inputs that abandon an in-progress run wizard instead of being consumed
/// as an account alias.
const RUN_ABORT_KEYWORDS: [&str; 7] = [
    "cancel", "accounts", "settings", "prompts", "status", "help", "run",
];

/// Read-only context the machine consults while stepping.
#[derive(Debug, Clone, Default)]
pub struct WizardCtx {
    pub known_aliases: Vec<String>,
    pub selected_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    fn new(text: impl Into<String>, keyboard: Option<Keyboard>) -> Self {
        Self {
            text: text.into(),
            keyboard,
        }
    }
}

/// Side effect requested by a transition, applied by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    AddAccount(Account),
    PatchAccount { alias: String, patch: Value },
    SetPrompt { key: String, text: String },
    SetSetting { key: String, value: String },
    SelectAccount(String),
    SetModel(ModelChoice),
    EnqueueJob,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Pending action after this input; `None` returns the user to idle.
    pub next: Option<PendingAction>,
    pub reply: Option<Reply>,
    pub effect: Effect,
}

impl Transition {
    fn idle(reply: Reply) -> Self {
        Self {
            next: None,
            reply: Some(reply),
            effect: Effect::None,
        }
    }

    /// Keeps the current pending action and re-prompts.
    fn stay(pending: &PendingAction, reply: Reply) -> Self {
        Self {
            next: Some(pending.clone()),
            reply: Some(reply),
            effect: Effect::None,
        }
    }
}

/// Advances the wizard by one operator message.
pub fn step(pending: &PendingAction, input: &str, ctx: &WizardCtx) -> Transition {
    let trimmed = input.trim();
    let normalized = trimmed.to_lowercase();

    match pending {
        PendingAction::AccountAdd => step_account_add(pending, trimmed),
        PendingAction::AccountEdit { alias } => step_account_edit(pending, alias, trimmed),
        PendingAction::PromptEdit { key } => Transition {
            next: None,
            reply: Some(Reply::new(format!("Prompt updated: {key}"), None)),
            effect: Effect::SetPrompt {
                key: key.clone(),
                text: input.to_string(),
            },
        },
        PendingAction::SettingsEdit { key } => Transition {
            next: None,
            reply: Some(Reply::new(format!("Setting updated: {key}"), None)),
            effect: Effect::SetSetting {
                key: key.clone(),
                value: trimmed.to_string(),
            },
        },
        PendingAction::AccountSelect => step_account_select(pending, trimmed, &normalized, ctx),
        PendingAction::Run { step } => step_run(pending, *step, trimmed, &normalized, ctx),
    }
}

fn step_account_add(pending: &PendingAction, input: &str) -> Transition {
    let account: Account = match serde_json::from_str(input) {
        Ok(account) => account,
        Err(e) => {
            return Transition::stay(
                pending,
                Reply::new(format!("Invalid JSON: {e}. Send the account again."), None),
            )
        }
    };
    if account.alias.trim().is_empty() {
        return Transition::stay(
            pending,
            Reply::new("The JSON needs an \"alias\" key. Send the account again.", None),
        );
    }
    Transition {
        next: None,
        reply: Some(Reply::new(format!("Account added: {}", account.alias), None)),
        effect: Effect::AddAccount(account),
    }
}

fn step_account_edit(pending: &PendingAction, alias: &str, input: &str) -> Transition {
    let patch: Value = match serde_json::from_str(input) {
        Ok(patch) => patch,
        Err(e) => {
            return Transition::stay(
                pending,
                Reply::new(format!("Invalid JSON: {e}. Send the patch again."), None),
            )
        }
    };
    if !patch.is_object() {
        return Transition::stay(
            pending,
            Reply::new("The patch must be a JSON object. Send it again.", None),
        );
    }
    Transition {
        next: None,
        reply: Some(Reply::new(format!("Account updated: {alias}"), None)),
        effect: Effect::PatchAccount {
            alias: alias.to_string(),
            patch,
        },
    }
}

fn step_account_select(
    pending: &PendingAction,
    trimmed: &str,
    normalized: &str,
    ctx: &WizardCtx,
) -> Transition {
    if normalized == "back" {
        return Transition::idle(Reply::new("Accounts", Some(keyboards::accounts_menu())));
    }
    if !ctx.known_aliases.iter().any(|a| a == trimmed) {
        return Transition::stay(
            pending,
            Reply::new(
                format!("Unknown account: {trimmed}"),
                Some(keyboards::alias_picker(&ctx.known_aliases)),
            ),
        );
    }
    Transition {
        next: None,
        reply: Some(Reply::new(
            format!("Account selected: {trimmed}"),
            Some(keyboards::accounts_menu()),
        )),
        effect: Effect::SelectAccount(trimmed.to_string()),
    }
}

fn step_run(
    pending: &PendingAction,
    wstep: WizardStep,
    trimmed: &str,
    normalized: &str,
    ctx: &WizardCtx,
) -> Transition {
    if normalized == "back" {
        return Transition::idle(Reply::new("Main menu", Some(keyboards::main_menu())));
    }

    match wstep {
        WizardStep::ChooseAccount => {
            if RUN_ABORT_KEYWORDS.contains(&normalized) {
                return Transition::idle(Reply::new("Cancelled", Some(keyboards::main_menu())));
            }
            if !ctx.known_aliases.iter().any(|a| a == trimmed) {
                return Transition::stay(
                    pending,
                    Reply::new(
                        format!("Unknown account: {trimmed}"),
                        Some(keyboards::alias_picker(&ctx.known_aliases)),
                    ),
                );
            }
            Transition {
                next: Some(PendingAction::Run {
                    step: WizardStep::ChooseModel,
                }),
                reply: Some(Reply::new("Choose a model", Some(keyboards::models_menu()))),
                effect: Effect::SelectAccount(trimmed.to_string()),
            }
        }
        WizardStep::ChooseModel => {
            if normalized == "cancel" {
                return Transition::idle(Reply::new("Cancelled", Some(keyboards::main_menu())));
            }
            let Ok(model) = normalized.parse::<ModelChoice>() else {
                return Transition::stay(
                    pending,
                    Reply::new("Pick a model with a button", Some(keyboards::models_menu())),
                );
            };
            let alias = ctx.selected_alias.as_deref().unwrap_or("?");
            Transition {
                next: Some(PendingAction::Run {
                    step: WizardStep::Confirm,
                }),
                reply: Some(Reply::new(
                    format!("Ready to start: account {alias}, model {model}"),
                    Some(keyboards::run_confirm()),
                )),
                effect: Effect::SetModel(model),
            }
        }
        WizardStep::Confirm => match normalized {
            "start" => Transition {
                next: None,
                reply: None,
                effect: Effect::EnqueueJob,
            },
            "cancel" => Transition::idle(Reply::new("Cancelled", Some(keyboards::main_menu()))),
            _ => Transition::stay(
                pending,
                Reply::new("Choose Start or Cancel", Some(keyboards::run_confirm())),
            ),
        },
    }
}
