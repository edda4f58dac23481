use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};

use super::coordinator::ResumePlan;

/// Operator approval for a resume plan.
pub trait Confirmer {
    fn confirm(&self, plan: &ResumePlan) -> Result<bool>;
}

/// Asks on the terminal.
pub struct InteractiveConfirmer;

impl Confirmer for InteractiveConfirmer {
    fn confirm(&self, plan: &ResumePlan) -> Result<bool> {
        let resume_label = match plan.resume_phase {
            Some(phase) => format!("Resume from phase {}", phase),
            None => "Resume".to_string(),
        };
        let options = [resume_label.as_str(), "Abort"];

        // Drift warnings make "Abort" the default.
        let default = if plan.warnings.is_empty() { 0 } else { 1 };

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed?")
            .items(&options)
            .default(default)
            .interact()?;
        Ok(selection == 0)
    }
}

/// Fixed answer, for `--yes` and tests.
pub struct AutoConfirm(pub bool);

impl Confirmer for AutoConfirm {
    fn confirm(&self, _plan: &ResumePlan) -> Result<bool> {
        Ok(self.0)
    }
}
