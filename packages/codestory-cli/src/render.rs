//! Terminal rendering and prompts
//!
//! The proposed plan and the confirmation prompt always print; everything
//! else respects --silent.

use std::io::{BufRead, Write};

use codestory_core::{ProposedCommit, RunReport, UserInteraction};

/// How the preview describes each proposed commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDisplay {
    /// Scopes and identifiers per commit
    Semantic,
    /// File lists only
    Git,
}

pub struct TerminalInteraction {
    pub display: DiffDisplay,
}

impl TerminalInteraction {
    fn render_preview(&self, preview: &[ProposedCommit]) {
        println!("\nProposed commits:");
        for (i, commit) in preview.iter().enumerate() {
            println!("  {}. {}", i + 1, commit.message);
            if self.display == DiffDisplay::Semantic && !commit.scopes.is_empty() {
                let scopes: Vec<&str> = commit.scopes.iter().map(|s| s.as_str()).collect();
                println!("     scopes: {}", scopes.join(", "));
            }
            let files: Vec<&str> = commit.files.iter().map(|s| s.as_str()).collect();
            if !files.is_empty() {
                println!("     files:  {}", files.join(", "));
            }
            if let Some(rationale) = &commit.rationale {
                println!("     why:    {rationale}");
            }
        }
    }
}

impl UserInteraction for TerminalInteraction {
    fn confirm_plan(&self, preview: &[ProposedCommit]) -> bool {
        self.render_preview(preview);
        print!("\nApply this plan? [y/N] ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn edit_message(&self, proposed: &str) -> Option<String> {
        print!("Message [{proposed}] (enter keeps it): ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return None;
        }
        let trimmed = answer.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Final report once a run finished
pub fn print_report(report: &RunReport, silent: bool) {
    if silent {
        return;
    }

    if report.commits.is_empty() {
        println!("No commits created.");
    } else {
        println!(
            "Created {} commit(s) on {}:",
            report.commits.len(),
            report.branch
        );
        for commit in &report.commits {
            println!("  {}  {}", &commit.id[..commit.id.len().min(10)], commit.message);
        }
    }

    if !report.rejections.is_empty() {
        println!("\nRejected groups (left in the working tree):");
        for rejection in &report.rejections {
            println!("  {} [{}]", rejection.files.join(", "), rejection.reason);
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        assert_ne!(DiffDisplay::Semantic, DiffDisplay::Git);
    }
}
