//! Interactive conflict resolution prompts.

use console::Style;
use dialoguer::Select;

use scaffold_migrate_core::merge::{ConflictChooser, ConflictRegion, RegionChoice};

use crate::style;

const TEXT_CHOICES: &[&str] = &[
    "ours    (keep the project's lines)",
    "theirs  (take the new scaffold's lines)",
    "both    (ours, then theirs)",
    "skip    (leave the markers in place)",
];

const BINARY_CHOICES: &[&str] = &[
    "ours    (keep the project's file)",
    "theirs  (take the new scaffold's file)",
    "skip",
];

/// Prompts for each conflict with `dialoguer`.
///
/// A prompt failure skips the remaining conflicts; the error is kept for the
/// caller to report.
#[derive(Default)]
pub struct InteractiveChooser {
    pub failure: Option<std::io::Error>,
}

impl InteractiveChooser {
    fn select(&mut self, prompt: String, items: &[&str]) -> Option<usize> {
        if self.failure.is_some() {
            return None;
        }
        match Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
        {
            Ok(index) => Some(index),
            Err(e) => {
                self.failure = Some(std::io::Error::other(e.to_string()));
                None
            }
        }
    }
}

impl ConflictChooser for InteractiveChooser {
    fn choose_region(
        &mut self,
        path: &str,
        region: &ConflictRegion,
        index: usize,
        total: usize,
    ) -> RegionChoice {
        if self.failure.is_some() {
            return RegionChoice::Skip;
        }
        let ours = Style::new().cyan();
        let theirs = Style::new().magenta();

        println!();
        println!(
            "{}",
            style::header(&format!(
                "{} (block {} of {}, line {})",
                path,
                index + 1,
                total,
                region.start_line
            ))
        );
        println!("{}", ours.apply_to("--- ours"));
        print!("{}", region.ours);
        if let Some(base) = &region.base {
            println!("{}", style::dim("--- base"));
            print!("{}", style::dim(base));
        }
        println!("{}", theirs.apply_to("--- theirs"));
        print!("{}", region.theirs);

        match self.select("Resolve with".into(), TEXT_CHOICES) {
            Some(0) => RegionChoice::Ours,
            Some(1) => RegionChoice::Theirs,
            Some(2) => RegionChoice::Both,
            _ => RegionChoice::Skip,
        }
    }

    fn choose_binary(&mut self, path: &str) -> RegionChoice {
        match self.select(format!("{} is a binary conflict; keep", path), BINARY_CHOICES) {
            Some(0) => RegionChoice::Ours,
            Some(1) => RegionChoice::Theirs,
            _ => RegionChoice::Skip,
        }
    }
}
