//! Offline code review heuristics

use super::{CodeReviewService, FileSet, ReviewFinding, ReviewReport, Severity};
use crate::error::Result;
use crate::recipe::RecipeUnit;
use async_trait::async_trait;
use regex_utils::review::UNFINISHED;

/// Flags unfinished markers, empty files and oversized files
#[derive(Debug, Clone)]
pub struct HeuristicReviewer {
    pub max_lines: usize,
}

impl Default for HeuristicReviewer {
    fn default() -> Self {
        Self { max_lines: 500 }
    }
}

impl HeuristicReviewer {
    pub fn review_files(&self, artifact: &FileSet) -> ReviewReport {
        let mut findings = Vec::new();

        for (file, content) in artifact {
            if content.trim().is_empty() {
                findings.push(ReviewFinding {
                    file: file.clone(),
                    severity: Severity::Warning,
                    message: "file is empty".to_string(),
                });
                continue;
            }

            for (number, line) in content.lines().enumerate() {
                if let Some(marker) = UNFINISHED.find(line) {
                    findings.push(ReviewFinding {
                        file: file.clone(),
                        severity: Severity::Warning,
                        message: format!("line {}: unfinished marker {}", number + 1, marker.as_str()),
                    });
                }
            }

            let lines = content.lines().count();
            if lines > self.max_lines {
                findings.push(ReviewFinding {
                    file: file.clone(),
                    severity: Severity::Info,
                    message: format!("{} lines, consider splitting", lines),
                });
            }
        }

        ReviewReport { findings }
    }
}

#[async_trait]
impl CodeReviewService for HeuristicReviewer {
    async fn review(&self, _unit: &RecipeUnit, artifact: &FileSet) -> Result<ReviewReport> {
        Ok(self.review_files(artifact))
    }
}
