//! The forbidden-action rule table.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use gsw_core::persist::read_or_create;
use gsw_core::text::fold_for_match;

/// One forbidden-action rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenRule {
    /// Substring looked for in the folded command content.
    pub key: String,
    /// Ban duration in hours; 0 means permanent.
    pub ban_hours: u64,
}

impl ForbiddenRule {
    /// Whether `folded_content` (already passed through [`fold_for_match`])
    /// trips this rule.
    pub fn matches(&self, folded_content: &str) -> bool {
        folded_content.contains(&fold_for_match(&self.key))
    }
}

/// Load the rule table: one `keyword <hours>` pair per line, `#` comments
/// and blank lines skipped, malformed lines dropped with a warning. A
/// missing file is created empty.
pub fn load_rules(path: &Path) -> Result<Vec<ForbiddenRule>> {
    let text = read_or_create(path)?;
    let mut rules = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, hours)) = line.rsplit_once(char::is_whitespace) else {
            warn!(path = %path.display(), line, "skipping forbidden rule without a duration");
            continue;
        };
        let Ok(ban_hours) = hours.parse::<u64>() else {
            warn!(path = %path.display(), line, "skipping forbidden rule with a bad duration");
            continue;
        };
        rules.push(ForbiddenRule {
            key: key.trim().to_string(),
            ban_hours,
        });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_rules_in_order_and_tolerates_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forbidden_commands.list");
        std::fs::write(
            &path,
            "# dangerous commands\nkillall 24\n\nop 0\nbroken-line\nbad hours\n",
        )
        .unwrap();

        let rules = load_rules(&path).unwrap();
        assert_eq!(
            rules,
            vec![
                ForbiddenRule {
                    key: "killall".into(),
                    ban_hours: 24,
                },
                ForbiddenRule {
                    key: "op".into(),
                    ban_hours: 0,
                },
            ]
        );
    }

    #[test]
    fn missing_file_becomes_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forbidden_commands.list");
        assert!(load_rules(&path).unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn matching_ignores_case_and_whitespace() {
        let rule = ForbiddenRule {
            key: "killall".into(),
            ban_hours: 24,
        };
        assert!(rule.matches(&fold_for_match("/Kill All")));
        assert!(!rule.matches(&fold_for_match("/kill @e[type=zombie]")));
    }
}
