//! Splits a script body into its apply and undo sections.
//!
//! The undo section starts at the first marker line of the form
//! `-- //@UNDO` (`//` also works as the leading comment token, and blanks
//! are allowed between the tokens). Anything after `@UNDO` on that line is
//! ignored.

/// Apply and undo halves of a script body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSections {
    pub up: String,
    /// `None` when the script has no undo marker
    pub down: Option<String>,
}

pub fn split_sections(content: &str) -> ScriptSections {
    let mut up = String::new();
    let mut down: Option<String> = None;

    for line in content.lines() {
        match down.as_mut() {
            Some(section) => push_line(section, line),
            None if is_undo_marker(line) => down = Some(String::new()),
            None => push_line(&mut up, line),
        }
    }

    ScriptSections { up, down }
}

fn push_line(section: &mut String, line: &str) {
    section.push_str(line);
    section.push('\n');
}

/// `true` for lines like `-- //@UNDO` or `//  // @UNDO rollback`
pub fn is_undo_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed
        .strip_prefix("--")
        .or_else(|| trimmed.strip_prefix("//"))
    else {
        return false;
    };
    let Some(rest) = rest.trim_start_matches([' ', '\t']).strip_prefix("//") else {
        return false;
    };
    rest.trim_start_matches([' ', '\t']).starts_with("@UNDO")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_variants() {
        assert!(is_undo_marker("-- //@UNDO"));
        assert!(is_undo_marker("--//@UNDO"));
        assert!(is_undo_marker("  --  //  @UNDO drop everything"));
        assert!(is_undo_marker("// //@UNDO"));
        assert!(!is_undo_marker("-- @UNDO"));
        assert!(!is_undo_marker("--// @undo"));
        assert!(!is_undo_marker("SELECT 1; -- //@UNDO"));
    }

    #[test]
    fn test_split_with_undo() {
        let body =
            "-- // add column\nALTER TABLE t ADD c INT;\n\n-- //@UNDO\nALTER TABLE t DROP c;\n";
        let sections = split_sections(body);
        assert_eq!(sections.up, "-- // add column\nALTER TABLE t ADD c INT;\n\n");
        assert_eq!(sections.down.as_deref(), Some("ALTER TABLE t DROP c;\n"));
    }

    #[test]
    fn test_split_without_undo() {
        let sections = split_sections("CREATE TABLE t (id INT);\r\nINSERT INTO t VALUES (1);");
        assert_eq!(sections.up, "CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);\n");
        assert_eq!(sections.down, None);
    }

    #[test]
    fn test_second_marker_stays_in_undo() {
        let sections = split_sections("A;\n-- //@UNDO\nB;\n-- //@UNDO\nC;\n");
        assert_eq!(sections.down.as_deref(), Some("B;\n-- //@UNDO\nC;\n"));
    }

    #[test]
    fn test_empty_undo_section() {
        let sections = split_sections("A;\n-- //@UNDO\n");
        assert_eq!(sections.down.as_deref(), Some(""));
    }
}
