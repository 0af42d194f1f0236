//! Database client profiles: mysql/mariadb, psql, sqlite3.
//!
//! Each client asks for a password before its banner when run with `-p` or
//! against a password-protected server, so the password prompt is part of
//! the strict grammar.

use crate::channel::{PromptKind, PromptRule};
use crate::profile::ProgramProfile;

/// Create the mysql/mariadb client profile.
pub fn mysql() -> ProgramProfile {
    ProgramProfile::new("mysql")
        .with_alias("mariadb")
        .with_prompt(
            PromptRule::new(
                "mysql",
                PromptKind::Program,
                r"^(mysql|MariaDB \[[^\]]*\])>\s*$",
            )
            .unwrap(),
        )
        .with_prompt(
            PromptRule::new("mysql-continuation", PromptKind::Program, r#"^\s*(->|'>|">|`>)\s*$"#)
                .unwrap(),
        )
        .with_prompt(
            PromptRule::new("mysql-password", PromptKind::Password, r"(?i)^enter password:\s*$")
                .unwrap(),
        )
        .with_started_marker("welcome to the mysql")
        .with_started_marker("welcome to the mariadb")
}

/// Create the PostgreSQL client profile.
pub fn psql() -> ProgramProfile {
    ProgramProfile::new("psql")
        .with_prompt(
            PromptRule::new("psql", PromptKind::Program, r#"^[\w.-]+[=(\-'"][#>]\s*$"#).unwrap(),
        )
        .with_prompt(
            PromptRule::new(
                "psql-password",
                PromptKind::Password,
                r"(?i)^password( for user [\w.-]+)?:\s*$",
            )
            .unwrap(),
        )
        .with_started_marker("psql (")
        .with_started_marker("type \"help\" for help")
}

/// Create the SQLite shell profile.
pub fn sqlite() -> ProgramProfile {
    ProgramProfile::new("sqlite3")
        .with_alias("sqlite")
        .with_prompt(PromptRule::new("sqlite", PromptKind::Program, r"^sqlite>\s*$").unwrap())
        .with_prompt(
            PromptRule::new("sqlite-continuation", PromptKind::Program, r"^\s*\.\.\.>\s*$")
                .unwrap(),
        )
        .with_started_marker("sqlite version")
}
