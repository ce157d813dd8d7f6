//! Archival command templates such as `{agent} incr {paths} -su=yes`.

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Agent,
    Paths,
    Unit,
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<Token>,
}

/// Argument vector ready to spawn: program plus arguments, no shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let tokens: Vec<Token> = template
            .split_whitespace()
            .map(|word| match word {
                "{agent}" | "{dsmc_path}" => Token::Agent,
                "{paths}" | "{backup_dirs}" => Token::Paths,
                "{unit}" => Token::Unit,
                other => Token::Literal(other.to_string()),
            })
            .collect();

        if tokens.is_empty() {
            return Err(Error::InvalidTemplate("template is empty".into()).into());
        }
        if !tokens.contains(&Token::Paths) {
            return Err(Error::InvalidTemplate(format!(
                "template must reference {{paths}}: {template:?}"
            ))
            .into());
        }
        if let Some(Token::Literal(word)) = tokens
            .iter()
            .find(|t| matches!(t, Token::Literal(w) if w.starts_with('{') && w.ends_with('}')))
        {
            return Err(Error::InvalidTemplate(format!("unknown placeholder {word}")).into());
        }
        if matches!(tokens.first(), Some(Token::Paths)) {
            return Err(Error::InvalidTemplate("template must start with a program".into()).into());
        }

        Ok(Self { tokens })
    }

    /// Bind the template to an agent and a stanza's paths.
    pub fn render(&self, agent: &str, paths: &[PathBuf], unit: &str) -> AgentCommand {
        let mut argv: Vec<OsString> = Vec::new();
        for token in &self.tokens {
            match token {
                Token::Agent => argv.push(agent.into()),
                Token::Paths => argv.extend(paths.iter().map(|p| p.as_os_str().to_os_string())),
                Token::Unit => argv.push(unit.into()),
                Token::Literal(word) => argv.push(word.into()),
            }
        }
        let program = argv.remove(0);
        AgentCommand {
            program,
            args: argv,
        }
    }

    /// First word of the template once the agent is substituted.
    pub fn program<'a>(&'a self, agent: &'a str) -> &'a str {
        match self.tokens.first() {
            Some(Token::Literal(word)) => word,
            _ => agent,
        }
    }
}

/// Resolve a program name the way `execvp` would: paths are checked as-is,
/// bare names are looked up in `PATH`.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
