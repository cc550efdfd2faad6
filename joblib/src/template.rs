//! Command lines that refer to paths inside a workspace.
//!
//! A template is written before the workspace exists, so it names files symbolically:
//!
//! | placeholder     | expands to                                        |
//! |-----------------|---------------------------------------------------|
//! | `{input}`       | the first staged input                            |
//! | `{input:NAME}`  | the staged input uploaded as `NAME`               |
//! | `{out:REL}`     | `REL` resolved inside the workspace (not created) |
//! | `{dir:REL}`     | `REL` resolved and created as a directory         |
//! | `{workspace}`   | the workspace root                                |
//!
//! `{{` and `}}` produce literal braces.

use crate::error::{Error, Result};
use crate::types::Envs;
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};

/// A file staged into a workspace, keyed by the name it was uploaded under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedInput {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Placeholder {
    Input,
    NamedInput(String),
    Out(String),
    Dir(String),
    Workspace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Template(Vec<Segment>);

impl Template {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidTemplate {
            template: raw.to_string(),
            reason,
        };
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched '}'")),
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(invalid("unterminated placeholder")),
                            Some(c) => body.push(c),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let placeholder = match body.split_once(':') {
                        None if body == "input" => Placeholder::Input,
                        None if body == "workspace" => Placeholder::Workspace,
                        Some((_, arg)) if arg.is_empty() => {
                            return Err(invalid("placeholder argument is empty"))
                        }
                        Some(("input", name)) => Placeholder::NamedInput(name.to_string()),
                        Some(("out", rel)) => Placeholder::Out(rel.to_string()),
                        Some(("dir", rel)) => Placeholder::Dir(rel.to_string()),
                        _ => return Err(invalid("unknown placeholder")),
                    };
                    segments.push(Segment::Placeholder(placeholder));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self(segments))
    }

    async fn render(&self, workspace: &Workspace, inputs: &[StagedInput]) -> Result<String> {
        let mut rendered = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Placeholder(placeholder) => {
                    let path = match placeholder {
                        Placeholder::Input => inputs
                            .first()
                            .map(|input| input.path.clone())
                            .ok_or_else(|| missing_input("input"))?,
                        Placeholder::NamedInput(name) => inputs
                            .iter()
                            .find(|input| &input.key == name)
                            .map(|input| input.path.clone())
                            .ok_or_else(|| missing_input(name))?,
                        Placeholder::Out(rel) => workspace.resolve(rel)?,
                        Placeholder::Dir(rel) => workspace.create_dir(rel).await?,
                        Placeholder::Workspace => workspace.path().to_path_buf(),
                    };
                    rendered.push_str(&path_str(&path));
                }
            }
        }
        Ok(rendered)
    }
}

fn missing_input(name: &str) -> Error {
    Error::InvalidTemplate {
        template: name.to_string(),
        reason: "no staged input for placeholder",
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Escapes a literal so it can be embedded in a template verbatim.
pub fn escape(literal: &str) -> String {
    literal.replace('{', "{{").replace('}', "}}")
}

/// Argument vector, environment and working directory of a tool invocation, with placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    command: Vec<Template>,
    envs: Vec<(String, Template)>,
    dir: Option<Template>,
}

/// A template expanded against a concrete workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedCommand {
    pub command: Vec<String>,
    pub envs: Envs,
    pub dir: PathBuf,
}

impl CommandTemplate {
    /// Parses every element up front, so a broken template fails before any workspace exists.
    pub fn parse<I, S>(command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let command = command
            .into_iter()
            .map(|part| Template::parse(part.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if command.is_empty() {
            return Err(Error::InvalidSpec("command is empty"));
        }
        Ok(Self {
            command,
            envs: Vec::new(),
            dir: None,
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: &str) -> Result<Self> {
        self.envs.push((key.into(), Template::parse(value)?));
        Ok(self)
    }

    /// Working directory; the workspace root when unset.
    pub fn with_dir(mut self, dir: &str) -> Result<Self> {
        self.dir = Some(Template::parse(dir)?);
        Ok(self)
    }

    pub async fn render(
        &self,
        workspace: &Workspace,
        inputs: &[StagedInput],
    ) -> Result<RenderedCommand> {
        let mut command = Vec::with_capacity(self.command.len());
        for part in &self.command {
            command.push(part.render(workspace, inputs).await?);
        }
        let mut envs = Envs::with_capacity(self.envs.len());
        for (key, value) in &self.envs {
            envs.push((key.clone(), value.render(workspace, inputs).await?));
        }
        let dir = match &self.dir {
            Some(dir) => PathBuf::from(dir.render(workspace, inputs).await?),
            None => workspace.path().to_path_buf(),
        };
        Ok(RenderedCommand { command, envs, dir })
    }
}
