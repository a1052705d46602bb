//! Control commands: one line, verb first, space-delimited.
//!
//! For path-bearing commands the remainder of the line is one opaque
//! argument and may itself contain spaces.

use std::str::FromStr;

use crate::error::StoreError;
use crate::path::is_plain_file_name;

/// Commands accepted by the front-door node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontCommand {
    /// `ufile <name> <dir>`
    Upload { name: String, dir: String },
    /// `dfile <path>`
    Download { path: String },
    /// `rmfile <path>`
    Remove { path: String },
    /// `display <dir>`
    Display { dir: String },
    /// `dtar <ext>`
    Archive { extension: String },
}

/// Commands accepted by a specialized node, one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    /// `store <name> <dir>`
    Store { name: String, dir: String },
    /// `get <path>`
    Get { path: String },
    /// `rmfile <path>`
    Remove { path: String },
    /// `list <dir>`
    List { dir: String },
    /// `dtar` - bundles the node's whole root
    Archive,
}

fn split_verb(line: &str) -> Result<(&str, &str), StoreError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(StoreError::Protocol("Invalid command".to_string()));
    }
    Ok(match line.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    })
}

fn required<'a>(verb: &'static str, arg: &'a str, what: &str) -> Result<&'a str, StoreError> {
    if arg.is_empty() {
        Err(StoreError::Usage {
            verb,
            reason: format!("missing {}", what),
        })
    } else {
        Ok(arg)
    }
}

fn name_and_dir(verb: &'static str, rest: &str) -> Result<(String, String), StoreError> {
    let usage = || StoreError::Usage {
        verb,
        reason: format!("usage: {} <filename> <path>", verb),
    };
    let (name, dir) = rest.split_once(' ').ok_or_else(usage)?;
    let dir = dir.trim();
    if dir.is_empty() {
        return Err(usage());
    }
    if !is_plain_file_name(name) {
        return Err(StoreError::Usage {
            verb,
            reason: format!("invalid file name {:?}", name),
        });
    }
    Ok((name.to_string(), dir.to_string()))
}

impl FromStr for FrontCommand {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (verb, rest) = split_verb(line)?;
        match verb {
            "ufile" => {
                let (name, dir) = name_and_dir("ufile", rest)?;
                Ok(FrontCommand::Upload { name, dir })
            }
            "dfile" => Ok(FrontCommand::Download {
                path: required("dfile", rest, "file path")?.to_string(),
            }),
            "rmfile" => Ok(FrontCommand::Remove {
                path: required("rmfile", rest, "file path")?.to_string(),
            }),
            "display" => Ok(FrontCommand::Display {
                dir: required("display", rest, "directory")?.to_string(),
            }),
            "dtar" => Ok(FrontCommand::Archive {
                extension: required("dtar", rest, "file extension")?.to_string(),
            }),
            other => Err(StoreError::Protocol(format!("Unknown command: {}", other))),
        }
    }
}

impl FrontCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            FrontCommand::Upload { .. } => "ufile",
            FrontCommand::Download { .. } => "dfile",
            FrontCommand::Remove { .. } => "rmfile",
            FrontCommand::Display { .. } => "display",
            FrontCommand::Archive { .. } => "dtar",
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            FrontCommand::Upload { name, dir } => format!("ufile {} {}", name, dir),
            FrontCommand::Download { path } => format!("dfile {}", path),
            FrontCommand::Remove { path } => format!("rmfile {}", path),
            FrontCommand::Display { dir } => format!("display {}", dir),
            FrontCommand::Archive { extension } => format!("dtar {}", extension),
        }
    }
}

impl FromStr for NodeCommand {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (verb, rest) = split_verb(line)?;
        match verb {
            "store" => {
                let (name, dir) = name_and_dir("store", rest)?;
                Ok(NodeCommand::Store { name, dir })
            }
            "get" => Ok(NodeCommand::Get {
                path: required("get", rest, "file path")?.to_string(),
            }),
            "rmfile" => Ok(NodeCommand::Remove {
                path: required("rmfile", rest, "file path")?.to_string(),
            }),
            "list" => Ok(NodeCommand::List {
                dir: required("list", rest, "directory")?.to_string(),
            }),
            "dtar" => Ok(NodeCommand::Archive),
            other => Err(StoreError::Protocol(format!("Unknown command: {}", other))),
        }
    }
}

impl NodeCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            NodeCommand::Store { .. } => "store",
            NodeCommand::Get { .. } => "get",
            NodeCommand::Remove { .. } => "rmfile",
            NodeCommand::List { .. } => "list",
            NodeCommand::Archive => "dtar",
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            NodeCommand::Store { name, dir } => format!("store {} {}", name, dir),
            NodeCommand::Get { path } => format!("get {}", path),
            NodeCommand::Remove { path } => format!("rmfile {}", path),
            NodeCommand::List { dir } => format!("list {}", dir),
            NodeCommand::Archive => "dtar".to_string(),
        }
    }
}
