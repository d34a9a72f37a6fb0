//! Subcommand execution against an opened repository.

use crate::args::Command;
use docbase_core::{Base, Record, RecordRepository, RepoError};
use log::info;
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum CommandError {
    NotFound(String),
    Repo(RepoError),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record with id '{id}' was not found"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<RepoError> for CommandError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Runs `command` and returns the JSON to print.
pub fn execute(repo: &RecordRepository<Base>, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::Create { name } => {
            let mut record = Base::new(name);
            repo.create(&mut record)?;
            if !record.is_persisted() {
                info!("event=cli_create module=cli status=not_persisted");
            }
            Ok(render(&record))
        }
        Command::Get { id } => {
            let record = repo.find(&id)?.ok_or(CommandError::NotFound(id))?;
            Ok(render(&record))
        }
        Command::List { name } => {
            let records = match name {
                Some(name) => repo.find_by_name(&name)?,
                None => repo.all()?,
            };
            Ok(Value::Array(records.iter().map(render).collect()))
        }
        Command::Update { id, name } => {
            let mut record = repo.find(&id)?.ok_or(CommandError::NotFound(id))?;
            record.name = Some(name);
            repo.update(&record)?;
            Ok(render(&record))
        }
        Command::Delete { id } => {
            let record = repo.find(&id)?.ok_or(CommandError::NotFound(id.clone()))?;
            repo.delete(&record)?;
            Ok(json!({ "deleted": id }))
        }
        Command::Reset => {
            let removed = repo.remove_all()?;
            Ok(json!({ "removed": removed }))
        }
        Command::Index { field, order } => {
            repo.create_query_index(&field, order)?;
            Ok(json!({ "index": field, "order": order.as_str() }))
        }
    }
}

fn render(record: &Base) -> Value {
    Value::Object(record.serialize())
}
