use serde_json::{Map, Value};

use sheetkeeper_core::HistorySession;
use sheetkeeper_core::change::ChangeDescription;
use sheetkeeper_core::config::HistoryConfig;
use sheetkeeper_core::history::CommitOutcome;

use super::history::{close, report_commit};
use super::{block_on, open_session};

/// A parsed `FIELD=VALUE` argument
#[derive(Debug, PartialEq)]
struct Assignment {
    path: Vec<String>,
    value: Value,
}

impl Assignment {
    fn field(&self) -> String {
        self.path.join(".")
    }
}

fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected FIELD=VALUE, got '{}'", raw))?;
    let field = field.trim();
    if field.is_empty() || field.split('.').any(str::is_empty) {
        return Err(format!("Invalid field name '{}'", field));
    }

    // Bare words are strings; anything that parses as JSON keeps its type
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    Ok(Assignment {
        path: field.split('.').map(str::to_string).collect(),
        value,
    })
}

/// Write `value` at a dotted path, creating objects along the way.
fn apply(document: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Err("Empty field path".to_string());
    };

    let mut target = document;
    for key in parents {
        target = target
            .as_object_mut()
            .map(|object| object.entry(key.clone()).or_insert_with(|| Value::Object(Map::new())))
            .ok_or_else(|| format!("'{}' is not an object", key))?;
    }

    match target.as_object_mut() {
        Some(object) => {
            object.insert(last.clone(), value);
            Ok(())
        }
        None => Err(format!("Cannot set '{}' on a non-object value", last)),
    }
}

async fn set_fields(
    session: &HistorySession,
    assignments: Vec<Assignment>,
) -> Result<(CommitOutcome, usize), String> {
    let mut document = session
        .latest_character()
        .unwrap_or_else(|| Value::Object(Map::new()));

    for assignment in assignments {
        let field = assignment.field();
        apply(&mut document, &assignment.path, assignment.value)?;
        if let Some(conflict) = session
            .record_edit(&document, ChangeDescription::for_field(field))
            .map_err(|e| e.to_string())?
        {
            log::warn!("Edit conflicts with version {}", conflict.remote_hash());
        }
    }

    let outcome = session.flush().await.map_err(|e| e.to_string())?;
    Ok((outcome, session.versions().len()))
}

/// Handle the `set` command
pub fn handle_set(config: HistoryConfig, raw: &[String]) -> bool {
    let assignments = match raw
        .iter()
        .map(|r| parse_assignment(r))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(assignments) => assignments,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    let result = block_on(async {
        let session = open_session(config)?;
        let saved = set_fields(&session, assignments).await;
        close(&session).await;
        saved
    });

    match result.and_then(|r| r) {
        Ok((outcome, total)) => report_commit(&outcome, total),
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}
