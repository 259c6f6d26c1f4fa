//! Line-oriented driver used by the binary.
//!
//! Each input line is one command:
//!
//! | Command               | Effect                                          |
//! |-----------------------|-------------------------------------------------|
//! | `name=value`          | set a field (JSON literal, else a bare string)  |
//! | `:blur name`          | re-validate one field                           |
//! | `:next`               | validate the step and advance or submit         |
//! | `:back`               | previous step                                   |
//! | `:goto N`             | jump to step N (1-based)                        |
//! | `:add array {json}`   | append an item to a field array                 |
//! | `:edit array I {json}`| merge fields into item I                        |
//! | `:del array I`        | remove item I                                   |
//! | `:restart`            | review a submitted report from step 1           |
//! | `:show` / `:help`     | redraw / list commands                          |
//! | `:quit`               | flush progress and exit                         |

use std::io::Write;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::controller::{FormState, MultiStepFormController, StepOutcome, SubmitError, SubmitHandler};
use crate::error::AppError;
use crate::render::StepRenderer;
use crate::store::FieldMap;
use crate::validation::FORM_ERROR_KEY;

const HELP: &str = "\
commands:
  name=value            set a field (JSON literal or bare text; empty clears)
  :blur name            check one field
  :next                 validate this step and continue (submits on the last step)
  :back                 previous step
  :goto N               jump to step N
  :add array {json}     append an item
  :edit array I {json}  change item I
  :del array I          remove item I
  :restart              review a submitted report from step 1
  :show                 redraw the current step
  :quit                 save progress and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { name: String, value: Value },
    Blur(String),
    Next,
    Back,
    /// Zero-based step index.
    GoTo(usize),
    Add { field: String, item: Value },
    Edit { field: String, index: usize, patch: FieldMap },
    Remove { field: String, index: usize },
    Restart,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (try :help)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid JSON: {0}")]
    Json(String),
}

/// A JSON literal if `raw` parses as one, otherwise the trimmed text.
/// Empty input clears the field.
fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_json_object(raw: &str, usage: &'static str) -> Result<FieldMap, CommandError> {
    if raw.trim().is_empty() {
        return Err(CommandError::Usage(usage));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CommandError::Json("expected an object".to_string())),
        Err(e) => Err(CommandError::Json(e.to_string())),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let Some(rest) = line.strip_prefix(':') else {
            let (name, raw) = line
                .split_once('=')
                .ok_or(CommandError::Usage("name=value"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(CommandError::Usage("name=value"));
            }
            return Ok(Command::Set {
                name: name.to_string(),
                value: parse_value(raw),
            });
        };

        let (verb, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();
        match verb {
            "next" => Ok(Command::Next),
            "back" => Ok(Command::Back),
            "restart" => Ok(Command::Restart),
            "show" => Ok(Command::Show),
            "help" => Ok(Command::Help),
            "quit" | "q" => Ok(Command::Quit),
            "blur" if !args.is_empty() => Ok(Command::Blur(args.to_string())),
            "blur" => Err(CommandError::Usage(":blur name")),
            "goto" => match args.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(Command::GoTo(n - 1)),
                _ => Err(CommandError::Usage(":goto N (N starts at 1)")),
            },
            "add" => {
                const USAGE: &str = ":add array {json}";
                let (field, json) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
                if field.is_empty() {
                    return Err(CommandError::Usage(USAGE));
                }
                let item = parse_json_object(json, USAGE)?;
                Ok(Command::Add {
                    field: field.to_string(),
                    item: Value::Object(item),
                })
            }
            "edit" => {
                const USAGE: &str = ":edit array I {json}";
                let mut parts = args.splitn(3, char::is_whitespace);
                let field = parts.next().filter(|f| !f.is_empty());
                let index = parts.next().and_then(|i| i.parse::<usize>().ok());
                let (Some(field), Some(index)) = (field, index) else {
                    return Err(CommandError::Usage(USAGE));
                };
                let patch = parse_json_object(parts.next().unwrap_or(""), USAGE)?;
                Ok(Command::Edit {
                    field: field.to_string(),
                    index,
                    patch,
                })
            }
            "del" => {
                let mut parts = args.split_whitespace();
                match (parts.next(), parts.next().and_then(|i| i.parse::<usize>().ok())) {
                    (Some(field), Some(index)) => Ok(Command::Remove {
                        field: field.to_string(),
                        index,
                    }),
                    _ => Err(CommandError::Usage(":del array I")),
                }
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

// ── Submission to stdout ──────────────────────────────────────────────────────

/// Writes the submitted record as pretty JSON to stdout.
#[derive(Debug, Default)]
pub struct StdoutSubmitter;

#[async_trait]
impl SubmitHandler for StdoutSubmitter {
    async fn submit(&self, record: &FieldMap) -> Result<(), SubmitError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| SubmitError::new(format!("cannot encode report: {e}")))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{json}")
            .and_then(|()| stdout.flush())
            .map_err(|e| SubmitError::new(format!("cannot write report: {e}")))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Draw the current step, or the completion notice.
pub fn render_screen(
    controller: &MultiStepFormController,
    renderer: &StepRenderer,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let snapshot = controller.snapshot();
    writeln!(out)?;
    if snapshot.state == FormState::Complete {
        let attempt = controller
            .last_attempt()
            .map(|id| id.to_string())
            .unwrap_or_default();
        writeln!(out, "Report submitted (attempt {attempt}).")?;
        writeln!(out, "Type :restart to review it or :quit to exit.")?;
        return Ok(());
    }

    writeln!(
        out,
        "Step {}/{}: {} ({}%)",
        snapshot.current_step + 1,
        snapshot.total_steps,
        snapshot.step_title,
        snapshot.progress_percent
    )?;
    if let Some(step) = controller.current_definition() {
        if !step.description.is_empty() {
            writeln!(out, "{}", step.description)?;
        }
        for block in renderer.render_step(step, controller.record(), controller.field_errors()) {
            writeln!(out, "  {block}")?;
        }
    }
    if let Some(message) = snapshot.field_errors.get(FORM_ERROR_KEY) {
        writeln!(out, "! {message}")?;
    }
    if let Some(message) = &snapshot.submit_error {
        writeln!(out, "! submission failed: {message}")?;
    }
    Ok(())
}

/// Apply one command. Returns a line to show the user, if any.
pub async fn execute(
    controller: &mut MultiStepFormController,
    command: Command,
) -> Result<Option<String>, AppError> {
    let outcome = match command {
        Command::Set { name, value } => {
            controller.set_field(name.clone(), value)?;
            controller.blur_field(&name)?;
            return Ok(None);
        }
        Command::Blur(name) => {
            return Ok(Some(match controller.blur_field(&name)? {
                Some(message) => format!("{name}: {message}"),
                None => format!("{name}: ok"),
            }));
        }
        Command::Add { field, item } => {
            let index = controller.push_item(&field, item)?;
            return Ok(Some(format!("added {field} item {index}")));
        }
        Command::Edit {
            field,
            index,
            patch,
        } => {
            controller.update_item(&field, index, &patch)?;
            return Ok(None);
        }
        Command::Remove { field, index } => {
            controller.remove_item(&field, index)?;
            return Ok(Some(format!("removed {field} item {index}")));
        }
        Command::Next => controller.next().await?,
        Command::Back => controller.previous().await?,
        Command::GoTo(index) => controller.go_to_step(index).await?,
        Command::Restart => controller.restart().await?,
        Command::Show | Command::Quit => return Ok(None),
        Command::Help => return Ok(Some(HELP.to_string())),
    };

    Ok(match outcome {
        StepOutcome::Invalid { step, field_errors } => Some(format!(
            "step {} has {} error(s); fix them to continue",
            step + 1,
            field_errors.len()
        )),
        StepOutcome::Unchanged => Some("nothing to do here".to_string()),
        StepOutcome::Moved { .. } | StepOutcome::Submitted { .. } => None,
    })
}

/// Read commands from `input` until `:quit` or end of input, redrawing after
/// each one. Pending progress is flushed before returning.
pub async fn run_session<R, W>(
    controller: &mut MultiStepFormController,
    renderer: &StepRenderer,
    input: R,
    out: &mut W,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    render_screen(controller, renderer, out)?;
    writeln!(out, "(:help lists commands)")?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                writeln!(out, "{e}")?;
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        let redraw = !matches!(command, Command::Help | Command::Blur(_));

        match execute(controller, command).await {
            Ok(Some(message)) => writeln!(out, "{message}")?,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("command rejected: {e}");
                writeln!(out, "error: {e}")?;
            }
        }
        if redraw {
            render_screen(controller, renderer, out)?;
        }
        out.flush()?;
    }

    if controller.flush().await {
        tracing::debug!("pending progress flushed at end of session");
    }
    Ok(())
}
