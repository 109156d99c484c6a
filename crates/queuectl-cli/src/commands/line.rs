//! Line-oriented command parsing shared by the interactive shell and scripts.

use crate::app::App;
use anyhow::Result;
use std::time::Duration;

/// One parsed shell or script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    Enqueue(String),
    List(Option<String>),
    Status,
    DlqList,
    DlqRetry(String),
    ConfigGet(String),
    ConfigSet { key: String, value: String },
    WorkerStart(usize),
    WorkerStop,
    Sleep(Duration),
    Help,
    Exit,
}

pub const HELP: &str = "\
Commands:
  enqueue <json>            add a job, e.g. enqueue {\"id\":\"job1\",\"command\":\"echo hi\"}
  list [state]              list jobs (pending, processing, completed, failed, dead)
  status                    job counts by state
  dlq list                  list dead letter queue
  dlq retry <id>            requeue a job from the dead letter queue
  config get <key>          show a configuration value
  config set <key> <value>  change a configuration value
  worker start [n]          start n workers (default 1)
  worker stop               stop workers
  sleep <ms>                pause
  help                      show this help
  exit                      leave the shell";

/// Parse a trimmed, non-empty line. The error is a usage message.
pub fn parse(line: &str) -> std::result::Result<LineCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        ["enqueue", ..] => {
            let json = strip_quotes(rest_after_words(line, 1));
            if json.is_empty() {
                return Err("Usage: enqueue <json>".to_string());
            }
            Ok(LineCommand::Enqueue(json.to_string()))
        }
        ["list"] => Ok(LineCommand::List(None)),
        ["list", state] => Ok(LineCommand::List(Some(state.to_string()))),
        ["status"] => Ok(LineCommand::Status),
        ["dlq", "list"] => Ok(LineCommand::DlqList),
        ["dlq", "retry", id] => Ok(LineCommand::DlqRetry(id.to_string())),
        ["dlq", "retry", ..] => Err("Usage: dlq retry <id>".to_string()),
        ["config", "get", key] => Ok(LineCommand::ConfigGet(key.to_string())),
        ["config", "set", key, _, ..] => {
            // The value is the rest of the line, spaces included.
            let value = rest_after_words(line, 3);
            Ok(LineCommand::ConfigSet {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        ["config", "set", ..] => Err("Usage: config set <key> <value>".to_string()),
        ["worker", "start"] => Ok(LineCommand::WorkerStart(1)),
        ["worker", "start", n] => n
            .parse()
            .map(LineCommand::WorkerStart)
            .map_err(|_| format!("Invalid worker count: {}", n)),
        ["worker", "stop"] => Ok(LineCommand::WorkerStop),
        ["sleep", ms] => ms
            .parse()
            .map(|ms| LineCommand::Sleep(Duration::from_millis(ms)))
            .map_err(|_| format!("Invalid sleep duration: {}", ms)),
        ["help"] => Ok(LineCommand::Help),
        ["exit"] | ["quit"] => Ok(LineCommand::Exit),
        _ => Err(format!("Unknown command: {}", line)),
    }
}

/// Run a parsed command and return its output.
pub async fn dispatch(app: &App, command: &LineCommand) -> Result<String> {
    match command {
        LineCommand::Enqueue(json) => super::enqueue(app, json).await,
        LineCommand::List(state) => super::list(app, state.as_deref()).await,
        LineCommand::Status => super::status(app).await,
        LineCommand::DlqList => super::dlq_list(app).await,
        LineCommand::DlqRetry(id) => super::dlq_retry(app, id).await,
        LineCommand::ConfigGet(key) => super::config_get(app, key).await,
        LineCommand::ConfigSet { key, value } => super::config_set(app, key, value).await,
        LineCommand::WorkerStart(n) => super::worker_start(app, *n).await,
        LineCommand::WorkerStop => super::worker_stop(app).await,
        LineCommand::Sleep(duration) => {
            tokio::time::sleep(*duration).await;
            Ok(String::new())
        }
        LineCommand::Help => Ok(HELP.to_string()),
        LineCommand::Exit => Ok(String::new()),
    }
}

/// What follows the first `n` words of `line`, trimmed.
fn rest_after_words(line: &str, n: usize) -> &str {
    let mut rest = line.trim();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}

/// Drop one pair of matching surrounding quotes, as written in scripts.
fn strip_quotes(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enqueue_keeps_json() {
        assert_eq!(
            parse(r#"enqueue {"id":"a","command":"echo a b"}"#).unwrap(),
            LineCommand::Enqueue(r#"{"id":"a","command":"echo a b"}"#.to_string())
        );
        assert_eq!(
            parse(r#"enqueue '{"id":"a","command":"x"}'"#).unwrap(),
            LineCommand::Enqueue(r#"{"id":"a","command":"x"}"#.to_string())
        );
        assert!(parse("enqueue").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("list").unwrap(), LineCommand::List(None));
        assert_eq!(
            parse("list dead").unwrap(),
            LineCommand::List(Some("dead".to_string()))
        );
        assert_eq!(parse("status").unwrap(), LineCommand::Status);
        assert_eq!(parse("dlq list").unwrap(), LineCommand::DlqList);
        assert_eq!(
            parse("dlq retry job1").unwrap(),
            LineCommand::DlqRetry("job1".to_string())
        );
        assert_eq!(parse("worker stop").unwrap(), LineCommand::WorkerStop);
        assert_eq!(parse("quit").unwrap(), LineCommand::Exit);
    }

    #[test]
    fn test_parse_worker_start() {
        assert_eq!(parse("worker start").unwrap(), LineCommand::WorkerStart(1));
        assert_eq!(parse("worker start 3").unwrap(), LineCommand::WorkerStart(3));
        assert!(parse("worker start many").is_err());
    }

    #[test]
    fn test_parse_config() {
        assert_eq!(
            parse("config get max_retries").unwrap(),
            LineCommand::ConfigGet("max_retries".to_string())
        );
        assert_eq!(
            parse("config set label nightly build").unwrap(),
            LineCommand::ConfigSet {
                key: "label".to_string(),
                value: "nightly build".to_string(),
            }
        );
        assert_eq!(
            parse("config   set  k   v").unwrap(),
            LineCommand::ConfigSet {
                key: "k".to_string(),
                value: "v".to_string(),
            }
        );
        assert!(parse("config set max_retries").is_err());
    }

    #[test]
    fn test_parse_sleep() {
        assert_eq!(
            parse("sleep 250").unwrap(),
            LineCommand::Sleep(Duration::from_millis(250))
        );
        assert!(parse("sleep soon").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse("frobnicate").unwrap_err(),
            "Unknown command: frobnicate"
        );
        assert!(parse("dlq retry").is_err());
    }
}
