//! Line-oriented front end over the query engines.
//!
//! Commands look like `<queue> <operation> [arguments] [json]`, for example
//! `mail count dead {"data.status": "stuck"}`. Everything after the positional
//! arguments is parsed as JSON.

use std::fmt::Write as _;
use std::path::PathBuf;

use bson::{Bson, Document};

use crate::engine::QueryEngine;
use crate::error::{CombeeError, Result};
use crate::export::job_to_json;
use crate::predicate::FilterArg;
use crate::registry::Combee;
use crate::store::JobStore;
use crate::types::{Category, JobRecord, NewJob, Window};

pub const PROMPT: &str = "combee::> ";

const DEFAULT_LIST_CATEGORY: Category = Category::Active;
const DEFAULT_LIST_SIZE: u64 = 100;

pub const HELP: &str = "\
queues                                  list the known queues
<queue> stats                           job counts per category
<queue> list [category] [size] [start]  one page of jobs, no filtering
<queue> find <category> [filter]        all matching jobs
<queue> first <category> <n> [filter]   the first n matching jobs
<queue> count <category> [filter]       number of matching jobs
<queue> distinct <category> <field> [filter]
                                        values of a dotted field among matches
<queue> remove <category> <filter>      remove matching jobs
<queue> create <job_type> <data>        enqueue a job
<queue> export <category> [filter]      write matching jobs to a JSON file
help                                    this text
exit                                    leave the shell

categories: waiting, delayed, active, dead
filters: MongoDB-style query documents over id, data, options and status,
         e.g. {\"data.user\": 7, \"options.retries\": {\"$gte\": 3}}";

#[derive(Debug, Clone)]
pub enum Command {
    Help,
    Exit,
    Queues,
    Stats {
        queue: String,
    },
    List {
        queue: String,
        category: Category,
        window: Window,
    },
    Find {
        queue: String,
        category: Category,
        filter: FilterArg,
    },
    First {
        queue: String,
        category: Category,
        limit: usize,
        filter: FilterArg,
    },
    Count {
        queue: String,
        category: Category,
        filter: FilterArg,
    },
    Distinct {
        queue: String,
        category: Category,
        field: String,
        filter: FilterArg,
    },
    Remove {
        queue: String,
        category: Category,
        filter: FilterArg,
    },
    Create {
        queue: String,
        job_type: String,
        data: Document,
    },
    Export {
        queue: String,
        category: Category,
        filter: FilterArg,
    },
}

/// Splits off the next whitespace-delimited token.
fn token(input: &str) -> (Option<&str>, &str) {
    let input = input.trim_start();
    if input.is_empty() {
        return (None, input);
    }
    match input.find(char::is_whitespace) {
        Some(end) => (Some(&input[..end]), &input[end..]),
        None => (Some(input), ""),
    }
}

fn required<'a>(input: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    match token(input) {
        (Some(value), rest) => Ok((value, rest)),
        (None, _) => Err(CombeeError::InvalidArgument(format!("missing {what}"))),
    }
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CombeeError::InvalidArgument(format!(
            "{what} must be a non-negative integer, got {value:?}"
        ))
    })
}

fn json(input: &str) -> Result<Option<serde_json::Value>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(input)
        .map(Some)
        .map_err(|e| CombeeError::InvalidArgument(format!("malformed JSON: {e}")))
}

fn filter(input: &str) -> Result<FilterArg> {
    match json(input)? {
        Some(value) => FilterArg::from_json(value),
        None => Ok(FilterArg::all()),
    }
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let (first, rest) = match token(line) {
            (Some(first), rest) => (first, rest),
            (None, _) => return Ok(None),
        };
        // Keep in step with `config::RESERVED_QUEUE_NAMES`.
        match first {
            "help" => return Ok(Some(Command::Help)),
            "exit" | "quit" => return Ok(Some(Command::Exit)),
            "queues" => return Ok(Some(Command::Queues)),
            _ => {}
        }

        let queue = first.to_string();
        let (operation, rest) = required(rest, "operation")?;
        let command = match operation {
            "stats" => Command::Stats { queue },
            "list" => {
                let (category, rest) = token(rest);
                let (size, rest) = token(rest);
                let (start, _) = token(rest);
                Command::List {
                    queue,
                    category: category.map_or(Ok(DEFAULT_LIST_CATEGORY), str::parse)?,
                    window: Window::new(
                        start.map_or(Ok(0), |s| number(s, "start"))?,
                        size.map_or(Ok(DEFAULT_LIST_SIZE), |s| number(s, "size"))?,
                    ),
                }
            }
            "find" | "count" | "remove" | "export" => {
                let (category, rest) = required(rest, "category")?;
                let category = category.parse()?;
                if operation == "remove" && rest.trim().is_empty() {
                    return Err(CombeeError::InvalidArgument(
                        "remove needs an explicit filter; use {} to remove everything".to_string(),
                    ));
                }
                let filter = filter(rest)?;
                match operation {
                    "find" => Command::Find { queue, category, filter },
                    "count" => Command::Count { queue, category, filter },
                    "remove" => Command::Remove { queue, category, filter },
                    _ => Command::Export { queue, category, filter },
                }
            }
            "first" => {
                let (category, rest) = required(rest, "category")?;
                let (limit, rest) = required(rest, "limit")?;
                Command::First {
                    queue,
                    category: category.parse()?,
                    limit: number(limit, "limit")?,
                    filter: filter(rest)?,
                }
            }
            "distinct" => {
                let (category, rest) = required(rest, "category")?;
                let (field, rest) = required(rest, "field")?;
                Command::Distinct {
                    queue,
                    category: category.parse()?,
                    field: field.to_string(),
                    filter: filter(rest)?,
                }
            }
            "create" => {
                let (job_type, rest) = required(rest, "job type")?;
                let data = match json(rest)?.map(Bson::try_from) {
                    Some(Ok(Bson::Document(data))) => data,
                    None => Document::new(),
                    _ => {
                        return Err(CombeeError::InvalidArgument(
                            "job data must be a JSON object".to_string(),
                        ))
                    }
                };
                Command::Create {
                    queue,
                    job_type: job_type.to_string(),
                    data,
                }
            }
            other => {
                return Err(CombeeError::InvalidArgument(format!(
                    "unknown operation {other:?}, try `help`"
                )))
            }
        };
        Ok(Some(command))
    }
}

/// Runs commands against a set of queues and renders their results as text.
#[derive(Debug)]
pub struct Shell<S> {
    combee: Combee<S>,
    export_dir: PathBuf,
}

impl<S: JobStore + 'static> Shell<S> {
    pub fn new(combee: Combee<S>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            combee,
            export_dir: export_dir.into(),
        }
    }

    fn queue(&self, name: &str) -> Result<&QueryEngine<S>> {
        self.combee.queue(name)
    }

    pub async fn execute(&self, command: Command) -> Result<String> {
        Ok(match command {
            Command::Help => HELP.to_string(),
            Command::Exit => String::new(),
            Command::Queues => self.combee.list_queues().join("\n"),
            Command::Stats { queue } => {
                let health = self.queue(&queue)?.stats().await?;
                let mut out = String::new();
                for (category, count) in health.iter() {
                    let _ = writeln!(out, "{category:<8} {count}");
                }
                out.trim_end().to_string()
            }
            Command::List {
                queue,
                category,
                window,
            } => render_jobs(&self.queue(&queue)?.list_page(category, window).await?),
            Command::Find {
                queue,
                category,
                filter,
            } => render_jobs(&self.queue(&queue)?.find(category, filter).await?),
            Command::First {
                queue,
                category,
                limit,
                filter,
            } => render_jobs(&self.queue(&queue)?.find_first(category, filter, limit).await?),
            Command::Count {
                queue,
                category,
                filter,
            } => self.queue(&queue)?.count(category, filter).await?.to_string(),
            Command::Distinct {
                queue,
                category,
                field,
                filter,
            } => {
                let values = self
                    .queue(&queue)?
                    .distinct(category, &field, filter)
                    .await?;
                let mut out = String::new();
                for (value, count) in values.iter() {
                    let _ = writeln!(out, "{value}\t{count}");
                }
                let _ = write!(out, "{} distinct, {} jobs", values.len(), values.total());
                out
            }
            Command::Remove {
                queue,
                category,
                filter,
            } => {
                let report = self
                    .queue(&queue)?
                    .remove_matching(category, filter)
                    .await?;
                let mut out = format!("removed {} jobs", report.removed);
                for failure in &report.failures {
                    let _ = write!(out, "\n{}", render_error(failure));
                }
                out
            }
            Command::Create {
                queue,
                job_type,
                data,
            } => render_job(
                &self
                    .queue(&queue)?
                    .create_job(NewJob::new(job_type, data))
                    .await?,
            ),
            Command::Export {
                queue,
                category,
                filter,
            } => {
                let (path, written) = self
                    .queue(&queue)?
                    .export(category, filter, &self.export_dir)
                    .await?;
                format!("exported {written} jobs to {}", path.display())
            }
        })
    }
}

pub fn render_job(job: &JobRecord) -> String {
    serde_json::to_string_pretty(&job_to_json(job)).unwrap_or_else(|_| format!("{job:?}"))
}

fn render_jobs(jobs: &[JobRecord]) -> String {
    let jobs = serde_json::Value::Array(jobs.iter().map(job_to_json).collect());
    serde_json::to_string_pretty(&jobs).unwrap_or_default()
}

/// The error and each of its causes on one line.
pub fn render_error(error: &CombeeError) -> String {
    let mut out = format!("error: {error}");
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        let _ = write!(out, ": {cause}");
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bson::doc;

    use super::*;
    use crate::store::MemoryJobStore;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    fn shell() -> (Shell<MemoryJobStore>, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..4 {
            store.push(JobRecord {
                id: format!("job-{i}"),
                data: Bson::Document(doc! { "owner": if i % 2 == 0 { "ops" } else { "dev" } }),
                options: doc! {},
                status: Category::Waiting,
            });
        }
        let combee = Combee::new([QueryEngine::new("mail", Arc::clone(&store))]).unwrap();
        (Shell::new(combee, std::env::temp_dir()), store)
    }

    #[test]
    fn blank_lines_are_nothing() {
        assert!(Command::parse("   ").unwrap().is_none());
    }

    #[test]
    fn list_defaults_match_the_browsing_view() {
        match parse("mail list") {
            Command::List {
                category, window, ..
            } => {
                assert_eq!(category, Category::Active);
                assert_eq!(window, Window::new(0, 100));
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("mail list waiting 10 20") {
            Command::List { window, .. } => assert_eq!(window, Window::new(20, 10)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_tails_become_filters() {
        match parse(r#"mail count dead {"a": 1}"#) {
            Command::Count {
                category,
                filter: FilterArg::Query(Bson::Document(query)),
                ..
            } => {
                assert_eq!(category, Category::Dead);
                assert_eq!(query, doc! { "a": 1 });
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse(r#"mail distinct waiting data.owner {"status": "waiting"}"#) {
            Command::Distinct { field, .. } => assert_eq!(field, "data.owner"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_arguments_are_rejected() {
        for line in [
            "mail",
            "mail frobnicate",
            "mail find stuck",
            "mail first waiting -3",
            "mail first waiting ten",
            "mail find waiting {not json",
            "mail remove waiting",
            "mail create email [1, 2]",
        ] {
            assert!(
                matches!(Command::parse(line), Err(CombeeError::InvalidArgument(_))),
                "{line} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn executes_queries() {
        let (shell, _) = shell();

        let count = shell
            .execute(parse(r#"mail count waiting {"data.owner": "ops"}"#))
            .await
            .unwrap();
        assert_eq!(count, "2");

        let distinct = shell
            .execute(parse("mail distinct waiting data.owner"))
            .await
            .unwrap();
        assert!(distinct.starts_with("\"ops\"\t2\n\"dev\"\t2"));

        let stats = shell.execute(parse("mail stats")).await.unwrap();
        assert!(stats.contains("waiting  4"));

        assert_eq!(shell.execute(Command::Queues).await.unwrap(), "mail");
    }

    #[tokio::test]
    async fn executes_mutations() {
        let (shell, store) = shell();
        store.fail_removal_of("job-2");

        let removed = shell
            .execute(parse(r#"mail remove waiting {"data.owner": "ops"}"#))
            .await
            .unwrap();
        assert!(removed.starts_with("removed 1 jobs\nerror: failed to remove job job-2"));

        let created = shell
            .execute(parse(r#"mail create email {"to": "ops@example.com"}"#))
            .await
            .unwrap();
        assert!(created.contains("ops@example.com"));
        assert_eq!(store.len(Category::Waiting), 4);
    }

    #[tokio::test]
    async fn zero_limits_and_unknown_queues_are_errors() {
        let (shell, store) = shell();
        assert!(matches!(
            shell.execute(parse("mail first waiting 0")).await,
            Err(CombeeError::InvalidArgument(_))
        ));
        assert!(matches!(
            shell.execute(parse("sms count waiting")).await,
            Err(CombeeError::UnknownQueue(_))
        ));
        assert_eq!(store.page_fetches(), 0);
    }
}
