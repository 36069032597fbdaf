//! Console — line-oriented stdin/stdout front end over the engine.
//!
//! Requests can be referred to by any unique prefix of their id.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::dashboard::DashboardAggregator;
use crate::directory::UserId;
use crate::error::{EngineError, Error, Result};
use crate::lifecycle::{LifecycleEngine, NewHireInfo, OnboardingRequest, RequestId, RequestStatus};
use crate::progress::UpdateKind;
use crate::tasks::TaskId;

const HELP: &str = "\
Commands:
  create <dept> <YYYY-MM-DD> <position|-> <name...>
  move <id> <status> [note...]
  done <id> <task>          reopen <id> <task>
  note <id> <text...>       assign <id> <user>
  add-task <id> <required|optional> <description...>
  show <id>                 history <id>
  list                      dash [days]
  help                      quit";

/// What a console line produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Output(String),
    Quit,
}

pub struct Console {
    engine: Arc<LifecycleEngine>,
    dashboard: Arc<DashboardAggregator>,
    actor: UserId,
}

impl Console {
    pub fn new(engine: Arc<LifecycleEngine>, dashboard: Arc<DashboardAggregator>, actor: UserId) -> Self {
        Self {
            engine,
            dashboard,
            actor,
        }
    }

    /// Read commands from stdin until EOF or `quit`.
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("> ");
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            };
            match self.execute(&line).await {
                Ok(Outcome::Quit) => break,
                Ok(Outcome::Output(out)) if out.is_empty() => {}
                Ok(Outcome::Output(out)) => println!("{out}"),
                Err(e) => eprintln!("error: {e}"),
            }
            eprint!("> ");
        }
        Ok(())
    }

    pub async fn execute(&self, line: &str) -> Result<Outcome> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(Outcome::Output(String::new()));
        };
        let args: Vec<&str> = words.collect();

        let out = match cmd {
            "help" | "?" => HELP.to_string(),
            "quit" | "exit" => return Ok(Outcome::Quit),
            "create" => self.create(&args).await?,
            "move" => {
                let id = self.resolve(arg(&args, 0, "move <id> <status>")?).await?;
                let target: RequestStatus = arg(&args, 1, "move <id> <status>")?
                    .parse()
                    .map_err(Error::Command)?;
                let note = rest(&args, 2);
                let ack = self.engine.transition(id, target, &self.actor, note).await?;
                format!("{} is now {} (v{})", short(id), ack.status, ack.version)
            }
            "done" | "reopen" => {
                let usage = "done|reopen <id> <task>";
                let id = self.resolve(arg(&args, 0, usage)?).await?;
                let task = parse_task(arg(&args, 1, usage)?)?;
                if cmd == "done" {
                    self.engine.complete_task(id, task, &self.actor).await?;
                } else {
                    self.engine.reopen_task(id, task, &self.actor).await?;
                }
                let request = self.engine.get(id).await?;
                let (done, total) = request.tasks.progress();
                format!("{}: {done}/{total} tasks done", short(id))
            }
            "note" => {
                let id = self.resolve(arg(&args, 0, "note <id> <text>")?).await?;
                let text = rest(&args, 1).ok_or_else(|| usage("note <id> <text>"))?;
                self.engine.add_note(id, &self.actor, &text).await?;
                "noted".to_string()
            }
            "assign" => {
                let id = self.resolve(arg(&args, 0, "assign <id> <user>")?).await?;
                let user = UserId::new(arg(&args, 1, "assign <id> <user>")?);
                self.engine.reassign(id, user.clone()).await?;
                format!("{} assigned to {user}", short(id))
            }
            "add-task" => {
                let u = "add-task <id> <required|optional> <description>";
                let id = self.resolve(arg(&args, 0, u)?).await?;
                let required = match arg(&args, 1, u)? {
                    "required" | "req" => true,
                    "optional" | "opt" => false,
                    _ => return Err(usage(u)),
                };
                let description = rest(&args, 2).ok_or_else(|| usage(u))?;
                let task = self.engine.add_task(id, &description, required).await?;
                format!("added task {task}")
            }
            "show" => {
                let id = self.resolve(arg(&args, 0, "show <id>")?).await?;
                self.show(&self.engine.get(id).await?).await?
            }
            "history" => {
                let id = self.resolve(arg(&args, 0, "history <id>")?).await?;
                let log = self.engine.history(id).await?;
                log.history()
                    .map(|e| {
                        let what = match e.kind() {
                            UpdateKind::Created => format!("created as {}", e.status_after),
                            UpdateKind::StatusChange => format!(
                                "{} -> {}",
                                e.status_before.map(|s| s.to_string()).unwrap_or_default(),
                                e.status_after
                            ),
                            UpdateKind::Note => "note".to_string(),
                        };
                        let note = e.note.as_deref().map(|n| format!(": {n}")).unwrap_or_default();
                        format!(
                            "{:>3} {} {} {what}{note}",
                            e.seq,
                            e.at.format("%Y-%m-%d %H:%M"),
                            e.author
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            "list" => self
                .engine
                .list()
                .await?
                .iter()
                .map(|r| {
                    let (done, total) = r.tasks.progress();
                    format!(
                        "{} {:<11} {} {} ({done}/{total})",
                        short(r.id),
                        r.status.as_str(),
                        r.start_date(),
                        r.new_hire.name
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            "dash" => {
                let days = match args.first() {
                    Some(d) => d.parse().map_err(|_| usage("dash [days]"))?,
                    None => 14,
                };
                self.dashboard(days).await?
            }
            other => return Err(Error::Command(format!("unknown command {other:?}, try `help`"))),
        };
        Ok(Outcome::Output(out))
    }

    async fn create(&self, args: &[&str]) -> Result<String> {
        let u = "create <dept> <YYYY-MM-DD> <position|-> <name...>";
        let store = self.engine.store();
        let slug = arg(args, 0, u)?;
        let dept = store
            .get_department_by_slug(slug)
            .await?
            .ok_or_else(|| EngineError::validation(format!("unknown department {slug:?}")))?;
        let start = NaiveDate::parse_from_str(arg(args, 1, u)?, "%Y-%m-%d")
            .map_err(|e| Error::Command(format!("bad start date: {e}")))?;
        let position = match arg(args, 2, u)? {
            "-" => None,
            p => Some(p.to_string()),
        };
        let name = rest(args, 3).ok_or_else(|| usage(u))?;

        let template = store
            .list_templates()
            .await?
            .into_iter()
            .find(|t| {
                t.department == dept.id
                    && t.active
                    && !t.is_empty()
                    && position.as_deref().is_none_or(|p| t.applies_to(p))
            })
            .ok_or_else(|| {
                EngineError::validation(format!("no active template for department {slug:?}"))
            })?;

        let mut new_hire = NewHireInfo::new(name, start);
        if let Some(p) = position {
            new_hire = new_hire.with_position(p);
        }
        let coordinator = (!dept.auto_assign_to_manager).then(|| self.actor.clone());
        let id = self
            .engine
            .create(new_hire, dept.id, coordinator, template.id)
            .await?;
        Ok(format!("created {id} from template {:?}", template.name))
    }

    async fn show(&self, r: &OnboardingRequest) -> Result<String> {
        let dept = self
            .engine
            .store()
            .get_department(r.department)
            .await?
            .map(|d| d.slug)
            .unwrap_or_else(|| r.department.to_string());
        let mut out = format!(
            "{} {} [{}]\n  dept={dept} coordinator={} start={} due={} v{}",
            r.id,
            r.new_hire.name,
            r.status,
            r.coordinator,
            r.start_date(),
            r.due_date,
            r.version
        );
        for t in &r.tasks {
            let mark = match (t.is_done(), t.required) {
                (true, _) => "[x]",
                (false, true) => "[ ]",
                (false, false) => "( )",
            };
            out.push_str(&format!("\n  {mark} {} {}", t.id, t.description));
            if let Some(by) = t.completed_by() {
                out.push_str(&format!(" (by {by})"));
            }
        }
        Ok(out)
    }

    async fn dashboard(&self, days: u32) -> Result<String> {
        let snap = self.dashboard.snapshot().await?;
        let counts = snap
            .counts_by_status
            .iter()
            .map(|(s, n)| format!("{s}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        let mut out = format!(
            "as of {} (max staleness {:?})\n{counts}",
            snap.taken_at.format("%Y-%m-%d %H:%M:%S"),
            self.dashboard.max_staleness()
        );
        let upcoming = snap.upcoming_starts(snap.today, days);
        out.push_str(&format!("\nstarting within {days} days: {}", upcoming.len()));
        for u in &upcoming {
            out.push_str(&format!("\n  {} {} [{}]", u.start_date, u.new_hire, u.status));
        }
        if !snap.overdue.is_empty() {
            out.push_str(&format!("\noverdue: {}", snap.overdue.len()));
            for o in &snap.overdue {
                out.push_str(&format!("\n  {} {} ({} days)", short(o.request_id), o.new_hire, o.days_overdue));
            }
        }
        Ok(out)
    }

    /// Match a full id or a unique id prefix.
    async fn resolve(&self, token: &str) -> Result<RequestId> {
        if let Ok(id) = token.parse::<RequestId>() {
            return Ok(id);
        }
        let token = token.to_ascii_lowercase();
        let matches: Vec<RequestId> = self
            .engine
            .list()
            .await?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| id.to_string().starts_with(&token))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(EngineError::NotFound {
                entity: "request",
                id: token,
            }
            .into()),
            _ => Err(Error::Command(format!("{token:?} matches {} requests", matches.len()))),
        }
    }
}

fn usage(text: &str) -> Error {
    Error::Command(format!("usage: {text}"))
}

fn arg<'a>(args: &[&'a str], idx: usize, usage_text: &str) -> Result<&'a str> {
    args.get(idx).copied().ok_or_else(|| usage(usage_text))
}

/// Words from `idx` on, joined by single spaces.
fn rest(args: &[&str], idx: usize) -> Option<String> {
    let joined = args.get(idx..)?.join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn parse_task(token: &str) -> Result<TaskId> {
    token
        .trim_start_matches('#')
        .parse::<u32>()
        .map(TaskId)
        .map_err(|_| Error::Command(format!("bad task id {token:?}")))
}

fn short(id: RequestId) -> String {
    id.to_string()[..8].to_string()
}
