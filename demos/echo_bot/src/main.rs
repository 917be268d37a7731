//! Echo Bot Example
//!
//! A terminal bot on the Chime framework. Every line typed on stdin is a
//! message from the `shell` user; replies are printed to stdout.
//!
//! ```text
//! chime ping              → shell: PONG
//! echo hello              → hello
//! chime remember tea is green
//! chime what is tea       → tea is green
//! /enter                  → Hi, Shell!
//! anything else           → I didn't catch that: anything else
//! ```
//!
//! The brain is written to `--brain` on every autosave and on exit, and
//! merged back in at startup.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --brain brain.json
//! ```
//!
//! Put `middleware.response = ["shout"]` in `chime.toml` to make every
//! plaintext reply upper case.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chime::prelude::*;
use clap::Parser;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(about = "A terminal echo bot for the Chime framework")]
struct Args {
    /// Configuration file; searched in the working directory when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the brain is persisted between runs.
    #[arg(short, long, default_value = "brain.json")]
    brain: PathBuf,
}

// ============================================================================
// Shell adapter
// ============================================================================

/// Reads messages from stdin and writes replies to stdout.
struct ShellAdapter {
    user_id: String,
    stdout: Mutex<tokio::io::Stdout>,
}

impl ShellAdapter {
    fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn print(&self, prefix: &str, strings: &[String]) -> AdapterResult<()> {
        let mut out = self.stdout.lock().await;
        for line in strings {
            out.write_all(format!("{prefix}{line}\n").as_bytes()).await?;
        }
        out.flush().await?;
        Ok(())
    }

    fn parse_line(user: &Arc<User>, line: &str, seq: u64) -> Message {
        match line {
            "/enter" => Message::enter(user.clone()),
            "/leave" => Message::leave(user.clone()),
            _ => match line.strip_prefix("/topic ") {
                Some(topic) => Message::topic(user.clone(), topic, seq.to_string()),
                None => Message::text(user.clone(), line, seq.to_string()),
            },
        }
    }
}

#[async_trait]
impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    async fn send(&self, _envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.print("", strings).await
    }

    async fn emote(&self, _envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.print("* ", strings).await
    }

    async fn reply(&self, envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        let name = envelope
            .user
            .as_ref()
            .map(|user| user.name())
            .unwrap_or_default();
        self.print(&format!("{name}: "), strings).await
    }

    async fn topic(&self, _envelope: &Envelope, strings: &[String]) -> AdapterResult<()> {
        self.print("[topic] ", strings).await
    }

    async fn run(&self, ctx: AdapterContext) -> AdapterResult<()> {
        let mut attributes = Map::new();
        attributes.insert("name".to_string(), Value::from("Shell"));
        attributes.insert("room".to_string(), Value::from("shell"));
        let user = ctx.sink().user_for_id(&self.user_id, attributes);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut seq = 0u64;
        loop {
            let line = tokio::select! {
                () = ctx.shutdown_token().cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("stdin closed");
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            seq += 1;
            ctx.sink()
                .receive(Self::parse_line(&user, line, seq))
                .await;
        }
        Ok(())
    }
}

// ============================================================================
// Brain persistence
// ============================================================================

async fn load_brain(robot: &Robot, path: &Path) -> Result<()> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No saved brain, starting empty");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let data: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {}", path.display()))?;
    robot.brain().merge_data(data);
    info!(path = %path.display(), users = robot.brain().users().len(), "Brain loaded");
    Ok(())
}

/// Queues every `Persist` snapshot for the writer task.
fn persist_to(queue: mpsc::UnboundedSender<Value>) -> impl Fn(&RobotEvent) + Send + Sync + 'static {
    move |event: &RobotEvent| {
        if let RobotEvent::Persist(snapshot) = event
            && queue.send(snapshot.clone()).is_err()
        {
            warn!("Brain writer stopped, snapshot dropped");
        }
    }
}

/// Writes queued snapshots to `path` until `stop` fires, then drains the queue.
async fn write_snapshots(
    path: PathBuf,
    mut queue: mpsc::UnboundedReceiver<Value>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut draining = false;
    loop {
        let snapshot = if draining {
            queue.recv().await
        } else {
            tokio::select! {
                snapshot = queue.recv() => snapshot,
                _ = &mut stop => {
                    draining = true;
                    queue.close();
                    queue.recv().await
                }
            }
        };
        let Some(snapshot) = snapshot else {
            break;
        };
        match write_snapshot(&path, &snapshot).await {
            Ok(()) => debug!(path = %path.display(), "Brain saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save brain"),
        }
    }
}

async fn write_snapshot(path: &Path, snapshot: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

// ============================================================================
// Listeners
// ============================================================================

fn register_listeners(robot: &Robot) -> Result<()> {
    robot.respond("ping$", ListenerOptions::new().id("ping"), |res: Response| async move {
        res.reply(["PONG"]).await
    })?;
    robot.add_command("chime ping - Reply with PONG");

    robot.hear("^echo (.+)$", ListenerOptions::new().id("echo"), |res: Response| async move {
        let text = res.matched().and_then(|m| m.get(1)).unwrap_or_default().to_string();
        res.send([text]).await
    })?;
    robot.add_command("echo <text> - Reply with <text>");

    robot.respond(
        r"remember (?P<key>\w+) is (?P<value>.+)$",
        ListenerOptions::new().id("remember"),
        |res: Response| async move {
            let Some(matched) = res.matched() else {
                return Ok(());
            };
            let (Some(key), Some(value)) = (matched.name("key"), matched.name("value")) else {
                return Ok(());
            };
            res.robot().brain().set(key, value);
            res.send(["Got it."]).await
        },
    )?;
    robot.add_command("chime remember <key> is <value> - Store a fact");

    robot.respond(
        r"what is (\w+)\??$",
        ListenerOptions::new().id("recall"),
        |res: Response| async move {
            let key = res.matched().and_then(|m| m.get(1)).unwrap_or_default();
            let answer = match res.robot().brain().get(key) {
                Some(value) => format!("{key} is {}", chime::core::value_to_string(&value)),
                None => format!("I don't know what {key} is."),
            };
            res.send([answer]).await
        },
    )?;
    robot.add_command("chime what is <key> - Recall a fact");

    robot.respond("help$", ListenerOptions::new().id("help"), |res: Response| async move {
        let commands = res.robot().help_commands();
        res.send(commands).await
    })?;
    robot.add_command("chime help - List commands");

    robot.enter((), |res: Response| async move {
        let name = res.message().user().name();
        let greetings = [format!("Hi, {name}!"), format!("Welcome back, {name}.")];
        let greeting = res.random(&greetings).cloned().unwrap_or_default();
        res.send([greeting]).await
    });

    robot.leave((), |res: Response| async move { res.emote(["waves goodbye"]).await });

    robot.topic((), |res: Response| async move {
        let topic = res.message().text_content().unwrap_or_default().to_string();
        res.send([format!("Topic is now: {topic}")]).await
    });

    robot.catch_all((), |res: Response| async move {
        let text = res.message().to_string();
        res.send([format!("I didn't catch that: {text}")]).await
    });

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = ChimeRuntime::builder()
        .adapter("shell", |_| Ok(Arc::new(ShellAdapter::new("shell")) as BoxedAdapter))
        .receive_stage("log", |ctx: &mut ReceiveContext| {
            debug!(message = %ctx.response.message(), "Received");
            Flow::Continue
        })
        .response_stage("shout", |ctx: &mut ResponseContext| {
            if ctx.plaintext {
                ctx.strings.iter_mut().for_each(|s| *s = s.to_uppercase());
            }
            Flow::Continue
        });
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build()?;

    let robot = runtime.robot()?;
    let (queue, snapshots) = mpsc::unbounded_channel();
    let (stop, stopped) = oneshot::channel();
    let writer = tokio::spawn(write_snapshots(args.brain.clone(), snapshots, stopped));
    robot.on(persist_to(queue));
    robot.error(|fault: &ChainFault, res: Option<&Response>| {
        let text = res.map(|r| r.message().to_string()).unwrap_or_default();
        error!(%fault, message = %text, "Listener failed");
    });
    load_brain(&robot, &args.brain).await?;
    register_listeners(&robot)?;

    let outcome = runtime.run().await;
    let _ = stop.send(());
    writer.await?;
    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_writer_drains_queue_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain.json");
        let (queue, snapshots) = mpsc::unbounded_channel();
        let (stop, stopped) = oneshot::channel();

        let persist = persist_to(queue);
        persist(&RobotEvent::Persist(json!({ "users": {}, "_private": { "n": 1 } })));
        persist(&RobotEvent::Running);
        persist(&RobotEvent::Persist(json!({ "users": {}, "_private": { "n": 2 } })));
        stop.send(()).unwrap();

        write_snapshots(path.clone(), snapshots, stopped).await;

        let saved: Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(saved["_private"]["n"], 2);
    }

    #[tokio::test]
    async fn test_missing_brain_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let robot = Robot::builder(Arc::new(ShellAdapter::new("shell")) as BoxedAdapter).build();

        load_brain(&robot, &dir.path().join("absent.json")).await.unwrap();
        assert!(robot.brain().users().is_empty());
    }
}
