//! Interactive SQL session against a running daemon.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use branchlore_core::{Branch, QueryOutcome};

use crate::render;
use crate::style;
use crate::target::Target;

const TABLES_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
    code: String,
}

#[derive(Deserialize)]
pub struct Health {
    pub version: String,
    pub state: String,
}

#[derive(Deserialize)]
pub struct CommitReply {
    pub committed: bool,
    pub branch: Branch,
}

/// Thin client for the daemon's JSON API.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self> {
        let base = if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .context("unexpected response body");
        }
        match response.json::<ApiErrorBody>().await {
            Ok(body) => anyhow::bail!("{} [{}]", body.error, body.code),
            Err(_) => anyhow::bail!("server answered {}", status),
        }
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self
            .http
            .get(format!("{}/health", self.base))
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        Self::parse(response).await
    }

    pub async fn query(&self, branch: &str, sql: &str) -> Result<QueryOutcome> {
        let response = self
            .http
            .post(format!("{}/api/query", self.base))
            .json(&json!({ "branch": branch, "sql": sql }))
            .send()
            .await
            .context("query request failed")?;
        Self::parse(response).await
    }

    pub async fn commit(&self, branch: &str, message: Option<&str>) -> Result<CommitReply> {
        let response = self
            .http
            .post(format!("{}/api/commit", self.base))
            .json(&json!({ "branch": branch, "message": message }))
            .send()
            .await
            .context("commit request failed")?;
        Self::parse(response).await
    }
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Quit,
    Help,
    Tables,
    Commit(Option<String>),
    Sql(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('\\') {
        return match line.to_ascii_lowercase().as_str() {
            "exit" | "quit" => Input::Quit,
            _ => Input::Sql(line.to_string()),
        };
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match command {
        "\\q" => Input::Quit,
        "\\dt" => Input::Tables,
        "\\commit" => Input::Commit(if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }),
        _ => Input::Help,
    }
}

fn print_help() {
    println!("{}", style::header("Commands"));
    println!("  <sql>              run one statement on the branch");
    println!("  \\dt                list tables");
    println!("  \\commit [message]  commit the branch's database");
    println!("  \\q, exit           leave the session");
}

/// Read statements from stdin until EOF or `\q`, running them on `branch`.
pub async fn run(target: &Target, branch: &str, server: &str) -> Result<()> {
    let client = ApiClient::new(server)?;
    let health = client.health().await?;
    if health.state != "ready" {
        anyhow::bail!(
            "server at {} is not ready (state: {})",
            client.base_url(),
            health.state
        );
    }

    println!(
        "{}",
        style::success(&format!(
            "Connected to {}@{} on {} (server v{})",
            target.database,
            branch,
            client.base_url(),
            health.version
        ))
    );
    println!("{}", style::dim("Type \\? for help."));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}@{}> ", target.database, branch);
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            println!();
            break;
        };

        let result = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => {
                print_help();
                continue;
            }
            Input::Tables => client
                .query(branch, TABLES_SQL)
                .await
                .map(|o| render::outcome(&o)),
            Input::Sql(sql) => client
                .query(branch, &sql)
                .await
                .map(|o| render::outcome(&o)),
            Input::Commit(message) => client
                .commit(branch, message.as_deref())
                .await
                .map(|reply| {
                    if reply.committed {
                        style::success(&format!(
                            "Committed {} at {}",
                            reply.branch.name,
                            reply.branch.short_revision()
                        ))
                    } else {
                        style::warn("Nothing to commit")
                    }
                }),
        };

        match result {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("{}", style::error(&format!("{:#}", e))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("\\q"), Input::Quit);
        assert_eq!(parse_input("EXIT"), Input::Quit);
        assert_eq!(parse_input("\\dt"), Input::Tables);
        assert_eq!(parse_input("\\commit"), Input::Commit(None));
        assert_eq!(
            parse_input("\\commit  add users "),
            Input::Commit(Some("add users".into()))
        );
        assert_eq!(parse_input("\\?"), Input::Help);
        assert_eq!(
            parse_input(" SELECT * FROM demo; "),
            Input::Sql("SELECT * FROM demo;".into())
        );
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            ApiClient::new("127.0.0.1:8080").unwrap().base_url(),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            ApiClient::new("https://db.example.com/").unwrap().base_url(),
            "https://db.example.com"
        );
    }
}
