//! Operator tool for the lifecycle outbox.
//!
//! Reads `DATABASE_URL` and `OUTBOX_MAX_RETRIES` (default 5) from the
//! environment.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transactional_outbox::{OutboxRepository, SqlxOutboxRepository};
use uuid::Uuid;

const USAGE: &str = "usage:
  outbox-cli stats
  outbox-cli replay-since <rfc3339 timestamp>
  outbox-cli replay-range <from event id> <to event id>";

#[derive(Debug, PartialEq)]
enum Command {
    Stats,
    ReplaySince(DateTime<Utc>),
    ReplayRange(Uuid, Uuid),
}

fn parse(args: &[String]) -> anyhow::Result<Command> {
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    Ok(match words.as_slice() {
        ["stats"] => Command::Stats,
        ["replay-since", ts] => Command::ReplaySince(
            DateTime::parse_from_rfc3339(ts)
                .with_context(|| format!("not an RFC 3339 timestamp: {ts}"))?
                .with_timezone(&Utc),
        ),
        ["replay-range", from, to] => Command::ReplayRange(
            Uuid::parse_str(from).context("bad <from event id>")?,
            Uuid::parse_str(to).context("bad <to event id>")?,
        ),
        _ => bail!("{USAGE}"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse(&args)?;

    let url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let max_retries: i32 = std::env::var("OUTBOX_MAX_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    let outbox = SqlxOutboxRepository::new(PgPool::connect(&url).await?);

    match command {
        Command::Stats => {
            let stats = outbox.pending_stats(max_retries).await?;
            println!(
                "pending={} exhausted={} oldest_age={}s",
                stats.pending, stats.exhausted, stats.oldest_pending_age_seconds
            );
        }
        Command::ReplaySince(ts) => {
            let n = outbox.replay_since(ts).await?;
            println!("requeued {n} lifecycle events written since {ts}");
        }
        Command::ReplayRange(from, to) => {
            let n = outbox.replay_range(from, to).await?;
            println!("requeued {n} lifecycle events in [{from}, {to}]");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&args(&["stats"])).unwrap(), Command::Stats);
        assert!(matches!(
            parse(&args(&["replay-since", "2024-05-01T00:00:00Z"])).unwrap(),
            Command::ReplaySince(_)
        ));

        let id = Uuid::new_v4();
        assert_eq!(
            parse(&args(&["replay-range", &id.to_string(), &id.to_string()])).unwrap(),
            Command::ReplayRange(id, id)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&args(&[])).is_err());
        assert!(parse(&args(&["replay-since", "yesterday"])).is_err());
        assert!(parse(&args(&["replay-range", "a", "b"])).is_err());
        assert!(parse(&args(&["stats", "extra"])).is_err());
    }
}
