use {anyhow::Result, clap::Subcommand, std::path::PathBuf};

use herald_gateway::SqliteRunLog;

use crate::{format_ms, open_database};

#[derive(Subcommand)]
pub enum RunAction {
    /// List the most recent runs of a room.
    List {
        room_id: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_runs(action: RunAction, data_dir: Option<PathBuf>) -> Result<()> {
    let runs = SqliteRunLog::new(open_database(data_dir).await?);
    match action {
        RunAction::List {
            room_id,
            limit,
            json,
        } => {
            let list = runs.list_runs(&room_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            if list.is_empty() {
                println!("No runs for this room.");
            }
            for run in &list {
                println!(
                    "  {}  {:<9} sent {:>5}  {} .. {}",
                    run.id,
                    run.outcome,
                    run.total_sent,
                    format_ms(Some(run.start_time)),
                    format_ms(run.end_time)
                );
            }
        },
    }
    Ok(())
}
