use {anyhow::Result, clap::Subcommand, std::path::PathBuf};

use herald_gateway::{SqliteRoomStore, SqliteSenderStore};

use crate::{format_ms, open_database};

#[derive(Subcommand)]
pub enum RoomAction {
    /// List rooms, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Create a room and print its token.
    Create {
        name: String,
        /// Website URL the room's requests must present.
        website_url: String,
    },
}

#[derive(Subcommand)]
pub enum SenderAction {
    /// List the senders of a room.
    List {
        room_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Add an active sender to a room.
    Add { room_id: String },
}

pub async fn handle_rooms(action: RoomAction, data_dir: Option<PathBuf>) -> Result<()> {
    let rooms = SqliteRoomStore::new(open_database(data_dir).await?);
    match action {
        RoomAction::List { json } => {
            let list = rooms.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No rooms.");
            } else {
                for room in &list {
                    let active = if room.is_active { "active" } else { "inactive" };
                    println!(
                        "  {}  {} ({}) [{active}] created {}",
                        room.id,
                        room.name,
                        room.website_url,
                        format_ms(Some(room.created_at))
                    );
                }
            }
        },
        RoomAction::Create { name, website_url } => {
            let (name, website_url) = (name.trim(), website_url.trim());
            anyhow::ensure!(
                !name.is_empty() && !website_url.is_empty(),
                "name and website_url are required"
            );
            let room = rooms.create(name, website_url).await?;
            println!("Created room '{}'", room.name);
            println!("  id:    {}", room.id);
            println!("  token: {}", room.token);
        },
    }
    Ok(())
}

pub async fn handle_senders(action: SenderAction, data_dir: Option<PathBuf>) -> Result<()> {
    let pool = open_database(data_dir).await?;
    let rooms = SqliteRoomStore::new(pool.clone());
    let senders = SqliteSenderStore::new(pool);

    let room_id = match &action {
        SenderAction::List { room_id, .. } | SenderAction::Add { room_id } => room_id,
    };
    anyhow::ensure!(
        rooms.get(room_id).await?.is_some(),
        "room not found: {room_id}"
    );

    match action {
        SenderAction::List { room_id, json } => {
            let list = senders.list_by_room(&room_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No senders in this room.");
            } else {
                for sender in &list {
                    let active = if sender.is_active { "active" } else { "inactive" };
                    println!(
                        "  {}  {} [{active}] sent {}",
                        sender.id,
                        sender.phone_number.as_deref().unwrap_or("(not linked)"),
                        sender.total_sent
                    );
                }
            }
        },
        SenderAction::Add { room_id } => {
            let sender = senders.create(&room_id).await?;
            println!("Added sender {}", sender.id);
            println!("Start the gateway and scan its QR code from /senders/{}/status", sender.id);
        },
    }
    Ok(())
}
