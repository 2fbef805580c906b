//! kiln-admin: provisioning CLI for users and API keys.
//!
//! Talks straight to the job store; the server never exposes these
//! operations.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::process;

use common::{validate_email, ApiKey, JobStore, User};
use storage::SqlStore;

#[derive(Parser)]
#[clap(name = "kiln-admin")]
#[clap(about = "Kiln admin - manage users and API keys", long_about = None)]
struct Cli {
    /// Path to the SQLite job store
    #[clap(long, global = true, default_value = "kiln.db", env = "KILN_DB_PATH")]
    db_path: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User {
        #[clap(subcommand)]
        command: UserCommands,
    },
    /// Manage API keys
    Key {
        #[clap(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Display name
        #[clap(long)]
        name: String,
        /// Email address (unique)
        #[clap(long)]
        email: String,
    },
    /// List all users
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
    /// Deactivate a user; their keys stop authenticating
    Deactivate { user_id: String },
    /// Reactivate a previously deactivated user
    Activate { user_id: String },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Mint a new API key; the secret is printed exactly once
    Create {
        /// Owning user id
        #[clap(long)]
        user_id: String,
        /// Optional description, e.g. "laptop"
        #[clap(long)]
        name: Option<String>,
    },
    /// List API keys, optionally for one user
    List {
        #[clap(long)]
        user_id: Option<String>,
    },
    /// Revoke a key
    Revoke { key_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let store = SqlStore::connect(&cli.db_path).await?;

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Create { name, email } => user_create(&store, &name, &email).await?,
            UserCommands::List { json } => user_list(&store, json).await?,
            UserCommands::Deactivate { user_id } => {
                set_user_active(&store, &user_id, false).await?
            }
            UserCommands::Activate { user_id } => set_user_active(&store, &user_id, true).await?,
        },
        Commands::Key { command } => match command {
            KeyCommands::Create { user_id, name } => key_create(&store, &user_id, name).await?,
            KeyCommands::List { user_id } => key_list(&store, user_id.as_deref()).await?,
            KeyCommands::Revoke { key_id } => key_revoke(&store, &key_id).await?,
        },
    }

    Ok(())
}

async fn user_create(store: &SqlStore, name: &str, email: &str) -> Result<()> {
    if !validate_email(email) {
        eprintln!("Error: Invalid email format: {email}");
        process::exit(1);
    }
    if store.get_user_by_email(email).await?.is_some() {
        eprintln!("Error: User with email {email} already exists");
        process::exit(1);
    }

    let user = User::new(name, email);
    store.create_user(&user).await?;

    println!("✓ User created successfully");
    println!("  ID:    {}", user.id);
    println!("  Name:  {}", user.name);
    println!("  Email: {}", user.email);
    Ok(())
}

async fn user_list(store: &SqlStore, json: bool) -> Result<()> {
    let users = store.list_users().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    println!("\n{:<38} {:<20} {:<30} {:<10}", "ID", "Name", "Email", "Status");
    println!("{}", "-".repeat(100));
    for user in users {
        let status = if user.is_active { "Active" } else { "Inactive" };
        println!(
            "{:<38} {:<20} {:<30} {:<10}",
            user.id, user.name, user.email, status
        );
    }
    println!();
    Ok(())
}

async fn set_user_active(store: &SqlStore, user_id: &str, active: bool) -> Result<()> {
    match store.set_user_active(user_id, active).await {
        Ok(()) => {
            let verb = if active { "activated" } else { "deactivated" };
            println!("✓ User {user_id} {verb}");
            Ok(())
        }
        Err(common::StoreError::NotFound) => {
            eprintln!("Error: User {user_id} not found");
            process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn key_create(store: &SqlStore, user_id: &str, name: Option<String>) -> Result<()> {
    let Some(user) = store.get_user(user_id).await? else {
        eprintln!("Error: User {user_id} not found");
        process::exit(1);
    };
    if !user.is_active {
        eprintln!("Error: User {user_id} is inactive");
        process::exit(1);
    }

    let secret = common::generate_api_key();
    let key = ApiKey::new(user_id, common::hash_api_key(&secret), name);
    store.create_api_key(&key).await?;

    println!("✓ API key created for {}", user.email);
    println!("  Key ID: {}", key.id);
    println!();
    println!("  {secret}");
    println!();
    println!("Save this key now - it will not be shown again.");
    Ok(())
}

async fn key_list(store: &SqlStore, user_id: Option<&str>) -> Result<()> {
    let keys = store.list_api_keys(user_id).await?;

    if keys.is_empty() {
        println!("No API keys found.");
        return Ok(());
    }

    println!(
        "\n{:<38} {:<38} {:<15} {:<22} {:<10}",
        "KEY ID", "USER ID", "NAME", "LAST USED", "STATUS"
    );
    println!("{}", "-".repeat(125));
    for key in keys {
        let name = key.name.as_deref().unwrap_or("-");
        let last_used = key
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let status = if key.is_active { "Active" } else { "Revoked" };
        println!(
            "{:<38} {:<38} {:<15} {:<22} {:<10}",
            key.id, key.user_id, name, last_used, status
        );
    }
    println!();
    Ok(())
}

async fn key_revoke(store: &SqlStore, key_id: &str) -> Result<()> {
    match store.revoke_api_key(key_id).await {
        Ok(()) => {
            println!("✓ API key {key_id} revoked");
            Ok(())
        }
        Err(common::StoreError::NotFound) => {
            eprintln!("Error: API key {key_id} not found");
            process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
